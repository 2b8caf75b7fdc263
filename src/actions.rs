use std::{fmt, path::Path};

use log::{info, warn};

use crate::{
    chain::{Address, ChainError, Ledger, Receipt, Write},
    content::{ContentError, ContentPointer, ContentStore, Resolver},
};

/// Amounts offered by the tip form, in ether.
pub const TIP_PRESETS: [&str; 4] = ["0.001", "0.01", "0.1", "1"];

const WEI_DECIMALS: usize = 18;

#[derive(Debug)]
pub enum ActionError {
    /// A previous request on the same control has not settled.
    Busy,
    Invalid(&'static str),
    Chain(ChainError),
    Content(ContentError),
    File(std::io::Error),
    /// Uploaded, but the pinning service does not serve the file yet.
    MediaPending(ContentPointer),
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "request already in flight"),
            Self::Invalid(why) => f.write_str(why),
            Self::Chain(e) => e.fmt(f),
            Self::Content(e) => e.fmt(f),
            Self::File(e) => write!(f, "failed to read file: {e}"),
            Self::MediaPending(p) => write!(f, "uploaded file {p} is not accessible yet"),
        }
    }
}
impl std::error::Error for ActionError {}

impl ActionError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Busy => "Please wait for the previous request to finish".to_owned(),
            Self::Invalid(why) => (*why).to_owned(),
            Self::Chain(e) => e.user_message(),
            Self::Content(e) => format!("File upload failed: {e}"),
            Self::File(e) => format!("Could not read file: {e}"),
            Self::MediaPending(p) => format!(
                "File {p} is not accessible yet (it may still be propagating). Try again later with --pointer {p}"
            ),
        }
    }
}

/// A value shown before the write that changes it has confirmed.
#[derive(Debug, Clone)]
pub struct Optimistic<T> {
    value: T,
    pending: bool,
}

impl<T> Optimistic<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            pending: false,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Shows `next` right away and returns what to restore on failure.
    pub fn begin(&mut self, next: T) -> Result<T, ActionError> {
        if self.pending {
            return Err(ActionError::Busy);
        }
        self.pending = true;

        Ok(std::mem::replace(&mut self.value, next))
    }

    /// Ends the request, restoring `snapshot` if it failed.
    pub fn settle<R, E>(&mut self, snapshot: T, outcome: Result<R, E>) -> Result<R, E> {
        self.pending = false;
        if outcome.is_err() {
            self.value = snapshot;
        }
        outcome
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeState {
    pub liked: bool,
    pub count: u64,
}

pub struct LikeButton {
    post_id: u64,
    state: Optimistic<LikeState>,
}

impl LikeButton {
    pub fn new(post_id: u64, liked: bool, count: u64) -> Self {
        Self {
            post_id,
            state: Optimistic::new(LikeState { liked, count }),
        }
    }

    pub fn state(&self) -> LikeState {
        *self.state.get()
    }

    pub async fn toggle<L: Ledger + ?Sized>(&mut self, ledger: &L) -> Result<LikeState, ActionError> {
        let current = self.state();
        let (next, write) = if current.liked {
            (
                LikeState {
                    liked: false,
                    count: current.count.saturating_sub(1),
                },
                Write::Unlike(self.post_id),
            )
        } else {
            (
                LikeState {
                    liked: true,
                    count: current.count.saturating_add(1),
                },
                Write::Like(self.post_id),
            )
        };

        let snapshot = self.state.begin(next)?;
        let outcome = ledger.submit(write).await;
        if let Err(e) = &outcome {
            warn!("Like toggle on post {} failed: {e}", self.post_id);
        }
        self.state
            .settle(snapshot, outcome)
            .map_err(ActionError::Chain)?;

        Ok(self.state())
    }
}

pub struct FollowButton {
    target: Address,
    following: Optimistic<bool>,
}

impl FollowButton {
    pub fn new(target: Address, following: bool) -> Self {
        Self {
            target,
            following: Optimistic::new(following),
        }
    }

    pub fn following(&self) -> bool {
        *self.following.get()
    }

    pub async fn toggle<L: Ledger + ?Sized>(&mut self, ledger: &L) -> Result<bool, ActionError> {
        let was = self.following();
        let write = if was {
            Write::Unfollow(self.target)
        } else {
            Write::Follow(self.target)
        };

        let snapshot = self.following.begin(!was)?;
        let outcome = ledger.submit(write).await;
        if let Err(e) = &outcome {
            warn!("Follow toggle on {} failed: {e}", self.target);
        }
        self.following
            .settle(snapshot, outcome)
            .map_err(ActionError::Chain)?;

        Ok(self.following())
    }
}

/// Parses a positive ether amount such as `0.01` into wei.
pub fn parse_ether(amount: &str) -> Result<u128, ActionError> {
    const INVALID: ActionError = ActionError::Invalid("Please enter a valid amount");

    let amount = amount.trim();
    let (whole, frac) = amount.split_once('.').unwrap_or((amount, ""));
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());

    if (whole.is_empty() && frac.is_empty())
        || !digits(whole)
        || !digits(frac)
        || frac.len() > WEI_DECIMALS
    {
        return Err(INVALID);
    }

    let scale = 10u128.pow(WEI_DECIMALS as u32);
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| INVALID)?
    };
    let frac: u128 = format!("{frac:0<width$}", width = WEI_DECIMALS)
        .parse()
        .map_err(|_| INVALID)?;

    let wei = whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac))
        .ok_or(INVALID)?;

    if wei == 0 {
        return Err(INVALID);
    }
    Ok(wei)
}

pub async fn send_tip<L: Ledger + ?Sized>(
    ledger: &L,
    sender: &Address,
    recipient: &Address,
    amount: &str,
) -> Result<Receipt, ActionError> {
    if sender == recipient {
        return Err(ActionError::Invalid("You cannot tip yourself"));
    }
    let wei = parse_ether(amount)?;

    info!("Tipping {} {amount} ({wei} wei)", recipient.abbreviated());
    ledger
        .submit(Write::Tip {
            to: *recipient,
            wei,
        })
        .await
        .map_err(ActionError::Chain)
}

/// A file picked for upload.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub async fn read(path: &Path) -> Result<Self, ActionError> {
        let bytes = tokio::fs::read(path).await.map_err(ActionError::File)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_owned());

        Ok(Self { name, bytes })
    }
}

/// Post creation form.
///
/// The uploaded pointer is kept across failed submits, so a file that is
/// still propagating is never uploaded twice.
#[derive(Debug, Default)]
pub struct Composer {
    text: String,
    attachment: Option<Attachment>,
    uploaded: Option<ContentPointer>,
}

impl Composer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Resumes with a file uploaded earlier.
    pub fn with_uploaded(mut self, pointer: ContentPointer) -> Self {
        self.uploaded = Some(pointer);
        self
    }

    #[cfg(test)]
    pub fn uploaded(&self) -> Option<&ContentPointer> {
        self.uploaded.as_ref()
    }

    async fn upload<S: ContentStore>(
        &mut self,
        resolver: &Resolver<S>,
    ) -> Result<ContentPointer, ActionError> {
        if let Some(pointer) = &self.uploaded {
            return Ok(pointer.clone());
        }
        let Some(file) = &self.attachment else {
            return Ok(ContentPointer::default());
        };

        let pointer = resolver
            .upload(&file.name, &file.bytes)
            .await
            .map_err(ActionError::Content)?;
        self.uploaded = Some(pointer.clone());

        Ok(pointer)
    }

    pub async fn submit<L, S>(
        &mut self,
        ledger: &L,
        resolver: &Resolver<S>,
    ) -> Result<Receipt, ActionError>
    where
        L: Ledger + ?Sized,
        S: ContentStore,
    {
        if self.text.trim().is_empty() && self.attachment.is_none() && self.uploaded.is_none() {
            return Err(ActionError::Invalid("Write something or attach a file"));
        }

        let content = self.upload(resolver).await?;
        if !content.is_empty() && !resolver.is_accessible(&content).await {
            return Err(ActionError::MediaPending(content));
        }

        let receipt = ledger
            .submit(Write::CreatePost {
                text: self.text.clone(),
                content: content.as_str().to_owned(),
            })
            .await
            .map_err(ActionError::Chain)?;

        *self = Self::default();
        Ok(receipt)
    }
}

/// Profile creation and editing form.
#[derive(Debug, Default)]
pub struct ProfileForm {
    pub username: String,
    pub bio: String,
    pub avatar: Option<Attachment>,
    /// Avatar kept when no new file is picked.
    pub current_avatar: ContentPointer,
}

impl ProfileForm {
    pub async fn submit<L, S>(
        &self,
        ledger: &L,
        resolver: &Resolver<S>,
        update: bool,
    ) -> Result<Receipt, ActionError>
    where
        L: Ledger + ?Sized,
        S: ContentStore,
    {
        let username = self.username.trim();
        if username.is_empty() {
            return Err(ActionError::Invalid("Username is required"));
        }

        let avatar = match &self.avatar {
            Some(file) => resolver
                .upload(&file.name, &file.bytes)
                .await
                .map_err(ActionError::Content)?,
            None => self.current_avatar.clone(),
        };

        let (username, bio, avatar) = (
            username.to_owned(),
            self.bio.clone(),
            avatar.as_str().to_owned(),
        );
        let write = if update {
            Write::UpdateProfile {
                username,
                bio,
                avatar,
            }
        } else {
            Write::CreateProfile {
                username,
                bio,
                avatar,
            }
        };

        ledger.submit(write).await.map_err(ActionError::Chain)
    }
}
