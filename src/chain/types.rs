use std::{fmt, str::FromStr};

use super::abi::{self, AbiError, Decoder, Token};

/// Account identifier: a 20-byte public address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

#[derive(Debug)]
pub struct ParseAddressError(String);

impl fmt::Display for ParseAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` is not a 0x-prefixed 20-byte hex address", self.0)
    }
}
impl std::error::Error for ParseAddressError {}

impl Address {
    pub const ZERO: Self = Self([0; 20]);

    pub fn new(raw: [u8; 20]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Last `n` hex digits, lowercase.
    pub fn suffix(&self, n: usize) -> String {
        let hex = hex::encode(self.0);
        hex[hex.len() - n.min(hex.len())..].to_owned()
    }

    /// `0x1234...abcd`
    pub fn abbreviated(&self) -> String {
        let full = self.to_string();
        format!("{}...{}", &full[..6], &full[full.len() - 4..])
    }
}

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .filter(|d| d.len() == 40)
            .ok_or_else(|| ParseAddressError(s.to_owned()))?;

        let mut raw = [0u8; 20];
        hex::decode_to_slice(digits, &mut raw).map_err(|_| ParseAddressError(s.to_owned()))?;

        Ok(Self(raw))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}
impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Post as stored on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: u64,
    pub author: Address,
    pub text: String,
    /// Pinning service file id. Empty when nothing is attached.
    pub content: String,
    /// Seconds since epoch, assigned by the ledger.
    pub timestamp: u64,
    pub like_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub username: String,
    pub bio: String,
    pub avatar: String,
}

impl Post {
    /// Decodes `getPost` output. A zeroed record means the id is unassigned.
    pub fn decode(data: &[u8]) -> Result<Option<Self>, AbiError> {
        let dec = Decoder::new(data);
        let post = Self {
            id: dec.u64(0)?,
            author: dec.address(1)?,
            text: dec.string(2)?,
            content: dec.string(3)?,
            timestamp: dec.u64(4)?,
            like_count: dec.u64(5)?,
        };

        Ok((post.id != 0 && !post.author.is_zero()).then_some(post))
    }
}

impl Profile {
    /// Decodes `getProfile` output. An all-empty record means no profile.
    pub fn decode(data: &[u8]) -> Result<Option<Self>, AbiError> {
        let dec = Decoder::new(data);
        let profile = Self {
            username: dec.string(0)?,
            bio: dec.string(1)?,
            avatar: dec.string(2)?,
        };

        Ok((profile != Self::default()).then_some(profile))
    }
}

/// Confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    /// Contract events found in the receipt logs.
    pub events: Vec<Event>,
}

/// State-changing contract call. Submitting one costs a fee and is never replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    CreateProfile {
        username: String,
        bio: String,
        avatar: String,
    },
    UpdateProfile {
        username: String,
        bio: String,
        avatar: String,
    },
    CreatePost {
        text: String,
        content: String,
    },
    Like(u64),
    Unlike(u64),
    Follow(Address),
    Unfollow(Address),
    Tip {
        to: Address,
        wei: u128,
    },
}

impl Write {
    pub fn signature(&self) -> &'static str {
        match self {
            Self::CreateProfile { .. } => "createProfile(string,string,string)",
            Self::UpdateProfile { .. } => "updateProfile(string,string,string)",
            Self::CreatePost { .. } => "createPost(string,string)",
            Self::Like(_) => "likePost(uint256)",
            Self::Unlike(_) => "unlikePost(uint256)",
            Self::Follow(_) => "follow(address)",
            Self::Unfollow(_) => "unfollow(address)",
            Self::Tip { .. } => "tipUser(address)",
        }
    }

    pub fn calldata(&self) -> Vec<u8> {
        let tokens = match self {
            Self::CreateProfile {
                username,
                bio,
                avatar,
            }
            | Self::UpdateProfile {
                username,
                bio,
                avatar,
            } => vec![
                Token::String(username.clone()),
                Token::String(bio.clone()),
                Token::String(avatar.clone()),
            ],
            Self::CreatePost { text, content } => {
                vec![Token::String(text.clone()), Token::String(content.clone())]
            }
            Self::Like(id) | Self::Unlike(id) => vec![Token::Uint(u128::from(*id))],
            Self::Follow(a) | Self::Unfollow(a) | Self::Tip { to: a, .. } => {
                vec![Token::Address(*a)]
            }
        };

        abi::encode_call(self.signature(), &tokens)
    }

    /// Wei attached to the transaction.
    pub fn value(&self) -> u128 {
        match self {
            Self::Tip { wei, .. } => *wei,
            _ => 0,
        }
    }
}

impl fmt::Display for Write {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateProfile { username, .. } => write!(f, "createProfile({username})"),
            Self::UpdateProfile { username, .. } => write!(f, "updateProfile({username})"),
            Self::CreatePost { content, .. } if content.is_empty() => write!(f, "createPost"),
            Self::CreatePost { content, .. } => write!(f, "createPost(+{content})"),
            Self::Like(id) => write!(f, "likePost({id})"),
            Self::Unlike(id) => write!(f, "unlikePost({id})"),
            Self::Follow(a) => write!(f, "follow({a})"),
            Self::Unfollow(a) => write!(f, "unfollow({a})"),
            Self::Tip { to, wei } => write!(f, "tipUser({to}, {wei} wei)"),
        }
    }
}

/// Events emitted by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ProfileCreated,
    ProfileUpdated,
    PostCreated,
    PostLiked,
    PostUnliked,
    Followed,
    Unfollowed,
    Tipped,
}

impl Event {
    pub const ALL: [Self; 8] = [
        Self::ProfileCreated,
        Self::ProfileUpdated,
        Self::PostCreated,
        Self::PostLiked,
        Self::PostUnliked,
        Self::Followed,
        Self::Unfollowed,
        Self::Tipped,
    ];

    pub fn signature(&self) -> &'static str {
        match self {
            Self::ProfileCreated => "ProfileCreated(address,string)",
            Self::ProfileUpdated => "ProfileUpdated(address,string)",
            Self::PostCreated => "PostCreated(uint256,address,string,string)",
            Self::PostLiked => "PostLiked(uint256,address)",
            Self::PostUnliked => "PostUnliked(uint256,address)",
            Self::Followed => "Followed(address,address)",
            Self::Unfollowed => "Unfollowed(address,address)",
            Self::Tipped => "Tipped(address,address,uint256)",
        }
    }

    pub fn topic(&self) -> [u8; 32] {
        abi::keccak(self.signature().as_bytes())
    }

    pub fn from_topic(topic: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.topic() == topic)
    }
}
