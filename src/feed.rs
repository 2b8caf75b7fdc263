use std::{
    collections::HashSet,
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use futures::{
    future::{self, OptionFuture},
    stream, StreamExt,
};
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::time::{self, MissedTickBehavior};

use crate::{
    chain::{Address, Ledger, Post, Profile},
    content::{ContentPointer, ContentStore, Resolver},
};

/// Bio shown for suggested users that left theirs empty.
pub const DEFAULT_BIO: &str = "Web3 creator";

/// How many post ids the main feed scans. There is no way to ask the ledger
/// for the highest id, so this is an upper bound, not a count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScanPolicy {
    pub window: u64,
    /// Post ids fetched at the same time.
    pub concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiscoveryPolicy {
    pub window: u64,
    /// Stop once this many users were found.
    pub limit: usize,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            window: 20,
            concurrency: 4,
        }
    }
}
impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            window: 50,
            limit: 5,
        }
    }
}

/// Post joined with its author, the viewer's like and resolved media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPost {
    pub id: u64,
    pub author: Address,
    pub username: String,
    pub avatar_url: Option<String>,
    pub text: String,
    /// Kept even when it could not be resolved, so the media can be retried.
    pub content: ContentPointer,
    pub media_url: Option<String>,
    pub timestamp: u64,
    pub like_count: u64,
    pub liked: bool,
    /// Manual media retries so far.
    pub media_retries: u32,
}

impl FeedPost {
    pub fn media_missing(&self) -> bool {
        !self.content.is_empty() && self.media_url.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestedUser {
    pub address: Address,
    pub username: String,
    pub bio: String,
    pub avatar_url: Option<String>,
    pub following: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileView {
    pub address: Address,
    pub profile: Option<Profile>,
    pub avatar_url: Option<String>,
    pub post_ids: Vec<u64>,
}

/// Display name for authors without a usable profile.
pub fn fallback_name(author: &Address) -> String {
    format!("User{}", author.suffix(4))
}

/// Builds snapshots of the feed out of ledger reads.
///
/// Every enrichment step degrades on its own: a failed profile read gives the
/// fallback name, a failed like read gives "not liked", unresolvable media
/// leaves `media_url` empty. Only a missing (or unreadable) post is dropped.
pub struct FeedAssembler<'a, L: ?Sized, S> {
    ledger: &'a L,
    resolver: &'a Resolver<S>,
    scan: ScanPolicy,
    discovery: DiscoveryPolicy,
}

impl<'a, L, S> FeedAssembler<'a, L, S>
where
    L: Ledger + ?Sized,
    S: ContentStore,
{
    pub fn new(ledger: &'a L, resolver: &'a Resolver<S>) -> Self {
        Self {
            ledger,
            resolver,
            scan: ScanPolicy::default(),
            discovery: DiscoveryPolicy::default(),
        }
    }

    pub fn with_scan(mut self, scan: ScanPolicy) -> Self {
        self.scan = scan;
        self
    }

    pub fn with_discovery(mut self, discovery: DiscoveryPolicy) -> Self {
        self.discovery = discovery;
        self
    }

    /// Posts `1..=window`, newest first.
    pub async fn assemble(&self, viewer: &Address) -> Vec<FeedPost> {
        let mut posts: Vec<FeedPost> = stream::iter(1..=self.scan.window)
            .map(|id| self.load(id, viewer))
            .buffer_unordered(self.scan.concurrency.max(1))
            .filter_map(future::ready)
            .collect()
            .await;

        posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        info!(
            "Assembled {} posts out of {} ids",
            posts.len(),
            self.scan.window
        );

        posts
    }

    async fn fetch_post(&self, id: u64) -> Option<Post> {
        match self.ledger.post(id).await {
            Ok(post) => post,
            Err(e) => {
                debug!("Skipping post {id}: {e}");
                None
            }
        }
    }

    async fn fetch_profile(&self, account: &Address) -> Option<Profile> {
        self.ledger.profile(account).await.unwrap_or_else(|e| {
            warn!("Profile of {account} unavailable: {e}");
            None
        })
    }

    async fn avatar_url(&self, profile: Option<&Profile>) -> Option<String> {
        let pointer = ContentPointer::new(profile?.avatar.as_str());
        self.resolver.display_url(&pointer).await
    }

    async fn load(&self, id: u64, viewer: &Address) -> Option<FeedPost> {
        let post = self.fetch_post(id).await?;
        let profile = self.fetch_profile(&post.author).await;
        let liked = self
            .ledger
            .has_liked(post.id, viewer)
            .await
            .unwrap_or_else(|e| {
                warn!("Like state of post {} unavailable: {e}", post.id);
                false
            });
        let avatar_url = self.avatar_url(profile.as_ref()).await;

        let content = ContentPointer::new(post.content);
        let media_url = self.resolve_media(post.id, &content).await;

        Some(FeedPost {
            id: post.id,
            username: profile
                .map(|p| p.username)
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| fallback_name(&post.author)),
            author: post.author,
            avatar_url,
            text: post.text,
            content,
            media_url,
            timestamp: post.timestamp,
            like_count: post.like_count,
            liked,
            media_retries: 0,
        })
    }

    async fn resolve_media(&self, id: u64, content: &ContentPointer) -> Option<String> {
        if content.is_empty() {
            return None;
        }
        if !self.resolver.is_accessible(content).await {
            warn!("Media {content} of post {id} is not accessible (yet)");
            return None;
        }
        self.resolver.display_url(content).await
    }

    /// Re-resolves the media of a single post. Returns whether it now has a URL.
    pub async fn retry_media(&self, post: &mut FeedPost) -> bool {
        post.media_retries += 1;
        info!(
            "Retrying media for post {} (attempt {})",
            post.id, post.media_retries
        );

        post.media_url = self.resolve_media(post.id, &post.content).await;
        post.media_url.is_some()
    }

    /// Rescans every `every` and hands each finished snapshot to `on_frame`.
    ///
    /// At most one scan is in flight: ticks that fire while it runs are
    /// skipped, so a slow ledger never piles up requests.
    pub async fn watch<F>(&self, viewer: &Address, every: Duration, mut on_frame: F)
    where
        F: FnMut(Vec<FeedPost>),
    {
        let guard = ScanGuard::new();
        let start = {
            let guard = &guard;
            move || Box::pin(guard.run(self.assemble(viewer)))
        };

        let mut ticks = time::interval(every);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scan = Some(start());

        loop {
            tokio::select! {
                _ = ticks.tick() => {
                    if scan.is_none() {
                        scan = Some(start());
                    } else {
                        debug!("Previous scan still running, skipping tick");
                    }
                }
                Some(result) = OptionFuture::from(scan.as_mut()), if scan.is_some() => {
                    scan = None;
                    if let Some(posts) = result {
                        on_frame(posts);
                    }
                }
            }
        }
    }

    /// Authors worth following, found by walking posts in id order.
    pub async fn discover(&self, viewer: &Address) -> Vec<SuggestedUser> {
        let mut seen = HashSet::from([*viewer]);
        let mut users = Vec::new();

        for id in 1..=self.discovery.window {
            if users.len() >= self.discovery.limit {
                break;
            }

            let Some(post) = self.fetch_post(id).await else {
                continue;
            };
            if !seen.insert(post.author) {
                continue;
            }

            let profile = match self.fetch_profile(&post.author).await {
                Some(p) if !p.username.is_empty() => p,
                _ => continue,
            };
            let following = self
                .ledger
                .is_following(viewer, &post.author)
                .await
                .unwrap_or_else(|e| {
                    warn!("Follow state of {} unavailable: {e}", post.author);
                    false
                });
            let avatar_url = self.avatar_url(Some(&profile)).await;

            users.push(SuggestedUser {
                address: post.author,
                username: profile.username,
                bio: if profile.bio.is_empty() {
                    DEFAULT_BIO.to_owned()
                } else {
                    profile.bio
                },
                avatar_url,
                following,
            });
        }

        users
    }

    pub async fn profile_view(&self, account: &Address) -> ProfileView {
        let profile = self.fetch_profile(account).await;
        let avatar_url = self.avatar_url(profile.as_ref()).await;
        let post_ids = self
            .ledger
            .posts_by_user(account)
            .await
            .unwrap_or_else(|e| {
                warn!("Posts of {account} unavailable: {e}");
                Vec::new()
            });

        ProfileView {
            address: *account,
            profile,
            avatar_url,
            post_ids,
        }
    }
}

/// Lets only the newest of overlapping scans publish its result.
#[derive(Debug, Default)]
pub struct ScanGuard {
    generation: AtomicU64,
}

pub struct ScanTicket<'a> {
    guard: &'a ScanGuard,
    generation: u64,
}

impl ScanGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a scan, superseding every ticket handed out before.
    pub fn begin(&self) -> ScanTicket<'_> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        ScanTicket {
            guard: self,
            generation,
        }
    }

    /// Takes a ticket now and runs `scan`. Resolves to `None` when another
    /// scan began before this one finished.
    pub fn run<'a, F>(&'a self, scan: F) -> impl Future<Output = Option<F::Output>> + 'a
    where
        F: Future + 'a,
    {
        let ticket = self.begin();
        async move {
            let out = scan.await;
            if ticket.is_current() {
                Some(out)
            } else {
                debug!("Discarding stale scan #{}", ticket.generation);
                None
            }
        }
    }
}

impl ScanTicket<'_> {
    pub fn is_current(&self) -> bool {
        self.guard.generation.load(Ordering::SeqCst) == self.generation
    }
}
