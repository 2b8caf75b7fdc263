//! In-memory stand-ins for the ledger and the pinning service.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    chain::{Address, ChainError, Ledger, Post, Profile, Receipt, Write},
    content::{ContentError, ContentPointer, ContentStore, FileInfo},
};

pub fn addr(n: u8) -> Address {
    let mut raw = [0u8; 20];
    raw[19] = n;
    raw[0] = 0xab;
    Address::new(raw)
}

#[derive(Default)]
pub struct FakeLedger {
    pub posts: HashMap<u64, Post>,
    pub profiles: HashMap<Address, Profile>,
    pub likes: HashSet<(u64, Address)>,
    pub follows: HashSet<(Address, Address)>,
    pub failing_posts: HashSet<u64>,
    pub failing_profiles: HashSet<Address>,
    pub failing_likes: bool,
    pub delay: Option<Duration>,
    rejection: Mutex<Option<ChainError>>,
    submitted: Mutex<Vec<Write>>,
    post_reads: AtomicUsize,
    posts_in_flight: AtomicUsize,
    max_posts_in_flight: AtomicUsize,
}

impl FakeLedger {
    pub fn with_post(mut self, id: u64, author: Address, timestamp: u64) -> Self {
        self.posts.insert(
            id,
            Post {
                id,
                author,
                text: format!("post #{id}"),
                content: String::new(),
                timestamp,
                like_count: 0,
            },
        );
        self
    }

    pub fn with_content(mut self, id: u64, content: &str) -> Self {
        if let Some(post) = self.posts.get_mut(&id) {
            post.content = content.to_owned();
        }
        self
    }

    pub fn with_profile(mut self, account: Address, username: &str, avatar: &str) -> Self {
        self.profiles.insert(
            account,
            Profile {
                username: username.to_owned(),
                bio: String::new(),
                avatar: avatar.to_owned(),
            },
        );
        self
    }

    /// Makes the next write fail with `err`.
    pub fn reject_next(&self, err: ChainError) {
        *self.rejection.lock().unwrap() = Some(err);
    }

    pub fn submitted(&self) -> Vec<Write> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn post_reads(&self) -> usize {
        self.post_reads.load(Ordering::SeqCst)
    }

    /// Highest number of `post` reads that were running at the same time.
    pub fn max_posts_in_flight(&self) -> usize {
        self.max_posts_in_flight.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn transport() -> ChainError {
    ChainError::Rpc {
        code: -32603,
        message: "connection reset".into(),
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn profile(&self, account: &Address) -> Result<Option<Profile>, ChainError> {
        self.pause().await;
        if self.failing_profiles.contains(account) {
            return Err(transport());
        }
        Ok(self.profiles.get(account).cloned())
    }

    async fn post(&self, id: u64) -> Result<Option<Post>, ChainError> {
        self.post_reads.fetch_add(1, Ordering::SeqCst);
        let running = self.posts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_posts_in_flight.fetch_max(running, Ordering::SeqCst);
        self.pause().await;
        self.posts_in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing_posts.contains(&id) {
            return Err(transport());
        }
        Ok(self.posts.get(&id).cloned())
    }

    async fn posts_by_user(&self, account: &Address) -> Result<Vec<u64>, ChainError> {
        let mut ids: Vec<u64> = self
            .posts
            .values()
            .filter(|p| p.author == *account)
            .map(|p| p.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn has_liked(&self, id: u64, account: &Address) -> Result<bool, ChainError> {
        if self.failing_likes {
            return Err(transport());
        }
        Ok(self.likes.contains(&(id, *account)))
    }

    async fn is_following(
        &self,
        follower: &Address,
        followee: &Address,
    ) -> Result<bool, ChainError> {
        Ok(self.follows.contains(&(*follower, *followee)))
    }

    async fn submit(&self, write: Write) -> Result<Receipt, ChainError> {
        self.submitted.lock().unwrap().push(write);
        if let Some(err) = self.rejection.lock().unwrap().take() {
            return Err(err);
        }
        Ok(Receipt {
            tx_hash: "0xfeed".into(),
            block_number: Some(1),
            events: Vec::new(),
        })
    }
}

/// Pinning service whose files can lag behind their upload.
#[derive(Default)]
pub struct FakeStore {
    files: Mutex<HashMap<String, String>>,
    hidden: Mutex<HashSet<String>>,
    lagging: bool,
    uploads: AtomicUsize,
    lookups: AtomicUsize,
}

impl FakeStore {
    /// Uploads stay inaccessible until [`FakeStore::publish`] is called.
    pub fn lagging(mut self) -> Self {
        self.lagging = true;
        self
    }

    pub fn with_file(self, id: &str, cid: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(id.to_owned(), cid.to_owned());
        self
    }

    pub fn publish(&self, pointer: &ContentPointer) {
        self.hidden.lock().unwrap().remove(pointer.as_str());
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for FakeStore {
    async fn upload(&self, _name: &str, _bytes: &[u8]) -> Result<ContentPointer, ContentError> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("file-{n}");

        self.files
            .lock()
            .unwrap()
            .insert(id.clone(), format!("bafy-{n}"));
        if self.lagging {
            self.hidden.lock().unwrap().insert(id.clone());
        }

        Ok(ContentPointer::new(id))
    }

    async fn file_info(&self, pointer: &ContentPointer) -> Result<FileInfo, ContentError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let id = pointer.as_str();

        if self.hidden.lock().unwrap().contains(id) {
            return Err(ContentError::Status {
                code: 404,
                body: "not found".into(),
            });
        }

        let cid = self
            .files
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(ContentError::Status {
                code: 404,
                body: "not found".into(),
            })?;

        Ok(FileInfo {
            id: id.to_owned(),
            cid,
            name: None,
        })
    }
}
