use std::fmt;

use async_trait::async_trait;
use log::{debug, warn};

pub mod pinata;

/// Opaque handle returned by the pinning service on upload.
///
/// Not a URL: it has to be resolved to a content address first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ContentPointer(String);

impl ContentPointer {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank pointers mean "nothing attached".
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for ContentPointer {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
impl fmt::Display for ContentPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata of a pinned file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub id: String,
    /// Content address used to build gateway URLs.
    pub cid: String,
    pub name: Option<String>,
}

#[derive(Debug)]
pub enum ContentError {
    Http(reqwest::Error),
    Scheme(serde_json::Error),
    MissingCredential,
    EmptyPointer,
    Status { code: u16, body: String },
    MissingCid,
    Endpoint(String),
}

impl fmt::Display for ContentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => e.fmt(f),
            Self::Scheme(e) => e.fmt(f),
            Self::MissingCredential => write!(f, "pinning service credential is not configured"),
            Self::EmptyPointer => write!(f, "empty file id"),
            Self::Status { code, body } => write!(f, "pinning service returned {code}: {body}"),
            Self::MissingCid => write!(f, "file info response has no CID"),
            Self::Endpoint(url) => write!(f, "`{url}` cannot be used as an API base URL"),
        }
    }
}
impl std::error::Error for ContentError {}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn upload(&self, name: &str, bytes: &[u8]) -> Result<ContentPointer, ContentError>;

    async fn file_info(&self, pointer: &ContentPointer) -> Result<FileInfo, ContentError>;
}

/// Turns content pointers into gateway URLs.
pub struct Resolver<S> {
    store: S,
    gateway: String,
}

impl<S: ContentStore> Resolver<S> {
    pub fn new(store: S, gateway: impl Into<String>) -> Self {
        let mut gateway = gateway.into();
        while gateway.ends_with('/') {
            gateway.pop();
        }

        Self { store, gateway }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn gateway_url(&self, cid: &str) -> String {
        format!("{}/{cid}", self.gateway)
    }

    pub async fn upload(&self, name: &str, bytes: &[u8]) -> Result<ContentPointer, ContentError> {
        self.store.upload(name, bytes).await
    }

    pub async fn file_info(&self, pointer: &ContentPointer) -> Result<FileInfo, ContentError> {
        if pointer.is_empty() {
            return Err(ContentError::EmptyPointer);
        }
        self.store.file_info(pointer).await
    }

    /// `None` means the file cannot be displayed (yet).
    pub async fn display_url(&self, pointer: &ContentPointer) -> Option<String> {
        match self.file_info(pointer).await {
            Ok(info) => {
                let url = self.gateway_url(&info.cid);
                debug!("{pointer} -> {url}");
                Some(url)
            }
            Err(ContentError::EmptyPointer) => None,
            Err(e) => {
                warn!("Could not resolve {pointer}: {e}");
                None
            }
        }
    }

    /// Whether the file metadata is reachable. A fresh upload may report
    /// `false` until the pinning service has propagated it.
    pub async fn is_accessible(&self, pointer: &ContentPointer) -> bool {
        match self.file_info(pointer).await {
            Ok(_) => true,
            Err(e) => {
                debug!("{pointer} not accessible: {e}");
                false
            }
        }
    }
}
