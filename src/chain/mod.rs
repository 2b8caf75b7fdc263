use async_trait::async_trait;

pub mod abi;
pub mod rpc;
mod types;

pub use abi::AbiError;
pub use types::{Address, Event, Post, Profile, Receipt, Write};

#[derive(Debug)]
pub enum ChainError {
    Http(reqwest::Error),
    Scheme(serde_json::Error),
    Abi(AbiError),
    Rpc { code: i64, message: String },
    /// The contract rejected the call.
    Reverted(String),
    /// The wallet owner declined to sign.
    Declined,
    InsufficientFunds,
    NoAccounts,
    Malformed(&'static str),
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(e) => e.fmt(f),
            Self::Scheme(e) => e.fmt(f),
            Self::Abi(e) => e.fmt(f),
            Self::Rpc { code, message } => write!(f, "RPC returned error {code}: {message}"),
            Self::Reverted(reason) => write!(f, "execution reverted: {reason}"),
            Self::Declined => write!(f, "user rejected the request"),
            Self::InsufficientFunds => write!(f, "insufficient funds for transaction"),
            Self::NoAccounts => write!(f, "wallet did not expose any account"),
            Self::Malformed(what) => write!(f, "malformed RPC response: {what}"),
        }
    }
}
impl std::error::Error for ChainError {}

impl ChainError {
    /// Sorts a JSON-RPC error into the categories the client reports separately.
    pub fn from_rpc(code: i64, message: String, revert_data: Option<&[u8]>) -> Self {
        let lower = message.to_lowercase();

        if code == 4001 || lower.contains("user rejected") || lower.contains("user denied") {
            Self::Declined
        } else if lower.contains("insufficient funds") {
            Self::InsufficientFunds
        } else if code == 3 || lower.contains("revert") {
            let reason = revert_data
                .and_then(abi::revert_reason)
                .or_else(|| {
                    message
                        .split_once("execution reverted: ")
                        .map(|(_, r)| r.to_owned())
                })
                .unwrap_or(message);
            Self::Reverted(reason)
        } else {
            Self::Rpc { code, message }
        }
    }

    /// A revert on a view call means the record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Reverted(_))
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Declined => "Transaction was rejected".to_owned(),
            Self::InsufficientFunds => "Insufficient funds for transaction".to_owned(),
            Self::Reverted(reason) => format!("Contract error: {reason}"),
            e => e.to_string(),
        }
    }
}

/// Read and write access to the Drippy contract.
///
/// Reads return `Ok(None)` (or the default) for records that do not exist and
/// reserve `Err` for transport failures.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn profile(&self, account: &Address) -> Result<Option<Profile>, ChainError>;

    async fn post(&self, id: u64) -> Result<Option<Post>, ChainError>;

    async fn posts_by_user(&self, account: &Address) -> Result<Vec<u64>, ChainError>;

    async fn has_liked(&self, id: u64, account: &Address) -> Result<bool, ChainError>;

    async fn is_following(
        &self,
        follower: &Address,
        followee: &Address,
    ) -> Result<bool, ChainError>;

    /// Submits a transaction and resolves once the ledger confirms it.
    async fn submit(&self, write: Write) -> Result<Receipt, ChainError>;
}
