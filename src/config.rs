use std::{fmt, time::Duration};

use reqwest::Url;
use serde::Deserialize;

use crate::{
    chain::Address,
    feed::{DiscoveryPolicy, ScanPolicy},
};

#[derive(Deserialize)]
pub struct Config {
    #[serde(default)]
    pub contract_address: String,
    #[serde(default)]
    pub pinata_jwt: Option<String>,
    #[serde(default)]
    pub chain_id: u64,
    #[serde(default)]
    pub network_name: String,

    /// Wallet JSON-RPC endpoint.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_upload_url")]
    pub pinata_upload_url: String,
    #[serde(default = "default_api_url")]
    pub pinata_api_url: String,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default = "default_poll_ms")]
    pub confirmation_poll_ms: u64,

    #[serde(default)]
    pub feed: ScanPolicy,
    #[serde(default)]
    pub discovery: DiscoveryPolicy,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_owned()
}
fn default_upload_url() -> String {
    "https://uploads.pinata.cloud/v3".to_owned()
}
fn default_api_url() -> String {
    "https://api.pinata.cloud/v3".to_owned()
}
fn default_gateway_url() -> String {
    "https://gateway.pinata.cloud/ipfs".to_owned()
}
fn default_poll_ms() -> u64 {
    1000
}

/// Validated configuration. Nothing talks to the network without one.
///
/// Holds the credential, so no `Debug`; see [`Settings::describe`].
pub struct Settings {
    pub contract: Address,
    pub pinata_jwt: String,
    pub chain_id: u64,
    pub network_name: String,
    pub rpc_url: String,
    pub pinata_upload_url: String,
    pub pinata_api_url: String,
    pub gateway_url: String,
    pub confirmation_poll: Duration,
    pub feed: ScanPolicy,
    pub discovery: DiscoveryPolicy,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_yaml::Error),
    MissingContractAddress,
    PlaceholderContractAddress(String),
    InvalidContractAddress(String),
    MissingCredential,
    MissingChainId,
    InvalidUrl { key: &'static str, value: String },
    EmptyWindow(&'static str),
    ChainMismatch { expected: u64, actual: u64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Failed to open config: {e}"),
            Self::Parse(e) => write!(f, "Failed to parse config: {e}"),
            Self::MissingContractAddress => write!(f, "Contract address is not set"),
            Self::PlaceholderContractAddress(v) => {
                write!(f, "Contract address `{v}` is a placeholder")
            }
            Self::InvalidContractAddress(v) => write!(f, "Contract address `{v}` is invalid"),
            Self::MissingCredential => write!(f, "Pinata JWT token is not configured"),
            Self::MissingChainId => write!(f, "Chain id is not set"),
            Self::InvalidUrl { key, value } => write!(f, "`{key}` is not a valid URL: {value}"),
            Self::EmptyWindow(key) => write!(f, "`{key}` must be greater than zero"),
            Self::ChainMismatch { expected, actual } => write!(
                f,
                "Wallet is connected to chain {actual}, expected chain {expected}"
            ),
        }
    }
}
impl std::error::Error for ConfigError {}

impl ConfigError {
    /// Steps shown under the error.
    pub fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::Io(_) | Self::Parse(_) => &[
                "Create the config file (see drippy.example.yml)",
                "Pass its location with --config",
            ],
            Self::MissingContractAddress
            | Self::PlaceholderContractAddress(_)
            | Self::InvalidContractAddress(_) => &[
                "Open your config file",
                "Set `contract_address` to the deployed contract address (0x followed by 40 hex digits)",
                "Run the command again",
            ],
            Self::MissingCredential => &[
                "Set `pinata_jwt` in your config file",
                "or export DRIPPY_PINATA_JWT / pass --pinata-jwt",
            ],
            Self::MissingChainId | Self::ChainMismatch { .. } => &[
                "Set `chain_id` to the id of the network the contract is deployed on",
                "Switch the wallet to that network",
            ],
            Self::InvalidUrl { .. } => &["Use full http(s) URLs, e.g. https://api.pinata.cloud/v3"],
            Self::EmptyWindow(_) => &["Remove the key to use the default or set a positive value"],
        }
    }
}

fn check_url(key: &'static str, value: &str) -> Result<(), ConfigError> {
    match Url::parse(value) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            key,
            value: value.to_owned(),
        }),
    }
}

fn check_contract(value: &str) -> Result<Address, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::MissingContractAddress);
    }

    match value.parse::<Address>() {
        Ok(a) if a.is_zero() => Err(ConfigError::PlaceholderContractAddress(value.to_owned())),
        Ok(a) => Ok(a),
        Err(_) if value.contains("...") || value.to_uppercase().contains("YOUR") => {
            Err(ConfigError::PlaceholderContractAddress(value.to_owned()))
        }
        Err(_) => Err(ConfigError::InvalidContractAddress(value.to_owned())),
    }
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(ConfigError::Parse)
    }

    pub fn validate(self) -> Result<Settings, ConfigError> {
        let contract = check_contract(&self.contract_address)?;
        let pinata_jwt = self
            .pinata_jwt
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingCredential)?;
        if self.chain_id == 0 {
            return Err(ConfigError::MissingChainId);
        }

        check_url("rpc_url", &self.rpc_url)?;
        check_url("pinata_upload_url", &self.pinata_upload_url)?;
        check_url("pinata_api_url", &self.pinata_api_url)?;
        check_url("gateway_url", &self.gateway_url)?;

        if self.feed.window == 0 {
            return Err(ConfigError::EmptyWindow("feed.window"));
        }
        if self.discovery.window == 0 {
            return Err(ConfigError::EmptyWindow("discovery.window"));
        }

        Ok(Settings {
            contract,
            pinata_jwt,
            chain_id: self.chain_id,
            network_name: self.network_name,
            rpc_url: self.rpc_url,
            pinata_upload_url: self.pinata_upload_url,
            pinata_api_url: self.pinata_api_url,
            gateway_url: self.gateway_url,
            confirmation_poll: Duration::from_millis(self.confirmation_poll_ms.max(1)),
            feed: self.feed,
            discovery: self.discovery,
        })
    }
}

impl Settings {
    /// Fails when the wallet sits on another network.
    pub fn check_chain(&self, actual: u64) -> Result<(), ConfigError> {
        if actual == self.chain_id {
            Ok(())
        } else {
            Err(ConfigError::ChainMismatch {
                expected: self.chain_id,
                actual,
            })
        }
    }

    /// Key/value view with the credential redacted.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        vec![
            ("contract address", self.contract.to_string()),
            ("pinata jwt", "SET".to_owned()),
            ("network", self.network_name.clone()),
            ("chain id", self.chain_id.to_string()),
            ("rpc url", self.rpc_url.clone()),
            ("pinata upload url", self.pinata_upload_url.clone()),
            ("pinata api url", self.pinata_api_url.clone()),
            ("gateway url", self.gateway_url.clone()),
            (
                "feed",
                format!(
                    "ids 1..={} ({} at a time)",
                    self.feed.window, self.feed.concurrency
                ),
            ),
            (
                "discovery",
                format!(
                    "ids 1..={}, up to {} users",
                    self.discovery.window, self.discovery.limit
                ),
            ),
        ]
    }
}
