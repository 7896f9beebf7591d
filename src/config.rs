use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::GovernanceError;

/// Default config file picked up when present in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "governance-ledger.toml";
pub const ENV_PREFIX: &str = "GOVLEDGER";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default = "default_track")]
    pub default_track: String,
    #[serde(default = "default_anchor_dir")]
    pub anchor_dir: PathBuf,
    #[serde(default = "default_anchor_protocol")]
    pub anchor_protocol: String,
    #[serde(default = "default_policy_manifest")]
    pub policy_manifest: PathBuf,
    #[serde(default = "default_policy_signature")]
    pub policy_signature: PathBuf,
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
    /// Upper bound on ledger lines / anchor files scanned per call
    #[serde(default)]
    pub max_scan: Option<usize>,
    #[serde(default)]
    pub publisher: PublisherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub ipfs_endpoint: Option<String>,
    #[serde(default)]
    pub ipfs_token: Option<String>,
    #[serde(default)]
    pub arweave_endpoint: Option<String>,
    #[serde(default)]
    pub arweave_token: Option<String>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            ipfs_endpoint: None,
            ipfs_token: None,
            arweave_endpoint: None,
            arweave_token: None,
        }
    }
}

impl PublisherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/governance_ledger.jsonl")
}

fn default_node_id() -> String {
    "node-01".to_string()
}

fn default_track() -> String {
    "insider".to_string()
}

fn default_anchor_dir() -> PathBuf {
    PathBuf::from("data/anchors")
}

fn default_anchor_protocol() -> String {
    "dual-anchor/v1".to_string()
}

fn default_policy_manifest() -> PathBuf {
    PathBuf::from("constitution/policy_manifest.yml")
}

fn default_policy_signature() -> PathBuf {
    PathBuf::from("constitution/policy_manifest.sig")
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            node_id: default_node_id(),
            default_track: default_track(),
            anchor_dir: default_anchor_dir(),
            anchor_protocol: default_anchor_protocol(),
            policy_manifest: default_policy_manifest(),
            policy_signature: default_policy_signature(),
            schema_path: None,
            max_scan: None,
            publisher: PublisherConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from an optional TOML file overlaid with `GOVLEDGER_*` environment variables.
    ///
    /// An explicitly named file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, GovernanceError> {
        let file_source = match path {
            Some(path) => ::config::File::from(path).required(true),
            None => ::config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let env_source = ::config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);

        let config = ::config::Config::builder()
            .add_source(file_source)
            .add_source(env_source)
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.node_id.trim().is_empty() {
            return Err(GovernanceError::Config("node_id must not be empty".to_string()));
        }
        if self.node_id.contains('\n') || self.anchor_protocol.contains('\n') {
            return Err(GovernanceError::Config(
                "node_id and anchor_protocol must be single-line".to_string(),
            ));
        }
        if self.anchor_protocol.trim().is_empty() {
            return Err(GovernanceError::Config(
                "anchor_protocol must not be empty".to_string(),
            ));
        }
        if self.publisher.timeout_secs == 0 {
            return Err(GovernanceError::Config(
                "publisher.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
