use thiserror::Error;

use crate::validation::schema::SchemaError;

/// Exit codes exposed by the command line entry point, one per failure category.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const USAGE: i32 = 1;
    pub const STRUCTURAL: i32 = 2;
    pub const CHAIN_INTEGRITY: i32 = 3;
    pub const SIGNATURE: i32 = 4;
    pub const LINK_MISMATCH: i32 = 5;
    pub const EMPTY_CHAIN: i32 = 6;
    pub const PUBLISHER: i32 = 7;
    pub const SCHEMA: i32 = 8;
    pub const CONFIG: i32 = 9;
}

#[derive(Error, Debug)]
pub enum GovernanceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Chain integrity violation: {0}")]
    ChainIntegrity(String),

    #[error("Signature verification failed: {0}")]
    Signature(String),

    #[error("Anchor link mismatch: {0}")]
    LinkMismatch(String),

    #[error("No anchor records found in {0}")]
    EmptyChain(String),

    #[error(transparent)]
    Publisher(#[from] PublisherError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GovernanceError {
    /// Process exit code for this failure category
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => exit_code::USAGE,
            Self::Structural(_) => exit_code::STRUCTURAL,
            Self::ChainIntegrity(_) => exit_code::CHAIN_INTEGRITY,
            Self::Signature(_) => exit_code::SIGNATURE,
            Self::LinkMismatch(_) => exit_code::LINK_MISMATCH,
            Self::EmptyChain(_) => exit_code::EMPTY_CHAIN,
            Self::Publisher(_) => exit_code::PUBLISHER,
            Self::Schema(_) => exit_code::SCHEMA,
            Self::Config(_) | Self::Io(_) | Self::Serialization(_) => exit_code::CONFIG,
        }
    }

    pub fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        Self::Io(format!("{}: {}", context, err))
    }
}

impl From<serde_json::Error> for GovernanceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<::config::ConfigError> for GovernanceError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Failures reported by an external anchor publisher.
///
/// These never touch local ledger or anchor state and are never retried
/// automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublisherError {
    #[error("{network} publisher is not configured: missing {key}")]
    MissingConfig { network: String, key: String },

    #[error("{network} upload timed out after {secs}s")]
    Timeout { network: String, secs: u64 },

    #[error("{network} upload failed: {message}")]
    Http { network: String, message: String },

    #[error("{network} returned an unusable response: {message}")]
    Response { network: String, message: String },
}
