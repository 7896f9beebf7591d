pub mod anchor;
pub mod audit;
pub mod config;
pub mod error;
pub mod policy;
pub mod validation;

pub use error::GovernanceError;
