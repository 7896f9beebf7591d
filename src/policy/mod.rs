//! Policy Manifest Trust
//!
//! Fail-closed signature gate over the policy manifest, plus manifest
//! loading, signing and drift detection.

pub mod manifest;
pub mod signature;

pub use manifest::{DriftReport, FileDrift, PolicyManifest};
pub use signature::{sign_manifest, PolicyGate, PolicyToken};
