//! Policy Signature Gate
//!
//! Fail-closed trust check for the policy manifest. The detached signature
//! file holds the hex SHA-256 of the manifest's raw bytes; anything other
//! than an exact match rejects every dependent operation.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::audit::canonical::sha256_hex;
use crate::error::GovernanceError;

/// Proof that the policy manifest signature was validated.
///
/// Only [`PolicyGate::validate_signature`] can construct one, and every
/// mutating operation takes `&PolicyToken`, so no code path can mutate
/// governed state without passing the gate first.
#[derive(Debug)]
pub struct PolicyToken {
    manifest_hash: String,
}

impl PolicyToken {
    /// Hash of the manifest bytes that were trusted
    pub fn manifest_hash(&self) -> &str {
        &self.manifest_hash
    }
}

/// Manifest/signature pair checked on every invocation
#[derive(Debug, Clone)]
pub struct PolicyGate {
    manifest_path: PathBuf,
    signature_path: PathBuf,
}

impl PolicyGate {
    pub fn new(manifest_path: impl Into<PathBuf>, signature_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            signature_path: signature_path.into(),
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn signature_path(&self) -> &Path {
        &self.signature_path
    }

    /// SHA-256 over the manifest file's raw bytes
    pub fn compute_hash(&self) -> Result<String, GovernanceError> {
        let bytes = fs::read(&self.manifest_path).map_err(|e| {
            GovernanceError::Signature(format!(
                "Cannot read policy manifest {}: {}",
                self.manifest_path.display(),
                e
            ))
        })?;
        Ok(sha256_hex(&bytes))
    }

    /// Validate the detached signature, yielding the capability token on success
    pub fn validate_signature(&self) -> Result<PolicyToken, GovernanceError> {
        if !self.signature_path.exists() {
            error!(
                "Policy signature file missing: {}",
                self.signature_path.display()
            );
            return Err(GovernanceError::Signature(
                "Missing required signature file for policy manifest".to_string(),
            ));
        }

        let stored = fs::read_to_string(&self.signature_path).map_err(|e| {
            GovernanceError::Signature(format!(
                "Cannot read policy signature {}: {}",
                self.signature_path.display(),
                e
            ))
        })?;
        let stored = stored.trim();
        let current = self.compute_hash()?;

        if stored != current {
            error!(
                "Policy manifest hash mismatch: signed {}, current {}",
                stored, current
            );
            return Err(GovernanceError::Signature(
                "Policy manifest hash does not match signature; rejecting all operations"
                    .to_string(),
            ));
        }

        debug!("Policy manifest signature valid: {}", current);
        Ok(PolicyToken {
            manifest_hash: current,
        })
    }
}

/// Write the signature file for a manifest (operator action)
pub fn sign_manifest(manifest_path: &Path, signature_path: &Path) -> Result<String, GovernanceError> {
    let gate = PolicyGate::new(manifest_path, signature_path);
    let hash = gate.compute_hash()?;

    if let Some(parent) = signature_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| GovernanceError::io("Failed to create signature directory", e))?;
        }
    }
    fs::write(signature_path, format!("{}\n", hash))
        .map_err(|e| GovernanceError::io("Failed to write policy signature", e))?;

    info!(
        "Signed policy manifest {} -> {}",
        manifest_path.display(),
        signature_path.display()
    );
    Ok(hash)
}
