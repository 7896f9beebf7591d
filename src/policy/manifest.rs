//! Policy Manifest
//!
//! `{version, files: {path: sha256}}` describing the governed files, and a
//! drift check comparing the listed hashes with what is on disk.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

use crate::error::GovernanceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyManifest {
    pub version: String,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

/// A listed file whose current content differs from the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDrift {
    pub expected: String,
    /// `None` when the file is missing
    pub actual: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub version: String,
    pub checked: usize,
    pub drift: BTreeMap<String, FileDrift>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.drift.is_empty()
    }
}

impl PolicyManifest {
    /// Load manifest from a YAML (or JSON) file
    pub fn load(path: &Path) -> Result<Self, GovernanceError> {
        if !path.exists() {
            return Err(GovernanceError::Config(format!(
                "Policy manifest not found: {:?}",
                path
            )));
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| GovernanceError::io(format!("Failed to read {:?}", path), e))?;

        serde_yaml::from_str(&contents)
            .map_err(|e| GovernanceError::Config(format!("Failed to parse {:?}: {}", path, e)))
    }

    /// Compare each listed file under `base_dir` with its recorded hash
    pub fn check_drift(&self, base_dir: &Path) -> Result<DriftReport, GovernanceError> {
        let mut drift = BTreeMap::new();

        for (rel, expected) in &self.files {
            let path = base_dir.join(rel);
            let actual = if path.is_file() {
                Some(sha256_file(&path)?)
            } else {
                None
            };

            if actual.as_deref() != Some(expected.to_lowercase().as_str()) {
                warn!("Policy drift in {}: expected {}, found {:?}", rel, expected, actual);
                drift.insert(
                    rel.clone(),
                    FileDrift {
                        expected: expected.clone(),
                        actual,
                    },
                );
            }
        }

        info!(
            "Policy manifest {}: {} files checked, {} drifted",
            self.version,
            self.files.len(),
            drift.len()
        );

        Ok(DriftReport {
            version: self.version.clone(),
            checked: self.files.len(),
            drift,
        })
    }
}

/// Streaming SHA-256 of a file
pub fn sha256_file(path: &Path) -> Result<String, GovernanceError> {
    let file = File::open(path)
        .map_err(|e| GovernanceError::io(format!("Failed to open {:?}", path), e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| GovernanceError::io(format!("Failed to read {:?}", path), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
