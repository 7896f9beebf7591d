//! Anchor Chain Verification
//!
//! Walks anchor files in lexicographic filename order and checks that each
//! record links to the identifying IDs of the one before it. Unlike ledger
//! verification this stops at the first structural error or broken link.
//! Filenames must sort chronologically; nothing here reorders them.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::anchor::record::{
    anchor_stem, receipt_path, AnchorIds, AnchorReceipt, AnchorRecord, ANCHOR_PATTERN,
};
use crate::audit::canonical::is_hex64;
use crate::error::{exit_code, GovernanceError};

/// Source of the identifying IDs an anchor is known by on both networks
pub trait AnchorIdResolver {
    fn resolve(&self, anchor_path: &Path, record: &AnchorRecord)
        -> Result<AnchorIds, GovernanceError>;
}

/// Reads the IDs returned by the publishers from the sidecar receipt
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiptResolver;

impl AnchorIdResolver for ReceiptResolver {
    fn resolve(
        &self,
        anchor_path: &Path,
        _record: &AnchorRecord,
    ) -> Result<AnchorIds, GovernanceError> {
        let path = receipt_path(anchor_path).ok_or_else(|| {
            GovernanceError::Structural(format!(
                "{} is not an anchor file name",
                anchor_path.display()
            ))
        })?;
        if !path.is_file() {
            return Err(GovernanceError::Structural(format!(
                "missing receipt {} for anchor {}",
                path.display(),
                anchor_path.display()
            )));
        }
        Ok(AnchorReceipt::load(&path)?.link_ids())
    }
}

/// Local simulation: the file stem stands in for both network IDs.
///
/// The stem must itself be 64 hex characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct StemResolver;

impl AnchorIdResolver for StemResolver {
    fn resolve(
        &self,
        anchor_path: &Path,
        _record: &AnchorRecord,
    ) -> Result<AnchorIds, GovernanceError> {
        let stem = anchor_stem(anchor_path)
            .map(str::to_lowercase)
            .filter(|s| is_hex64(s))
            .ok_or_else(|| {
                GovernanceError::Structural(format!(
                    "local mode requires 64-hex anchor file stems: {}",
                    anchor_path.display()
                ))
            })?;
        Ok(AnchorIds {
            arweave: stem.clone(),
            ipfs: stem,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainStatus {
    Ok,
    StructuralError,
    LinkMismatch,
    Empty,
}

impl ChainStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ok => exit_code::OK,
            Self::StructuralError => exit_code::STRUCTURAL,
            Self::LinkMismatch => exit_code::LINK_MISMATCH,
            Self::Empty => exit_code::EMPTY_CHAIN,
        }
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::StructuralError => "STRUCTURAL_ERROR",
            Self::LinkMismatch => "LINK_MISMATCH",
            Self::Empty => "EMPTY",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChainOptions {
    /// Stop after this many anchor files
    pub max_files: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub status: ChainStatus,
    pub anchors_checked: usize,
    /// A zero-root record ended the chain
    pub terminus: bool,
    /// Scan stopped at `max_files` before the last file
    pub bounded: bool,
    pub failed_file: Option<PathBuf>,
    pub detail: Option<String>,
}

impl ChainReport {
    fn new(status: ChainStatus, anchors_checked: usize) -> Self {
        Self {
            status,
            anchors_checked,
            terminus: false,
            bounded: false,
            failed_file: None,
            detail: None,
        }
    }

    fn failed(status: ChainStatus, checked: usize, file: &Path, detail: String) -> Self {
        error!("{} at {}: {}", status, file.display(), detail);
        Self {
            failed_file: Some(file.to_path_buf()),
            detail: Some(detail),
            ..Self::new(status, checked)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ChainStatus::Ok
    }

    /// The failure category of a non-OK report as an error
    pub fn ensure_ok(&self) -> Result<(), GovernanceError> {
        let detail = || self.detail.clone().unwrap_or_else(|| self.summary());
        match self.status {
            ChainStatus::Ok => Ok(()),
            ChainStatus::StructuralError => Err(GovernanceError::Structural(detail())),
            ChainStatus::LinkMismatch => Err(GovernanceError::LinkMismatch(detail())),
            ChainStatus::Empty => Err(GovernanceError::EmptyChain(
                "no *.anchor.txt files".to_string(),
            )),
        }
    }

    pub fn summary(&self) -> String {
        let mut s = format!("{}: {} anchors checked", self.status, self.anchors_checked);
        if self.terminus {
            s.push_str(", terminus reached");
        }
        if self.bounded {
            s.push_str(", scan bounded");
        }
        if let Some(detail) = &self.detail {
            s.push_str(&format!(" ({})", detail));
        }
        s
    }
}

/// Anchor files in `dir`, sorted by file name
pub fn discover_anchor_files(dir: &Path) -> Result<Vec<PathBuf>, GovernanceError> {
    if !dir.is_dir() {
        return Err(GovernanceError::Usage(format!(
            "Not a directory: {}",
            dir.display()
        )));
    }

    let pattern = Pattern::new(ANCHOR_PATTERN)
        .map_err(|e| GovernanceError::Config(format!("bad anchor pattern: {}", e)))?;

    let mut files = Vec::new();
    let entries = fs::read_dir(dir)
        .map_err(|e| GovernanceError::io(format!("Failed to read {}", dir.display()), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| GovernanceError::io("Failed to read directory entry", e))?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| pattern.matches(n));
        if matches && path.is_file() {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!("Found {} anchor files in {}", files.len(), dir.display());
    Ok(files)
}

/// Verify the anchor chain stored in `dir`
pub fn verify_chain(
    dir: &Path,
    resolver: &dyn AnchorIdResolver,
    options: &ChainOptions,
) -> Result<ChainReport, GovernanceError> {
    let files = discover_anchor_files(dir)?;
    if files.is_empty() {
        warn!("No anchor files found in {}", dir.display());
        return Ok(ChainReport::new(ChainStatus::Empty, 0));
    }

    let mut previous: Option<(&Path, AnchorRecord)> = None;
    let mut checked = 0;

    for path in &files {
        if options.max_files.is_some_and(|max| checked >= max) {
            info!("Anchor scan bounded at {} files", checked);
            return Ok(ChainReport {
                bounded: true,
                ..ChainReport::new(ChainStatus::Ok, checked)
            });
        }

        let record = match AnchorRecord::load(path) {
            Ok(record) => record,
            Err(e) => {
                return Ok(ChainReport::failed(
                    ChainStatus::StructuralError,
                    checked,
                    path,
                    e.to_string(),
                ))
            }
        };

        let expected = match &previous {
            None => AnchorIds::zero(),
            Some((prev_path, prev_record)) => match resolver.resolve(prev_path, prev_record) {
                Ok(ids) => ids,
                Err(e) => {
                    return Ok(ChainReport::failed(
                        ChainStatus::StructuralError,
                        checked,
                        prev_path,
                        e.to_string(),
                    ))
                }
            },
        };

        let found = record.previous_ids();
        if found != expected {
            let what = if previous.is_none() {
                "genesis anchor does not point to zero previous IDs"
            } else {
                "link mismatch"
            };
            return Ok(ChainReport::failed(
                ChainStatus::LinkMismatch,
                checked,
                path,
                format!(
                    "{}: expected {}/{} got {}/{}",
                    what, expected.arweave, expected.ipfs, found.arweave, found.ipfs
                ),
            ));
        }

        checked += 1;
        debug!(
            "Anchor {} ok: root {} prev {}",
            path.display(),
            &record.root_hash[..12],
            &record.prev_arweave_tx_id[..12]
        );

        if record.is_terminus() {
            info!("Zero-root terminus reached at {}", path.display());
            return Ok(ChainReport {
                terminus: true,
                ..ChainReport::new(ChainStatus::Ok, checked)
            });
        }

        previous = Some((path.as_path(), record));
    }

    info!("Anchor chain verified: {} anchors, no terminus", checked);
    Ok(ChainReport::new(ChainStatus::Ok, checked))
}
