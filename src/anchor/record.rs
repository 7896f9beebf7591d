//! Anchor Records
//!
//! Fixed six-line plaintext record tying a Merkle root to the previous
//! anchor's external identifiers on both storage networks:
//!
//! ```text
//! root_hash                 64 or 128 hex chars
//! timestamp                 ISO-8601 UTC
//! node_id
//! protocol tag
//! previous_arweave_tx_id    64 hex, all-zero for genesis
//! previous_ipfs_cid         64 hex, all-zero for genesis
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::audit::canonical::{is_hex64, sha256_hex};
use crate::error::GovernanceError;

pub const ZERO_ID: &str = "0000000000000000000000000000000000000000000000000000000000000000";
pub const ANCHOR_SUFFIX: &str = ".anchor.txt";
pub const RECEIPT_SUFFIX: &str = ".receipt.json";
pub const ANCHOR_PATTERN: &str = "*.anchor.txt";

/// 64 or 128 lowercase hex characters
pub fn is_valid_root(root: &str) -> bool {
    static ROOT: OnceLock<Option<Regex>> = OnceLock::new();
    ROOT.get_or_init(|| Regex::new(r"^(?:[0-9a-f]{64}|[0-9a-f]{128})$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(root))
}

pub fn is_zero(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b == b'0')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorRecord {
    pub root_hash: String,
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub protocol: String,
    pub prev_arweave_tx_id: String,
    pub prev_ipfs_cid: String,
}

impl AnchorRecord {
    pub fn parse(text: &str) -> Result<Self, GovernanceError> {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() != 6 {
            return Err(GovernanceError::Structural(format!(
                "anchor record has {} lines, expected 6",
                lines.len()
            )));
        }

        let root_hash = lines[0].trim().to_lowercase();
        if !is_valid_root(&root_hash) {
            return Err(GovernanceError::Structural(format!(
                "invalid root hash format: {}",
                root_hash
            )));
        }

        let parsed = DateTime::parse_from_rfc3339(lines[1].trim()).map_err(|e| {
            GovernanceError::Structural(format!("invalid timestamp {:?}: {}", lines[1], e))
        })?;
        if parsed.offset().local_minus_utc() != 0 {
            return Err(GovernanceError::Structural(format!(
                "timestamp must be UTC: {}",
                lines[1].trim()
            )));
        }
        let timestamp = parsed.with_timezone(&Utc);

        let node_id = lines[2].trim().to_string();
        if node_id.is_empty() {
            return Err(GovernanceError::Structural("empty node_id".to_string()));
        }
        let protocol = lines[3].trim().to_string();
        if protocol.is_empty() {
            return Err(GovernanceError::Structural("empty protocol tag".to_string()));
        }

        let prev_arweave_tx_id = parse_prev_id(lines[4], "previous arweave id")?;
        let prev_ipfs_cid = parse_prev_id(lines[5], "previous ipfs id")?;

        Ok(Self {
            root_hash,
            timestamp,
            node_id,
            protocol,
            prev_arweave_tx_id,
            prev_ipfs_cid,
        })
    }

    pub fn load(path: &Path) -> Result<Self, GovernanceError> {
        let text = fs::read_to_string(path).map_err(|e| {
            GovernanceError::Structural(format!("cannot read anchor {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
            .map_err(|e| GovernanceError::Structural(format!("{}: {}", path.display(), e)))
    }

    /// Text form written to disk and uploaded to the publishers
    pub fn render(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n",
            self.root_hash,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.node_id,
            self.protocol,
            self.prev_arweave_tx_id,
            self.prev_ipfs_cid
        )
    }

    /// All-zero root marks deliberate end of chain
    pub fn is_terminus(&self) -> bool {
        is_zero(&self.root_hash)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_arweave_tx_id == ZERO_ID && self.prev_ipfs_cid == ZERO_ID
    }

    pub fn previous_ids(&self) -> AnchorIds {
        AnchorIds {
            arweave: self.prev_arweave_tx_id.clone(),
            ipfs: self.prev_ipfs_cid.clone(),
        }
    }
}

fn parse_prev_id(line: &str, field: &str) -> Result<String, GovernanceError> {
    let id = line.trim().to_lowercase();
    if is_hex64(&id) {
        Ok(id)
    } else {
        Err(GovernanceError::Structural(format!("invalid {}: {}", field, id)))
    }
}

/// Identifying IDs of one anchor on both networks, in link form (64 hex)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorIds {
    pub arweave: String,
    pub ipfs: String,
}

impl AnchorIds {
    pub fn zero() -> Self {
        Self {
            arweave: ZERO_ID.to_string(),
            ipfs: ZERO_ID.to_string(),
        }
    }
}

/// Reduce an external ID to the 64-hex form carried in previous-ID fields.
///
/// IDs already in that form are kept; anything else (base64url transaction
/// ids, CIDs) is replaced by the SHA-256 of its UTF-8 bytes.
pub fn link_form(external_id: &str) -> String {
    let trimmed = external_id.trim();
    let lowered = trimmed.to_lowercase();
    if is_hex64(&lowered) {
        lowered
    } else {
        sha256_hex(trimmed.as_bytes())
    }
}

/// External IDs returned when an anchor was published, stored beside it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    pub arweave_tx_id: String,
    pub ipfs_cid: String,
    pub published_at: DateTime<Utc>,
}

impl AnchorReceipt {
    pub fn link_ids(&self) -> AnchorIds {
        AnchorIds {
            arweave: link_form(&self.arweave_tx_id),
            ipfs: link_form(&self.ipfs_cid),
        }
    }

    pub fn load(path: &Path) -> Result<Self, GovernanceError> {
        let text = fs::read_to_string(path).map_err(|e| {
            GovernanceError::Structural(format!("cannot read receipt {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            GovernanceError::Structural(format!("invalid receipt {}: {}", path.display(), e))
        })
    }
}

/// File name without the anchor suffix
pub fn anchor_stem(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()?.strip_suffix(ANCHOR_SUFFIX)
}

pub fn anchor_file_name(sequence: u64) -> String {
    format!("{:08}{}", sequence, ANCHOR_SUFFIX)
}

pub fn receipt_path(anchor_path: &Path) -> Option<PathBuf> {
    let stem = anchor_stem(anchor_path)?;
    Some(anchor_path.with_file_name(format!("{}{}", stem, RECEIPT_SUFFIX)))
}
