//! Merkle Tree for Ledger Segments
//!
//! Root hash over an ordered record set, used to anchor windows of the
//! ledger externally. Leaves are SHA-256 of each record's canonical encoding;
//! parents hash the concatenated raw digest bytes of their two children, and
//! an unpaired last node is paired with itself. Every level is reduced at
//! least once, so a single record's root is `H(leaf || leaf)`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info};

use crate::audit::canonical::{canonical_value, sha256, sha256_hex};
use crate::audit::verify::open_ledger;
use crate::error::GovernanceError;

pub type Digest = [u8; 32];

/// Leaf digest of one record
pub fn leaf_hash(record: &Value) -> Digest {
    sha256(&canonical_value(record))
}

fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(left);
    combined[32..].copy_from_slice(right);
    sha256(&combined)
}

/// Which side the sibling sits on when recombining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: String,
    pub side: Side,
}

/// Inclusion proof for one leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub index: usize,
    pub leaf: String,
    pub path: Vec<ProofStep>,
    pub root: String,
}

impl MerkleProof {
    /// Recompute the root from the leaf and path
    pub fn verify(&self) -> bool {
        let Some(mut current) = decode_digest(&self.leaf) else {
            return false;
        };

        for step in &self.path {
            let Some(sibling) = decode_digest(&step.sibling) else {
                return false;
            };
            current = match step.side {
                Side::Right => hash_pair(&current, &sibling),
                Side::Left => hash_pair(&sibling, &current),
            };
        }

        hex::encode(current) == self.root
    }

    /// Verify that `record` is the proven leaf
    pub fn verify_record(&self, record: &Value) -> bool {
        hex::encode(leaf_hash(record)) == self.leaf && self.verify()
    }
}

fn decode_digest(s: &str) -> Option<Digest> {
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

/// Binary Merkle tree kept level by level (level 0 = leaves, last = root)
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    pub fn from_records(records: &[Value]) -> Self {
        Self::from_leaves(records.iter().map(leaf_hash).collect())
    }

    pub fn from_leaves(leaves: Vec<Digest>) -> Self {
        if leaves.is_empty() {
            return Self { levels: vec![] };
        }

        let mut levels = vec![leaves];
        loop {
            let current = &levels[levels.len() - 1];
            let next: Vec<Digest> = current
                .chunks(2)
                .map(|pair| {
                    // Odd node pairs with itself
                    let right = pair.get(1).unwrap_or(&pair[0]);
                    hash_pair(&pair[0], right)
                })
                .collect();
            let done = next.len() == 1;
            levels.push(next);
            if done {
                break;
            }
        }

        Self { levels }
    }

    /// Root digest; the empty tree's root is SHA-256 of no bytes
    pub fn root(&self) -> Digest {
        match self.levels.last() {
            Some(top) => top[0],
            None => sha256(b""),
        }
    }

    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut path = Vec::with_capacity(self.levels.len() - 1);
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let (sibling_idx, side) = if idx % 2 == 0 {
                (idx + 1, Side::Right)
            } else {
                (idx - 1, Side::Left)
            };
            // Unpaired last node is its own sibling
            let sibling = level.get(sibling_idx).unwrap_or(&level[idx]);
            path.push(ProofStep {
                sibling: hex::encode(sibling),
                side,
            });
            idx /= 2;
        }

        Some(MerkleProof {
            index,
            leaf: hex::encode(self.levels[0][index]),
            path,
            root: self.root_hex(),
        })
    }
}

/// Merkle root over an ordered sequence of records
pub fn build_root(records: &[Value]) -> String {
    let root = MerkleTree::from_records(records).root_hex();
    debug!("Merkle root over {} records: {}", records.len(), root);
    root
}

pub fn verify_root(records: &[Value], claimed_root: &str) -> bool {
    build_root(records) == claimed_root.trim().to_lowercase()
}

/// Merkle root of a JSON file holding an array of arbitrary records
pub fn root_of_json_file(path: &Path) -> Result<String, GovernanceError> {
    if !path.is_file() {
        return Err(GovernanceError::Io(format!(
            "Record file not found: {}",
            path.display()
        )));
    }

    let text = fs::read_to_string(path)
        .map_err(|e| GovernanceError::io(format!("Failed to read {}", path.display()), e))?;
    let data: Value = serde_json::from_str(&text).map_err(|e| {
        GovernanceError::Structural(format!("Failed to parse {}: {}", path.display(), e))
    })?;

    match data {
        Value::Array(records) => Ok(build_root(&records)),
        _ => Err(GovernanceError::Usage(
            "Ledger must be a JSON array of event objects".to_string(),
        )),
    }
}

/// Merkle root over a window of ledger entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRoot {
    /// First entry index (0-based, inclusive)
    pub start: usize,
    /// Last entry index (exclusive)
    pub end: usize,
    pub entry_count: usize,
    pub first_entry_hash: Option<String>,
    pub last_entry_hash: Option<String>,
    pub merkle_root: String,
}

impl SegmentRoot {
    pub fn summary(&self) -> String {
        format!(
            "Entries {}..{}: {} entries, root: {}",
            self.start, self.end, self.entry_count, self.merkle_root
        )
    }
}

/// Compute the Merkle root over ledger entries `range` (clamped to the ledger length).
///
/// Leaves are the full stored entries including their `hash` field.
pub fn segment_root(ledger_path: &Path, range: Range<usize>) -> Result<SegmentRoot, GovernanceError> {
    if range.start > range.end {
        return Err(GovernanceError::Usage(format!(
            "Invalid entry window {}..{}",
            range.start, range.end
        )));
    }

    let mut lines = open_ledger(ledger_path)?;
    let mut records = Vec::new();
    let mut index = 0;

    while let Some((line_no, raw)) = lines.next_line()? {
        if index >= range.end {
            break;
        }
        if index >= range.start {
            let value: Value = serde_json::from_slice(&raw).map_err(|e| {
                GovernanceError::Structural(format!("Failed to parse entry at line {}: {}", line_no, e))
            })?;
            records.push(value);
        }
        index += 1;
    }

    if range.start > index {
        return Err(GovernanceError::Usage(format!(
            "Window starts at entry {} but ledger has {} entries",
            range.start, index
        )));
    }

    let entry_hash = |v: &Value| v.get("hash").and_then(Value::as_str).map(str::to_string);
    let segment = SegmentRoot {
        start: range.start,
        end: range.start + records.len(),
        entry_count: records.len(),
        first_entry_hash: records.first().and_then(entry_hash),
        last_entry_hash: records.last().and_then(entry_hash),
        merkle_root: build_root(&records),
    };

    info!("{}", segment.summary());
    Ok(segment)
}

/// Hex digest of no input, the root of an empty record set
pub fn empty_root() -> String {
    sha256_hex(b"")
}
