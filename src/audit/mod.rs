//! Governance Ledger
//!
//! Append-only, hash-chained event log with canonical encoding, full-scan
//! verification and Merkle roots over ledger windows.

pub mod canonical;
pub mod entry;
pub mod logger;
pub mod merkle;
pub mod verify;

pub use canonical::{canonical_string, to_canonical_bytes, GENESIS_HASH};
pub use entry::LedgerEntry;
pub use logger::{LedgerSink, LedgerWriter};
pub use merkle::{build_root, segment_root, MerkleProof, MerkleTree, SegmentRoot};
pub use verify::{
    load_entries, verify_ledger, VerificationReport, VerifyOptions, Violation, ViolationKind,
};
