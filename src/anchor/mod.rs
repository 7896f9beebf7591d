//! External Anchoring
//!
//! Dual-network anchor records linking ledger Merkle roots into a chain,
//! their publication, and verification of the resulting chain.

pub mod anchorer;
pub mod client;
pub mod record;
pub mod verify;

pub use anchorer::{AnchorOutcome, Anchorer, ChainHead};
pub use client::{AnchorPublisher, HttpPublisher};
pub use record::{link_form, AnchorIds, AnchorReceipt, AnchorRecord, ZERO_ID};
pub use verify::{
    discover_anchor_files, verify_chain, AnchorIdResolver, ChainOptions, ChainReport,
    ChainStatus, ReceiptResolver, StemResolver,
};
