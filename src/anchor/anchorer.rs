//! Anchor Creation
//!
//! Turns a Merkle root into the next anchor record, publishes it to both
//! networks, and writes the record plus its receipt into the anchor
//! directory. Nothing is written unless both uploads succeed.

use chrono::{SubsecRound, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::anchor::client::{AnchorPublisher, HttpPublisher};
use crate::anchor::record::{
    anchor_file_name, anchor_stem, is_valid_root, is_zero, receipt_path, AnchorIds,
    AnchorReceipt, AnchorRecord,
};
use crate::anchor::verify::{discover_anchor_files, AnchorIdResolver, ReceiptResolver};
use crate::config::AppConfig;
use crate::error::{GovernanceError, PublisherError};
use crate::policy::PolicyToken;

/// Where the next anchor goes and what it must link to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHead {
    pub next_sequence: u64,
    pub previous: AnchorIds,
}

#[derive(Debug, Clone)]
pub struct AnchorOutcome {
    pub sequence: u64,
    pub anchor_path: PathBuf,
    pub receipt: AnchorReceipt,
    pub record: AnchorRecord,
}

pub struct Anchorer {
    anchor_dir: PathBuf,
    node_id: String,
    protocol: String,
    timeout: Duration,
    arweave: Box<dyn AnchorPublisher>,
    ipfs: Box<dyn AnchorPublisher>,
}

impl std::fmt::Debug for Anchorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Anchorer")
            .field("anchor_dir", &self.anchor_dir)
            .field("node_id", &self.node_id)
            .field("protocol", &self.protocol)
            .field("arweave", &self.arweave.network())
            .field("ipfs", &self.ipfs.network())
            .finish()
    }
}

impl Anchorer {
    pub fn new(
        anchor_dir: impl Into<PathBuf>,
        node_id: impl Into<String>,
        protocol: impl Into<String>,
        timeout: Duration,
        arweave: Box<dyn AnchorPublisher>,
        ipfs: Box<dyn AnchorPublisher>,
    ) -> Self {
        Self {
            anchor_dir: anchor_dir.into(),
            node_id: node_id.into(),
            protocol: protocol.into(),
            timeout,
            arweave,
            ipfs,
        }
    }

    /// HTTP publishers for both networks; fails at once if either is unconfigured
    pub fn from_config(config: &AppConfig) -> Result<Self, GovernanceError> {
        let arweave = HttpPublisher::arweave(&config.publisher)?;
        let ipfs = HttpPublisher::ipfs(&config.publisher)?;
        Ok(Self::new(
            &config.anchor_dir,
            &config.node_id,
            &config.anchor_protocol,
            config.publisher.timeout(),
            Box::new(arweave),
            Box::new(ipfs),
        ))
    }

    pub fn anchor_dir(&self) -> &Path {
        &self.anchor_dir
    }

    /// Publish an anchor for `root_hash` (64 or 128 hex)
    pub async fn anchor(
        &self,
        _token: &PolicyToken,
        root_hash: &str,
    ) -> Result<AnchorOutcome, GovernanceError> {
        let root = root_hash.trim().to_lowercase();
        if !is_valid_root(&root) {
            return Err(GovernanceError::Usage(format!(
                "root hash must be 64 or 128 hex characters: {}",
                root_hash
            )));
        }
        if is_zero(&root) {
            return Err(GovernanceError::Usage(
                "an all-zero root ends the chain; use terminate".to_string(),
            ));
        }
        self.publish(root).await
    }

    /// Publish the zero-root terminus that closes the chain
    pub async fn terminate(&self, _token: &PolicyToken) -> Result<AnchorOutcome, GovernanceError> {
        warn!("Terminating anchor chain in {}", self.anchor_dir.display());
        self.publish("0".repeat(64)).await
    }

    /// Sequence and link target for the next anchor
    pub fn chain_head(&self) -> Result<ChainHead, GovernanceError> {
        if !self.anchor_dir.exists() {
            return Ok(ChainHead {
                next_sequence: 1,
                previous: AnchorIds::zero(),
            });
        }

        let files = discover_anchor_files(&self.anchor_dir)?;
        let Some(last) = files.last() else {
            return Ok(ChainHead {
                next_sequence: 1,
                previous: AnchorIds::zero(),
            });
        };

        let record = AnchorRecord::load(last)?;
        if record.is_terminus() {
            return Err(GovernanceError::Structural(format!(
                "anchor chain was terminated at {}",
                last.display()
            )));
        }

        let sequence: u64 = anchor_stem(last)
            .and_then(|stem| stem.parse().ok())
            .ok_or_else(|| {
                GovernanceError::Structural(format!(
                    "anchor file {} does not carry a sequence number",
                    last.display()
                ))
            })?;

        Ok(ChainHead {
            next_sequence: sequence + 1,
            previous: ReceiptResolver.resolve(last, &record)?,
        })
    }

    async fn publish(&self, root_hash: String) -> Result<AnchorOutcome, GovernanceError> {
        let head = self.chain_head()?;
        let record = AnchorRecord {
            root_hash,
            timestamp: Utc::now().trunc_subsecs(0),
            node_id: self.node_id.clone(),
            protocol: self.protocol.clone(),
            prev_arweave_tx_id: head.previous.arweave,
            prev_ipfs_cid: head.previous.ipfs,
        };
        let body = record.render();

        let (arweave, ipfs) = tokio::join!(
            self.upload(self.arweave.as_ref(), body.as_bytes()),
            self.upload(self.ipfs.as_ref(), body.as_bytes()),
        );
        let (arweave_tx_id, ipfs_cid) = match (arweave, ipfs) {
            (Ok(a), Ok(i)) => (a, i),
            (Err(e), _) | (_, Err(e)) => {
                error!("Anchor publish failed, local state unchanged: {}", e);
                return Err(e.into());
            }
        };

        let receipt = AnchorReceipt {
            arweave_tx_id,
            ipfs_cid,
            published_at: Utc::now(),
        };

        fs::create_dir_all(&self.anchor_dir)
            .map_err(|e| GovernanceError::io("Failed to create anchor directory", e))?;
        let anchor_path = self.anchor_dir.join(anchor_file_name(head.next_sequence));
        let receipt_file = receipt_path(&anchor_path).ok_or_else(|| {
            GovernanceError::Structural(format!("bad anchor path {}", anchor_path.display()))
        })?;

        // Receipt lands first so a visible anchor always has one
        write_atomic(&receipt_file, serde_json::to_string_pretty(&receipt)?.as_bytes())?;
        write_atomic(&anchor_path, body.as_bytes())?;

        info!(
            "Anchor {} written: root {} arweave {} ipfs {}",
            head.next_sequence, record.root_hash, receipt.arweave_tx_id, receipt.ipfs_cid
        );

        Ok(AnchorOutcome {
            sequence: head.next_sequence,
            anchor_path,
            receipt,
            record,
        })
    }

    async fn upload(
        &self,
        publisher: &dyn AnchorPublisher,
        bytes: &[u8],
    ) -> Result<String, PublisherError> {
        match tokio::time::timeout(self.timeout, publisher.upload(bytes)).await {
            Ok(result) => result,
            Err(_) => Err(PublisherError::Timeout {
                network: publisher.network().to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// Write through a hidden temp file and rename into place
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), GovernanceError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| GovernanceError::Usage(format!("bad file name {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{}.tmp", name));

    fs::write(&tmp, bytes)
        .map_err(|e| GovernanceError::io(format!("Failed to write {}", tmp.display()), e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        GovernanceError::io(format!("Failed to move {} into place", path.display()), e)
    })
}
