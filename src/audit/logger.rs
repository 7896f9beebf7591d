//! Ledger Writer
//!
//! Manages the append-only ledger file. Exactly one writer may hold append
//! rights: across processes through an exclusive `<ledger>.lock` file, and
//! within a process through `&mut self` on [`LedgerWriter::append`].

use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::audit::canonical::{is_hex64, GENESIS_HASH};
use crate::audit::entry::LedgerEntry;
use crate::audit::verify::open_ledger;
use crate::error::GovernanceError;
use crate::policy::PolicyToken;
use crate::validation::{EventDraft, EventSchemaValidator};

/// Path of the lock file guarding a ledger
pub fn lock_path(ledger_path: &Path) -> PathBuf {
    let mut name = ledger_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    ledger_path.with_file_name(name)
}

/// Exclusive append rights, released on drop
#[derive(Debug)]
struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    fn acquire(ledger_path: &Path) -> Result<Self, GovernanceError> {
        let path = lock_path(ledger_path);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => GovernanceError::Structural(format!(
                    "ledger is locked by another writer ({}); remove the lock only if that writer is gone",
                    path.display()
                )),
                _ => GovernanceError::io("Failed to create ledger lock", e),
            })?;

        // pid is informational for operators clearing a stale lock
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { path })
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            error!("Failed to release ledger lock {}: {}", self.path.display(), e);
        }
    }
}

/// Append target of a [`LedgerWriter`]
pub trait LedgerSink: Write + Send {
    /// Current length in bytes
    fn size(&self) -> io::Result<u64>;

    fn truncate(&mut self, len: u64) -> io::Result<()>;

    fn sync(&mut self) -> io::Result<()>;
}

impl LedgerSink for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Single writer appending hash-chained entries
pub struct LedgerWriter {
    path: PathBuf,
    sink: Box<dyn LedgerSink>,
    tail_hash: String,
    entry_count: u64,
    /// A failed rollback left bytes of unknown shape behind
    poisoned: bool,
    validator: Option<Box<dyn EventSchemaValidator>>,
    _lock: WriterLock,
}

impl std::fmt::Debug for LedgerWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerWriter")
            .field("path", &self.path)
            .field("tail_hash", &self.tail_hash)
            .field("entry_count", &self.entry_count)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl LedgerWriter {
    /// Acquire the writer lock and read the current tail hash
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GovernanceError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| GovernanceError::io("Failed to create ledger directory", e))?;
            }
        }

        let lock = WriterLock::acquire(&path)?;
        let (tail_hash, entry_count) = read_tail(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| GovernanceError::io("Failed to open ledger file", e))?;

        info!(
            "Opened ledger {} ({} entries, tail {})",
            path.display(),
            entry_count,
            &tail_hash[..12]
        );

        Ok(Self {
            path,
            sink: Box::new(file),
            tail_hash,
            entry_count,
            poisoned: false,
            validator: None,
            _lock: lock,
        })
    }

    /// Write through `sink` instead of the opened file.
    ///
    /// The sink must already hold the ledger contents read at open.
    pub fn with_sink(mut self, sink: Box<dyn LedgerSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Refuse entries that fail the schema declared for their event type
    pub fn with_validator(mut self, validator: Box<dyn EventSchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Append one sealed entry as a single canonical line
    pub fn append(
        &mut self,
        _token: &PolicyToken,
        agent: &str,
        track: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<LedgerEntry, GovernanceError> {
        if self.poisoned {
            return Err(GovernanceError::Structural(format!(
                "ledger {} may hold a partial entry after a failed rollback; verify and repair it before appending",
                self.path.display()
            )));
        }

        if let Some(validator) = &self.validator {
            validator.validate(&EventDraft {
                agent,
                track,
                event_type,
                payload: &payload,
            })?;
        }

        let entry = LedgerEntry::new(agent, track, event_type, payload, &self.tail_hash);
        let mut line = entry.canonical_line();
        line.push('\n');

        self.write_line(line.as_bytes())?;

        self.tail_hash = entry.hash.clone();
        self.entry_count += 1;

        debug!("Appended ledger entry {}: {}", self.entry_count, entry.summary());
        Ok(entry)
    }

    /// All-or-nothing write: on any failure the file is cut back to its prior length
    fn write_line(&mut self, bytes: &[u8]) -> Result<(), GovernanceError> {
        let offset = self
            .sink
            .size()
            .map_err(|e| GovernanceError::io("Failed to stat ledger file", e))?;

        let result = self
            .sink
            .write_all(bytes)
            .and_then(|_| self.sink.flush())
            .and_then(|_| self.sink.sync());

        if let Err(e) = result {
            error!("Ledger append failed, rolling back to {} bytes: {}", offset, e);
            if let Err(rollback) = self.sink.truncate(offset) {
                error!("Ledger rollback failed, refusing further appends: {}", rollback);
                self.poisoned = true;
            }
            return Err(GovernanceError::io("Failed to append ledger entry", e));
        }
        Ok(())
    }

    pub fn tail_hash(&self) -> &str {
        &self.tail_hash
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Hash of the last complete entry, or the genesis sentinel for an empty ledger
fn read_tail(path: &Path) -> Result<(String, u64), GovernanceError> {
    if !path.exists() {
        return Ok((GENESIS_HASH.to_string(), 0));
    }

    let mut lines = open_ledger(path)?;
    let mut last: Option<(usize, Vec<u8>)> = None;
    let mut count = 0;

    while let Some(line) = lines.next_line()? {
        count += 1;
        last = Some(line);
    }

    if lines.truncated_tail() {
        return Err(GovernanceError::Structural(format!(
            "ledger {} ends with an incomplete line; refusing to append",
            path.display()
        )));
    }

    let Some((line_no, raw)) = last else {
        return Ok((GENESIS_HASH.to_string(), 0));
    };

    let value: Value = serde_json::from_slice(&raw).map_err(|e| {
        GovernanceError::Structural(format!("tail entry at line {} is not JSON: {}", line_no, e))
    })?;

    match value.get("hash").and_then(Value::as_str) {
        Some(hash) if is_hex64(hash) => Ok((hash.to_string(), count)),
        _ => Err(GovernanceError::Structural(format!(
            "tail entry at line {} has no valid hash",
            line_no
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::verify::{load_entries, verify_ledger, VerifyOptions};
    use crate::policy::{sign_manifest, PolicyGate};
    use crate::validation::SchemaRegistry;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn token(dir: &TempDir) -> PolicyToken {
        let manifest = dir.path().join("policy_manifest.yml");
        let sig = dir.path().join("policy_manifest.sig");
        fs::write(&manifest, "version: \"1\"\nfiles: {}\n").unwrap();
        sign_manifest(&manifest, &sig).unwrap();
        PolicyGate::new(manifest, sig).validate_signature().unwrap()
    }

    #[test]
    fn test_first_entry_links_to_genesis() {
        let dir = tempdir().unwrap();
        let token = token(&dir);
        let mut writer = LedgerWriter::open(dir.path().join("ledger.jsonl")).unwrap();

        assert_eq!(writer.tail_hash(), GENESIS_HASH);
        let entry = writer
            .append(&token, "boardroom", "insider", "GENESIS", json!({"message": "ignited"}))
            .unwrap();
        assert_eq!(entry.prev_hash, GENESIS_HASH);
        assert_eq!(writer.tail_hash(), entry.hash);
        assert_eq!(writer.entry_count(), 1);
    }

    #[test]
    fn test_hash_chain_across_reopen() {
        let dir = tempdir().unwrap();
        let token = token(&dir);
        let path = dir.path().join("logs/ledger.jsonl");

        let first = {
            let mut writer = LedgerWriter::open(&path).unwrap();
            writer
                .append(&token, "evidence", "insider", "PROCESS_COMPLETED", json!({"i": 0}))
                .unwrap()
        };

        let mut writer = LedgerWriter::open(&path).unwrap();
        assert_eq!(writer.tail_hash(), first.hash);
        assert_eq!(writer.entry_count(), 1);
        let second = writer
            .append(&token, "evidence", "insider", "PROCESS_COMPLETED", json!({"i": 1}))
            .unwrap();
        assert_eq!(second.prev_hash, first.hash);

        let entries = load_entries(&path).unwrap();
        assert_eq!(entries, vec![first, second]);
    }

    #[test]
    fn test_file_contains_one_canonical_line_per_entry() {
        let dir = tempdir().unwrap();
        let token = token(&dir);
        let path = dir.path().join("ledger.jsonl");
        let mut writer = LedgerWriter::open(&path).unwrap();

        let entry = writer
            .append(&token, "property", "stable", "SCORED", json!({"b": 2, "a": 1}))
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("{}\n", entry.canonical_line()));
        assert!(contents.contains(r#""payload":{"a":1,"b":2}"#));
    }

    #[test]
    fn test_second_writer_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        let writer = LedgerWriter::open(&path).unwrap();
        let err = LedgerWriter::open(&path).unwrap_err();
        assert!(matches!(err, GovernanceError::Structural(_)));

        drop(writer);
        assert!(!lock_path(&path).exists());
        assert!(LedgerWriter::open(&path).is_ok());
    }

    #[test]
    fn test_refuses_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        fs::write(&path, "{\"hash\":\"ab").unwrap();

        let err = LedgerWriter::open(&path).unwrap_err();
        assert!(matches!(err, GovernanceError::Structural(_)));
        assert!(!lock_path(&path).exists());
    }

    /// Accepts `budget` bytes, then fails every write
    struct FailingSink {
        inner: File,
        budget: usize,
        truncate_fails: bool,
    }

    impl FailingSink {
        fn new(path: &Path, budget: usize, truncate_fails: bool) -> Self {
            let inner = OpenOptions::new().append(true).open(path).unwrap();
            Self {
                inner,
                budget,
                truncate_fails,
            }
        }
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = self.inner.write(&buf[..buf.len().min(self.budget)])?;
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl LedgerSink for FailingSink {
        fn size(&self) -> io::Result<u64> {
            self.inner.size()
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            if self.truncate_fails {
                return Err(io::Error::new(io::ErrorKind::Other, "read-only"));
            }
            self.inner.set_len(len)
        }

        fn sync(&mut self) -> io::Result<()> {
            self.inner.sync_data()
        }
    }

    #[test]
    fn test_failed_write_rolls_back_partial_line() {
        let dir = tempdir().unwrap();
        let token = token(&dir);
        let path = dir.path().join("ledger.jsonl");

        let mut writer = LedgerWriter::open(&path).unwrap();
        let first = writer
            .append(&token, "evidence", "insider", "PROCESS_COMPLETED", json!({"i": 0}))
            .unwrap();
        let before = fs::read(&path).unwrap();

        let mut writer = writer.with_sink(Box::new(FailingSink::new(&path, 10, false)));
        let err = writer
            .append(&token, "evidence", "insider", "PROCESS_COMPLETED", json!({"i": 1}))
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Io(_)));

        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(writer.tail_hash(), first.hash);
        assert_eq!(writer.entry_count(), 1);
        assert!(verify_ledger(&path, &VerifyOptions::default()).unwrap().valid);
    }

    #[test]
    fn test_failed_rollback_poisons_writer() {
        let dir = tempdir().unwrap();
        let token = token(&dir);
        let path = dir.path().join("ledger.jsonl");

        let mut writer = LedgerWriter::open(&path)
            .unwrap()
            .with_sink(Box::new(FailingSink::new(&path, 10, true)));

        let err = writer
            .append(&token, "evidence", "insider", "PROCESS_COMPLETED", json!({"i": 0}))
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Io(_)));
        assert_eq!(fs::metadata(&path).unwrap().len(), 10);

        let err = writer
            .append(&token, "evidence", "insider", "PROCESS_COMPLETED", json!({"i": 1}))
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Structural(_)));
        assert_eq!(writer.tail_hash(), GENESIS_HASH);
        assert_eq!(writer.entry_count(), 0);
    }

    #[test]
    fn test_schema_failure_leaves_ledger_untouched() {
        let dir = tempdir().unwrap();
        let token = token(&dir);
        let path = dir.path().join("ledger.jsonl");
        let registry = SchemaRegistry::from_yaml(
            "event_types:\n  event_heartbeat:\n    required:\n      status: string\n",
        )
        .unwrap();
        let mut writer = LedgerWriter::open(&path)
            .unwrap()
            .with_validator(Box::new(registry));

        let err = writer
            .append(&token, "recorder", "insider", "event_heartbeat", json!({}))
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Schema(_)));
        assert_eq!(writer.entry_count(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "");

        writer
            .append(&token, "recorder", "insider", "event_heartbeat", json!({"status": "ok"}))
            .unwrap();
        let report = verify_ledger(&path, &VerifyOptions::default()).unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 1);
    }
}
