//! Ledger Verification
//!
//! Replays the ledger in file order and reports every integrity violation.
//! Broken links and tampered content are detected independently: the
//! expected previous hash always advances to the entry's stored hash, so a
//! single edited entry yields exactly one violation instead of cascading.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::audit::canonical::{canonical_hash, GENESIS_HASH};
use crate::audit::entry::LedgerEntry;
use crate::error::GovernanceError;

/// Reads only complete, newline-terminated lines.
///
/// A final line without a newline may still be in the middle of being written
/// by the single writer; it is never returned and is flagged via
/// [`LineReader::truncated_tail`].
pub struct LineReader<R> {
    reader: R,
    line_no: usize,
    truncated_tail: bool,
    buf: Vec<u8>,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            truncated_tail: false,
            buf: Vec::new(),
        }
    }

    /// Next non-blank complete line with its 1-based line number
    pub fn next_line(&mut self) -> Result<Option<(usize, Vec<u8>)>, GovernanceError> {
        loop {
            self.buf.clear();
            let n = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .map_err(|e| GovernanceError::io("Failed to read ledger line", e))?;
            if n == 0 {
                return Ok(None);
            }
            if self.buf.last() != Some(&b'\n') {
                self.truncated_tail = true;
                return Ok(None);
            }

            self.line_no += 1;
            let mut line = std::mem::take(&mut self.buf);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some((self.line_no, line)));
        }
    }

    pub fn truncated_tail(&self) -> bool {
        self.truncated_tail
    }
}

pub fn open_ledger(path: &Path) -> Result<LineReader<BufReader<File>>, GovernanceError> {
    let file = File::open(path)
        .map_err(|e| GovernanceError::io(format!("Failed to open ledger {:?}", path), e))?;
    Ok(LineReader::new(BufReader::new(file)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// `prev_hash` differs from the previous entry's stored hash
    BrokenChain,
    /// Stored `hash` differs from the recomputed content hash
    Tamper,
    /// Line is not an entry object with string `prev_hash` and `hash`
    Malformed,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BrokenChain => "BROKEN_CHAIN",
            Self::Tamper => "TAMPER",
            Self::Malformed => "MALFORMED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub line: usize,
    pub kind: ViolationKind,
    pub expected: String,
    pub found: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    /// Stop after this many entries
    pub max_lines: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub valid: bool,
    pub entries_checked: usize,
    pub violations: Vec<Violation>,
    /// Hash the next appended entry must link to
    pub head_hash: String,
    /// An unterminated final line was skipped; the ledger is then not valid
    pub truncated_tail: bool,
    /// Scanning stopped at `max_lines` before the end of the file
    pub bounded: bool,
}

impl VerificationReport {
    pub fn summary(&self) -> String {
        if self.valid {
            format!(
                "Ledger is valid ({} entries verified, chain unbroken)",
                self.entries_checked
            )
        } else if self.violations.is_empty() {
            format!(
                "Ledger is not verifiable ({} entries checked, file ends with an incomplete line)",
                self.entries_checked
            )
        } else {
            format!(
                "Ledger is invalid ({} entries, {} integrity violations)",
                self.entries_checked,
                self.violations.len()
            )
        }
    }

    /// Integrity violations first, then an unverified torn tail
    pub fn ensure_valid(&self) -> Result<(), GovernanceError> {
        if !self.violations.is_empty() {
            let first = &self.violations[0];
            return Err(GovernanceError::ChainIntegrity(format!(
                "{} violations, first {} at line {}",
                self.violations.len(),
                first.kind,
                first.line
            )));
        }
        if self.truncated_tail {
            return Err(GovernanceError::Structural(
                "ledger ends with an incomplete line that could not be verified".to_string(),
            ));
        }
        Ok(())
    }

    pub fn count(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }
}

/// Verify the ledger file at `path`
pub fn verify_ledger(path: &Path, options: &VerifyOptions) -> Result<VerificationReport, GovernanceError> {
    info!("Verifying ledger file: {}", path.display());
    let mut lines = open_ledger(path)?;
    verify_lines(&mut lines, options)
}

/// Verify a ledger from any buffered reader
pub fn verify_reader<R: BufRead>(reader: R, options: &VerifyOptions) -> Result<VerificationReport, GovernanceError> {
    verify_lines(&mut LineReader::new(reader), options)
}

fn verify_lines<R: BufRead>(
    lines: &mut LineReader<R>,
    options: &VerifyOptions,
) -> Result<VerificationReport, GovernanceError> {
    let mut expected_prev = GENESIS_HASH.to_string();
    let mut violations = Vec::new();
    let mut entries_checked = 0;
    let mut bounded = false;

    while let Some((line_no, raw)) = lines.next_line()? {
        if options.max_lines.is_some_and(|max| entries_checked >= max) {
            bounded = true;
            break;
        }
        entries_checked += 1;

        let (prev_hash, stored_hash, remainder) = match split_entry(&raw) {
            Ok(parts) => parts,
            Err(reason) => {
                warn!("Malformed ledger line {}: {}", line_no, reason);
                violations.push(Violation {
                    line: line_no,
                    kind: ViolationKind::Malformed,
                    expected: "ledger entry object with string prev_hash and hash".to_string(),
                    found: reason,
                });
                continue;
            }
        };

        if prev_hash != expected_prev {
            error!("BROKEN CHAIN at line {}", line_no);
            violations.push(Violation {
                line: line_no,
                kind: ViolationKind::BrokenChain,
                expected: expected_prev.clone(),
                found: prev_hash,
            });
        }

        let calculated = canonical_hash(&remainder);
        if calculated != stored_hash {
            error!("TAMPER DETECTED at line {}", line_no);
            violations.push(Violation {
                line: line_no,
                kind: ViolationKind::Tamper,
                expected: calculated,
                found: stored_hash.clone(),
            });
        }

        expected_prev = stored_hash;
    }

    // A bounded scan never reaches the tail
    let truncated_tail = lines.truncated_tail();
    let report = VerificationReport {
        valid: violations.is_empty() && !truncated_tail,
        entries_checked,
        violations,
        head_hash: expected_prev,
        truncated_tail,
        bounded,
    };

    if report.truncated_tail {
        warn!("Skipped unterminated final ledger line");
    }
    if report.valid {
        info!("{}", report.summary());
    } else {
        error!("{}", report.summary());
    }
    Ok(report)
}

/// Split a raw line into (prev_hash, hash, entry-minus-hash)
fn split_entry(raw: &[u8]) -> Result<(String, String, Value), String> {
    let value: Value = serde_json::from_slice(raw).map_err(|e| format!("invalid JSON: {}", e))?;
    let Value::Object(mut map) = value else {
        return Err("line is not a JSON object".to_string());
    };

    let stored_hash = match map.remove("hash") {
        Some(Value::String(hash)) => hash,
        Some(_) => return Err("hash is not a string".to_string()),
        None => return Err("hash field missing".to_string()),
    };
    let prev_hash = match map.get("prev_hash") {
        Some(Value::String(prev)) => prev.clone(),
        Some(_) => return Err("prev_hash is not a string".to_string()),
        None => return Err("prev_hash field missing".to_string()),
    };

    Ok((prev_hash, stored_hash, Value::Object(map)))
}

/// Load every entry strictly; any unparsable line is a structural error
pub fn load_entries(path: &Path) -> Result<Vec<LedgerEntry>, GovernanceError> {
    let mut lines = open_ledger(path)?;
    let mut entries = Vec::new();

    while let Some((line_no, raw)) = lines.next_line()? {
        let entry: LedgerEntry = serde_json::from_slice(&raw).map_err(|e| {
            GovernanceError::Structural(format!("Failed to parse entry at line {}: {}", line_no, e))
        })?;
        entries.push(entry);
    }

    debug!("Loaded {} entries from {}", entries.len(), path.display());
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn chain(count: usize) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = Vec::new();
        for i in 0..count {
            let prev = entries
                .last()
                .map(|e| e.hash.clone())
                .unwrap_or_else(|| GENESIS_HASH.to_string());
            entries.push(LedgerEntry::new(
                "evidence",
                "insider",
                "PROCESS_COMPLETED",
                json!({"index": i}),
                &prev,
            ));
        }
        entries
    }

    fn render(entries: &[LedgerEntry]) -> String {
        entries
            .iter()
            .map(|e| format!("{}\n", e.canonical_line()))
            .collect()
    }

    #[test]
    fn test_empty_ledger_is_valid() {
        let report = verify_reader(Cursor::new(""), &VerifyOptions::default()).unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 0);
        assert_eq!(report.head_hash, GENESIS_HASH);
    }

    #[test]
    fn test_valid_chain() {
        let entries = chain(5);
        let report = verify_reader(Cursor::new(render(&entries)), &VerifyOptions::default()).unwrap();
        assert!(report.valid, "{:?}", report.violations);
        assert_eq!(report.entries_checked, 5);
        assert_eq!(report.head_hash, entries[4].hash);
    }

    #[test]
    fn test_tamper_is_single_violation() {
        let mut entries = chain(4);
        entries[2].payload = json!({"index": 99});
        let report = verify_reader(Cursor::new(render(&entries)), &VerifyOptions::default()).unwrap();

        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].line, 3);
        assert_eq!(report.violations[0].kind, ViolationKind::Tamper);
        assert_eq!(report.violations[0].found, entries[2].hash);
    }

    #[test]
    fn test_broken_link_and_tamper_are_both_reported() {
        let mut entries = chain(4);
        entries[1].prev_hash = "f".repeat(64);
        let report = verify_reader(Cursor::new(render(&entries)), &VerifyOptions::default()).unwrap();

        // prev_hash is covered by the content hash too
        assert_eq!(report.count(ViolationKind::BrokenChain), 1);
        assert_eq!(report.count(ViolationKind::Tamper), 1);
        assert!(report.violations.iter().all(|v| v.line == 2));
        assert_eq!(report.entries_checked, 4);
    }

    #[test]
    fn test_resealed_entry_is_broken_chain_only() {
        let mut entries = chain(3);
        entries[1].prev_hash = "a".repeat(64);
        entries[1].hash = entries[1].calculate_hash();
        let report = verify_reader(Cursor::new(render(&entries)), &VerifyOptions::default()).unwrap();

        // entry 3 still links to the stored hash of entry 2
        assert_eq!(report.violations.len(), 2);
        assert_eq!(report.violations[0].kind, ViolationKind::BrokenChain);
        assert_eq!(report.violations[0].line, 2);
        assert_eq!(report.violations[1].kind, ViolationKind::BrokenChain);
        assert_eq!(report.violations[1].line, 3);
    }

    #[test]
    fn test_malformed_line_does_not_stop_scan() {
        let entries = chain(2);
        let text = format!(
            "{}\nnot json\n{}\n",
            entries[0].canonical_line(),
            entries[1].canonical_line()
        );
        let report = verify_reader(Cursor::new(text), &VerifyOptions::default()).unwrap();
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::Malformed);
        assert_eq!(report.violations[0].line, 2);
        assert_eq!(report.entries_checked, 3);
    }

    #[test]
    fn test_unterminated_tail_is_skipped_but_not_valid() {
        let entries = chain(2);
        let text = format!(
            "{}\n{}",
            entries[0].canonical_line(),
            &entries[1].canonical_line()[..20]
        );
        let report = verify_reader(Cursor::new(text), &VerifyOptions::default()).unwrap();
        assert!(!report.valid);
        assert!(report.truncated_tail);
        assert!(report.violations.is_empty());
        assert_eq!(report.entries_checked, 1);
        assert_eq!(report.head_hash, entries[0].hash);
        assert!(matches!(report.ensure_valid(), Err(GovernanceError::Structural(_))));
    }

    #[test]
    fn test_tampered_last_entry_without_newline_is_not_valid() {
        let mut entries = chain(3);
        entries[2].payload = json!({"index": 9});
        let text = render(&entries);
        let text = text.trim_end_matches('\n');

        let report = verify_reader(Cursor::new(text), &VerifyOptions::default()).unwrap();
        assert!(!report.valid);
        assert!(report.truncated_tail);
        assert!(report.summary().contains("incomplete line"));
        assert_eq!(
            report.ensure_valid().unwrap_err().exit_code(),
            crate::error::exit_code::STRUCTURAL
        );
    }

    #[test]
    fn test_violations_map_to_chain_integrity() {
        let mut entries = chain(2);
        entries[0].payload = json!({"index": 5});
        let report = verify_reader(Cursor::new(render(&entries)), &VerifyOptions::default()).unwrap();
        let err = report.ensure_valid().unwrap_err();
        assert!(matches!(err, GovernanceError::ChainIntegrity(_)));
        assert!(err.to_string().contains("TAMPER at line 1"));

        let clean = verify_reader(Cursor::new(render(&chain(2))), &VerifyOptions::default()).unwrap();
        assert!(clean.ensure_valid().is_ok());
    }

    #[test]
    fn test_max_lines_bounds_scan() {
        let entries = chain(5);
        let options = VerifyOptions { max_lines: Some(3) };
        let report = verify_reader(Cursor::new(render(&entries)), &options).unwrap();
        assert!(report.bounded);
        assert_eq!(report.entries_checked, 3);
        assert_eq!(report.head_hash, entries[2].hash);
    }

    #[test]
    fn test_blank_lines_keep_physical_numbering() {
        let entries = chain(2);
        let mut tampered = entries.clone();
        tampered[1].track = "stable".into();
        let text = format!(
            "{}\n\n{}\n",
            tampered[0].canonical_line(),
            tampered[1].canonical_line()
        );
        let report = verify_reader(Cursor::new(text), &VerifyOptions::default()).unwrap();
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].line, 3);
    }
}
