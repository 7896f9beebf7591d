//! Ledger Integrity Tests
//!
//! Append, verify and tamper with real ledger files.

mod common;

use common::{build_ledger, rewrite_line, test_token};
use governance_ledger::audit::merkle::{build_root, root_of_json_file};
use governance_ledger::audit::{
    segment_root, verify_ledger, LedgerWriter, VerifyOptions, ViolationKind, GENESIS_HASH,
};
use governance_ledger::error::exit_code;
use governance_ledger::GovernanceError;
use serde_json::{json, Value};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_appended_ledgers_verify_clean() -> Result<(), Box<dyn std::error::Error>> {
    for count in [0, 1, 2, 7] {
        let dir = tempdir()?;
        let (path, entries) = build_ledger(&dir, count);
        if count == 0 {
            fs::write(&path, "")?;
        }

        let report = verify_ledger(&path, &VerifyOptions::default())?;
        assert!(report.valid, "count {}: {:?}", count, report.violations);
        assert_eq!(report.entries_checked, count);
        let head = entries.last().map_or(GENESIS_HASH.to_string(), |e| e.hash.clone());
        assert_eq!(report.head_hash, head);
    }
    Ok(())
}

#[test]
fn test_payload_flip_is_single_tamper() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let (path, _) = build_ledger(&dir, 5);

    rewrite_line(&path, 3, |line| line.replace("\"step\":2", "\"step\":3"));

    let report = verify_ledger(&path, &VerifyOptions::default())?;
    assert!(!report.valid);
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].kind, ViolationKind::Tamper);
    assert_eq!(report.violations[0].line, 3);
    Ok(())
}

#[test]
fn test_overwritten_prev_hash_breaks_chain_and_scan_continues() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let (path, entries) = build_ledger(&dir, 6);

    rewrite_line(&path, 2, |line| line.replace(&entries[0].hash, &"f".repeat(64)));
    rewrite_line(&path, 5, |line| line.replace("\"step\":4", "\"step\":40"));

    let report = verify_ledger(&path, &VerifyOptions::default())?;
    assert_eq!(report.entries_checked, 6);

    let broken: Vec<_> = report
        .violations
        .iter()
        .filter(|v| v.kind == ViolationKind::BrokenChain)
        .collect();
    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0].line, 2);
    assert_eq!(broken[0].expected, entries[0].hash);

    // Later damage is still found
    assert!(report
        .violations
        .iter()
        .any(|v| v.kind == ViolationKind::Tamper && v.line == 5));
    Ok(())
}

#[test]
fn test_writer_resumes_after_verification() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let (path, entries) = build_ledger(&dir, 3);
    let token = test_token(&dir);

    let mut writer = LedgerWriter::open(&path)?;
    assert_eq!(writer.tail_hash(), entries[2].hash);
    let next = writer.append(&token, "boardroom", "stable", "DECISION", json!({"vote": "yes"}))?;
    assert_eq!(next.prev_hash, entries[2].hash);
    drop(writer);

    let report = verify_ledger(&path, &VerifyOptions::default())?;
    assert!(report.valid);
    assert_eq!(report.entries_checked, 4);
    Ok(())
}

#[test]
fn test_bounded_scan() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let (path, _) = build_ledger(&dir, 5);

    let report = verify_ledger(&path, &VerifyOptions { max_lines: Some(2) })?;
    assert!(report.valid);
    assert!(report.bounded);
    assert_eq!(report.entries_checked, 2);
    Ok(())
}

#[test]
fn test_segment_root_matches_entries() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let (path, entries) = build_ledger(&dir, 5);

    let segment = segment_root(&path, 1..4)?;
    let expected: Vec<Value> = entries[1..4].iter().map(|e| e.to_value()).collect();
    assert_eq!(segment.merkle_root, build_root(&expected));
    assert_eq!(segment.entry_count, 3);
    assert_eq!(segment.first_entry_hash.as_deref(), Some(entries[1].hash.as_str()));
    assert_eq!(segment.last_entry_hash.as_deref(), Some(entries[3].hash.as_str()));

    let whole = segment_root(&path, 0..usize::MAX)?;
    assert_eq!(whole.entry_count, 5);
    Ok(())
}

#[test]
fn test_merkle_root_of_json_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let one = dir.path().join("one.json");
    let two = dir.path().join("two.json");
    let object = dir.path().join("object.json");
    fs::write(&one, r#"[{"event":"a","value":1}]"#)?;
    fs::write(&two, r#"[{"event":"a","value":1},{"event":"b","value":2}]"#)?;
    fs::write(&object, r#"{"event":"a"}"#)?;

    let root_one = root_of_json_file(&one)?;
    assert_eq!(root_one.len(), 64);
    assert_ne!(root_one, root_of_json_file(&two)?);
    assert_eq!(root_one, root_of_json_file(&one)?);

    let err = root_of_json_file(&object).unwrap_err();
    assert!(matches!(err, GovernanceError::Usage(_)));
    assert_eq!(err.exit_code(), exit_code::USAGE);
    Ok(())
}

#[test]
fn test_merkle_root_input_errors_are_distinct() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let broken = dir.path().join("broken.json");
    fs::write(&broken, "[{\"event\":")?;

    let missing = root_of_json_file(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(missing, GovernanceError::Io(_)));
    assert_eq!(missing.exit_code(), exit_code::CONFIG);

    let parse = root_of_json_file(&broken).unwrap_err();
    assert!(matches!(parse, GovernanceError::Structural(_)));
    assert_eq!(parse.exit_code(), exit_code::STRUCTURAL);
    Ok(())
}
