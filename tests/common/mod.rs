#![allow(dead_code)]

use governance_ledger::audit::{LedgerEntry, LedgerWriter};
use governance_ledger::policy::{sign_manifest, PolicyGate, PolicyToken};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const ZERO: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Signed manifest and signature in `dir`, returning their paths
pub fn write_signed_manifest(dir: &Path) -> (PathBuf, PathBuf) {
    let manifest = dir.join("policy_manifest.yml");
    let sig = dir.join("policy_manifest.sig");
    fs::write(
        &manifest,
        "version: \"2025.03\"\nfiles:\n  constitution/charter.md: \"e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855\"\n",
    )
    .expect("Failed to write manifest");
    sign_manifest(&manifest, &sig).expect("Failed to sign manifest");
    (manifest, sig)
}

/// Token from a freshly signed manifest
pub fn test_token(dir: &TempDir) -> PolicyToken {
    let (manifest, sig) = write_signed_manifest(dir.path());
    PolicyGate::new(manifest, sig)
        .validate_signature()
        .expect("Signed manifest should pass the gate")
}

/// Ledger with `count` PROCESS_COMPLETED events
pub fn build_ledger(dir: &TempDir, count: usize) -> (PathBuf, Vec<LedgerEntry>) {
    let token = test_token(dir);
    let path = dir.path().join("logs/governance_ledger.jsonl");
    let mut writer = LedgerWriter::open(&path).expect("Failed to open ledger");

    let entries = (0..count)
        .map(|i| {
            writer
                .append(
                    &token,
                    "evidence",
                    "insider",
                    "PROCESS_COMPLETED",
                    json!({"step": i, "note": format!("run {}", i)}),
                )
                .expect("Failed to append")
        })
        .collect();

    (path, entries)
}

/// Replace physical line `line` (1-based) of `path`
pub fn rewrite_line(path: &Path, line: usize, f: impl FnOnce(&str) -> String) {
    let contents = fs::read_to_string(path).expect("Failed to read ledger");
    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
    lines[line - 1] = f(&lines[line - 1]);
    fs::write(path, format!("{}\n", lines.join("\n"))).expect("Failed to write ledger");
}

/// Six-line anchor record
pub fn anchor_text(root: &str, prev_arweave: &str, prev_ipfs: &str) -> String {
    format!(
        "{}\n2025-03-01T12:00:00Z\nnode-01\ndual-anchor/v1\n{}\n{}\n",
        root, prev_arweave, prev_ipfs
    )
}

/// 64-hex stem made of one repeated digit
pub fn hex_stem(digit: char) -> String {
    digit.to_string().repeat(64)
}
