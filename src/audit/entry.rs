//! Ledger Entry
//!
//! Defines the structure for tamper-evident ledger entries
//! with cryptographic hash chains.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audit::canonical::{canonical_hash, canonical_string};
use crate::error::GovernanceError;

/// One line of the ledger file.
///
/// `hash` is the SHA-256 of the canonical encoding of every other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp: String,
    pub agent: String,
    pub track: String,
    pub event_type: String,
    pub payload: Value,
    pub prev_hash: String,
    pub hash: String,
}

impl LedgerEntry {
    /// Build a sealed entry linked to `prev_hash`, stamped with the current UTC time
    pub fn new(
        agent: &str,
        track: &str,
        event_type: &str,
        payload: Value,
        prev_hash: &str,
    ) -> Self {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        Self::with_timestamp(timestamp, agent, track, event_type, payload, prev_hash)
    }

    pub fn with_timestamp(
        timestamp: String,
        agent: &str,
        track: &str,
        event_type: &str,
        payload: Value,
        prev_hash: &str,
    ) -> Self {
        let mut entry = Self {
            timestamp,
            agent: agent.to_string(),
            track: track.to_string(),
            event_type: event_type.to_string(),
            payload,
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
        };
        entry.hash = entry.calculate_hash();
        entry
    }

    /// All fields except `hash`, as a JSON object
    pub fn unsealed(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("timestamp".into(), Value::String(self.timestamp.clone()));
        map.insert("agent".into(), Value::String(self.agent.clone()));
        map.insert("track".into(), Value::String(self.track.clone()));
        map.insert("event_type".into(), Value::String(self.event_type.clone()));
        map.insert("payload".into(), self.payload.clone());
        map.insert("prev_hash".into(), Value::String(self.prev_hash.clone()));
        map
    }

    /// SHA-256 over the canonical encoding of the unsealed entry
    pub fn calculate_hash(&self) -> String {
        canonical_hash(&Value::Object(self.unsealed()))
    }

    pub fn verify_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    /// Full entry as a JSON object
    pub fn to_value(&self) -> Value {
        let mut map = self.unsealed();
        map.insert("hash".into(), Value::String(self.hash.clone()));
        Value::Object(map)
    }

    /// The exact line written to the ledger file, without the newline
    pub fn canonical_line(&self) -> String {
        canonical_string(&self.to_value())
    }

    pub fn from_line(line: &str) -> Result<Self, GovernanceError> {
        serde_json::from_str(line)
            .map_err(|e| GovernanceError::Structural(format!("Failed to parse ledger entry: {}", e)))
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} {} ({} -> {})",
            self.agent,
            self.track,
            self.event_type,
            &self.prev_hash[..self.prev_hash.len().min(12)],
            &self.hash[..self.hash.len().min(12)]
        )
    }
}
