//! Event validation consumed by the ledger writer

pub mod schema;

pub use schema::{EventDraft, EventSchemaValidator, SchemaError, SchemaRegistry, SchemaViolation};
