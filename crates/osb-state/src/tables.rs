//! redb table definitions for the registry.
//!
//! Each table uses `&str` keys (hyphenated UUIDs) and `&[u8]` values
//! (JSON-serialized records).

use redb::TableDefinition;

/// Service instances keyed by `{instance_id}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Bindings keyed by `{binding_id}`.
pub const BINDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("bindings");
