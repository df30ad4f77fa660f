//! redb table definitions for the Warden state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).
//! Keys are prefixed with a zero-padded timestamp.

use redb::TableDefinition;

/// Chaos events keyed by `{timestamp_ms}:{target}`.
pub const CHAOS_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("chaos_events");

/// Applied scaling actions keyed by `{timestamp}:{from}`.
pub const SCALING_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("scaling_events");

/// Recent metrics snapshots keyed by `{timestamp}`.
pub const METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("metrics");
