//! redb table definitions for the tidepool state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Share records keyed by share id.
pub const SHARES: TableDefinition<&str, &[u8]> = TableDefinition::new("shares");

/// Service heartbeats keyed by `{topic}:{host}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");
