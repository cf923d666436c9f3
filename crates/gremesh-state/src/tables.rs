//! redb table definitions for the tunnel record store.
//!
//! Tunnel records are keyed by `{network}/{from}/{to}` so that every record
//! of a network, or every outbound record of a host on a network, is a
//! contiguous prefix range.

use redb::TableDefinition;

/// Tunnel records (JSON) keyed by `{network}/{from}/{to}`.
pub const TUNNELS: TableDefinition<&str, &[u8]> = TableDefinition::new("tunnels");

/// Record id → tunnel key.
pub const TUNNEL_IDS: TableDefinition<u64, &str> = TableDefinition::new("tunnel_ids");

/// Store-wide counters.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Next record id to hand out, in [`META`].
pub const NEXT_TUNNEL_ID: &str = "next_tunnel_id";
