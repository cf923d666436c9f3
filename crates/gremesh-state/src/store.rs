//! TunnelStore: redb-backed persistence of tunnel records.
//!
//! Records are JSON-serialized into redb's `&[u8]` value columns. A
//! secondary `id → key` table supports updates by record id. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gremesh_core::{HostId, IsolationKey, NetworkId};
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::lock::{MeshLock, MeshLockGuard};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe tunnel record store backed by redb.
#[derive(Clone)]
pub struct TunnelStore {
    db: Arc<Database>,
    lock: Arc<MeshLock>,
}

impl TunnelStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!(?path, "tunnel store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!("in-memory tunnel store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> StateResult<Self> {
        let store = Self {
            db: Arc::new(db),
            lock: Arc::new(MeshLock::new()),
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(TUNNELS).map_err(map_err!(Table))?;
        txn.open_table(TUNNEL_IDS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Locking ────────────────────────────────────────────────────

    /// Acquire the global mesh lock, waiting at most `timeout`.
    pub fn acquire_lock(&self, timeout: Duration) -> StateResult<MeshLockGuard<'_>> {
        self.lock.acquire(timeout)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Get the record for a directed triple.
    pub fn get(&self, key: &TunnelKey) -> StateResult<Option<TunnelRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TUNNELS).map_err(map_err!(Table))?;
        match table.get(key.table_key().as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: TunnelRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All records terminating at `host` on `network`.
    pub fn list_peers_to(&self, host: HostId, network: NetworkId) -> StateResult<Vec<TunnelRecord>> {
        let mut records = self.list_by_network(network)?;
        records.retain(|r| r.to == host);
        Ok(records)
    }

    /// All records on `network`.
    pub fn list_by_network(&self, network: NetworkId) -> StateResult<Vec<TunnelRecord>> {
        self.scan_prefix(&network_prefix(network))
    }

    /// Every record in the store.
    pub fn list_all(&self) -> StateResult<Vec<TunnelRecord>> {
        self.scan_prefix("")
    }

    fn scan_prefix(&self, prefix: &str) -> StateResult<Vec<TunnelRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TUNNELS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                break;
            }
            let record: TunnelRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Create a `Pending` record for `key`, or return the one already stored.
    ///
    /// An existing record is returned as-is whatever its state; the caller
    /// decides whether to re-issue the creation command.
    pub fn create_or_get(&self, key: &TunnelKey, gre_key: IsolationKey) -> StateResult<TunnelRecord> {
        let table_key = key.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut tunnels = txn.open_table(TUNNELS).map_err(map_err!(Table))?;
            let existing: Option<TunnelRecord> = tunnels
                .get(table_key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| serde_json::from_slice(guard.value()))
                .transpose()
                .map_err(map_err!(Deserialize))?;

            if let Some(existing) = existing {
                debug!(tunnel = %key, state = %existing.state, "tunnel record already exists");
                existing
            } else {
                let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
                let id = meta
                    .get(NEXT_TUNNEL_ID)
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value())
                    .unwrap_or(1);
                meta.insert(NEXT_TUNNEL_ID, id + 1).map_err(map_err!(Write))?;

                let now = epoch_secs();
                let record = TunnelRecord {
                    id,
                    from: key.from,
                    to: key.to,
                    network_id: key.network,
                    key: gre_key,
                    state: TunnelState::Pending,
                    port_name: String::new(),
                    created_at: now,
                    updated_at: now,
                };
                let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                tunnels
                    .insert(table_key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;

                let mut ids = txn.open_table(TUNNEL_IDS).map_err(map_err!(Table))?;
                ids.insert(id, table_key.as_str()).map_err(map_err!(Write))?;

                debug!(tunnel = %key, id, "tunnel record created");
                record
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(record)
    }

    /// Set the state and port name of record `id`.
    pub fn update_state(
        &self,
        id: TunnelId,
        state: TunnelState,
        port_name: &str,
    ) -> StateResult<TunnelRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let ids = txn.open_table(TUNNEL_IDS).map_err(map_err!(Table))?;
            let table_key = ids
                .get(id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string())
                .ok_or_else(|| StateError::NotFound(format!("tunnel record {id}")))?;

            let mut tunnels = txn.open_table(TUNNELS).map_err(map_err!(Table))?;
            let mut record: TunnelRecord = tunnels
                .get(table_key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| serde_json::from_slice(guard.value()))
                .transpose()
                .map_err(map_err!(Deserialize))?
                .ok_or_else(|| StateError::NotFound(format!("tunnel {table_key}")))?;

            record.state = state;
            record.port_name = port_name.to_string();
            record.updated_at = epoch_secs();
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            tunnels
                .insert(table_key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, tunnel = %record.tunnel_key(), %state, "tunnel state updated");
        Ok(record)
    }

    /// Delete the record of one directed triple. Returns true if it existed.
    pub fn delete_by_pair(&self, key: &TunnelKey) -> StateResult<bool> {
        let table_key = key.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed = {
            let mut tunnels = txn.open_table(TUNNELS).map_err(map_err!(Table))?;
            let removed: Option<TunnelRecord> = tunnels
                .remove(table_key.as_str())
                .map_err(map_err!(Write))?
                .map(|guard| serde_json::from_slice(guard.value()))
                .transpose()
                .map_err(map_err!(Deserialize))?;
            if let Some(record) = &removed {
                let mut ids = txn.open_table(TUNNEL_IDS).map_err(map_err!(Table))?;
                ids.remove(record.id).map_err(map_err!(Write))?;
            }
            removed.is_some()
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(tunnel = %key, existed, "tunnel record deleted");
        Ok(existed)
    }

    /// Delete every record leaving `host` on `network`. Returns number deleted.
    pub fn delete_all_from(&self, host: HostId, network: NetworkId) -> StateResult<usize> {
        // Collect keys in a read transaction first.
        let doomed = self.scan_prefix(&outbound_prefix(host, network))?;
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = doomed.len();
        {
            let mut tunnels = txn.open_table(TUNNELS).map_err(map_err!(Table))?;
            let mut ids = txn.open_table(TUNNEL_IDS).map_err(map_err!(Table))?;
            for record in &doomed {
                tunnels
                    .remove(record.tunnel_key().table_key().as_str())
                    .map_err(map_err!(Write))?;
                ids.remove(record.id).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host, network, count, "outbound tunnel records deleted");
        Ok(count)
    }
}
