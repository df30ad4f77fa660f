//! StateStore — redb-backed persistence for the control plane.
//!
//! Provides typed append/list operations over chaos events, scaling events
//! and metrics snapshots. The store supports both on-disk and in-memory
//! backends (the latter for testing and dry runs).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use warden_core::{ChaosEvent, MetricsSnapshot, ScalingEvent};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Full export of the store, used as the state-store backup payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    pub chaos_events: Vec<ChaosEvent>,
    pub scaling_events: Vec<ScalingEvent>,
    pub metrics: Vec<MetricsSnapshot>,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CHAOS_EVENTS).map_err(map_err!(Table))?;
        txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
        txn.open_table(METRICS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Chaos events ───────────────────────────────────────────────

    /// Append a chaos event to the log.
    pub fn append_chaos_event(&self, event: &ChaosEvent) -> StateResult<()> {
        self.put(CHAOS_EVENTS, &event.table_key(), event)
    }

    /// Newest chaos events first, at most `limit`.
    pub fn recent_chaos_events(&self, limit: usize) -> StateResult<Vec<ChaosEvent>> {
        self.list_newest(CHAOS_EVENTS, limit)
    }

    /// Total number of logged chaos events.
    pub fn chaos_event_count(&self) -> StateResult<u64> {
        self.count(CHAOS_EVENTS)
    }

    // ── Scaling events ─────────────────────────────────────────────

    /// Record an applied scaling action.
    pub fn append_scaling_event(&self, event: &ScalingEvent) -> StateResult<()> {
        self.put(SCALING_EVENTS, &event.table_key(), event)
    }

    /// Newest scaling events first, at most `limit`.
    pub fn recent_scaling_events(&self, limit: usize) -> StateResult<Vec<ScalingEvent>> {
        self.list_newest(SCALING_EVENTS, limit)
    }

    // ── Metrics ────────────────────────────────────────────────────

    /// Store a metrics snapshot and drop the oldest beyond `keep`.
    pub fn put_metrics(&self, snapshot: &MetricsSnapshot, keep: usize) -> StateResult<()> {
        self.put(METRICS, &snapshot.table_key(), snapshot)?;
        self.prune_oldest(METRICS, keep)
    }

    /// Newest metrics snapshots first, at most `limit`.
    pub fn recent_metrics(&self, limit: usize) -> StateResult<Vec<MetricsSnapshot>> {
        self.list_newest(METRICS, limit)
    }

    // ── Export / import ────────────────────────────────────────────

    /// Export every table, oldest record first.
    pub fn export(&self) -> StateResult<StateSnapshot> {
        Ok(StateSnapshot {
            chaos_events: self.list_all(CHAOS_EVENTS)?,
            scaling_events: self.list_all(SCALING_EVENTS)?,
            metrics: self.list_all(METRICS)?,
        })
    }

    /// Replace the store contents with a snapshot in a single transaction.
    pub fn import(&self, snapshot: &StateSnapshot) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut chaos = txn.open_table(CHAOS_EVENTS).map_err(map_err!(Table))?;
            clear_table(&mut chaos)?;
            for event in &snapshot.chaos_events {
                let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
                chaos
                    .insert(event.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }

            let mut scaling = txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
            clear_table(&mut scaling)?;
            for event in &snapshot.scaling_events {
                let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
                scaling
                    .insert(event.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }

            let mut metrics = txn.open_table(METRICS).map_err(map_err!(Table))?;
            clear_table(&mut metrics)?;
            for snap in &snapshot.metrics {
                let value = serde_json::to_vec(snap).map_err(map_err!(Serialize))?;
                metrics
                    .insert(snap.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            chaos_events = snapshot.chaos_events.len(),
            scaling_events = snapshot.scaling_events.len(),
            metrics = snapshot.metrics.len(),
            "state snapshot imported"
        );
        Ok(())
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn list_all<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    fn list_newest<T: DeserializeOwned>(&self, table: Table, limit: usize) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))?.rev() {
            if results.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    fn count(&self, table: Table) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        t.len().map_err(map_err!(Read))
    }

    fn prune_oldest(&self, table: Table, keep: usize) -> StateResult<()> {
        // Collect keys in a read transaction first.
        let stale: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let t = txn.open_table(table).map_err(map_err!(Table))?;
            let len = t.len().map_err(map_err!(Read))? as usize;
            if len <= keep {
                return Ok(());
            }
            t.iter()
                .map_err(map_err!(Read))?
                .take(len - keep)
                .filter_map(|entry| entry.ok().map(|(k, _)| k.value().to_string()))
                .collect()
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            for key in &stale {
                t.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

fn clear_table(table: &mut redb::Table<'_, &'static str, &'static [u8]>) -> StateResult<()> {
    let keys: Vec<String> = table
        .iter()
        .map_err(map_err!(Read))?
        .filter_map(|entry| entry.ok().map(|(k, _)| k.value().to_string()))
        .collect();
    for key in &keys {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    Ok(())
}
