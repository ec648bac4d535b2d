//! Indexed key/value storage engine
//!
//! Backs both the offline event queue and the settings cache. Records are
//! keyed by a millisecond timestamp that is unique per store: each write takes
//! `max(now, last_written + 1)`, so rapid successive writes never collide.
//!
//! ## Architecture
//!
//! ```text
//! Storage<T> (typed, in-memory index of live timestamps, eviction)
//!      │  serde_json strings keyed by timestamp
//!      ▼
//! StorageBackend (MemoryBackend | SqliteBackend)
//! ```
//!
//! The index is built lazily on first use by scanning every key in the
//! backend. Keys that do not parse as timestamps and values that do not
//! deserialize are deleted on sight, so a corrupt record never blocks later
//! operations.

mod memory;
pub mod schema;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::{Database, SqliteBackend};

use crate::clock::Clock;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

/// Namespace of the offline event queue.
pub const QUEUE_NAMESPACE: &str = "queue";
/// Namespace of the server settings snapshot.
pub const SETTINGS_NAMESPACE: &str = "settings";

/// A persisted record.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageItem<T> {
    pub timestamp: i64,
    pub value: T,
}

/// Durable or in-memory medium holding string records under string keys.
///
/// Implementations are scoped to a single namespace.
pub trait StorageBackend: Send + Sync {
    /// Every key currently stored, in no particular order.
    fn keys(&self) -> Result<Vec<String>>;

    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace.
    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Delete; absent keys are not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
struct IndexState {
    loaded: bool,
    /// Live timestamps, ascending
    timestamps: Vec<i64>,
    last_timestamp: i64,
}

/// Capacity-bounded, timestamp-ordered store of `T` records.
pub struct Storage<T> {
    name: String,
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    max_items: usize,
    state: Mutex<IndexState>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Storage<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create a store over `backend` that never holds more than `max_items`.
    pub fn new(
        name: &str,
        backend: Arc<dyn StorageBackend>,
        max_items: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.to_string(),
            backend,
            clock,
            max_items: max_items.max(1),
            state: Mutex::new(IndexState::default()),
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Persist `value` and return its timestamp.
    ///
    /// Returns `None` if the value cannot be serialized or written. Evicts the
    /// oldest record when the store goes over capacity.
    pub fn save(&self, value: &T) -> Option<i64> {
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(store = %self.name, error = %e, "Failed to serialize record");
                return None;
            }
        };

        let mut state = self.lock();
        if let Err(e) = self.ensure_loaded(&mut state) {
            tracing::error!(store = %self.name, error = %e, "Failed to load storage index");
            return None;
        }

        let timestamp = self.clock.now_millis().max(state.last_timestamp + 1);
        if let Err(e) = self.backend.write(&timestamp.to_string(), &serialized) {
            tracing::error!(store = %self.name, timestamp, error = %e, "Failed to write record");
            return None;
        }

        state.timestamps.push(timestamp);
        state.last_timestamp = timestamp;
        self.evict_over_capacity(&mut state);

        Some(timestamp)
    }

    /// Oldest-first records, at most `limit` of them (all when `None`).
    pub fn get(&self, limit: Option<usize>) -> Vec<StorageItem<T>> {
        let mut state = self.lock();
        if let Err(e) = self.ensure_loaded(&mut state) {
            tracing::error!(store = %self.name, error = %e, "Failed to load storage index");
            return Vec::new();
        }

        let limit = limit.unwrap_or(usize::MAX);
        let mut items = Vec::new();
        let mut corrupt = Vec::new();

        for &timestamp in &state.timestamps {
            if items.len() >= limit {
                break;
            }
            match self.read_record(timestamp) {
                Some(value) => items.push(StorageItem { timestamp, value }),
                None => corrupt.push(timestamp),
            }
        }

        if !corrupt.is_empty() {
            state.timestamps.retain(|t| !corrupt.contains(t));
        }

        items
    }

    /// Delete a record. No-op when the timestamp is unknown.
    pub fn remove(&self, timestamp: i64) {
        let mut state = self.lock();
        if let Err(e) = self.ensure_loaded(&mut state) {
            tracing::error!(store = %self.name, error = %e, "Failed to load storage index");
            return;
        }

        let Some(pos) = state.timestamps.iter().position(|&t| t == timestamp) else {
            return;
        };
        state.timestamps.remove(pos);
        if let Err(e) = self.backend.delete(&timestamp.to_string()) {
            tracing::warn!(store = %self.name, timestamp, error = %e, "Failed to remove record");
        }
    }

    /// Delete every record, including ones the index never accepted.
    pub fn clear(&self) {
        let mut state = self.lock();
        match self.backend.keys() {
            Ok(keys) => {
                for key in keys {
                    if let Err(e) = self.backend.delete(&key) {
                        tracing::warn!(store = %self.name, key = %key, error = %e, "Failed to clear record");
                    }
                }
            }
            Err(e) => {
                tracing::error!(store = %self.name, error = %e, "Failed to list records for clear");
                for timestamp in &state.timestamps {
                    let _ = self.backend.delete(&timestamp.to_string());
                }
            }
        }
        state.timestamps.clear();
        state.loaded = true;
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let mut state = self.lock();
        match self.ensure_loaded(&mut state) {
            Ok(()) => state.timestamps.len(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read and decode one record, deleting it if it is missing or corrupt.
    fn read_record(&self, timestamp: i64) -> Option<T> {
        let key = timestamp.to_string();
        let raw = match self.backend.read(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(store = %self.name, timestamp, error = %e, "Failed to read record");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(store = %self.name, timestamp, error = %e, "Dropping corrupt record");
                let _ = self.backend.delete(&key);
                None
            }
        }
    }

    /// Drop the oldest records until the store is back within `max_items`.
    fn evict_over_capacity(&self, state: &mut IndexState) {
        let excess = state.timestamps.len().saturating_sub(self.max_items);
        for oldest in state.timestamps.drain(..excess) {
            tracing::debug!(store = %self.name, timestamp = oldest, "Evicting oldest record");
            if let Err(e) = self.backend.delete(&oldest.to_string()) {
                tracing::warn!(store = %self.name, timestamp = oldest, error = %e, "Failed to evict record");
            }
        }
    }

    fn ensure_loaded(&self, state: &mut IndexState) -> Result<()> {
        if state.loaded {
            return Ok(());
        }

        let mut timestamps = Vec::new();
        for key in self.backend.keys()? {
            let Ok(timestamp) = key.parse::<i64>() else {
                tracing::warn!(store = %self.name, key = %key, "Dropping record with unparsable key");
                let _ = self.backend.delete(&key);
                continue;
            };
            if self.read_record(timestamp).is_some() {
                timestamps.push(timestamp);
            }
        }
        timestamps.sort_unstable();

        state.last_timestamp = timestamps.last().copied().unwrap_or(0);
        state.timestamps = timestamps;
        state.loaded = true;

        // The store may have been written with a larger capacity
        self.evict_over_capacity(state);

        tracing::debug!(store = %self.name, records = state.timestamps.len(), "Loaded storage index");
        Ok(())
    }
}
