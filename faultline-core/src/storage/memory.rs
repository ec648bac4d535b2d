//! In-process storage medium

use super::StorageBackend;
use crate::error::Result;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Records held in a map; lost when the process exits.
///
/// Share one instance (behind an `Arc`) between stores to simulate reopening
/// the same medium.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StorageBackend for MemoryBackend {
    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.records().keys().cloned().collect())
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.records().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.records().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.records().remove(key);
        Ok(())
    }
}
