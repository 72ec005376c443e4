//! In-memory backend implementation for testing.
//!
//! This provides a simple in-memory implementation of [`StorageBackend`]
//! for use in unit tests and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use yrs::Update;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;

use super::backend::{BackendResult, BoxFuture, RecordTransform, StorageBackend};
use crate::error::TidemarkError;

/// In-memory record store for testing.
///
/// Records live in a `HashMap` behind an `RwLock`; data is lost when the
/// backend is dropped. Deltas stored to a topic are merged into the topic's
/// record immediately, so `load` always returns a single combined delta.
///
/// Read and write failures can be injected to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// Records (topic -> binary blob)
    records: Arc<RwLock<HashMap<String, Vec<u8>>>>,

    /// When set, `load` returns a backend error
    fail_reads: AtomicBool,

    /// When set, `store` and `store_with_schema` return a backend error
    fail_stores: AtomicBool,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `load` calls fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `store` and `store_with_schema` calls fail.
    pub fn set_fail_stores(&self, fail: bool) {
        self.fail_stores.store(fail, Ordering::SeqCst);
    }

    /// Raw record bytes for a topic, bypassing failure injection.
    pub fn raw_record(&self, topic: &str) -> Option<Vec<u8>> {
        self.records.read().unwrap().get(topic).cloned()
    }

    /// Number of records held.
    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }

    fn merge_record(existing: Option<&[u8]>, delta: &[u8]) -> BackendResult<Vec<u8>> {
        let Some(existing) = existing else {
            return Ok(delta.to_vec());
        };
        let merged = Update::merge_updates(vec![
            Update::decode_v1(existing)
                .map_err(|e| TidemarkError::Crdt(format!("Undecodable record: {e}")))?,
            Update::decode_v1(delta)
                .map_err(|e| TidemarkError::Crdt(format!("Undecodable delta: {e}")))?,
        ]);
        Ok(merged.encode_v1())
    }
}

impl StorageBackend for MemoryBackend {
    fn load<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, BackendResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(TidemarkError::Backend("Injected read failure".into()));
            }
            let records = self.records.read().unwrap();
            Ok(records.get(topic).cloned())
        })
    }

    fn store<'a>(&'a self, topic: &'a str, delta: &'a [u8]) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            if self.fail_stores.load(Ordering::SeqCst) {
                return Err(TidemarkError::Backend("Injected store failure".into()));
            }
            let mut records = self.records.write().unwrap();
            let merged = Self::merge_record(records.get(topic).map(|r| r.as_slice()), delta)?;
            records.insert(topic.to_string(), merged);
            Ok(())
        })
    }

    fn store_with_schema<'a>(
        &'a self,
        topic: &'a str,
        transform: RecordTransform,
    ) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            if self.fail_stores.load(Ordering::SeqCst) {
                return Err(TidemarkError::Backend("Injected store failure".into()));
            }
            let mut records = self.records.write().unwrap();
            let current = records.get(topic).cloned();
            let replacement = transform(current)?;
            records.insert(topic.to_string(), replacement);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            let mut records = self.records.write().unwrap();
            records.remove(topic);
            Ok(())
        })
    }
}
