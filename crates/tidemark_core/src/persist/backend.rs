//! Storage backend abstraction for persisted CRDT records.
//!
//! This module defines the [`StorageBackend`] trait which abstracts over
//! durable key/value stores (IndexedDB-style databases, embedded KV stores,
//! memory for tests). Records are opaque binary blobs addressed by topic.
//!
//! ## Object safety
//!
//! `StorageBackend` is designed to be object-safe so providers can hold a
//! `dyn StorageBackend` without knowing the concrete store. To enable this,
//! all methods return boxed futures.

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T>;

/// A boxed future for object-safe async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An owned transformation applied to a record under the store's atomicity
/// guarantees. Receives the current record bytes (or `None` if absent) and
/// produces the replacement record.
pub type RecordTransform = Box<dyn FnOnce(Option<Vec<u8>>) -> BackendResult<Vec<u8>> + Send>;

/// Async abstraction over a durable key/value record store.
///
/// # Storage model
///
/// Each topic names a single record. [`StorageBackend::store`] folds an
/// incremental delta into that record: implementations either merge it into
/// the existing blob (CRDT-aware stores) or append it to a per-topic log.
/// Either way, a later [`StorageBackend::load`] must return bytes that are
/// decodable as one delta equivalent to everything stored so far.
///
/// [`StorageBackend::store_with_schema`] is the read-transform-replace
/// escape hatch for structured records (milestone maps) that must not go
/// through delta merging.
pub trait StorageBackend: Send + Sync {
    /// Load the record for a topic.
    ///
    /// Returns `None` if no record exists.
    fn load<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, BackendResult<Option<Vec<u8>>>>;

    /// Fold an incremental delta into the topic's record.
    fn store<'a>(&'a self, topic: &'a str, delta: &'a [u8]) -> BoxFuture<'a, BackendResult<()>>;

    /// Atomically replace the topic's record via a transformation of its
    /// current bytes. The transform runs exactly once; if it errors, the
    /// record is left untouched.
    fn store_with_schema<'a>(
        &'a self,
        topic: &'a str,
        transform: RecordTransform,
    ) -> BoxFuture<'a, BackendResult<()>>;

    /// Delete the record for a topic. Deleting an absent topic is a no-op.
    fn delete<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, BackendResult<()>>;
}
