//! Durable persistence provider for a live CRDT document.
//!
//! [`SyncProvider`] attaches a document to a [`StorageBackend`] topic. On
//! connect it reconciles the document with the stored record so neither side
//! loses edits, then it captures every local update through a document
//! observer. Each captured update wakes a background writer that merges the
//! queue into a single delta and persists it, so an edit reaches the store
//! without any further call from the embedder. [`SyncProvider::flush`]
//! forces the same drain synchronously.
//!
//! Updates the provider itself applies (tagged [`OriginTag::Storage`]) are
//! filtered out by the observer, so stored content is never written back.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_lite::future::block_on;
use log::{debug, warn};
use tokio::sync::{mpsc, watch};
use yrs::{Doc, Origin, Subscription};

use super::backend::StorageBackend;
use super::merge::{merge_deltas, reconcile};
use super::types::{OriginTag, SyncStatus};
use crate::error::{Result, TidemarkError};

/// Captured update deltas awaiting persistence, shared between the
/// provider, its document observer, and the background writer.
///
/// `unsettled` counts every write that has not durably settled: it is
/// incremented when a delta is captured (or a reconciliation write starts)
/// and decremented only once the corresponding store call returns. A
/// failed store keeps its requeued delta counted, so the counter only
/// reaches zero when nothing more would be lost by exiting.
struct PersistQueue {
    backend: Arc<dyn StorageBackend>,
    topic: String,
    buffer: Mutex<Vec<Vec<u8>>>,
    unsettled: AtomicUsize,
    /// Serializes drains so an explicit flush observes the outcome of any
    /// drain already in flight on the writer thread.
    gate: tokio::sync::Mutex<()>,
}

impl PersistQueue {
    fn capture(&self, delta: Vec<u8>) {
        self.unsettled.fetch_add(1, Ordering::SeqCst);
        self.buffer.lock().unwrap().push(delta);
    }

    fn is_empty(&self) -> bool {
        self.buffer.lock().unwrap().is_empty()
    }

    fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    fn unsettled(&self) -> usize {
        self.unsettled.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        let mut buffer = self.buffer.lock().unwrap();
        self.unsettled.fetch_sub(buffer.len(), Ordering::SeqCst);
        buffer.clear();
    }

    /// Merge everything captured so far into one delta and store it. On a
    /// write failure the merged delta is requeued (and stays counted as
    /// unsettled) so nothing is lost.
    async fn drain(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        let drained: Vec<Vec<u8>> = std::mem::take(&mut *self.buffer.lock().unwrap());
        if drained.is_empty() {
            return Ok(());
        }
        let count = drained.len();

        let merged = match merge_deltas(drained) {
            Ok(merged) => merged,
            Err(e) => {
                self.unsettled.fetch_sub(count, Ordering::SeqCst);
                return Err(e);
            }
        };
        match self.backend.store(&self.topic, &merged).await {
            Ok(()) => {
                self.unsettled.fetch_sub(count, Ordering::SeqCst);
                debug!("Flushed delta to {}", self.topic);
                Ok(())
            }
            Err(e) => {
                self.buffer.lock().unwrap().insert(0, merged);
                self.unsettled.fetch_sub(count - 1, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

/// Per-session writer thread draining the queue as update events arrive.
/// Dropping the handle closes the signal channel and joins the thread, so
/// no background write survives a disconnect.
struct WriterHandle {
    tx: Option<mpsc::UnboundedSender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// State of one connect cycle. Dropped on disconnect. Field order matters:
/// the subscriptions go first so the observer's signal sender is released
/// before the writer handle joins its thread.
struct Session {
    epoch: u64,
    _update_subscription: Subscription,
    _destroy_subscription: Subscription,
    status_tx: watch::Sender<SyncStatus>,
    _writer: WriterHandle,
}

/// Counts a single write in flight on the shared unsettled counter, so
/// embedders can delay shutdown until [`SyncProvider::pending_writes`]
/// drains to zero.
struct WriteGuard {
    queue: Arc<PersistQueue>,
}

impl WriteGuard {
    fn acquire(queue: &Arc<PersistQueue>) -> Self {
        queue.unsettled.fetch_add(1, Ordering::SeqCst);
        Self {
            queue: Arc::clone(queue),
        }
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.queue.unsettled.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Synchronizes a live document with a single backend record.
///
/// The provider owns a handle to the document (documents are cheaply
/// clonable shared handles) and a topic naming its record. Lifecycle:
///
/// 1. [`connect`](Self::connect) - reconcile with the store and start
///    persisting updates as they happen. Idempotent while connected.
/// 2. [`disconnect`](Self::disconnect) - flush and stop persisting.
/// 3. [`cleanup`](Self::cleanup) - delete the record; only while
///    disconnected.
///
/// While connected, every local update event is captured and handed to a
/// background writer, so edits reach the store without further calls;
/// [`flush`](Self::flush) forces the drain synchronously when a caller
/// needs to observe the write settle.
///
/// [`when_synced`](Self::when_synced) resolves once the connect-time
/// reconciliation has completed, or fails with
/// [`TidemarkError::EarlyDisconnect`] if the session is torn down first.
pub struct SyncProvider {
    backend: Arc<dyn StorageBackend>,
    doc: Doc,
    queue: Arc<PersistQueue>,
    session: Mutex<Option<Session>>,
    status_rx: Mutex<watch::Receiver<SyncStatus>>,
    epoch: AtomicU64,
}

impl SyncProvider {
    /// Create a disconnected provider for a document and topic.
    ///
    /// Before the first [`connect`](Self::connect),
    /// [`when_synced`](Self::when_synced) resolves immediately: there is no
    /// reconciliation to wait for.
    pub fn new(backend: Arc<dyn StorageBackend>, doc: Doc, topic: impl Into<String>) -> Self {
        let (_tx, rx) = watch::channel(SyncStatus::Synced);
        let queue = Arc::new(PersistQueue {
            backend: Arc::clone(&backend),
            topic: topic.into(),
            buffer: Mutex::new(Vec::new()),
            unsettled: AtomicUsize::new(0),
            gate: tokio::sync::Mutex::new(()),
        });
        Self {
            backend,
            doc,
            queue,
            session: Mutex::new(None),
            status_rx: Mutex::new(rx),
            epoch: AtomicU64::new(0),
        }
    }

    /// The topic this provider persists to.
    pub fn topic(&self) -> &str {
        &self.queue.topic
    }

    /// Handle to the attached document.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Whether a session is currently active.
    pub fn connected(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    /// Whether captured updates are waiting to be stored.
    pub fn has_pending_changes(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Number of writes that have not durably settled: captured updates
    /// plus backend stores in flight. An embedder honoring the
    /// do-not-exit-while-writing guard should wait for zero.
    pub fn pending_writes(&self) -> usize {
        self.queue.unsettled()
    }

    /// Connect the document to its stored record.
    ///
    /// Loads the record, applies it to the document under
    /// [`OriginTag::Storage`], and persists whatever local state the record
    /// was missing. A read failure during the load is treated as an absent
    /// record so a fresh store can still come up; write failures are
    /// surfaced. Calling connect while already connected is a no-op.
    ///
    /// Returns [`TidemarkError::EarlyDisconnect`] if
    /// [`disconnect`](Self::disconnect) wins the race before reconciliation
    /// completes.
    pub async fn connect(&self) -> Result<()> {
        let my_epoch = {
            let mut session = self.session.lock().unwrap();
            if session.is_some() {
                return Ok(());
            }

            let my_epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            let (status_tx, status_rx) = watch::channel(SyncStatus::Pending);

            let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<()>();
            let writer_queue = Arc::clone(&self.queue);
            let writer_thread = std::thread::spawn(move || {
                while writer_rx.blocking_recv().is_some() {
                    if let Err(e) = block_on(writer_queue.drain()) {
                        warn!(
                            "Background persist for {} failed, delta kept queued: {e}",
                            writer_queue.topic
                        );
                    }
                }
            });

            // Once the document is destroyed the session stays alive but
            // terminal: late update events are dropped instead of persisted.
            let terminal = Arc::new(AtomicBool::new(false));
            let observer_queue = Arc::clone(&self.queue);
            let signal = writer_tx.clone();
            let skip: Origin = OriginTag::Storage.into();
            let terminal_in_observer = Arc::clone(&terminal);
            let update_subscription = self
                .doc
                .observe_update_v1(move |txn, event| {
                    if terminal_in_observer.load(Ordering::SeqCst) {
                        return;
                    }
                    if txn.origin() == Some(&skip) {
                        return;
                    }
                    observer_queue.capture(event.update.clone());
                    let _ = signal.send(());
                })
                .map_err(|e| TidemarkError::Crdt(format!("Failed to observe document: {e}")))?;
            let destroy_subscription = self
                .doc
                .observe_destroy(move |_txn, _doc| {
                    terminal.store(true, Ordering::SeqCst);
                })
                .map_err(|e| TidemarkError::Crdt(format!("Failed to observe document: {e}")))?;

            *session = Some(Session {
                epoch: my_epoch,
                _update_subscription: update_subscription,
                _destroy_subscription: destroy_subscription,
                status_tx,
                _writer: WriterHandle {
                    tx: Some(writer_tx),
                    thread: Some(writer_thread),
                },
            });
            *self.status_rx.lock().unwrap() = status_rx;
            my_epoch
        };

        let record = match self.backend.load(&self.queue.topic).await {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "Treating unreadable record for {} as absent: {e}",
                    self.queue.topic
                );
                None
            }
        };

        if !self.session_is(my_epoch) {
            return Err(TidemarkError::EarlyDisconnect);
        }

        let plan = match reconcile(&self.doc, record.as_deref()) {
            Ok(plan) => plan,
            Err(e) => {
                self.teardown(Some(my_epoch));
                return Err(e);
            }
        };
        debug!(
            "Reconciled {}: applied_from_store={}",
            self.queue.topic, plan.applied_from_store
        );

        if let Some(delta) = plan.delta_for_store {
            let _guard = WriteGuard::acquire(&self.queue);
            if let Err(e) = self.backend.store(&self.queue.topic, &delta).await {
                self.teardown(Some(my_epoch));
                return Err(e);
            }
        }

        let session = self.session.lock().unwrap();
        match session.as_ref() {
            Some(s) if s.epoch == my_epoch => {
                let _ = s.status_tx.send(SyncStatus::Synced);
                Ok(())
            }
            _ => Err(TidemarkError::EarlyDisconnect),
        }
    }

    /// Wait for the current connect cycle's reconciliation to complete.
    ///
    /// Resolves with `Ok(())` once the provider and the store agree, or with
    /// [`TidemarkError::EarlyDisconnect`] if the session ends first.
    pub async fn when_synced(&self) -> Result<()> {
        let mut rx = self.status_rx.lock().unwrap().clone();
        loop {
            match &*rx.borrow_and_update() {
                SyncStatus::Synced => return Ok(()),
                SyncStatus::Aborted => return Err(TidemarkError::EarlyDisconnect),
                SyncStatus::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(TidemarkError::EarlyDisconnect);
            }
        }
    }

    /// Force the capture queue to be persisted now.
    ///
    /// The background writer normally drains the queue on its own; flushing
    /// waits for any drain in flight and stores whatever remains, so after
    /// `Ok(())` every update captured so far has settled. A write failure
    /// keeps the merged delta queued and is surfaced to the caller.
    pub async fn flush(&self) -> Result<()> {
        self.queue.drain().await
    }

    /// End the current session.
    ///
    /// Remaining captured updates are flushed best-effort first (a failed
    /// flush keeps them queued for a later session) and the background
    /// writer is stopped. If reconciliation had not finished, waiters on
    /// [`when_synced`](Self::when_synced) fail with
    /// [`TidemarkError::EarlyDisconnect`]. Disconnecting while disconnected
    /// is a no-op.
    pub async fn disconnect(&self) {
        if !self.connected() {
            return;
        }
        if let Err(e) = self.flush().await {
            warn!("Flush on disconnect failed for {}: {e}", self.queue.topic);
        }
        self.teardown(None);
    }

    /// Delete the stored record for this topic.
    ///
    /// Fails with [`TidemarkError::CleanupWhileConnected`] while a session
    /// is active: an active observer would immediately start repopulating
    /// the record.
    pub async fn cleanup(&self) -> Result<()> {
        if self.connected() {
            return Err(TidemarkError::CleanupWhileConnected);
        }
        self.queue.clear();
        self.backend.delete(&self.queue.topic).await
    }

    /// Drop the session, aborting a still-pending sync and joining the
    /// writer thread. When `only_epoch` is set, tears down only that
    /// session.
    fn teardown(&self, only_epoch: Option<u64>) {
        let mut session = self.session.lock().unwrap();
        let matches = match (&*session, only_epoch) {
            (Some(s), Some(epoch)) => s.epoch == epoch,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return;
        }
        if let Some(s) = session.take() {
            s.status_tx.send_if_modified(|status| {
                if *status == SyncStatus::Pending {
                    *status = SyncStatus::Aborted;
                    true
                } else {
                    false
                }
            });
        }
    }

    fn session_is(&self, epoch: u64) -> bool {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.epoch == epoch)
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for SyncProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncProvider")
            .field("topic", &self.queue.topic)
            .field("connected", &self.connected())
            .field("pending_changes", &self.queue.len())
            .field("pending_writes", &self.pending_writes())
            .finish()
    }
}
