//! Document persistence, milestones, and snapshot revert.
//!
//! This module attaches a replicated document (a yrs [`yrs::Doc`]) to a
//! durable backing store and keeps the two eventually consistent through
//! incremental binary deltas:
//!
//! - [`SyncProvider`] owns the connect/disconnect lifecycle and forwards
//!   document update events to the store.
//! - [`reconcile`] is the pure merge step deciding what to persist and what
//!   to apply back into the live document.
//! - [`MilestoneStore`] records named snapshots of a document's full state.
//! - [`revert_to_snapshot`] rolls a live document back to an earlier
//!   snapshot without destroying its state-vector lineage.
//!
//! The document and the backend are borrowed collaborators: documents are
//! cheap cloned handles, backends live behind `Arc<dyn StorageBackend>`.

mod backend;
mod memory_backend;
mod merge;
mod milestone;
mod provider;
mod revert;
mod types;

pub use backend::{BackendResult, BoxFuture, RecordTransform, StorageBackend};
pub use memory_backend::MemoryBackend;
pub use merge::{
    ReconcilePlan, apply_to_doc, diff_since, encode_full_state, encode_state_vector, merge_deltas,
    reconcile,
};
pub use milestone::MilestoneStore;
pub use provider::SyncProvider;
pub use revert::{SharedKind, revert_to_snapshot};
pub use types::{MilestoneRecord, OriginTag, SyncStatus};
