//! Named milestone snapshots for documents.
//!
//! A milestone captures a document's full state under a human-readable
//! label. All milestones for a document live in one backend record keyed by
//! the document id, separate from the live persistence record, so marking a
//! milestone never disturbs ongoing synchronization.

use std::sync::Arc;

use log::debug;
use yrs::Doc;

use super::backend::StorageBackend;
use super::merge::encode_full_state;
use super::types::MilestoneRecord;
use crate::config::PersistenceConfig;
use crate::error::Result;

/// Reads and writes milestone records for documents.
pub struct MilestoneStore {
    backend: Arc<dyn StorageBackend>,
    config: PersistenceConfig,
}

impl MilestoneStore {
    /// Create a store over a backend using the given configuration for
    /// topic naming.
    pub fn new(backend: Arc<dyn StorageBackend>, config: PersistenceConfig) -> Self {
        Self { backend, config }
    }

    /// Capture the document's current full state under a label.
    ///
    /// Re-marking an existing label replaces that entry; other labels are
    /// untouched. The record update is atomic: a concurrent mark for a
    /// different label cannot be lost.
    pub async fn mark(&self, id: &str, doc: &Doc, label: &str) -> Result<()> {
        let topic = self.config.milestone_topic(id);
        let state = encode_full_state(doc);
        let id = id.to_string();
        let label = label.to_string();

        self.backend
            .store_with_schema(
                &topic,
                Box::new(move |current| {
                    let mut record = match current {
                        Some(bytes) => MilestoneRecord::decode(&bytes)?,
                        None => MilestoneRecord::new(id),
                    };
                    record.milestones.insert(label, state);
                    record.encode()
                }),
            )
            .await?;
        debug!("Marked milestone on {topic}");
        Ok(())
    }

    /// Fetch all milestones recorded for a document.
    ///
    /// Returns `None` when the document has no milestone record. Read
    /// failures are surfaced: unlike reconciliation, a caller asking for
    /// milestones must not mistake an unreachable store for an empty one.
    pub async fn get(&self, id: &str) -> Result<Option<MilestoneRecord>> {
        let topic = self.config.milestone_topic(id);
        match self.backend.load(&topic).await? {
            Some(bytes) => Ok(Some(MilestoneRecord::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete the whole milestone record for a document.
    pub async fn clear(&self, id: &str) -> Result<()> {
        self.backend.delete(&self.config.milestone_topic(id)).await
    }
}
