//! Configuration for the persistence layer.
//!
//! A [`PersistenceConfig`] holds the two plain strings recognized by this
//! layer: the database/namespace name and the backend topic namespace. Both
//! are composed into backend keys as `"{db_name}/{id}[/suffix]"`.

use serde::{Deserialize, Serialize};

/// Default database/namespace name used to compose backend keys.
pub const DEFAULT_DB_NAME: &str = "tidemark-local";

/// Default backend topic namespace for providers addressing a bare feed.
pub const DEFAULT_TOPIC: &str = "/crdt/tidemark";

/// Configuration for composing backend storage keys.
///
/// # Example
///
/// ```
/// use tidemark_core::config::PersistenceConfig;
///
/// let config = PersistenceConfig::default();
/// assert_eq!(config.doc_topic("ws-1"), "tidemark-local/ws-1/workspace");
/// assert_eq!(config.milestone_topic("ws-1"), "tidemark-local/ws-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database/namespace name prefixed to every composed key.
    pub db_name: String,

    /// Backend topic namespace, used when a provider addresses a raw feed
    /// instead of a per-document workspace record.
    pub topic: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_name: DEFAULT_DB_NAME.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
        }
    }
}

impl PersistenceConfig {
    /// Create a config with an explicit database name, keeping the default topic.
    pub fn with_db_name(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            ..Default::default()
        }
    }

    /// Key of the workspace record holding a document's latest reconciled delta.
    pub fn doc_topic(&self, id: &str) -> String {
        format!("{}/{}/workspace", self.db_name, id)
    }

    /// Key of the milestone record for a document id.
    pub fn milestone_topic(&self, id: &str) -> String {
        format!("{}/{}", self.db_name, id)
    }
}
