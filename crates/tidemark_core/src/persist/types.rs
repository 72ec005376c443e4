//! Core types for the persistence layer.
//!
//! This module defines the provenance tags attached to applied deltas, the
//! milestone record format, and the synchronization status carried by the
//! completion signal.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use yrs::Origin;

/// Provenance of an applied delta or emitted update event.
///
/// Tags are used only for feedback-loop suppression, never for ownership or
/// identity. A delta applied under [`OriginTag::Storage`] came from the
/// backend and must not be re-persisted; [`OriginTag::Snapshot`] marks
/// revert bookkeeping that must not leak into persistence either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OriginTag {
    /// Delta originated from a local user action
    Local,

    /// Delta was read from the storage backend
    Storage,

    /// Delta belongs to snapshot-revert bookkeeping
    Snapshot,
}

impl OriginTag {
    /// Stable string form used as the yrs transaction origin.
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginTag::Local => "local",
            OriginTag::Storage => "storage-origin",
            OriginTag::Snapshot => "snapshot-origin",
        }
    }
}

impl From<OriginTag> for Origin {
    fn from(tag: OriginTag) -> Self {
        Origin::from(tag.as_str())
    }
}

impl std::fmt::Display for OriginTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OriginTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(OriginTag::Local),
            "storage-origin" => Ok(OriginTag::Storage),
            "snapshot-origin" => Ok(OriginTag::Snapshot),
            _ => Err(format!("Unknown origin tag: {}", s)),
        }
    }
}

/// Status of the current connect cycle, carried by the completion signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Initial reconciliation has not finished yet.
    Pending,

    /// Initial reconciliation finished; document and store are consistent.
    Synced,

    /// The session was torn down before reconciliation finished.
    Aborted,
}

/// Per-document milestone record: a mapping from human-readable label to a
/// full-state delta, stored as a single backend record keyed by document id.
///
/// Labels are unique within a record; re-marking an existing label
/// overwrites only that entry (last write wins, no merge). Records are
/// never auto-expired - their lifecycle belongs to the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MilestoneRecord {
    /// Document id this record belongs to.
    pub id: String,

    /// Label to full-state delta mapping, base64 on the wire.
    #[serde(with = "base64_map")]
    pub milestones: HashMap<String, Vec<u8>>,
}

impl MilestoneRecord {
    /// Create an empty record for a document id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            milestones: HashMap::new(),
        }
    }

    /// Decode a record from its persisted JSON form.
    pub fn decode(bytes: &[u8]) -> crate::error::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode the record to its persisted JSON form.
    pub fn encode(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Serde adapter storing binary deltas as base64 strings inside the JSON
/// milestone record. Keys are sorted on encode for stable output.
mod base64_map {
    use super::*;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(map: &HashMap<String, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded: BTreeMap<&str, String> = map
            .iter()
            .map(|(name, delta)| (name.as_str(), STANDARD.encode(delta)))
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HashMap<String, Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = HashMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(name, encoded)| {
                STANDARD
                    .decode(&encoded)
                    .map(|delta| (name, delta))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}
