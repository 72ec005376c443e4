//! Snapshot revert via selective undo.
//!
//! Reverting rolls the shared types captured in a snapshot back to their
//! snapshot state while preserving later edits to everything else. The trick
//! is done on a shadow document: the snapshot is replayed there, the live
//! document's newer changes are applied on top under a tracked origin, an
//! undo manager scoped to the snapshot's roots undoes exactly those changes,
//! and the resulting counter-delta is applied back to the live document.
//! History is never rewritten; the revert is an ordinary forward delta.

use log::warn;
use yrs::{Doc, Origin, ReadTxn, Transact, UndoManager};

use super::merge::{apply_to_doc, diff_since, encode_state_vector};
use super::types::OriginTag;
use crate::error::{Result, TidemarkError};

/// Structural kind of a top-level shared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedKind {
    /// A shared text sequence.
    Text,

    /// A shared key/value map.
    Map,

    /// A shared array.
    Array,
}

/// Roll the snapshot's shared types back to their snapshot state.
///
/// `kind_of` classifies each top-level key found in the snapshot; revert
/// cannot guess a root's structure from the delta alone. If any key comes
/// back unclassified the revert aborts with
/// [`TidemarkError::UnknownSharedKind`] before the live document is touched.
///
/// Shared types created or edited outside the snapshot's roots keep their
/// current state.
pub fn revert_to_snapshot<F>(doc: &Doc, snapshot: &[u8], kind_of: F) -> Result<()>
where
    F: Fn(&str) -> Option<SharedKind>,
{
    let shadow = Doc::new();
    apply_to_doc(&shadow, snapshot, OriginTag::Snapshot)?;

    // Classify every snapshot root up front so an unknown kind aborts
    // before any mutation reaches the live document.
    let roots: Vec<(String, SharedKind)> = {
        let txn = shadow.transact();
        txn.root_refs()
            .map(|(key, _)| {
                kind_of(key)
                    .map(|kind| (key.to_string(), kind))
                    .ok_or_else(|| TidemarkError::UnknownSharedKind {
                        key: key.to_string(),
                    })
            })
            .collect::<Result<_>>()?
    };

    let current_sv = encode_state_vector(doc);
    let snapshot_sv = encode_state_vector(&shadow);
    let changes_since_snapshot = diff_since(doc, &snapshot_sv)?;

    let mut undo: Option<UndoManager> = None;
    for (key, kind) in &roots {
        match kind {
            SharedKind::Text => {
                let root = shadow.get_or_insert_text(key.as_str());
                match undo.as_mut() {
                    Some(mgr) => mgr.expand_scope(&root),
                    None => {
                        let mut mgr = UndoManager::new(&shadow, &root);
                        mgr.include_origin(Origin::from(OriginTag::Snapshot));
                        undo = Some(mgr);
                    }
                }
            }
            SharedKind::Map => {
                let root = shadow.get_or_insert_map(key.as_str());
                match undo.as_mut() {
                    Some(mgr) => mgr.expand_scope(&root),
                    None => {
                        let mut mgr = UndoManager::new(&shadow, &root);
                        mgr.include_origin(Origin::from(OriginTag::Snapshot));
                        undo = Some(mgr);
                    }
                }
            }
            SharedKind::Array => {
                let root = shadow.get_or_insert_array(key.as_str());
                match undo.as_mut() {
                    Some(mgr) => mgr.expand_scope(&root),
                    None => {
                        let mut mgr = UndoManager::new(&shadow, &root);
                        mgr.include_origin(Origin::from(OriginTag::Snapshot));
                        undo = Some(mgr);
                    }
                }
            }
        }
    }

    apply_to_doc(&shadow, &changes_since_snapshot, OriginTag::Snapshot)?;

    if let Some(mut mgr) = undo {
        if !mgr.undo_blocking() {
            warn!("Undo step reverted nothing, document already matched the snapshot");
        }
    }

    let revert_delta = diff_since(&shadow, &current_sv)?;
    apply_to_doc(doc, &revert_delta, OriginTag::Snapshot)?;
    Ok(())
}
