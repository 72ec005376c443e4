//! Delta encoding, merging, and reconciliation helpers.
//!
//! Everything here works on v1-encoded binary deltas. The reconcile step is
//! the heart of connect: it folds the stored record into a live document and
//! computes the delta the store is missing, so both sides converge without
//! either overwriting the other.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use super::types::OriginTag;
use crate::error::{Result, TidemarkError};

/// Outcome of reconciling a live document against a stored record.
#[derive(Debug)]
pub struct ReconcilePlan {
    /// Whether a stored record was applied to the document.
    pub applied_from_store: bool,

    /// Delta the store is missing, to be persisted. `None` when document
    /// and record were already identical.
    pub delta_for_store: Option<Vec<u8>>,
}

/// Encode the document's full state as a single delta.
pub fn encode_full_state(doc: &Doc) -> Vec<u8> {
    doc.transact()
        .encode_state_as_update_v1(&StateVector::default())
}

/// Encode the document's current state vector.
pub fn encode_state_vector(doc: &Doc) -> Vec<u8> {
    doc.transact().state_vector().encode_v1()
}

/// Encode the delta covering everything the document knows beyond the given
/// state vector.
pub fn diff_since(doc: &Doc, state_vector: &[u8]) -> Result<Vec<u8>> {
    let sv = StateVector::decode_v1(state_vector)
        .map_err(|e| TidemarkError::Crdt(format!("Undecodable state vector: {e}")))?;
    Ok(doc.transact().encode_state_as_update_v1(&sv))
}

/// Apply a delta to a document under the given origin tag.
pub fn apply_to_doc(doc: &Doc, delta: &[u8], tag: OriginTag) -> Result<()> {
    let update = Update::decode_v1(delta)
        .map_err(|e| TidemarkError::Crdt(format!("Undecodable delta: {e}")))?;
    let mut txn = doc.transact_mut_with(tag);
    txn.apply_update(update)
        .map_err(|e| TidemarkError::Crdt(format!("Failed to apply delta: {e}")))?;
    Ok(())
}

/// Merge a batch of pending deltas into a single equivalent delta.
///
/// Merging is associative and duplicate-tolerant, so the result is the same
/// delta a peer would compute from any interleaving of the batch.
pub fn merge_deltas<I>(deltas: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = Vec<u8>>,
{
    let decoded: Vec<Update> = deltas
        .into_iter()
        .map(|bytes| {
            Update::decode_v1(&bytes)
                .map_err(|e| TidemarkError::Crdt(format!("Undecodable delta: {e}")))
        })
        .collect::<Result<_>>()?;
    Ok(Update::merge_updates(decoded).encode_v1())
}

/// Reconcile a live document with the bytes of its stored record.
///
/// The record is applied to the document under [`OriginTag::Storage`], then
/// the delta covering local state the record lacked is computed against the
/// record's own state vector. Applying that delta to the store makes both
/// sides equal without losing edits made while disconnected.
pub fn reconcile(doc: &Doc, record: Option<&[u8]>) -> Result<ReconcilePlan> {
    let Some(record) = record else {
        // Nothing stored yet: seed the store with the full local state.
        return Ok(ReconcilePlan {
            applied_from_store: false,
            delta_for_store: Some(encode_full_state(doc)),
        });
    };

    // Replay the record into a scratch document to learn its state vector.
    let store_sv = {
        let scratch = Doc::new();
        apply_to_doc(&scratch, record, OriginTag::Storage)?;
        encode_state_vector(&scratch)
    };

    apply_to_doc(doc, record, OriginTag::Storage)?;

    let missing = diff_since(doc, &store_sv)?;

    Ok(ReconcilePlan {
        applied_from_store: true,
        delta_for_store: Some(missing),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use yrs::{GetString, Text};

    fn doc_with_text(text: &str) -> Doc {
        let doc = Doc::new();
        let field = doc.get_or_insert_text("body");
        let mut txn = doc.transact_mut();
        field.insert(&mut txn, 0, text);
        drop(txn);
        doc
    }

    fn body_text(doc: &Doc) -> String {
        let field = doc.get_or_insert_text("body");
        field.get_string(&doc.transact())
    }

    #[test]
    fn test_full_state_round_trip() {
        let source = doc_with_text("hello");
        let state = encode_full_state(&source);

        let target = Doc::new();
        apply_to_doc(&target, &state, OriginTag::Local).unwrap();

        assert_eq!(body_text(&target), "hello");
    }

    #[test]
    fn test_diff_since_covers_only_new_edits() {
        let doc = Doc::new();
        let field = doc.get_or_insert_text("body");
        {
            let mut txn = doc.transact_mut();
            field.insert(&mut txn, 0, "hello");
        }
        let checkpoint = encode_state_vector(&doc);
        let baseline = encode_full_state(&doc);
        {
            let mut txn = doc.transact_mut();
            field.insert(&mut txn, 5, " world");
        }

        let diff = diff_since(&doc, &checkpoint).unwrap();

        // Replica that already has the baseline needs only the diff.
        let replica = Doc::new();
        apply_to_doc(&replica, &baseline, OriginTag::Local).unwrap();
        apply_to_doc(&replica, &diff, OriginTag::Local).unwrap();
        assert_eq!(body_text(&replica), "hello world");
    }

    #[test]
    fn test_apply_bad_delta_fails() {
        let doc = Doc::new();
        assert!(apply_to_doc(&doc, b"garbage", OriginTag::Local).is_err());
    }

    #[test]
    fn test_merge_deltas_equivalent_to_sequential_apply() {
        let doc = Doc::new();
        let field = doc.get_or_insert_text("body");
        let first = {
            let mut txn = doc.transact_mut();
            field.insert(&mut txn, 0, "ab");
            txn.encode_state_as_update_v1(&StateVector::default())
        };
        let checkpoint = encode_state_vector(&doc);
        let second = {
            let mut txn = doc.transact_mut();
            field.insert(&mut txn, 2, "cd");
            txn.encode_state_as_update_v1(
                &StateVector::decode_v1(&checkpoint).unwrap(),
            )
        };

        let merged = merge_deltas(vec![first, second]).unwrap();

        let replica = Doc::new();
        apply_to_doc(&replica, &merged, OriginTag::Local).unwrap();
        assert_eq!(body_text(&replica), "abcd");
    }

    #[test]
    fn test_merge_deltas_rejects_garbage() {
        assert!(merge_deltas(vec![b"garbage".to_vec()]).is_err());
    }

    #[test]
    fn test_reconcile_without_record_seeds_full_state() {
        let doc = doc_with_text("offline edit");

        let plan = reconcile(&doc, None).unwrap();

        assert!(!plan.applied_from_store);
        let seeded = plan.delta_for_store.unwrap();
        let replica = Doc::new();
        apply_to_doc(&replica, &seeded, OriginTag::Local).unwrap();
        assert_eq!(body_text(&replica), "offline edit");
    }

    #[test]
    fn test_reconcile_merges_both_directions() {
        // Store holds one peer's edits, doc holds another's.
        let store_doc = doc_with_text("from store");
        let record = encode_full_state(&store_doc);

        let doc = Doc::new();
        let local_field = doc.get_or_insert_text("notes");
        {
            let mut txn = doc.transact_mut();
            local_field.insert(&mut txn, 0, "from doc");
        }

        let plan = reconcile(&doc, Some(&record)).unwrap();
        assert!(plan.applied_from_store);

        // Document absorbed the stored edits.
        assert_eq!(body_text(&doc), "from store");
        assert_eq!(local_field.get_string(&doc.transact()), "from doc");

        // The returned delta carries the doc-only edits: a replica seeded
        // from the record plus the delta matches the reconciled document.
        let replica = Doc::new();
        apply_to_doc(&replica, &record, OriginTag::Local).unwrap();
        apply_to_doc(&replica, &plan.delta_for_store.unwrap(), OriginTag::Local).unwrap();
        assert_eq!(encode_full_state(&replica), encode_full_state(&doc));
    }

    #[test]
    fn test_reconcile_with_identical_state_yields_empty_diff() {
        let doc = doc_with_text("same");
        let record = encode_full_state(&doc);

        let plan = reconcile(&doc, Some(&record)).unwrap();

        // Applying the leftover delta to a replica of the record changes nothing.
        let replica = Doc::new();
        apply_to_doc(&replica, &record, OriginTag::Local).unwrap();
        let before = encode_full_state(&replica);
        apply_to_doc(&replica, &plan.delta_for_store.unwrap(), OriginTag::Local).unwrap();
        assert_eq!(encode_full_state(&replica), before);
    }
}
