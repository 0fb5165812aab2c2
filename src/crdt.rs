//! Replicated scene — the shared element map of one room.
//!
//! DESIGN
//! ======
//! A `yrs` document holding one map, `elements`, from element id to the
//! element's JSON. Each local write is a single transaction with origin
//! [`LOCAL_ORIGIN`]; each inbound update is applied in a transaction with
//! origin [`REMOTE_ORIGIN`]. Observers run only for remote transactions and
//! always receive the full element set, because reconciliation compares
//! whole scenes rather than diffs.
//!
//! The map resolves concurrent writes to one key by client id, not by element
//! version. That is why writes go through [`ReplicatedScene::write_delta`],
//! which never replaces a document copy with one that loses under
//! [`crate::reconcile::compare`], and why callers re-write ("repair") ids
//! where their local copy beat what the document settled on.
//!
//! ERROR HANDLING
//! ==============
//! Undecodable updates are rejected before touching the document. A map entry
//! that is not valid element JSON is skipped with a warning when reading, so
//! one corrupt peer write cannot block the rest of the scene.

use std::collections::HashSet;

use tracing::{debug, warn};
use yrs::updates::decoder::Decode;
use yrs::{Any, Doc, Map, MapRef, Out, ReadTxn, StateVector, Transact, Update};

use crate::element::{Element, ElementId};
use crate::error::ErrorCode;
use crate::reconcile::wins_over;
use crate::version_store::ElementVersionStore;

pub const ELEMENTS_MAP: &str = "elements";
pub const LOCAL_ORIGIN: &str = "local";
pub const REMOTE_ORIGIN: &str = "remote";

#[derive(Debug, thiserror::Error)]
pub enum CrdtError {
    #[error("undecodable update: {0}")]
    Decode(String),
    #[error("update rejected: {0}")]
    Apply(String),
    #[error("element {id} not serializable: {source}")]
    Encode {
        id: ElementId,
        #[source]
        source: serde_json::Error,
    },
}

impl ErrorCode for CrdtError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "E_CRDT_DECODE",
            Self::Apply(_) => "E_CRDT_APPLY",
            Self::Encode { .. } => "E_CRDT_ENCODE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn Fn(&[Element]) + Send + Sync>;

pub struct ReplicatedScene {
    doc: Doc,
    elements: MapRef,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,
}

impl std::fmt::Debug for ReplicatedScene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedScene")
            .field("client_id", &self.doc.client_id())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Default for ReplicatedScene {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicatedScene {
    #[must_use]
    pub fn new() -> Self {
        let doc = Doc::new();
        let elements = doc.get_or_insert_map(ELEMENTS_MAP);
        Self { doc, elements, observers: Vec::new(), next_observer: 0 }
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Write the delta of `elements` in one local transaction.
    ///
    /// An element is written when its version is above the last synced one,
    /// or when its id is in `repairs`, and in both cases only if it beats the
    /// copy the document already holds. Written versions are recorded in
    /// `store`. Returns the encoded update, or `None` when nothing was written.
    ///
    /// # Errors
    ///
    /// Returns `Encode` if an element cannot be serialized.
    pub fn write_delta(
        &mut self,
        elements: &[Element],
        store: &mut ElementVersionStore,
        repairs: &HashSet<ElementId>,
    ) -> Result<Option<Vec<u8>>, CrdtError> {
        let mut txn = self.doc.transact_mut_with(LOCAL_ORIGIN);
        let mut written = 0usize;

        for el in elements.iter().filter(|e| e.is_syncable()) {
            if !store.needs_sync(el) && !repairs.contains(&el.id) {
                continue;
            }
            let held = self
                .elements
                .get(&txn, el.id.as_str())
                .and_then(|out| decode_out(&el.id, &out));
            if let Some(held) = &held {
                if !wins_over(el, held) {
                    // Document already holds this copy or a better one.
                    if held == el {
                        store.record(el);
                    }
                    continue;
                }
            }
            let json = serde_json::to_string(el)
                .map_err(|source| CrdtError::Encode { id: el.id.clone(), source })?;
            self.elements.insert(&mut txn, el.id.as_str(), json);
            store.record(el);
            written += 1;
        }

        if written == 0 {
            return Ok(None);
        }
        debug!(written, "crdt: local transaction");
        Ok(Some(txn.encode_update_v1()))
    }

    /// Apply a peer update in one remote transaction, then notify observers
    /// with the full element set.
    ///
    /// # Errors
    ///
    /// Returns `Decode` or `Apply` when the bytes are not a valid update.
    pub fn apply_remote(&mut self, update: &[u8]) -> Result<Vec<Element>, CrdtError> {
        let update = Update::decode_v1(update).map_err(|e| CrdtError::Decode(e.to_string()))?;
        {
            let mut txn = self.doc.transact_mut_with(REMOTE_ORIGIN);
            txn.apply_update(update).map_err(|e| CrdtError::Apply(e.to_string()))?;
        }
        let elements = self.elements();
        for (_, observer) in &self.observers {
            observer(&elements);
        }
        Ok(elements)
    }

    // =========================================================================
    // OBSERVERS
    // =========================================================================

    pub fn observe(&mut self, callback: impl Fn(&[Element]) + Send + Sync + 'static) -> ObserverId {
        self.next_observer += 1;
        let id = ObserverId(self.next_observer);
        self.observers.push((id, Box::new(callback)));
        id
    }

    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Full document state as a single update.
    #[must_use]
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Every element in the document, sorted by id.
    #[must_use]
    pub fn elements(&self) -> Vec<Element> {
        let txn = self.doc.transact();
        let mut out: Vec<Element> = self
            .elements
            .iter(&txn)
            .filter_map(|(id, value)| decode_out(id, &value))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Element> {
        let txn = self.doc.transact();
        self.elements.get(&txn, id).and_then(|out| decode_out(id, &out))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let txn = self.doc.transact();
        self.elements.len(&txn) as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn decode_out(id: &str, value: &Out) -> Option<Element> {
    let Out::Any(Any::String(json)) = value else {
        warn!(%id, "crdt: non-string element entry");
        return None;
    };
    match serde_json::from_str::<Element>(json) {
        Ok(el) => Some(el),
        Err(e) => {
            warn!(%id, error = %e, "crdt: undecodable element entry");
            None
        }
    }
}

#[cfg(test)]
#[path = "crdt_test.rs"]
mod tests;
