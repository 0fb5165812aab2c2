//! Reconciliation engine — merge the editor's elements with the replicated set.
//!
//! DESIGN
//! ======
//! Merging is a per-id maximum under a total order:
//! 1. higher `version` wins;
//! 2. on equal version, lower `version_nonce` wins;
//! 3. on equal nonce, the lexically smaller canonical JSON wins.
//!
//! A maximum under a total order is commutative and associative, so peers
//! that have seen the same versions hold the same elements regardless of
//! delivery order. Payloads are atomic per version; fields are never mixed.
//!
//! Tombstones are ordinary elements here. A deleted copy with a higher
//! version beats any stale live copy, and nothing is ever dropped.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::element::{Element, ElementId};

/// Output of [`reconcile`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reconciled {
    /// Merged scene: local order first, then remote-only elements.
    pub elements: Vec<Element>,
    /// Ids where the remote copy was taken (new or winning).
    pub remote_applied: Vec<ElementId>,
    /// Ids where the local copy strictly beat a differing remote copy.
    pub local_retained: Vec<ElementId>,
}

impl Reconciled {
    /// True when applying the result would not change the editor.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.remote_applied.is_empty()
    }
}

/// Total order over copies of one element. `Greater` means `a` wins.
#[must_use]
pub fn compare(a: &Element, b: &Element) -> Ordering {
    a.version
        .cmp(&b.version)
        .then_with(|| b.version_nonce.cmp(&a.version_nonce))
        .then_with(|| b.canonical_json().cmp(&a.canonical_json()))
}

/// `candidate` strictly beats `held`.
#[must_use]
pub fn wins_over(candidate: &Element, held: &Element) -> bool {
    compare(candidate, held) == Ordering::Greater
}

/// Merge `local` (including tombstones) with `remote`.
#[must_use]
pub fn reconcile(local: &[Element], remote: &[Element]) -> Reconciled {
    let remote_by_id: HashMap<&str, &Element> =
        remote.iter().map(|e| (e.id.as_str(), e)).collect();

    let mut out = Reconciled {
        elements: Vec::with_capacity(local.len().max(remote.len())),
        ..Reconciled::default()
    };
    let mut seen: HashMap<&str, usize> = HashMap::with_capacity(local.len());

    for el in local {
        if let Some(&idx) = seen.get(el.id.as_str()) {
            // Duplicate id in the local set: collapse to the winner.
            if wins_over(el, &out.elements[idx]) {
                out.elements[idx] = el.clone();
            }
            continue;
        }
        let chosen = match remote_by_id.get(el.id.as_str()) {
            Some(theirs) => match compare(el, theirs) {
                Ordering::Less => {
                    out.remote_applied.push(el.id.clone());
                    (*theirs).clone()
                }
                Ordering::Greater => {
                    out.local_retained.push(el.id.clone());
                    el.clone()
                }
                Ordering::Equal => el.clone(),
            },
            None => el.clone(),
        };
        seen.insert(el.id.as_str(), out.elements.len());
        out.elements.push(chosen);
    }

    for el in remote {
        match seen.get(el.id.as_str()) {
            Some(&idx) => {
                if wins_over(el, &out.elements[idx]) {
                    out.elements[idx] = el.clone();
                }
            }
            None => {
                seen.insert(el.id.as_str(), out.elements.len());
                out.remote_applied.push(el.id.clone());
                out.elements.push(el.clone());
            }
        }
    }

    out
}

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod tests;
