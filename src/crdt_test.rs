use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use super::*;

fn el(id: &str, version: u64) -> Element {
    let mut e = Element::new(id, serde_json::Map::new());
    e.version = version;
    e.version_nonce = 1;
    e.payload.insert("type".into(), json!("rectangle"));
    e
}

fn no_repairs() -> HashSet<ElementId> {
    HashSet::new()
}

#[test]
fn write_delta_skips_already_synced_versions() {
    let mut scene = ReplicatedScene::new();
    let mut store = ElementVersionStore::new();
    let elements = vec![el("a", 1), el("b", 1)];

    assert!(scene.write_delta(&elements, &mut store, &no_repairs()).unwrap().is_some());
    assert_eq!(scene.len(), 2);
    assert_eq!(store.last_synced("a"), Some(1));

    assert!(scene.write_delta(&elements, &mut store, &no_repairs()).unwrap().is_none());
}

#[test]
fn write_delta_writes_only_bumped_elements() {
    let mut scene = ReplicatedScene::new();
    let mut store = ElementVersionStore::new();
    let mut elements = vec![el("a", 1), el("b", 1)];
    let first = scene.write_delta(&elements, &mut store, &no_repairs()).unwrap().unwrap();

    elements[1].bump(5);
    let second = scene.write_delta(&elements, &mut store, &no_repairs()).unwrap().unwrap();
    assert!(second.len() < first.len());

    let mut peer = ReplicatedScene::new();
    peer.apply_remote(&first).unwrap();
    peer.apply_remote(&second).unwrap();
    assert_eq!(peer.get("a").unwrap().version, 1);
    assert_eq!(peer.get("b").unwrap().version, 2);
}

#[test]
fn transient_elements_never_enter_the_document() {
    let mut scene = ReplicatedScene::new();
    let mut store = ElementVersionStore::new();
    let mut dragging = el("drag", 1);
    dragging.transient = true;
    assert!(scene.write_delta(&[dragging], &mut store, &no_repairs()).unwrap().is_none());
    assert!(scene.is_empty());
}

#[test]
fn write_never_replaces_a_better_document_copy() {
    let mut source = ReplicatedScene::new();
    let mut source_store = ElementVersionStore::new();
    let update = source
        .write_delta(&[el("a", 5)], &mut source_store, &no_repairs())
        .unwrap()
        .unwrap();

    let mut scene = ReplicatedScene::new();
    scene.apply_remote(&update).unwrap();
    let mut store = ElementVersionStore::new();
    assert!(scene.write_delta(&[el("a", 2)], &mut store, &no_repairs()).unwrap().is_none());
    assert_eq!(scene.get("a").unwrap().version, 5);
}

#[test]
fn repair_writes_past_the_version_store() {
    let mut scene = ReplicatedScene::new();
    let mut store = ElementVersionStore::new();
    store.record(&el("a", 3));

    // Store already says v3 was synced, so only a repair writes it.
    assert!(scene.write_delta(&[el("a", 3)], &mut store, &no_repairs()).unwrap().is_none());
    let repairs: HashSet<ElementId> = ["a".to_string()].into();
    assert!(scene.write_delta(&[el("a", 3)], &mut store, &repairs).unwrap().is_some());
    assert_eq!(scene.get("a").unwrap().version, 3);
}

#[test]
fn observers_receive_full_set_on_remote_apply_only() {
    let mut a = ReplicatedScene::new();
    let mut b = ReplicatedScene::new();
    let mut store_a = ElementVersionStore::new();
    let mut store_b = ElementVersionStore::new();

    let calls = Arc::new(AtomicUsize::new(0));
    let sizes = Arc::new(AtomicUsize::new(0));
    let (c, s) = (calls.clone(), sizes.clone());
    let id = b.observe(move |elements| {
        c.fetch_add(1, Ordering::SeqCst);
        s.store(elements.len(), Ordering::SeqCst);
    });

    b.write_delta(&[el("mine", 1)], &mut store_b, &no_repairs()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let update = a.write_delta(&[el("theirs", 1)], &mut store_a, &no_repairs()).unwrap().unwrap();
    b.apply_remote(&update).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(sizes.load(Ordering::SeqCst), 2);

    assert!(b.unobserve(id));
    assert!(!b.unobserve(id));
    b.apply_remote(&update).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn full_state_brings_a_late_joiner_up_to_date() {
    let mut a = ReplicatedScene::new();
    let mut store = ElementVersionStore::new();
    let mut elements = vec![el("a", 1), el("b", 1)];
    a.write_delta(&elements, &mut store, &no_repairs()).unwrap();
    elements[0].mark_deleted(9);
    a.write_delta(&elements, &mut store, &no_repairs()).unwrap();

    let mut late = ReplicatedScene::new();
    let seen = late.apply_remote(&a.encode_state()).unwrap();
    assert_eq!(seen, a.elements());
    assert!(late.get("a").unwrap().is_deleted);
}

#[test]
fn garbage_update_is_rejected() {
    let mut scene = ReplicatedScene::new();
    let err = scene.apply_remote(&[0xff, 0xff, 0xff]).unwrap_err();
    assert!(matches!(err, CrdtError::Decode(_) | CrdtError::Apply(_)));
}
