use crlgraph_graph::{CrlGraphError, PointerRole, Universe};
use serde_json::Value;

fn universe() -> Universe {
    Universe::with_defaults().unwrap()
}

/// A small named tree: root owns a child, the child refers back to the root.
fn sample(u: &Universe) -> (uuid::Uuid, String) {
    let mut tx = u.begin();
    let root = u.new_element(&mut tx, Some("urn:test:root")).unwrap();
    u.set_name(&mut tx, root, "Root").unwrap();
    let child = u.new_reference(&mut tx, Some("urn:test:child")).unwrap();
    u.set_owner(&mut tx, child, Some(root)).unwrap();
    u.set_referenced(&mut tx, child, Some(root)).unwrap();
    let json = u.export_graph(&mut tx, root).unwrap();
    (root, json)
}

#[test]
fn test_export_then_recover_rebuilds_owners_and_indexes() {
    let source = universe();
    let (root, json) = sample(&source);

    let target = universe();
    let mut tx = target.begin();
    let recovered = target.recover_graph(&mut tx, json.as_bytes()).unwrap();
    assert_eq!(recovered, root);
    assert_eq!(target.node_count(), source.node_count());

    assert_eq!(target.name(&mut tx, root).unwrap().as_deref(), Some("Root"));
    let child = target
        .child_with_uri(&mut tx, root, "urn:test:child")
        .unwrap()
        .unwrap();
    assert_eq!(target.owner(&mut tx, child).unwrap(), Some(root));

    let referenced = target
        .role_pointer(&mut tx, child, PointerRole::Referenced)
        .unwrap()
        .unwrap();
    assert_eq!(target.pointer_target(&mut tx, referenced).unwrap(), Some(root));
    assert!(target.listeners_of(root).contains(&referenced));

    let source_version = {
        let mut stx = source.begin_read();
        source.version(&mut stx, root).unwrap()
    };
    assert_eq!(target.version(&mut tx, root).unwrap(), source_version);
}

#[test]
fn test_recovered_nodes_can_be_undone() {
    let source = universe();
    let (root, json) = sample(&source);

    let target = universe();
    let mut tx = target.begin();
    target.mark_undo_point();
    target.recover_graph(&mut tx, json.as_bytes()).unwrap();
    target.undo(&mut tx).unwrap();
    assert!(target.get_node(root).is_none());
    assert_eq!(target.node_count(), 0);
}

#[test]
fn test_unknown_kind_is_rejected_before_anything_registers() {
    let source = universe();
    let (_, json) = sample(&source);
    let mut doc: Value = serde_json::from_str(&json).unwrap();
    doc["owned"][0]["kind"]["type"] = Value::String("Gadget".into());
    let bad = serde_json::to_vec(&doc).unwrap();

    let target = universe();
    let mut tx = target.begin();
    match target.recover_graph(&mut tx, &bad) {
        Err(CrlGraphError::UnknownType(t)) => assert!(t.contains("Gadget")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(target.node_count(), 0);
    assert_eq!(target.undo_depth(), 0);
}

#[test]
fn test_duplicate_and_colliding_ids_are_rejected() {
    let source = universe();
    let (_, json) = sample(&source);

    let mut doc: Value = serde_json::from_str(&json).unwrap();
    let root_id = doc["id"].clone();
    doc["owned"][0]["id"] = root_id;
    let duplicated = serde_json::to_vec(&doc).unwrap();

    let target = universe();
    let mut tx = target.begin();
    assert!(matches!(
        target.recover_graph(&mut tx, &duplicated),
        Err(CrlGraphError::InvalidArgument(_))
    ));
    assert_eq!(target.node_count(), 0);

    // The source already holds every id in the document
    let mut stx = source.begin();
    assert!(matches!(
        source.recover_graph(&mut stx, json.as_bytes()),
        Err(CrlGraphError::InvalidArgument(_))
    ));
}

#[test]
fn test_malformed_documents_fail_cleanly() {
    let u = universe();
    let mut tx = u.begin();
    assert!(matches!(
        u.recover_graph(&mut tx, b"{ not json"),
        Err(CrlGraphError::Serialization(_))
    ));
    assert!(matches!(
        u.recover_graph(&mut tx, br#"{"id": "x"}"#),
        Err(CrlGraphError::UnknownType(_))
    ));
    assert_eq!(u.node_count(), 0);
}

#[test]
fn test_render_tree_lists_every_owned_node() {
    let u = universe();
    let (root, _) = sample(&u);
    let mut tx = u.begin_read();
    let rendered = u.render_tree(&mut tx, root).unwrap();
    assert!(rendered.starts_with("Element"));
    assert!(rendered.contains("<urn:test:child>"));
    assert!(rendered.contains("\"Root\""));
    assert_eq!(rendered.lines().count(), u.node_count());
}

#[test]
fn test_recover_from_exported_file() {
    use std::io::Write;

    let source = universe();
    let (root, json) = sample(&source);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let bytes = std::fs::read(file.path()).unwrap();
    let target = universe();
    let mut tx = target.begin();
    assert_eq!(target.recover_graph(&mut tx, &bytes).unwrap(), root);
    assert_eq!(target.node_count(), source.node_count());
}
