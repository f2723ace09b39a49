use crlgraph_graph::{
    ConceptNode, CrlGraphError, KindTag, NodeKind, NodeState, PointerRole, Universe,
    UniverseConfig,
};
use parking_lot::RwLock;
use std::sync::Arc;

fn universe() -> Universe {
    Universe::with_defaults().unwrap()
}

#[test]
fn test_set_owner_end_to_end_with_undo() {
    let u = universe();
    let mut tx = u.begin();

    let p = u.new_element(&mut tx, Some("urn:test:parent")).unwrap();
    let c = u.new_element(&mut tx, None).unwrap();
    let p0 = u.version(&mut tx, p).unwrap().unwrap();
    let c0 = u.version(&mut tx, c).unwrap().unwrap();

    u.set_owner(&mut tx, c, Some(p)).unwrap();
    let p1 = u.version(&mut tx, p).unwrap().unwrap();
    assert_eq!(p1, p0 + 1);
    assert_eq!(u.version(&mut tx, c).unwrap().unwrap(), c0 + 1);
    assert!(u.owned(&mut tx, p).unwrap().contains(&c));
    assert_eq!(u.owner(&mut tx, c).unwrap(), Some(p));

    // The child reaches its owner through an owning pointer
    let owning = u
        .role_pointer(&mut tx, c, PointerRole::Owning)
        .unwrap()
        .expect("owning pointer");
    assert_eq!(u.pointer_target(&mut tx, owning).unwrap(), Some(p));
    assert!(u.listeners_of(p).contains(&owning));

    u.mark_undo_point();
    u.set_owner(&mut tx, c, None).unwrap();
    assert!(u.version(&mut tx, p).unwrap().unwrap() > p1);
    assert!(!u.owned(&mut tx, p).unwrap().contains(&c));
    assert_eq!(u.pointer_target(&mut tx, owning).unwrap(), None);
    assert!(!u.listeners_of(p).contains(&owning));

    u.undo(&mut tx).unwrap();
    assert!(u.owned(&mut tx, p).unwrap().contains(&c));
    assert_eq!(u.version(&mut tx, p).unwrap().unwrap(), p1);
    assert_eq!(u.owner(&mut tx, c).unwrap(), Some(p));
    assert_eq!(u.pointer_target(&mut tx, owning).unwrap(), Some(p));
    // Registry indexes follow the restored fields
    assert!(u.listeners_of(p).contains(&owning));
}

#[test]
fn test_undo_then_redo_restores_equivalent_state() {
    let u = universe();
    let mut tx = u.begin();
    let literal = u.new_literal(&mut tx, "alpha", None).unwrap();
    u.mark_undo_point();

    u.set_literal_value(&mut tx, literal, "beta").unwrap();
    let changed = u.snapshot(&mut tx, literal).unwrap().unwrap();

    u.undo(&mut tx).unwrap();
    assert_eq!(u.literal_value(&mut tx, literal).unwrap().as_deref(), Some("alpha"));
    assert_eq!(u.redo_depth(), 1);

    u.redo(&mut tx).unwrap();
    let redone = u.snapshot(&mut tx, literal).unwrap().unwrap();
    assert!(redone.is_equivalent(&changed));
    assert_eq!(u.literal_value(&mut tx, literal).unwrap().as_deref(), Some("beta"));
}

#[test]
fn test_creation_round_trip_keeps_identity() {
    let u = universe();
    let mut tx = u.begin();
    let x = u.new_element(&mut tx, Some("urn:test:x")).unwrap();
    let handle = u.get_node(x).unwrap();
    let version = u.version(&mut tx, x).unwrap().unwrap();

    u.undo(&mut tx).unwrap();
    assert!(u.get_node(x).is_none());
    assert!(u.get_node_by_uri("urn:test:x").is_none());

    u.redo(&mut tx).unwrap();
    let again = u.get_node(x).unwrap();
    assert!(Arc::ptr_eq(&handle, &again));
    assert_eq!(u.version(&mut tx, x).unwrap(), Some(version));
    assert!(u.get_node_by_uri("urn:test:x").is_some());
}

#[test]
fn test_new_edit_clears_redo_and_empty_undo_is_noop() {
    let u = universe();
    let mut tx = u.begin();
    assert_eq!(u.undo(&mut tx).unwrap(), 0);
    assert_eq!(u.redo(&mut tx).unwrap(), 0);

    let e = u.new_element(&mut tx, None).unwrap();
    u.mark_undo_point();
    u.set_uri(&mut tx, e, Some("urn:test:first")).unwrap();
    u.undo(&mut tx).unwrap();
    assert!(u.redo_depth() > 0);

    u.set_uri(&mut tx, e, Some("urn:test:second")).unwrap();
    assert_eq!(u.redo_depth(), 0);
}

#[test]
fn test_recording_can_be_disabled() {
    let config = UniverseConfig {
        recording_undo: false,
        ..UniverseConfig::default()
    };
    let u = Universe::new(config).unwrap();
    assert!(!u.is_recording_undo());
    let mut tx = u.begin();
    u.new_element(&mut tx, None).unwrap();
    assert_eq!(u.undo_depth(), 0);

    u.set_recording_undo(true);
    u.new_element(&mut tx, None).unwrap();
    assert!(u.undo_depth() > 0);
}

#[test]
fn test_reads_do_not_bump_versions() {
    let u = universe();
    let mut tx = u.begin();
    let e = u.new_element(&mut tx, Some("urn:test:e")).unwrap();
    u.set_name(&mut tx, e, "Element").unwrap();
    let before = u.version(&mut tx, e).unwrap();

    let _ = u.name(&mut tx, e).unwrap();
    let _ = u.snapshot(&mut tx, e).unwrap();
    let _ = u.owned(&mut tx, e).unwrap();
    let _ = u.render_tree(&mut tx, e).unwrap();
    assert_eq!(u.version(&mut tx, e).unwrap(), before);
}

#[test]
fn test_every_mutation_bumps_the_mutated_node() {
    let u = universe();
    let mut tx = u.begin();
    let e = u.new_element(&mut tx, None).unwrap();
    let l = u.new_literal(&mut tx, "v", None).unwrap();
    let p = u.new_pointer(&mut tx, PointerRole::Referenced, None).unwrap();

    let v = |tx: &mut _, id| u.version(tx, id).unwrap().unwrap();

    let e0 = v(&mut tx, e);
    u.set_uri(&mut tx, e, Some("urn:test:bump")).unwrap();
    assert!(v(&mut tx, e) > e0);

    let l0 = v(&mut tx, l);
    u.set_literal_value(&mut tx, l, "w").unwrap();
    assert!(v(&mut tx, l) > l0);

    let p0 = v(&mut tx, p);
    u.set_pointer_target(&mut tx, p, Some(l)).unwrap();
    assert!(v(&mut tx, p) > p0);
    assert_eq!(u.pointer_target_version(&mut tx, p).unwrap(), Some(v(&mut tx, l)));

    // A change of the target refreshes the cached target version
    u.set_literal_value(&mut tx, l, "x").unwrap();
    assert_eq!(u.pointer_target_version(&mut tx, p).unwrap(), Some(v(&mut tx, l)));

    // Unchanged values are not mutations
    let l1 = v(&mut tx, l);
    u.set_literal_value(&mut tx, l, "x").unwrap();
    assert_eq!(v(&mut tx, l), l1);
}

#[test]
fn test_name_and_definition_literals() {
    let u = universe();
    let mut tx = u.begin();
    let e = u.new_element(&mut tx, None).unwrap();
    u.set_name(&mut tx, e, "Widget").unwrap();
    u.set_definition(&mut tx, e, "A thing").unwrap();
    assert_eq!(u.name(&mut tx, e).unwrap().as_deref(), Some("Widget"));
    assert_eq!(u.definition(&mut tx, e).unwrap().as_deref(), Some("A thing"));

    let pointer = u.role_pointer(&mut tx, e, PointerRole::Name).unwrap().unwrap();
    let literal = u.pointer_target(&mut tx, pointer).unwrap().unwrap();
    assert_eq!(u.kind(&mut tx, literal).unwrap(), Some(KindTag::Literal));
    assert_eq!(u.owner(&mut tx, literal).unwrap(), Some(e));

    u.set_name(&mut tx, e, "Gadget").unwrap();
    assert_eq!(u.name(&mut tx, e).unwrap().as_deref(), Some("Gadget"));
    // The existing literal is reused
    assert_eq!(u.pointer_target(&mut tx, pointer).unwrap(), Some(literal));
}

#[test]
fn test_pointer_roles_check_target_kinds() {
    let u = universe();
    let mut tx = u.begin();
    let e = u.new_element(&mut tx, None).unwrap();
    let l = u.new_literal(&mut tx, "", None).unwrap();
    let name = u.new_pointer(&mut tx, PointerRole::Name, None).unwrap();
    let abstraction = u.new_pointer(&mut tx, PointerRole::Abstract, None).unwrap();

    assert!(matches!(
        u.set_pointer_target(&mut tx, name, Some(e)),
        Err(CrlGraphError::InvalidArgument(_))
    ));
    assert!(matches!(
        u.set_pointer_target(&mut tx, abstraction, Some(l)),
        Err(CrlGraphError::InvalidArgument(_))
    ));
    u.set_pointer_target(&mut tx, name, Some(l)).unwrap();
    u.set_pointer_target(&mut tx, abstraction, Some(e)).unwrap();
    assert!(matches!(
        u.set_pointer_target(&mut tx, e, Some(l)),
        Err(CrlGraphError::InvalidArgument(_))
    ));
}

#[test]
fn test_ownership_cycles_and_bad_owners_are_rejected() {
    let u = universe();
    let mut tx = u.begin();
    let a = u.new_element(&mut tx, None).unwrap();
    let b = u.new_element(&mut tx, None).unwrap();
    let l = u.new_literal(&mut tx, "", None).unwrap();
    u.set_owner(&mut tx, b, Some(a)).unwrap();

    assert!(matches!(
        u.set_owner(&mut tx, a, Some(b)),
        Err(CrlGraphError::InvalidArgument(_))
    ));
    assert!(matches!(
        u.set_owner(&mut tx, a, Some(a)),
        Err(CrlGraphError::InvalidArgument(_))
    ));
    assert!(matches!(
        u.set_owner(&mut tx, a, Some(l)),
        Err(CrlGraphError::InvalidArgument(_))
    ));
    // Literals may be owned by elements
    u.set_owner(&mut tx, l, Some(b)).unwrap();
    assert_eq!(u.owner(&mut tx, l).unwrap(), Some(b));
}

#[test]
fn test_retargeting_owning_pointer_moves_the_element() {
    let u = universe();
    let mut tx = u.begin();
    let first = u.new_element(&mut tx, None).unwrap();
    let second = u.new_element(&mut tx, None).unwrap();
    let child = u.new_element(&mut tx, None).unwrap();
    u.set_owner(&mut tx, child, Some(first)).unwrap();
    let owning = u.role_pointer(&mut tx, child, PointerRole::Owning).unwrap().unwrap();

    u.set_pointer_target(&mut tx, owning, Some(second)).unwrap();
    assert_eq!(u.owner(&mut tx, child).unwrap(), Some(second));
    assert!(u.owned(&mut tx, second).unwrap().contains(&child));
    assert!(!u.owned(&mut tx, first).unwrap().contains(&child));
}

#[test]
fn test_delete_node_clears_subtree_and_references() {
    let u = universe();
    let mut tx = u.begin();
    let root = u.new_element(&mut tx, None).unwrap();
    let child = u.new_element(&mut tx, Some("urn:test:child")).unwrap();
    u.set_owner(&mut tx, child, Some(root)).unwrap();
    u.set_name(&mut tx, child, "Child").unwrap();
    let reference = u.new_reference(&mut tx, None).unwrap();
    u.set_referenced(&mut tx, reference, Some(child)).unwrap();
    let referenced = u
        .role_pointer(&mut tx, reference, PointerRole::Referenced)
        .unwrap()
        .unwrap();
    let before = u.node_count();
    u.mark_undo_point();

    u.delete_node(&mut tx, root).unwrap();
    assert!(u.get_node(root).is_none());
    assert!(u.get_node(child).is_none());
    assert!(u.get_node_by_uri("urn:test:child").is_none());
    assert_eq!(u.pointer_target(&mut tx, referenced).unwrap(), None);
    assert!(u.node_count() < before);

    u.undo(&mut tx).unwrap();
    assert_eq!(u.node_count(), before);
    assert_eq!(u.owner(&mut tx, child).unwrap(), Some(root));
    assert_eq!(u.pointer_target(&mut tx, referenced).unwrap(), Some(child));
    assert_eq!(u.name(&mut tx, child).unwrap().as_deref(), Some("Child"));
    assert!(u.get_node_by_uri("urn:test:child").is_some());
}

#[test]
fn test_registry_add_and_remove() {
    let u = universe();
    let mut tx = u.begin();

    assert!(matches!(
        u.remove_node(&mut tx, uuid::Uuid::nil()),
        Err(CrlGraphError::InvalidArgument(_))
    ));
    assert!(!u.remove_node(&mut tx, uuid::Uuid::new_v4()).unwrap());

    let nil = Arc::new(RwLock::new(NodeState::with_id(uuid::Uuid::nil(), NodeKind::Element)));
    assert!(matches!(
        u.add_node(&mut tx, nil),
        Err(CrlGraphError::InvalidArgument(_))
    ));
    assert_eq!(u.node_count(), 0);

    let handle = Arc::new(RwLock::new(NodeState::new(NodeKind::Element)));
    let id = u.add_node(&mut tx, handle.clone()).unwrap();
    assert!(Arc::ptr_eq(&u.get_node(id).unwrap(), &handle));
    // Adding the same node twice is harmless
    assert_eq!(u.add_node(&mut tx, handle.clone()).unwrap(), id);

    let impostor = Arc::new(RwLock::new(NodeState::with_id(id, NodeKind::Element)));
    assert!(matches!(
        u.add_node(&mut tx, impostor),
        Err(CrlGraphError::InvalidArgument(_))
    ));

    u.mark_undo_point();
    assert!(u.remove_node(&mut tx, id).unwrap());
    assert!(u.get_node(id).is_none());
    u.undo(&mut tx).unwrap();
    assert!(Arc::ptr_eq(&u.get_node(id).unwrap(), &handle));
}

#[test]
fn test_node_moves_between_universes() {
    let first = universe();
    let second = universe();

    let (id, handle) = {
        let mut tx = first.begin();
        let id = first.new_element(&mut tx, Some("urn:test:nomad")).unwrap();
        (id, first.get_node(id).unwrap())
    };
    let first_depth = first.undo_depth();

    let mut tx = second.begin();
    second.add_node(&mut tx, handle).unwrap();
    drop(tx);

    assert!(first.get_node(id).is_none());
    assert!(first.get_node_by_uri("urn:test:nomad").is_none());
    assert!(second.get_node(id).is_some());
    assert!(second.get_node_by_uri("urn:test:nomad").is_some());
    // The departure is recorded where the node used to live
    assert_eq!(first.undo_depth(), first_depth + 1);
}

#[test]
fn test_transaction_misuse_is_reported() {
    let u = universe();
    let other = universe();

    let mut foreign = other.begin();
    assert!(matches!(
        u.new_element(&mut foreign, None),
        Err(CrlGraphError::InvalidArgument(_))
    ));
    assert!(matches!(u.undo(&mut foreign), Err(CrlGraphError::InvalidArgument(_))));

    let mut read = u.begin_read();
    assert!(read.is_read_only());
    assert!(matches!(
        u.new_element(&mut read, None),
        Err(CrlGraphError::InvalidOperation(_))
    ));
    assert!(matches!(u.redo(&mut read), Err(CrlGraphError::InvalidOperation(_))));
}

#[test]
fn test_duplicate_uris_are_rejected() {
    let u = universe();
    let mut tx = u.begin();
    let a = u.new_element(&mut tx, Some("urn:test:dup")).unwrap();
    assert!(matches!(
        u.new_element(&mut tx, Some("urn:test:dup")),
        Err(CrlGraphError::InvalidArgument(_))
    ));
    let b = u.new_element(&mut tx, None).unwrap();
    assert!(u.set_uri(&mut tx, b, Some("urn:test:dup")).is_err());
    // Re-setting a node's own URI is a no-op
    u.set_uri(&mut tx, a, Some("urn:test:dup")).unwrap();
    u.set_uri(&mut tx, a, None).unwrap();
    u.set_uri(&mut tx, b, Some("urn:test:dup")).unwrap();
}
