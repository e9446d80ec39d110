// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::panic)]
use tether_core::{Edge, GraphError, Operation, StoreError};
use tether_dry_tests::{ident, many, recording_store, resource, schemas};

#[test]
fn one_to_one_reassignment_clears_the_previous_partner() {
    let (mut store, wrapper) = recording_store(schemas::couple());
    for (ty, id) in [("husband", "1"), ("wife", "1"), ("wife", "2")] {
        store.push_resource(&resource(ty, id)).unwrap();
    }
    let h1 = ident(&mut store, "husband", "1");
    let w1 = ident(&mut store, "wife", "1");
    let w2 = ident(&mut store, "wife", "2");

    store.set_belongs_to(h1, "wife", Some(w1)).unwrap();
    assert_eq!(store.get_belongs_to(w1, "husband").unwrap(), Some(h1));

    store.set_belongs_to(h1, "wife", Some(w2)).unwrap();
    assert_eq!(store.get_belongs_to(w1, "husband").unwrap(), None);
    assert_eq!(store.get_belongs_to(w2, "husband").unwrap(), Some(h1));
    assert_eq!(wrapper.notifications_for(w1, "husband"), 2);

    store.set_belongs_to(w2, "husband", None).unwrap();
    assert_eq!(store.get_belongs_to(h1, "wife").unwrap(), None);
    let Some(Edge::BelongsTo(edge)) = store.graph().peek(h1, "wife") else {
        panic!("no wife edge");
    };
    assert_eq!(edge.remote_state(), None);
    assert!(store.graph().peek(h1, "wife").unwrap().state().unwrap().is_empty);
}

#[test]
fn many_to_many_edits_mirror_and_roll_back() {
    let (mut store, _) = recording_store(schemas::tags());
    store
        .push_resource(&resource("post", "1").relationship("tags", many("tag", &["a", "b"])))
        .unwrap();
    store.flush().unwrap();
    let post = ident(&mut store, "post", "1");
    let a = ident(&mut store, "tag", "a");
    let b = ident(&mut store, "tag", "b");
    assert_eq!(store.get_has_many(a, "posts").unwrap(), vec![post]);

    store.remove_from_has_many(post, "tags", vec![a]).unwrap();
    assert!(store.get_has_many(a, "posts").unwrap().is_empty());
    assert!(store.graph().peek(post, "tags").unwrap().is_dirty());

    store.rollback_relationships(post).unwrap();
    store.flush().unwrap();
    assert_eq!(store.get_has_many(post, "tags").unwrap(), vec![a, b]);
    assert_eq!(store.get_has_many(a, "posts").unwrap(), vec![post]);
    assert!(!store.graph().peek(post, "tags").unwrap().is_dirty());
}

#[test]
fn insert_at_index_keeps_the_requested_position() {
    let (mut store, _) = recording_store(schemas::tags());
    store
        .push_resource(&resource("post", "1").relationship("tags", many("tag", &["a", "b"])))
        .unwrap();
    store.flush().unwrap();
    let post = ident(&mut store, "post", "1");
    let [a, b, c] = ["a", "b", "c"].map(|id| ident(&mut store, "tag", id));
    store.add_to_has_many(post, "tags", vec![c], Some(1)).unwrap();
    assert_eq!(store.get_has_many(post, "tags").unwrap(), vec![a, c, b]);
    // an index past the end appends
    let d = ident(&mut store, "tag", "d");
    store.add_to_has_many(post, "tags", vec![d], Some(99)).unwrap();
    assert_eq!(store.get_has_many(post, "tags").unwrap(), vec![a, c, b, d]);
}

#[test]
fn wrong_cardinality_is_rejected() {
    let (mut store, _) = recording_store(schemas::blog());
    let post = ident(&mut store, "post", "1");
    let comment = ident(&mut store, "comment", "1");
    assert!(matches!(
        store.set_belongs_to(post, "comments", Some(comment)),
        Err(StoreError::Graph(GraphError::KindMismatch { .. }))
    ));
    assert!(matches!(
        store.get_has_many(comment, "post"),
        Err(StoreError::Graph(GraphError::KindMismatch { .. }))
    ));
}

#[test]
fn local_only_operations_cannot_be_pushed_as_remote() {
    let (mut store, _) = recording_store(schemas::blog());
    let post = ident(&mut store, "post", "1");
    let comment = ident(&mut store, "comment", "1");
    let err = store
        .graph_mut()
        .push(Operation::AddToRelatedRecords {
            record: post,
            field: "comments".into(),
            value: vec![comment],
            index: None,
        })
        .unwrap_err();
    assert_eq!(err, GraphError::LocalOnly("addToRelatedRecords"));
    let err = store
        .graph_mut()
        .update(Operation::DeleteRecord { record: comment }, false)
        .unwrap_err();
    assert_eq!(err, GraphError::RemoteOnly("deleteRecord"));
}
