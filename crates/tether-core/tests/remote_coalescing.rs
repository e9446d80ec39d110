// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::panic)]
use tether_core::{Edge, GraphError, Identifier, Operation, RelationshipPayload, Store, StoreError};
use tether_dry_tests::{
    ident, many, one, recording_store, related_link, resource, rid, schemas,
};

fn post_with(store: &mut Store, id: &str, comments: &[&str]) {
    store
        .push_resource(&resource("post", id).relationship("comments", many("comment", comments)))
        .unwrap();
}

fn comment_on(store: &mut Store, id: &str, post: Option<&str>) {
    store
        .push_resource(&resource("comment", id).relationship("post", one("post", post)))
        .unwrap();
}

fn canonical(store: &Store, post: Identifier) -> Vec<Identifier> {
    match store.graph().peek(post, "comments") {
        Some(Edge::HasMany(edge)) => edge.canonical_state().to_vec(),
        _ => panic!("no comments edge"),
    }
}

#[test]
fn deletion_applies_before_replacement_in_one_pass() {
    let (mut store, _) = recording_store(schemas::blog());
    post_with(&mut store, "1", &["1", "2"]);
    store.flush().unwrap();
    let post = ident(&mut store, "post", "1");
    let c1 = ident(&mut store, "comment", "1");
    let c2 = ident(&mut store, "comment", "2");

    // replacement pushed first, deletion second, same turn
    post_with(&mut store, "1", &["3"]);
    store
        .graph_mut()
        .push(Operation::DeleteRecord { record: c1 })
        .unwrap();
    store.flush().unwrap();

    let c3 = ident(&mut store, "comment", "3");
    assert_eq!(store.get_has_many(post, "comments").unwrap(), vec![c3]);
    assert_eq!(canonical(&store, post), vec![c3]);
    assert_eq!(store.get_belongs_to(c3, "post").unwrap(), Some(post));
    assert_eq!(store.get_belongs_to(c2, "post").unwrap(), None);
    assert!(!store.graph().has(c1, "post"));
}

#[test]
fn push_order_does_not_change_the_linked_state() {
    for (post_first, same_turn) in [(true, true), (false, true), (true, false), (false, false)] {
        let (mut store, _) = recording_store(schemas::blog());
        let pushes: [fn(&mut Store); 2] = [
            |s| post_with(s, "1", &["1"]),
            |s| comment_on(s, "1", Some("1")),
        ];
        let order = if post_first { [0, 1] } else { [1, 0] };
        for i in order {
            pushes[i](&mut store);
            if !same_turn {
                store.flush().unwrap();
            }
        }
        store.flush().unwrap();

        let post = ident(&mut store, "post", "1");
        let comment = ident(&mut store, "comment", "1");
        let case = format!("post_first={post_first} same_turn={same_turn}");
        assert_eq!(store.get_has_many(post, "comments").unwrap(), vec![comment], "{case}");
        assert_eq!(canonical(&store, post), vec![comment], "{case}");
        assert_eq!(store.get_belongs_to(comment, "post").unwrap(), Some(post), "{case}");
        match store.graph().peek(comment, "post") {
            Some(Edge::BelongsTo(edge)) => assert_eq!(edge.remote_state(), Some(post), "{case}"),
            _ => panic!("no post edge ({case})"),
        }
    }
}

#[test]
fn belongs_to_push_moves_comment_between_posts() {
    let (mut store, _) = recording_store(schemas::blog());
    post_with(&mut store, "1", &["1"]);
    post_with(&mut store, "2", &[]);
    store.flush().unwrap();
    comment_on(&mut store, "1", Some("2"));
    store.flush().unwrap();
    let p1 = ident(&mut store, "post", "1");
    let p2 = ident(&mut store, "post", "2");
    let c1 = ident(&mut store, "comment", "1");
    assert!(store.get_has_many(p1, "comments").unwrap().is_empty());
    assert_eq!(store.get_has_many(p2, "comments").unwrap(), vec![c1]);
    assert!(canonical(&store, p1).is_empty());
}

#[test]
fn local_additions_survive_a_remote_refresh() {
    let (mut store, _) = recording_store(schemas::blog());
    post_with(&mut store, "1", &["1"]);
    store.flush().unwrap();
    let post = ident(&mut store, "post", "1");
    let c1 = ident(&mut store, "comment", "1");
    let draft = ident(&mut store, "comment", "9");
    store
        .add_to_has_many(post, "comments", vec![draft], None)
        .unwrap();

    post_with(&mut store, "1", &["1", "2"]);
    store.flush().unwrap();
    let c2 = ident(&mut store, "comment", "2");
    assert_eq!(
        store.get_has_many(post, "comments").unwrap(),
        vec![c1, c2, draft]
    );

    // members dropped remotely leave the local state too
    post_with(&mut store, "1", &["2"]);
    store.flush().unwrap();
    assert_eq!(store.get_has_many(post, "comments").unwrap(), vec![c2, draft]);
}

#[test]
fn touched_edges_notify_once_per_pass() {
    let (mut store, wrapper) = recording_store(schemas::blog());
    post_with(&mut store, "1", &["1"]);
    comment_on(&mut store, "2", Some("1"));
    comment_on(&mut store, "3", Some("1"));
    store.flush().unwrap();
    let post = ident(&mut store, "post", "1");
    assert_eq!(wrapper.notifications_for(post, "comments"), 1);
    assert_eq!(store.get_has_many(post, "comments").unwrap().len(), 3);
    for edge in store.graph().edges_of(post).map(|(_, e)| e) {
        assert_eq!(edge.transaction_ref(), 0);
    }
}

#[test]
fn related_link_without_data_marks_edge_stale() {
    let (mut store, wrapper) = recording_store(schemas::blog());
    store
        .push_resource(&resource("post", "1").relationship("comments", related_link("/posts/1/comments")))
        .unwrap();
    store.flush().unwrap();
    let post = ident(&mut store, "post", "1");
    let edge = store.graph().peek(post, "comments").unwrap();
    assert!(edge.state().unwrap().is_stale);
    assert_eq!(wrapper.notifications_for(post, "comments"), 1);
    let data = store.relationship(post, "comments").unwrap();
    assert_eq!(data.data, None);
    assert_eq!(
        data.links.unwrap().related.unwrap().href(),
        "/posts/1/comments"
    );

    // the same link again is not news
    store
        .push_resource(&resource("post", "1").relationship("comments", related_link("/posts/1/comments")))
        .unwrap();
    store.flush().unwrap();
    assert_eq!(wrapper.notifications_for(post, "comments"), 1);

    post_with(&mut store, "1", &["1"]);
    store.flush().unwrap();
    assert!(!store.graph().peek(post, "comments").unwrap().state().unwrap().is_stale);
}

#[test]
fn mismatched_linkage_is_rejected_without_losing_the_turn() {
    let (mut store, _) = recording_store(schemas::blog());
    let bad = RelationshipPayload::one(Some(rid("comment", "1")));
    let err = store
        .push_resource(&resource("post", "1").relationship("comments", bad))
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Graph(GraphError::InvalidLinkage { .. })
    ));
    comment_on(&mut store, "2", Some("2"));
    store.flush().unwrap();

    let comment = ident(&mut store, "comment", "2");
    let post = ident(&mut store, "post", "2");
    assert_eq!(store.get_belongs_to(comment, "post").unwrap(), Some(post));
    assert_eq!(canonical(&store, post), vec![comment]);
}

#[test]
fn implicit_inverse_tracks_one_way_references() {
    let (mut store, _) = recording_store(schemas::notes());
    store
        .push_resource(&resource("note", "1").relationship("owner", one("user", Some("7"))))
        .unwrap();
    store.flush().unwrap();
    let note = ident(&mut store, "note", "1");
    let user = ident(&mut store, "user", "7");
    assert_eq!(store.get_belongs_to(note, "owner").unwrap(), Some(user));
    let implicit: Vec<_> = store.graph().edges_of(user).map(|(k, e)| (k.to_owned(), e.all_members())).collect();
    assert_eq!(implicit.len(), 1);
    assert_eq!(implicit[0].1, vec![note]);
    assert!(matches!(
        store.relationship(user, &implicit[0].0),
        Err(StoreError::Graph(GraphError::ImplicitAccess(_)))
    ));
}

#[test]
fn polymorphic_members_borrow_the_base_definition() {
    let (mut store, _) = recording_store(schemas::pets());
    store
        .push_resource(&resource("owner", "1").relationship("pets", many("dog", &["1"])))
        .unwrap();
    store.flush().unwrap();
    let owner = ident(&mut store, "owner", "1");
    let dog = ident(&mut store, "dog", "1");
    assert_eq!(store.get_has_many(owner, "pets").unwrap(), vec![dog]);
    assert_eq!(store.get_belongs_to(dog, "owner").unwrap(), Some(owner));
}
