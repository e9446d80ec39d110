// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::panic)]
use std::collections::BTreeSet;

use serde_json::json;
use tether_core::{CreateOptions, Edge, Identifier, Operation, Store, ValidationError};
use tether_dry_tests::{ident, many, one, recording_store, resource, schemas, RecordingWrapper};

fn comments_edge(store: &Store, post: Identifier) -> (Vec<Identifier>, Vec<Identifier>) {
    match store.graph().peek(post, "comments") {
        Some(Edge::HasMany(edge)) => (edge.current_state().to_vec(), edge.canonical_state().to_vec()),
        _ => panic!("no comments edge"),
    }
}

#[test]
fn dirty_value_shadows_pushed_value() {
    let (mut store, wrapper) = recording_store(schemas::blog());
    store
        .push_resource(&resource("post", "1").attr("title", json!("first")))
        .unwrap();
    let post = ident(&mut store, "post", "1");
    store.set_attr(post, "title", json!("mine")).unwrap();
    wrapper.clear();

    store
        .push_resource(&resource("post", "1").attr("title", json!("server")))
        .unwrap();
    assert_eq!(store.get_attr(post, "title").unwrap(), Some(json!("mine")));
    assert_eq!(wrapper.notifications_for(post, "title"), 0);
    assert!(store.record(post).unwrap().is_attr_dirty("title"));

    store.rollback_attributes(post).unwrap();
    assert_eq!(store.get_attr(post, "title").unwrap(), Some(json!("server")));
    assert!(!store.record(post).unwrap().has_changed_attributes());
}

#[test]
fn writing_the_original_back_clears_the_dirty_value() {
    let (mut store, _) = recording_store(schemas::blog());
    store
        .push_resource(&resource("post", "1").attr("title", json!("first")))
        .unwrap();
    let post = ident(&mut store, "post", "1");
    store.set_attr(post, "title", json!("draft")).unwrap();
    store.set_attr(post, "title", json!("first")).unwrap();
    assert!(!store.record(post).unwrap().is_attr_dirty("title"));
    assert!(store.record(post).unwrap().changed_attributes().is_empty());
}

#[test]
fn rejected_save_returns_values_to_dirty() {
    let (mut store, _) = recording_store(schemas::blog());
    store
        .push_resource(&resource("post", "1").attr("title", json!("first")))
        .unwrap();
    let post = ident(&mut store, "post", "1");
    store.set_attr(post, "title", json!("")).unwrap();
    store.will_commit(post).unwrap();
    assert!(!store.record(post).unwrap().is_attr_dirty("title"));
    assert!(store.record(post).unwrap().has_changed_attributes());

    store
        .record_was_rejected(post, vec![ValidationError::on("title", "is blank")])
        .unwrap();
    let record = store.record(post).unwrap();
    assert!(record.is_attr_dirty("title"));
    assert_eq!(record.get_errors(), &[ValidationError::on("title", "is blank")][..]);

    store.will_commit(post).unwrap();
    store.did_save_record(post, None).unwrap();
    let record = store.record(post).unwrap();
    assert!(record.get_errors().is_empty());
    assert_eq!(store.get_attr(post, "title").unwrap(), Some(json!("")));
    assert!(!store.record(post).unwrap().has_changed_attributes());
}

#[test]
fn rolling_back_a_new_record_takes_it_out_of_the_graph() {
    let (mut store, _) = recording_store(schemas::blog());
    store
        .push_resource(&resource("post", "1").relationship("comments", many("comment", &[])))
        .unwrap();
    store.flush().unwrap();
    let post = ident(&mut store, "post", "1");
    let draft = store
        .create_record("comment", CreateOptions::default().attr("body", json!("hi")))
        .unwrap();
    store.set_belongs_to(draft, "post", Some(post)).unwrap();
    store.flush().unwrap();
    assert_eq!(store.get_has_many(post, "comments").unwrap(), vec![draft]);

    store.rollback_attributes(draft).unwrap();
    store.flush().unwrap();
    assert!(store.record(draft).unwrap().is_deleted());
    assert!(!store.record(draft).unwrap().is_new());
    assert!(store.get_has_many(post, "comments").unwrap().is_empty());
}

#[test]
fn deleted_member_leaves_both_states_while_local_additions_stay() {
    let (mut store, _) = recording_store(schemas::blog());
    store
        .push_resource(&resource("post", "1").relationship("comments", many("comment", &["1", "2"])))
        .unwrap();
    store.flush().unwrap();
    let post = ident(&mut store, "post", "1");
    let c1 = ident(&mut store, "comment", "1");
    let c2 = ident(&mut store, "comment", "2");
    let c3 = ident(&mut store, "comment", "3");
    store.add_to_has_many(post, "comments", vec![c3], None).unwrap();

    store
        .graph_mut()
        .push(Operation::DeleteRecord { record: c1 })
        .unwrap();
    store.flush().unwrap();

    let (current, canonical) = comments_edge(&store, post);
    assert_eq!(current, vec![c2, c3]);
    assert_eq!(canonical, vec![c2]);
    assert_eq!(store.get_belongs_to(c3, "post").unwrap(), Some(post));
}

#[test]
fn unloading_behind_a_sync_inverse_removes_the_member() {
    let (mut store, wrapper) = recording_store(schemas::sync_blog());
    store
        .push_resource(&resource("post", "1").relationship("comments", many("comment", &["1", "2"])))
        .unwrap();
    store.push_resource(&resource("comment", "1")).unwrap();
    store.push_resource(&resource("comment", "2")).unwrap();
    store.flush().unwrap();
    let post = ident(&mut store, "post", "1");
    let c1 = ident(&mut store, "comment", "1");
    let c2 = ident(&mut store, "comment", "2");

    store.unload_record(c1).unwrap();
    store.flush().unwrap();
    let (current, canonical) = comments_edge(&store, post);
    assert_eq!(current, vec![c2]);
    assert_eq!(canonical, vec![c2]);
    assert_eq!(wrapper.disconnected(), vec![c1]);
    assert!(!store.is_alive(c1));
}

#[test]
fn unloading_behind_an_async_inverse_keeps_the_member() {
    let (mut store, wrapper) = recording_store(schemas::blog());
    store
        .push_resource(&resource("post", "1").relationship("comments", many("comment", &["1"])))
        .unwrap();
    store.push_resource(&resource("comment", "1")).unwrap();
    store.flush().unwrap();
    let post = ident(&mut store, "post", "1");
    let c1 = ident(&mut store, "comment", "1");
    wrapper.set_in_use(post, true);

    store.unload_record(c1).unwrap();
    store.flush().unwrap();
    assert_eq!(store.get_has_many(post, "comments").unwrap(), vec![c1]);
    let edge = store.graph().peek(post, "comments").unwrap();
    assert!(edge.state().unwrap().has_dematerialized_inverse);
    // the post is in use and still references it
    assert!(wrapper.disconnected().is_empty());
    assert!(store.record(c1).unwrap().is_unloaded());

    store
        .push_resource(&resource("comment", "1").relationship("post", one("post", Some("1"))))
        .unwrap();
    store.flush().unwrap();
    assert!(store.is_alive(c1));
    assert_eq!(store.get_belongs_to(c1, "post").unwrap(), Some(post));
}

fn ring(store: &mut Store, size: usize) -> Vec<Identifier> {
    for n in 1..=size {
        let next = (n % size + 1).to_string();
        store
            .push_resource(&resource("node", &n.to_string()).relationship("next", one("node", Some(&next))))
            .unwrap();
    }
    store.flush().unwrap();
    (1..=size).map(|n| ident(store, "node", &n.to_string())).collect()
}

fn disconnected(wrapper: &RecordingWrapper) -> BTreeSet<Identifier> {
    wrapper.disconnected().into_iter().collect()
}

#[test]
fn unloading_the_sole_reference_releases_the_whole_cycle() {
    let (mut store, wrapper) = recording_store(schemas::ring());
    let nodes = ring(&mut store, 4);
    assert_eq!(store.get_belongs_to(nodes[1], "prev").unwrap(), Some(nodes[0]));

    store.unload_record(nodes[0]).unwrap();
    store.flush().unwrap();
    let released = wrapper.disconnected();
    assert_eq!(released.len(), 4);
    assert_eq!(disconnected(&wrapper), nodes.iter().copied().collect());
    for node in &nodes {
        assert!(store.record(*node).is_none());
        assert!(!store.is_alive(*node));
    }
}

#[test]
fn record_in_use_holds_back_its_whole_cycle() {
    let (mut store, wrapper) = recording_store(schemas::ring());
    let nodes = ring(&mut store, 4);
    wrapper.set_in_use(nodes[0], true);

    store.unload_record(nodes[1]).unwrap();
    store.flush().unwrap();
    assert!(wrapper.disconnected().is_empty());
    assert!(store.record(nodes[1]).unwrap().is_unloaded());
    for node in &nodes[2..] {
        assert!(store.is_alive(*node));
    }

    wrapper.set_in_use(nodes[0], false);
    store.unload_record(nodes[0]).unwrap();
    store.flush().unwrap();
    assert_eq!(disconnected(&wrapper), nodes.iter().copied().collect());
}

#[test]
fn every_unloaded_member_stays_while_one_is_in_use() {
    let (mut store, wrapper) = recording_store(schemas::ring());
    let nodes = ring(&mut store, 4);
    wrapper.set_in_use(nodes[2], true);
    for &node in &nodes {
        store.unload_record(node).unwrap();
    }
    store.flush().unwrap();
    assert!(wrapper.disconnected().is_empty());
    for node in &nodes {
        assert!(store.record(*node).unwrap().is_unloaded());
    }
}
