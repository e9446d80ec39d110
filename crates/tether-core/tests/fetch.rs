// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]
use serde_json::json;
use tether_core::{
    AdapterError, CreateOptions, FetchError, FetchManager, FetchOptions, StoreConfig,
    ValidationError,
};
use tether_dry_tests::{
    ident, many, recording_store, recording_store_with, resource, schemas, Call, ScriptedAdapter,
};

fn post(id: &str, title: &str) -> tether_core::ResourceObject {
    resource("post", id).attr("title", json!(title))
}

#[tokio::test]
async fn equivalent_fetches_share_one_request() {
    let (mut store, _) = recording_store(schemas::blog());
    let adapter = ScriptedAdapter::new().with_record(post("1", "hello"));
    let mut manager = FetchManager::new(adapter.clone());
    let p = ident(&mut store, "post", "1");

    let first = manager.schedule_fetch(&store, p, FetchOptions::default()).unwrap();
    let second = manager.schedule_fetch(&store, p, FetchOptions::default()).unwrap();
    assert_eq!(manager.pending_fetches(), 1);

    manager.flush(&mut store).await;
    assert_eq!(manager.pending_fetches(), 0);
    assert_eq!(first.await, Ok(p));
    assert_eq!(second.await, Ok(p));
    assert_eq!(adapter.calls(), vec![Call::FindRecord("post".into(), "1".into())]);
    assert_eq!(store.get_attr(p, "title").unwrap(), Some(json!("hello")));
    assert!(store.is_alive(p));
}

#[tokio::test]
async fn different_includes_are_fetched_separately() {
    let (mut store, _) = recording_store(schemas::blog());
    let adapter = ScriptedAdapter::new().with_record(post("1", "hello"));
    let mut manager = FetchManager::new(adapter.clone());
    let p = ident(&mut store, "post", "1");

    let plain = manager.schedule_fetch(&store, p, FetchOptions::default()).unwrap();
    let with_comments = FetchOptions {
        include: Some("comments".into()),
        ..FetchOptions::default()
    };
    let included = manager.schedule_fetch(&store, p, with_comments).unwrap();
    assert_eq!(manager.pending_fetches(), 2);

    manager.flush(&mut store).await;
    assert_eq!(plain.await, Ok(p));
    assert_eq!(included.await, Ok(p));
    assert_eq!(adapter.calls().len(), 2);
}

#[tokio::test]
async fn coalesced_fetch_rejects_records_missing_from_the_response() {
    let (mut store, _) = recording_store(schemas::blog());
    let adapter = ScriptedAdapter::coalescing()
        .with_record(post("1", "one"))
        .with_record(post("2", "two"));
    let mut manager = FetchManager::new(adapter.clone());
    let ids: Vec<_> = ["1", "2", "3"]
        .iter()
        .map(|id| ident(&mut store, "post", id))
        .collect();
    let handles: Vec<_> = ids
        .iter()
        .map(|id| manager.schedule_fetch(&store, *id, FetchOptions::default()).unwrap())
        .collect();

    manager.flush(&mut store).await;
    assert_eq!(
        adapter.calls(),
        vec![Call::FindMany(
            "post".into(),
            vec!["1".into(), "2".into(), "3".into()]
        )]
    );
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await);
    }
    assert_eq!(results[0], Ok(ids[0]));
    assert_eq!(results[1], Ok(ids[1]));
    assert_eq!(
        results[2],
        Err(FetchError::NotFound {
            ty: "post".into(),
            id: "3".into()
        })
    );
    assert_eq!(store.get_attr(ids[1], "title").unwrap(), Some(json!("two")));
}

#[tokio::test]
async fn batches_are_split_at_the_configured_size() {
    let config = StoreConfig {
        max_batch_size: Some(2),
        ..StoreConfig::default()
    };
    let (mut store, _) = recording_store_with(schemas::blog(), config);
    let adapter = ScriptedAdapter::coalescing()
        .with_record(post("1", "one"))
        .with_record(post("2", "two"))
        .with_record(post("3", "three"));
    let mut manager = FetchManager::new(adapter.clone());
    let mut handles = Vec::new();
    for id in ["1", "2", "3"] {
        let p = ident(&mut store, "post", id);
        handles.push(manager.schedule_fetch(&store, p, FetchOptions::default()).unwrap());
    }

    manager.flush(&mut store).await;
    assert_eq!(
        adapter.calls(),
        vec![
            Call::FindMany("post".into(), vec!["1".into(), "2".into()]),
            Call::FindRecord("post".into(), "3".into()),
        ]
    );
    for handle in handles {
        assert!(handle.await.is_ok());
    }
}

#[tokio::test]
async fn coalescing_switched_off_in_config_fetches_singly() {
    let config = StoreConfig {
        coalesce_find_requests: false,
        ..StoreConfig::default()
    };
    let (mut store, _) = recording_store_with(schemas::blog(), config);
    let adapter = ScriptedAdapter::coalescing()
        .with_record(post("1", "one"))
        .with_record(post("2", "two"));
    let mut manager = FetchManager::new(adapter.clone());
    for id in ["1", "2"] {
        let p = ident(&mut store, "post", id);
        let _handle = manager.schedule_fetch(&store, p, FetchOptions::default()).unwrap();
    }
    manager.flush(&mut store).await;
    assert!(adapter
        .calls()
        .iter()
        .all(|call| matches!(call, Call::FindRecord(..))));
}

#[tokio::test]
async fn network_failure_reaches_every_waiter() {
    let (mut store, _) = recording_store(schemas::blog());
    let adapter = ScriptedAdapter::new();
    adapter.unreachable("9");
    let mut manager = FetchManager::new(adapter.clone());
    let p = ident(&mut store, "post", "9");
    let a = manager.schedule_fetch(&store, p, FetchOptions::default()).unwrap();
    let b = manager.schedule_fetch(&store, p, FetchOptions::default()).unwrap();

    manager.flush(&mut store).await;
    for handle in [a, b] {
        assert!(matches!(
            handle.await,
            Err(FetchError::Adapter(AdapterError::Network(_)))
        ));
    }
    assert!(!store.is_alive(p));
}

#[tokio::test]
async fn record_without_id_cannot_be_fetched() {
    let (mut store, _) = recording_store(schemas::blog());
    let mut manager = FetchManager::new(ScriptedAdapter::new());
    let draft = store.create_record("post", CreateOptions::default()).unwrap();
    assert!(matches!(
        manager.schedule_fetch(&store, draft, FetchOptions::default()),
        Err(FetchError::InvalidPayload(_))
    ));
}

#[tokio::test]
async fn created_record_takes_the_server_id() {
    let (mut store, _) = recording_store(schemas::blog());
    let adapter = ScriptedAdapter::new();
    let mut manager = FetchManager::new(adapter.clone());
    let p = store
        .create_record("post", CreateOptions::default().attr("title", json!("draft")))
        .unwrap();
    let lid = store.identifiers().resource(p).unwrap().lid.unwrap();

    let saved = manager
        .schedule_save(&mut store, p, FetchOptions::default())
        .unwrap();
    assert_eq!(manager.pending_saves(), 1);
    manager.flush(&mut store).await;

    assert_eq!(saved.await, Ok(p));
    assert_eq!(adapter.calls(), vec![Call::CreateRecord("post".into(), lid)]);
    let identity = store.identifiers().resource(p).unwrap();
    assert_eq!(identity.id.as_deref(), Some("srv-1"));
    let record = store.record(p).unwrap();
    assert!(!record.is_new());
    assert!(!record.has_changed_attributes());
    assert_eq!(store.get_attr(p, "title").unwrap(), Some(json!("draft")));
    assert!(adapter.has_record("post", "srv-1"));
}

#[tokio::test]
async fn updated_record_confirms_in_flight_values() {
    let (mut store, _) = recording_store(schemas::blog());
    let adapter = ScriptedAdapter::new().with_record(post("1", "old"));
    let mut manager = FetchManager::new(adapter.clone());
    let p = store.push_resource(&post("1", "old")).unwrap();
    store.set_attr(p, "title", json!("new")).unwrap();

    let saved = manager
        .schedule_save(&mut store, p, FetchOptions::default())
        .unwrap();
    // a save in flight still reads the pending value
    assert_eq!(store.get_attr(p, "title").unwrap(), Some(json!("new")));
    manager.flush(&mut store).await;

    assert_eq!(saved.await, Ok(p));
    assert_eq!(adapter.calls(), vec![Call::UpdateRecord("post".into(), "1".into())]);
    assert!(!store.record(p).unwrap().has_changed_attributes());
    assert_eq!(store.get_attr(p, "title").unwrap(), Some(json!("new")));
}

#[tokio::test]
async fn rejected_save_keeps_the_errors_and_the_dirty_value() {
    let (mut store, _) = recording_store(schemas::blog());
    let adapter = ScriptedAdapter::new().with_record(post("1", "old"));
    adapter.reject_saves_with(vec![ValidationError::on("title", "is taken")]);
    let mut manager = FetchManager::new(adapter.clone());
    let p = store.push_resource(&post("1", "old")).unwrap();
    store.set_attr(p, "title", json!("dup")).unwrap();

    let saved = manager
        .schedule_save(&mut store, p, FetchOptions::default())
        .unwrap();
    manager.flush(&mut store).await;

    assert!(matches!(
        saved.await,
        Err(FetchError::Adapter(AdapterError::Invalid(_)))
    ));
    let record = store.record(p).unwrap();
    assert_eq!(record.get_errors(), &[ValidationError::on("title", "is taken")][..]);
    assert!(record.is_attr_dirty("title"));

    adapter.accept_saves();
    let retried = manager
        .schedule_save(&mut store, p, FetchOptions::default())
        .unwrap();
    manager.flush(&mut store).await;
    assert_eq!(retried.await, Ok(p));
    assert!(store.record(p).unwrap().get_errors().is_empty());
}

#[tokio::test]
async fn confirmed_deletion_leaves_every_inverse() {
    let (mut store, _) = recording_store(schemas::blog());
    let adapter = ScriptedAdapter::new().with_record(resource("comment", "1"));
    let mut manager = FetchManager::new(adapter.clone());
    store
        .push_resource(&resource("post", "1").relationship("comments", many("comment", &["1", "2"])))
        .unwrap();
    store.push_resource(&resource("comment", "1")).unwrap();
    store.flush().unwrap();
    let p = ident(&mut store, "post", "1");
    let c1 = ident(&mut store, "comment", "1");
    let c2 = ident(&mut store, "comment", "2");

    store.delete_record(c1).unwrap();
    let saved = manager
        .schedule_save(&mut store, c1, FetchOptions::default())
        .unwrap();
    manager.flush(&mut store).await;
    store.flush().unwrap();

    assert_eq!(saved.await, Ok(c1));
    assert_eq!(adapter.calls(), vec![Call::DeleteRecord("comment".into(), "1".into())]);
    assert!(!adapter.has_record("comment", "1"));
    assert_eq!(store.get_has_many(p, "comments").unwrap(), vec![c2]);
    assert!(!store.is_alive(c1));
}

#[tokio::test]
async fn deleting_an_unsaved_record_skips_the_adapter() {
    let (mut store, _) = recording_store(schemas::blog());
    let adapter = ScriptedAdapter::new();
    let mut manager = FetchManager::new(adapter.clone());
    let draft = store.create_record("post", CreateOptions::default()).unwrap();
    store.delete_record(draft).unwrap();

    let saved = manager
        .schedule_save(&mut store, draft, FetchOptions::default())
        .unwrap();
    manager.flush(&mut store).await;
    store.flush().unwrap();

    assert_eq!(saved.await, Ok(draft));
    assert!(adapter.calls().is_empty());
    assert!(!store.is_alive(draft));
}
