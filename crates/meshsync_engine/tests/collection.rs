//! Windowed collection loads against a server and a scripted transport.

use meshsync_engine::{CollectionEvent, Entity, LoadParams};
use meshsync_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::Value;

fn names(entities: &[Entity]) -> Vec<Value> {
    entities.iter().map(|e| e.get("name").unwrap()).collect()
}

#[test]
fn overlapping_windows_are_served_from_cache() {
    init_tracing();
    let (server, manager) = memory_manager(10);
    let collection = manager.collection(None);

    let first = collection.load(LoadParams::window(0, 5)).outcome().unwrap().unwrap();
    assert_eq!(first.len(), 5);
    let second = collection.load(LoadParams::window(5, 5)).outcome().unwrap().unwrap();
    assert_eq!(second.len(), 5);
    assert_eq!(server.request_count(), 2);
    assert_eq!(collection.total(), Some(10));

    let all = collection.load(LoadParams::window(0, 10)).outcome().unwrap().unwrap();
    assert_eq!(server.request_count(), 2);
    let expected: Vec<Value> = (0..10).map(|i| json!(format!("item-{i}"))).collect();
    assert_eq!(names(&all), expected);
}

#[test]
fn partially_cached_windows_fetch_the_remainder() {
    let (server, manager) = memory_manager(10);
    let collection = manager.collection(None);
    collection.load(LoadParams::window(0, 4)).outcome().unwrap().unwrap();
    let window = collection.load(LoadParams::window(2, 4)).outcome().unwrap().unwrap();
    assert_eq!(
        names(&window),
        vec![json!("item-2"), json!("item-3"), json!("item-4"), json!("item-5")]
    );
    let last = server.requests().pop().unwrap();
    assert_eq!(last.query_string(), Some("limit=2&offset=4&total=true"));
}

#[test]
fn loads_without_a_window_use_the_known_total() {
    let (server, manager) = memory_manager(3);
    let collection = manager.collection(None);
    let all = collection.load(LoadParams::new()).outcome().unwrap().unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(collection.load(LoadParams::new()).outcome().unwrap().unwrap().len(), 3);
    assert_eq!(server.request_count(), 1);

    collection.load(LoadParams::new().reload()).outcome().unwrap().unwrap();
    assert_eq!(server.request_count(), 2);
}

#[test]
fn superseded_load_resolves_without_touching_the_cache() {
    let (transport, manager) = mock_manager();
    let collection = manager.collection(None);

    let stale = collection.load(LoadParams::window(0, 2));
    collection.reset(Some(manager.query().filter(json!({"name": "b"}))));
    let fresh = collection.load(LoadParams::window(0, 2));
    assert_eq!(transport.call_count(), 2);

    transport.respond_json(
        1,
        200,
        json!({"total": 1, "resources": [{"id": 2, "name": "b"}]}),
    );
    transport.respond_json(
        0,
        200,
        json!({"total": 3, "resources": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]}),
    );

    assert_eq!(stale.outcome().unwrap().unwrap().len(), 2);
    assert_eq!(fresh.outcome().unwrap().unwrap().len(), 1);
    assert_eq!(collection.len(), 1);
    assert_eq!(collection.total(), Some(1));
    assert_eq!(collection.at(0).unwrap().id(), Some(json!(2)));
}

#[test]
fn shifted_members_keep_a_single_position() {
    let (transport, manager) = mock_manager();
    let collection = manager.collection(None);
    let first = collection.load(LoadParams::window(0, 2));
    transport.respond_json(
        0,
        200,
        json!({"total": 4, "resources": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]}),
    );
    assert_eq!(first.outcome().unwrap().unwrap().len(), 2);

    let second = collection.load(LoadParams::window(2, 2));
    transport.respond_json(
        1,
        200,
        json!({"total": 4, "resources": [{"id": 2, "name": "b"}, {"id": 3, "name": "c"}]}),
    );
    assert_eq!(second.outcome().unwrap().unwrap().len(), 2);

    assert_eq!(collection.len(), 3);
    assert!(collection.at(1).is_none());
    let ids: Vec<Value> = collection.models().iter().map(|e| e.id().unwrap()).collect();
    assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
}

#[test]
fn identical_loads_coalesce_until_rejected() {
    let (transport, manager) = mock_manager();
    let collection = manager.collection(None);
    let a = collection.load(LoadParams::window(0, 2));
    let b = collection.load(LoadParams::window(0, 2));
    assert!(a.ptr_eq(&b));
    assert_eq!(transport.call_count(), 1);

    transport.fail_network(0, "offline");
    assert!(a.is_rejected());
    let c = collection.load(LoadParams::window(0, 2));
    assert!(!c.ptr_eq(&a));
    assert_eq!(transport.call_count(), 2);
}

#[test]
fn created_entities_join_the_collection() {
    let (server, manager) = memory_manager(2);
    let collection = manager.collection(None);
    collection.load(LoadParams::new()).outcome().unwrap().unwrap();
    let (_, events) = collection.subscribe_channel();

    let created = collection
        .create(&json!({"name": "new"}), Default::default(), Some(0))
        .outcome()
        .unwrap()
        .unwrap();
    assert_eq!(server.len(), 3);
    assert!(collection.at(0).unwrap().ptr_eq(&created));
    assert_eq!(collection.total(), Some(3));
    assert!(collection.get(&created.identity()).is_some());
    assert!(events.try_iter().any(|e| matches!(e, CollectionEvent::Updated)));
}

#[test]
fn destroyed_members_leave_the_collection() {
    let (server, manager) = memory_manager(3);
    let collection = manager.collection(None);
    collection.load(LoadParams::new()).outcome().unwrap().unwrap();
    let middle = collection.at(1).unwrap();
    middle.destroy().outcome().unwrap().unwrap();
    assert_eq!(server.len(), 2);
    assert_eq!(
        names(&collection.models()),
        vec![json!("item-0"), json!("item-2")]
    );
    assert_eq!(collection.total(), Some(2));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn windows_follow_server_order(windows in prop::collection::vec(arb_window(12), 1..6)) {
        let (server, manager) = memory_manager(12);
        let collection = manager.collection(None);
        for (offset, limit) in &windows {
            let window = collection
                .load(LoadParams::window(*offset, *limit))
                .outcome()
                .unwrap()
                .unwrap();
            let expected: Vec<Value> = (*offset..*offset + *limit)
                .map(|i| json!(format!("item-{i}")))
                .collect();
            prop_assert_eq!(names(&window), expected);
        }
        prop_assert!(server.request_count() <= windows.len());
        prop_assert_eq!(collection.total(), Some(12));
    }
}
