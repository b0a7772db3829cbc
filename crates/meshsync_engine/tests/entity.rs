//! Entity reconciliation against out-of-order and failing responses.

use meshsync_engine::{
    EntityEvent, Identity, Lifecycle, ManagerEvent, PropertyPath, RefreshOptions, SaveOptions,
    SetOptions, SyncError,
};
use meshsync_protocol::{Method, Status};
use meshsync_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::{Map, Value};

#[test]
fn later_refresh_wins_over_earlier_response() {
    init_tracing();
    let (transport, manager) = mock_manager();
    let entity = manager.get(1).unwrap();

    let r1 = entity.refresh_with(RefreshOptions::new().with_params(json!({"include": ["name"]})));
    let r2 = entity.refresh_with(
        RefreshOptions::new().with_params(json!({"include": ["name", "value"]})),
    );
    assert_eq!(transport.call_count(), 2);

    transport.respond_json(1, 200, json!({"id": 1, "name": "second", "value": 2}));
    assert!(!r1.is_pending());
    assert!(!r2.is_pending());
    assert_eq!(entity.get("name"), Some(json!("second")));

    transport.respond_json(0, 200, json!({"id": 1, "name": "first", "value": 1}));
    assert_eq!(entity.get("name"), Some(json!("second")));
    assert_eq!(entity.get("value"), Some(json!(2)));
    assert!(r1.outcome().unwrap().unwrap().ptr_eq(&entity));
    assert!(r2.outcome().unwrap().is_ok());
    assert_eq!(entity.lifecycle(), Lifecycle::Persisted);
}

#[test]
fn earlier_refresh_failure_does_not_settle_later_ones() {
    let (transport, manager) = mock_manager();
    let entity = manager.get(1).unwrap();
    let r1 = entity.refresh_with(RefreshOptions::new().with_params(json!({"include": ["name"]})));
    let r2 = entity.refresh();
    transport.fail_network(0, "timeout");
    assert!(r1.is_rejected());
    assert!(r2.is_pending());
    transport.respond_json(1, 200, json!({"id": 1, "name": "ok"}));
    assert!(r2.outcome().unwrap().is_ok());
    assert!(entity.is_loaded());
}

#[test]
fn earlier_refresh_does_not_undo_a_completed_save() {
    let (transport, manager) = mock_manager();
    let entity = manager
        .instantiate(&json!({"id": 1, "name": "a", "value": 1}), true)
        .unwrap();

    let refresh = entity.refresh();
    entity.set(&json!({"value": 5})).unwrap();
    let save = entity.save();
    assert_eq!(transport.call_count(), 2);

    transport.respond_json(1, 200, json!({"id": 1, "name": "a", "value": 5}));
    assert!(save.outcome().unwrap().is_ok());
    assert!(entity.dirty_paths().is_empty());

    transport.respond_json(0, 200, json!({"id": 1, "name": "b", "value": 1}));
    assert!(refresh.outcome().unwrap().is_ok());
    assert_eq!(entity.get("value"), Some(json!(5)));
    assert_eq!(entity.get("name"), Some(json!("b")));

    let again = entity.refresh();
    transport.respond_json(2, 200, json!({"id": 1, "name": "b", "value": 7}));
    assert!(again.outcome().unwrap().is_ok());
    assert_eq!(entity.get("value"), Some(json!(7)));
}

#[test]
fn save_without_changes_makes_no_call() {
    let (transport, manager) = mock_manager();
    let entity = manager
        .instantiate(&json!({"id": 3, "name": "a"}), true)
        .unwrap();
    let handle = entity.save();
    assert!(handle.outcome().unwrap().unwrap().ptr_eq(&entity));
    assert_eq!(transport.call_count(), 0);
}

#[test]
fn update_waits_for_the_create() {
    let (transport, manager) = mock_manager();
    let (_, events) = manager.subscribe_channel();
    let entity = manager.create(&json!({"name": "draft"})).unwrap();
    let temp = entity.identity();

    let first = entity.save();
    assert_eq!(entity.lifecycle(), Lifecycle::Creating);
    entity.set(&json!({"value": 7})).unwrap();
    let second = entity.save();
    assert_eq!(transport.call_count(), 1);
    assert_eq!(transport.request(0).method, Method::Post);
    assert_eq!(transport.body(0), Some(json!({"name": "draft"})));

    transport.respond_json(0, 201, json!({"id": 42, "name": "draft"}));
    assert!(first.outcome().unwrap().is_ok());
    assert_eq!(entity.id(), Some(json!(42)));
    assert_eq!(entity.status(), Some(Status::Created));
    assert_eq!(transport.call_count(), 2);
    let update = transport.request(1);
    assert_eq!(update.method, Method::Patch);
    assert_eq!(update.url, "/example/42");
    assert_eq!(transport.body(1), Some(json!({"value": 7})));

    transport.respond_json(1, 200, json!({"id": 42, "name": "draft", "value": 7}));
    assert!(second.outcome().unwrap().unwrap().ptr_eq(&entity));
    assert!(entity.dirty_paths().is_empty());
    assert_eq!(entity.lifecycle(), Lifecycle::Persisted);

    assert!(manager.lookup(&temp).is_none());
    assert!(manager
        .lookup(&Identity::Durable("42".into()))
        .unwrap()
        .ptr_eq(&entity));
    assert!(events.try_iter().any(|event| matches!(
        event,
        ManagerEvent::Added { previous: Some(previous), .. } if previous == temp
    )));
}

#[test]
fn failed_save_keeps_its_dirty_paths() {
    let (transport, manager) = mock_manager();
    let entity = manager
        .instantiate(&json!({"id": 1, "name": "a", "value": 1}), true)
        .unwrap();
    entity.set(&json!({"value": 2})).unwrap();
    let save = entity.save();
    assert!(entity.dirty_paths().is_empty());

    transport.fail_json(0, 500, json!({"error": "boom"}));
    let err = save.outcome().unwrap().unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(entity.dirty_paths(), vec![PropertyPath::new("value")]);
    assert_eq!(entity.get("value"), Some(json!(2)));

    let retry = entity.save();
    assert_eq!(transport.body(1), Some(json!({"value": 2})));
    transport.respond_json(1, 200, json!({"id": 1, "name": "a", "value": 2}));
    assert!(retry.outcome().unwrap().is_ok());
    assert!(entity.dirty_paths().is_empty());
}

#[test]
fn failed_save_defers_to_a_pending_save() {
    let (transport, manager) = mock_manager();
    let entity = manager
        .instantiate(&json!({"id": 1, "name": "a", "value": 1}), true)
        .unwrap();
    entity.set(&json!({"value": 2})).unwrap();
    let s1 = entity.save();
    entity.set(&json!({"value": 3})).unwrap();
    let s2 = entity.save();
    assert_eq!(transport.call_count(), 2);

    transport.fail_network(0, "reset");
    assert!(s1.is_rejected());
    assert!(entity.dirty_paths().is_empty());

    transport.respond_json(1, 200, json!({"id": 1, "name": "a", "value": 3}));
    assert!(s2.outcome().unwrap().is_ok());
    assert_eq!(entity.get("value"), Some(json!(3)));
}

#[test]
fn failed_save_defers_to_a_later_persisted_save() {
    let (transport, manager) = mock_manager();
    let entity = manager
        .instantiate(&json!({"id": 1, "name": "a", "value": 1}), true)
        .unwrap();
    entity.set(&json!({"value": 2})).unwrap();
    let s1 = entity.save();
    entity.set(&json!({"value": 3})).unwrap();
    let s2 = entity.save();

    transport.respond_json(1, 200, json!({"id": 1, "name": "a", "value": 3}));
    assert!(s2.outcome().unwrap().is_ok());
    transport.fail_network(0, "reset");
    assert!(s1.is_rejected());
    assert!(entity.dirty_paths().is_empty());
    assert_eq!(entity.get("value"), Some(json!(3)));
}

#[test]
fn refresh_does_not_clobber_pending_saves() {
    let (transport, manager) = mock_manager();
    let entity = manager
        .instantiate(&json!({"id": 1, "name": "a", "value": 1}), true)
        .unwrap();
    entity.set(&json!({"value": 5})).unwrap();
    let _save = entity.save();
    let refresh = entity.refresh();
    transport.respond_json(1, 200, json!({"id": 1, "name": "remote", "value": 1}));
    assert!(refresh.outcome().unwrap().is_ok());
    assert_eq!(entity.get("value"), Some(json!(5)));
    assert_eq!(entity.get("name"), Some(json!("remote")));
}

#[test]
fn save_all_sends_a_full_replace() {
    let (transport, manager) = mock_manager();
    let entity = manager
        .instantiate(&json!({"id": 1, "name": "a", "value": 1}), true)
        .unwrap();
    let _ = entity.save_with(SaveOptions::new().all());
    let request = transport.request(0);
    assert_eq!(request.method, Method::Put);
    assert_eq!(transport.body(0), Some(json!({"name": "a", "value": 1})));
}

#[test]
fn noclobber_set_keeps_dirty_values() {
    let (_, manager) = mock_manager();
    let entity = manager
        .instantiate(&json!({"id": 1, "name": "a", "value": 1}), true)
        .unwrap();
    entity.set(&json!({"value": 2})).unwrap();
    let changed = entity
        .set_with(
            &json!({"value": 9, "name": "b"}),
            SetOptions {
                noclobber: true,
                silent: true,
            },
        )
        .unwrap();
    assert_eq!(changed, vec![PropertyPath::new("name")]);
    assert_eq!(entity.get("value"), Some(json!(2)));
}

#[test]
fn destroy_is_idempotent_until_it_fails() {
    let (transport, manager) = mock_manager();
    let entity = manager.instantiate(&json!({"id": 4, "name": "a"}), true).unwrap();
    let (tx, rx) = std::sync::mpsc::channel();
    entity.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });

    let a = entity.destroy();
    let b = entity.destroy();
    assert!(a.ptr_eq(&b));
    assert_eq!(transport.call_count(), 1);
    assert_eq!(transport.request(0).method, Method::Delete);

    transport.respond_json(0, 200, json!(null));
    assert_eq!(a.outcome(), Some(Ok(Identity::Durable("4".into()))));
    assert!(entity.destroy().ptr_eq(&a));
    assert_eq!(transport.call_count(), 1);
    assert!(manager.is_empty());
    assert!(rx.try_iter().any(|event| event == EntityEvent::Destroyed));

    assert_eq!(
        entity.save().outcome().unwrap().unwrap_err(),
        SyncError::Destroyed
    );
}

#[test]
fn validate_reports_required_members() {
    let (_, manager) = mock_manager();
    let entity = manager.create(&json!({"value": 1})).unwrap();
    let err = entity.validate().unwrap_err();
    assert_eq!(
        err.validation().unwrap().member("name").unwrap().tokens(),
        vec!["required"]
    );
}

fn merge_into(target: &mut Map<String, Value>, update: &Map<String, Value>) {
    for (key, value) in update {
        match (target.get_mut(key), value) {
            (Some(Value::Object(held)), Value::Object(members)) => merge_into(held, members),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn saved_updates_reach_the_server(updates in prop::collection::vec(arb_update(), 1..6)) {
        let (server, manager) = memory_manager(1);
        let entity = manager.load(1, None).outcome().unwrap().unwrap();
        for update in &updates {
            entity.set(update).unwrap();
            prop_assert!(entity.save().outcome().unwrap().is_ok());
            prop_assert!(entity.dirty_paths().is_empty());
            prop_assert_eq!(server.get(1).unwrap(), entity.snapshot());
        }
    }

    #[test]
    fn failed_saves_keep_every_edit_dirty(updates in prop::collection::vec(arb_update(), 1..6)) {
        let (transport, manager) = mock_manager();
        let initial = json!({"name": "a", "value": 0, "flags": {"a": false, "b": false}});
        let entity = manager
            .instantiate(&json!({"id": 1, "name": "a", "value": 0, "flags": {"a": false, "b": false}}), true)
            .unwrap();
        for update in &updates {
            entity.set(update).unwrap();
            let _ = entity.save();
        }
        let issued = transport.call_count();
        for call in (0..issued).rev() {
            transport.fail_network(call, "offline");
        }

        let mut expected = initial.as_object().unwrap().clone();
        if entity.dirty_paths().is_empty() {
            prop_assert_eq!(entity.attributes(), expected);
        } else {
            let _ = entity.save();
            prop_assert_eq!(transport.call_count(), issued + 1);
            merge_into(&mut expected, transport.body(issued).unwrap().as_object().unwrap());
            prop_assert_eq!(entity.attributes(), expected);
        }
    }
}
