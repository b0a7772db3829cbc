//! End-to-end flows over the in-memory server, polling, and async callers.

use meshsync_engine::{
    EngineConfig, EntityManager, Lifecycle, PollOptions, SyncError, TokioScheduler,
};
use meshsync_protocol::Status;
use meshsync_testkit::prelude::*;
use std::time::Duration;

#[test]
fn create_update_destroy() {
    init_tracing();
    let (server, manager) = memory_manager(0);
    let entity = manager
        .create(&json!({"name": "a", "flags": {"a": true, "b": false}}))
        .unwrap();
    assert_eq!(entity.lifecycle(), Lifecycle::Unsaved);

    entity.save().outcome().unwrap().unwrap();
    assert_eq!(entity.id(), Some(json!(1)));
    assert_eq!(entity.status(), Some(Status::Created));

    entity.set_path("flags.b", json!(true)).unwrap();
    entity.save().outcome().unwrap().unwrap();
    let update = server.requests().pop().unwrap();
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&update.body.unwrap()).unwrap(),
        json!({"flags": {"b": true}})
    );
    assert_eq!(server.get(1).unwrap()["flags"], json!({"a": true, "b": true}));

    assert_eq!(
        manager.query().filter(json!({"name": "a"})).count().outcome(),
        Some(Ok(1))
    );

    entity.destroy().outcome().unwrap().unwrap();
    assert!(server.is_empty());
    assert_eq!(entity.lifecycle(), Lifecycle::Destroyed);
}

#[test]
fn load_fetches_once() {
    let (server, manager) = memory_manager(2);
    let entity = manager.load(1, None).outcome().unwrap().unwrap();
    assert_eq!(entity.get("name"), Some(json!("item-0")));
    let again = manager.load(1, None).outcome().unwrap().unwrap();
    assert!(again.ptr_eq(&entity));
    assert_eq!(server.request_count(), 1);
}

#[test]
fn missing_resources_surface_transport_errors() {
    let (_, manager) = memory_manager(0);
    match manager.load(99, None).outcome().unwrap().unwrap_err() {
        SyncError::Transport { status, body, .. } => {
            assert_eq!(status, Some(404));
            assert_eq!(body, Some(json!({"error": "not-found"})));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn poll_until_condition() {
    let (transport, scheduler, manager) = mock_manager_with_clock(Duration::from_millis(100));
    let entity = manager.get(1).unwrap();
    let poll = entity.poll(
        PollOptions::until(|e| e.get("value") == Some(json!(3)))
            .with_timeout(Duration::from_secs(1)),
    );

    transport.respond_json(0, 200, json!({"id": 1, "name": "job", "value": 1}));
    assert!(poll.is_pending());
    assert_eq!(scheduler.pending(), 2);

    scheduler.advance(Duration::from_millis(100));
    assert_eq!(transport.call_count(), 2);
    transport.respond_json(1, 200, json!({"id": 1, "name": "job", "value": 3}));
    assert!(poll.outcome().unwrap().unwrap().ptr_eq(&entity));
    assert_eq!(scheduler.pending(), 1);

    scheduler.advance(Duration::from_secs(1));
    assert!(poll.outcome().unwrap().is_ok());
    assert_eq!(transport.call_count(), 2);
}

#[test]
fn poll_times_out() {
    let (transport, scheduler, manager) = mock_manager_with_clock(Duration::from_millis(100));
    let entity = manager.get(1).unwrap();
    let poll = entity.poll(
        PollOptions::while_holds(|e| e.get("value") == Some(json!(1)))
            .with_timeout(Duration::from_millis(250)),
    );
    for call in 0..3 {
        transport.respond_json(call, 200, json!({"id": 1, "value": 1}));
        assert!(poll.is_pending());
        scheduler.advance(Duration::from_millis(100));
    }
    assert_eq!(poll.outcome().map(|o| o.map(|_| ())), Some(Err(SyncError::Timeout)));
    assert_eq!(transport.call_count(), 3);
    assert_eq!(scheduler.pending(), 0);
}

#[test]
fn poll_times_out_while_a_refresh_hangs() {
    let (transport, scheduler, manager) = mock_manager_with_clock(Duration::from_millis(100));
    let entity = manager.get(1).unwrap();
    let poll = entity.poll(
        PollOptions::until(|e| e.get("value") == Some(json!(2)))
            .with_timeout(Duration::from_millis(250)),
    );
    assert_eq!(transport.call_count(), 1);

    scheduler.advance(Duration::from_millis(250));
    assert_eq!(poll.outcome().map(|o| o.map(|_| ())), Some(Err(SyncError::Timeout)));

    transport.respond_json(0, 200, json!({"id": 1, "value": 2}));
    assert_eq!(poll.outcome().map(|o| o.map(|_| ())), Some(Err(SyncError::Timeout)));
    assert_eq!(scheduler.pending(), 0);
    assert_eq!(entity.get("value"), Some(json!(2)));
}

#[test]
fn poll_stops_on_refresh_failure() {
    let (transport, _, manager) = mock_manager_with_clock(Duration::from_millis(100));
    let entity = manager.get(1).unwrap();
    let poll = entity.poll(PollOptions::until(|_| false));
    transport.fail_network(0, "gone");
    assert_eq!(poll.outcome().unwrap().unwrap_err().kind().as_str(), "transport-error");
}

#[tokio::test]
async fn handles_can_be_awaited() {
    let server = MemoryServer::new(EXAMPLE_RESOURCE);
    server.insert(json!({"name": "first"}));
    let config = EngineConfig::new()
        .with_scheduler(std::sync::Arc::new(TokioScheduler::current().unwrap()))
        .with_poll_interval(Duration::from_millis(5));
    let manager = EntityManager::new(example_resource(), server.transport(), config);

    let entity = manager.load(1, None).await.unwrap();
    assert_eq!(entity.get("name"), Some(json!("first")));

    let created = manager
        .create(&json!({"name": "second"}))
        .unwrap()
        .save()
        .await
        .unwrap();
    assert_eq!(created.id(), Some(json!(2)));

    let polled = entity
        .poll(PollOptions::until(|e| e.get("name") == Some(json!("first"))))
        .await
        .unwrap();
    assert!(polled.ptr_eq(&entity));
}
