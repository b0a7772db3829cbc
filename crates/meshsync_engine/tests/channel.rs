//! Request channel coalescing, validation and failure handling.

use meshsync_engine::SyncError;
use meshsync_testkit::prelude::*;

#[test]
fn identical_calls_share_one_request() {
    init_tracing();
    let (transport, manager) = mock_manager();
    let channel = manager.channel("get").unwrap();

    let a = channel.initiate(Some("1"), None, None);
    let b = channel.initiate(Some("1"), None, None);
    assert!(a.ptr_eq(&b));
    assert_eq!(transport.call_count(), 1);
    assert_eq!(channel.in_flight(), 1);

    transport.respond_json(0, 200, json!({"id": 1, "name": "a"}));
    assert_eq!(a.outcome().unwrap().unwrap().value["name"], json!("a"));
    assert_eq!(b.outcome(), a.outcome());
    assert_eq!(channel.in_flight(), 0);

    let c = channel.initiate(Some("1"), None, None);
    assert!(!c.ptr_eq(&a));
    assert_eq!(transport.call_count(), 2);
}

#[test]
fn different_payloads_are_not_coalesced() {
    let (transport, manager) = mock_manager();
    let channel = manager.channel("get").unwrap();
    let a = channel.initiate(Some("1"), Some(&json!({"include": ["name"]})), None);
    let b = channel.initiate(Some("1"), Some(&json!({"include": ["value"]})), None);
    let c = channel.initiate(Some("2"), Some(&json!({"include": ["name"]})), None);
    assert!(!a.ptr_eq(&b));
    assert!(!a.ptr_eq(&c));
    assert_eq!(transport.call_count(), 3);
    assert_eq!(transport.request(0).url, "/example/1?include=%5B%22name%22%5D");
}

#[test]
fn failed_calls_leave_the_coalescing_table() {
    let (transport, manager) = mock_manager();
    let channel = manager.channel("get").unwrap();
    let a = channel.initiate(Some("1"), None, None);
    transport.fail_network(0, "connection reset");
    assert!(a.is_rejected());
    assert_eq!(channel.in_flight(), 0);

    let b = channel.initiate(Some("1"), None, None);
    assert!(!b.ptr_eq(&a));
    assert_eq!(transport.call_count(), 2);
}

#[test]
fn validation_fails_before_any_call() {
    let (transport, manager) = mock_manager();
    let channel = manager.channel("create").unwrap();
    let err = channel
        .initiate(None, Some(&json!({"name": "a", "value": "many"})), None)
        .outcome()
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind().as_str(), "validation-error");
    assert!(err.validation().unwrap().member("value").is_some());
    assert_eq!(transport.call_count(), 0);
}

#[test]
fn json_error_bodies_are_passed_through() {
    let (transport, manager) = mock_manager();
    let channel = manager.channel("create").unwrap();
    let handle = channel.initiate(None, Some(&json!({"name": "a"})), None);
    transport.fail_json(0, 406, json!({"name": [["required"], null]}));
    match handle.outcome().unwrap().unwrap_err() {
        SyncError::Transport { status, body, .. } => {
            assert_eq!(status, Some(406));
            assert_eq!(body, Some(json!({"name": [["required"], null]})));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn missing_identity_is_rejected() {
    let (transport, manager) = mock_manager();
    let err = manager
        .channel("update")
        .unwrap()
        .initiate(None, Some(&json!({"name": "a"})), None)
        .outcome()
        .unwrap()
        .unwrap_err();
    assert_eq!(err, SyncError::MissingIdentity);
    assert_eq!(transport.call_count(), 0);
}

#[test]
fn request_bodies_and_headers() {
    let (transport, manager) = mock_manager();
    let headers = [("X-Trace".to_string(), "abc".to_string())].into_iter().collect();
    let _ = manager
        .channel("update")
        .unwrap()
        .initiate(Some("7"), Some(&json!({"value": "12"})), Some(&headers));
    let request = transport.request(0);
    assert_eq!(request.url, "/example/7");
    assert_eq!(request.headers["X-Trace"], "abc");
    assert_eq!(transport.body(0), Some(json!({"value": 12})));
}
