//! In-memory resource server.
//!
//! [`MemoryServer`] answers the standard resource routes for one resource
//! name, backed by a map of JSON objects with server-assigned integer ids.
//! It plugs into the engine through `LoopbackClient` and `HttpTransport`.

use meshsync_codec::{decode_form, MimeType};
use meshsync_engine::{HttpTransport, LoopbackClient, LoopbackServer};
use meshsync_protocol::{Method, TransportRequest, TransportResponse};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
struct ServerState {
    resources: BTreeMap<u64, Map<String, Value>>,
    next_id: u64,
    requests: Vec<TransportRequest>,
}

/// A shared in-memory server for one resource collection.
///
/// Clones share the same storage.
#[derive(Clone)]
pub struct MemoryServer {
    name: String,
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    /// Creates an empty server answering under `/{name}`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(ServerState {
                next_id: 1,
                ..ServerState::default()
            })),
        }
    }

    /// Stores a resource and returns its assigned id.
    pub fn insert(&self, attrs: Value) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let mut members = match attrs {
            Value::Object(members) => members,
            _ => Map::new(),
        };
        members.insert("id".into(), json!(id));
        state.resources.insert(id, members);
        id
    }

    /// Returns the stored resource with `id`.
    pub fn get(&self, id: u64) -> Option<Value> {
        self.state
            .lock()
            .resources
            .get(&id)
            .map(|members| Value::Object(members.clone()))
    }

    /// Returns the number of stored resources.
    pub fn len(&self) -> usize {
        self.state.lock().resources.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of requests handled.
    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Returns every handled request.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.state.lock().requests.clone()
    }

    /// Wraps the server in a transport.
    pub fn transport(&self) -> Arc<HttpTransport<LoopbackClient<MemoryServer>>> {
        Arc::new(HttpTransport::new(LoopbackClient::new(self.clone())))
    }

    fn route(&self, request: &TransportRequest) -> (u16, Value) {
        let segments: Vec<&str> = request
            .path()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        let (name, id) = match segments.as_slice() {
            [.., name, id] if *name == self.name => (*name, Some(*id)),
            [.., name] if *name == self.name => (*name, None),
            _ => return not_found(),
        };
        let id = match id.map(str::parse::<u64>) {
            Some(Ok(id)) => Some(id),
            Some(Err(_)) => return not_found(),
            None => None,
        };
        let body = match request.body.as_deref() {
            Some(body) => match MimeType::Json.decode(body) {
                Ok(body) => body,
                Err(err) => return (400, json!({"error": err.to_string()})),
            },
            None => Value::Null,
        };
        tracing::trace!(resource = name, ?id, method = %request.method, "memory server request");

        match (request.method, id) {
            (Method::Get, None) => (200, self.query(request.query_string())),
            (Method::Post, None) => {
                let id = self.insert(body);
                (201, self.get(id).unwrap_or(Value::Null))
            }
            (Method::Get, Some(id)) => match self.get(id) {
                Some(resource) => (200, resource),
                None => not_found(),
            },
            (Method::Patch, Some(id)) | (Method::Put, Some(id)) => {
                let mut state = self.state.lock();
                let Some(stored) = state.resources.get_mut(&id) else {
                    return not_found();
                };
                if request.method == Method::Put {
                    stored.retain(|key, _| key == "id");
                }
                if let Value::Object(members) = body {
                    for (key, value) in members {
                        if key != "id" {
                            merge_member(stored, key, value);
                        }
                    }
                }
                (200, Value::Object(stored.clone()))
            }
            (Method::Delete, Some(id)) => match self.state.lock().resources.remove(&id) {
                Some(_) => (200, Value::Null),
                None => not_found(),
            },
            _ => (400, json!({"error": "unsupported"})),
        }
    }

    fn query(&self, query_string: Option<&str>) -> Value {
        let params = query_string
            .map(decode_form)
            .unwrap_or(Value::Null);
        let filter = params.get("query").and_then(Value::as_object).cloned();
        let offset = params.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
        let limit = params.get("limit").and_then(Value::as_u64).map(|l| l as usize);
        let with_total = params.get("total").and_then(Value::as_bool).unwrap_or(false);

        let state = self.state.lock();
        let matching: Vec<&Map<String, Value>> = state
            .resources
            .values()
            .filter(|resource| match &filter {
                Some(filter) => filter.iter().all(|(k, v)| resource.get(k) == Some(v)),
                None => true,
            })
            .collect();
        let resources: Vec<Value> = matching
            .iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|resource| Value::Object((*resource).clone()))
            .collect();

        let mut envelope = Map::new();
        if with_total {
            envelope.insert("total".into(), json!(matching.len()));
        }
        envelope.insert("resources".into(), Value::Array(resources));
        Value::Object(envelope)
    }
}

impl LoopbackServer for MemoryServer {
    fn handle(&self, request: &TransportRequest) -> TransportResponse {
        self.state.lock().requests.push(request.clone());
        let (status, body) = self.route(request);
        TransportResponse::json(status, body.to_string())
    }
}

fn not_found() -> (u16, Value) {
    (404, json!({"error": "not-found"}))
}

fn merge_member(target: &mut Map<String, Value>, key: String, value: Value) {
    match (target.get_mut(&key), value) {
        (Some(Value::Object(existing)), Value::Object(members)) => {
            for (k, v) in members {
                merge_member(existing, k, v);
            }
        }
        (_, value) => {
            target.insert(key, value);
        }
    }
}
