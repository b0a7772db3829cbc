//! Scripted transport with manual completion.
//!
//! [`MockTransport`] records every dispatched request and keeps its
//! responder, so a test decides when, and in which order, each call
//! completes.

use meshsync_engine::{Responder, Transport};
use meshsync_protocol::{TransportFailure, TransportRequest, TransportResponse};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

struct RecordedCall {
    request: TransportRequest,
    responder: Option<Responder>,
}

/// A transport whose calls complete only when the test says so.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    /// Creates a shared mock transport.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the number of dispatched calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the number of calls not yet completed.
    pub fn pending_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.responder.is_some())
            .count()
    }

    /// Returns every dispatched request, in dispatch order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.calls.lock().iter().map(|c| c.request.clone()).collect()
    }

    /// Returns the request of call `index`.
    pub fn request(&self, index: usize) -> TransportRequest {
        self.calls.lock()[index].request.clone()
    }

    /// Returns the JSON body of call `index`, if it carried one.
    pub fn body(&self, index: usize) -> Option<Value> {
        let request = self.request(index);
        request
            .body
            .map(|body| serde_json::from_slice(&body).expect("request body is not JSON"))
    }

    /// Completes call `index` with `response`.
    ///
    /// # Panics
    ///
    /// Panics if the call was already completed.
    pub fn respond(&self, index: usize, response: TransportResponse) {
        self.take(index).succeed(response);
    }

    /// Completes call `index` with a JSON response.
    pub fn respond_json(&self, index: usize, status: u16, body: Value) {
        self.respond(index, TransportResponse::json(status, body.to_string()));
    }

    /// Fails call `index` with a JSON error response.
    pub fn fail_json(&self, index: usize, status: u16, body: Value) {
        let response = TransportResponse::json(status, body.to_string());
        self.take(index).fail(TransportFailure::from_response(response));
    }

    /// Fails call `index` without any response.
    pub fn fail_network(&self, index: usize, message: &str) {
        self.take(index).fail(TransportFailure::network(message));
    }

    /// Takes the responder out before completing, so a completion that
    /// dispatches new calls can record them.
    fn take(&self, index: usize) -> Responder {
        self.calls.lock()[index]
            .responder
            .take()
            .unwrap_or_else(|| panic!("call {index} already completed"))
    }
}

impl Transport for MockTransport {
    fn dispatch(&self, request: TransportRequest, responder: Responder) {
        tracing::trace!(method = %request.method, url = %request.url, "mock dispatch");
        self.calls.lock().push(RecordedCall {
            request,
            responder: Some(responder),
        });
    }
}
