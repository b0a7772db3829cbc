//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so any blocking
//! client library can be plugged in. [`LoopbackClient`] routes requests to an
//! in-process server instead of the network.

use crate::transport::{Responder, Transport};
use meshsync_protocol::{is_success_code, TransportFailure, TransportRequest, TransportResponse};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP calls.
pub trait HttpClient: Send + Sync {
    /// Performs a request and returns the response, whatever its status.
    ///
    /// `Err` is reserved for failures with no response at all.
    fn execute(&self, request: &TransportRequest) -> Result<TransportResponse, String>;

    /// Checks if the client is healthy.
    fn is_healthy(&self) -> bool;
}

/// A [`Transport`] over a blocking [`HttpClient`].
///
/// Each call completes on the dispatching thread. Non-2xx responses are
/// reported as failures.
pub struct HttpTransport<C: HttpClient> {
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(client: C) -> Self {
        Self {
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the wrapped client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last network error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }
}

impl<C: HttpClient> Transport for HttpTransport<C> {
    fn dispatch(&self, request: TransportRequest, responder: Responder) {
        if !self.client.is_healthy() {
            responder.fail(TransportFailure::network("http client is not healthy"));
            return;
        }

        debug!(method = %request.method, url = %request.url, "http request");
        match self.client.execute(&request) {
            Ok(response) if is_success_code(response.status) => {
                *self.last_error.write() = None;
                responder.succeed(response);
            }
            Ok(response) => {
                *self.last_error.write() = None;
                debug!(status = response.status, url = %request.url, "http request failed");
                responder.fail(TransportFailure::from_response(response));
            }
            Err(message) => {
                warn!(url = %request.url, error = %message, "http request errored");
                *self.last_error.write() = Some(message.clone());
                responder.fail(TransportFailure::network(message));
            }
        }
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a request and returns the response.
    fn handle(&self, request: &TransportRequest) -> TransportResponse;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn execute(&self, request: &TransportRequest) -> Result<TransportResponse, String> {
        Ok(self.server.handle(request))
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
