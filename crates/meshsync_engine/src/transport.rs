//! Transport layer abstraction.
//!
//! A [`Transport`] performs exactly one call per dispatched request and
//! reports the outcome through the [`Responder`] it was handed. The responder
//! is consumed on completion, so a call cannot be answered twice; a responder
//! dropped without an answer fails the call.

use meshsync_protocol::{TransportFailure, TransportRequest, TransportResponse};
use std::fmt;
use tracing::warn;

/// Outcome of one transport call.
pub type Completion = Result<TransportResponse, TransportFailure>;

/// One-shot completion callback for a dispatched request.
pub struct Responder {
    complete: Option<Box<dyn FnOnce(Completion) + Send>>,
}

impl Responder {
    /// Wraps a completion callback.
    pub fn new(complete: impl FnOnce(Completion) + Send + 'static) -> Self {
        Self {
            complete: Some(Box::new(complete)),
        }
    }

    /// Reports a successful response.
    pub fn succeed(self, response: TransportResponse) {
        self.complete(Ok(response));
    }

    /// Reports a failure.
    pub fn fail(self, failure: TransportFailure) {
        self.complete(Err(failure));
    }

    /// Reports an outcome.
    pub fn complete(mut self, completion: Completion) {
        if let Some(complete) = self.complete.take() {
            complete(completion);
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(complete) = self.complete.take() {
            warn!("transport dropped a call without answering it");
            complete(Err(TransportFailure::network(
                "call dropped without a response",
            )));
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("answered", &self.complete.is_none())
            .finish()
    }
}

/// Performs remote calls.
///
/// Implementations may answer synchronously from inside `dispatch` or later
/// from any thread.
pub trait Transport: Send + Sync {
    /// Sends `request` and reports its outcome through `responder`.
    fn dispatch(&self, request: TransportRequest, responder: Responder);
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshsync_protocol::Method;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Echo;

    impl Transport for Echo {
        fn dispatch(&self, request: TransportRequest, responder: Responder) {
            responder.succeed(TransportResponse::json(200, request.url.into_bytes()));
        }
    }

    #[test]
    fn responder_answers_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let responder = Responder::new(move |completion| sink.lock().push(completion.is_ok()));
        responder.succeed(TransportResponse::json(200, "{}"));
        assert_eq!(*seen.lock(), vec![true]);
    }

    #[test]
    fn dropped_responder_fails_the_call() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        drop(Responder::new(move |completion| {
            *sink.lock() = Some(completion);
        }));
        let completion = seen.lock().take().unwrap();
        assert_eq!(completion.unwrap_err().status, None);
    }

    #[test]
    fn synchronous_transport() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        Echo.dispatch(
            TransportRequest::new(Method::Get, "/items"),
            Responder::new(move |completion| {
                *sink.lock() = completion.ok().map(|r| r.body);
            }),
        );
        assert_eq!(seen.lock().as_deref(), Some(&b"/items"[..]));
    }
}
