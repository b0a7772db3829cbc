//! Request channels.
//!
//! A [`RequestChannel`] is one named remote operation bound to a URL
//! template and a codec. Identical calls issued while one is in flight share
//! a single result handle; the entry is dropped as soon as the call settles,
//! so the next identical call goes to the network again.

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::pending::Pending;
use crate::resource::{ChannelSpec, ID_SEGMENT};
use crate::transport::{Completion, Responder, Transport};
use meshsync_codec::{encode_form, percent_encode, MimeType};
use meshsync_protocol::{TransportFailure, TransportRequest};
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// A decoded response.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelResponse {
    /// Status code.
    pub status: u16,
    /// Decoded (and, if a schema applies, unserialized) payload.
    pub value: Value,
}

type RequestKey = [u8; 32];
type InFlight = Arc<Mutex<HashMap<RequestKey, Pending<ChannelResponse>>>>;

/// One named remote operation.
pub struct RequestChannel {
    spec: ChannelSpec,
    base_url: String,
    headers: BTreeMap<String, String>,
    mimetype: MimeType,
    transport: Arc<dyn Transport>,
    in_flight: InFlight,
}

impl RequestChannel {
    /// Binds a channel description to a transport.
    pub fn new(spec: ChannelSpec, transport: Arc<dyn Transport>, config: &EngineConfig) -> Self {
        let mimetype = spec.mimetype.unwrap_or(config.mimetype);
        Self {
            spec,
            base_url: config.base_url.clone(),
            headers: config.headers.clone(),
            mimetype,
            transport,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the channel description.
    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    /// Returns the number of distinct calls in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Resolves the URL for `id`.
    ///
    /// Fails with `MissingIdentity` if the template needs an identity and
    /// none is given.
    pub fn url(&self, id: Option<&str>) -> SyncResult<String> {
        let mut segments = Vec::new();
        for segment in self.spec.path.split('/') {
            if segment == ID_SEGMENT {
                let id = id.ok_or(SyncError::MissingIdentity)?;
                segments.push(percent_encode(id));
            } else {
                segments.push(segment.to_string());
            }
        }
        Ok(format!("{}{}", self.base_url, segments.join("/")))
    }

    /// Issues the operation.
    ///
    /// `payload` is serialized through the channel's request schema; a
    /// validation failure rejects without any network call. GET payloads
    /// travel in the query string, others in the body.
    pub fn initiate(
        &self,
        id: Option<&str>,
        payload: Option<&Value>,
        headers: Option<&BTreeMap<String, String>>,
    ) -> Pending<ChannelResponse> {
        match self.prepare(id, payload, headers) {
            Ok((key, request)) => self.dispatch(key, request),
            Err(err) => {
                debug!(channel = %self.spec.name, error = %err, "request rejected before dispatch");
                Pending::rejected(err)
            }
        }
    }

    fn prepare(
        &self,
        id: Option<&str>,
        payload: Option<&Value>,
        headers: Option<&BTreeMap<String, String>>,
    ) -> SyncResult<(RequestKey, TransportRequest)> {
        let url = self.url(id)?;
        let key = request_key(&url, payload);

        let wire = match (payload, &self.spec.schema) {
            (None, _) | (Some(Value::Null), _) => Value::Null,
            (Some(payload), Some(schema)) => schema.serialize(payload, self.mimetype, false)?,
            (Some(payload), None) => payload.clone(),
        };

        let mut request = if self.spec.method.uses_query_string() {
            let query = encode_form(&wire)?;
            let url = if query.is_empty() {
                url
            } else {
                format!("{url}?{query}")
            };
            TransportRequest::new(self.spec.method, url)
        } else {
            let request = TransportRequest::new(self.spec.method, url);
            if wire.is_null() {
                request
            } else {
                request.with_body(self.mimetype, self.mimetype.encode(&wire)?)
            }
        };
        request.headers = self.headers.clone();
        if let Some(headers) = headers {
            request
                .headers
                .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok((key, request))
    }

    fn dispatch(&self, key: RequestKey, request: TransportRequest) -> Pending<ChannelResponse> {
        let handle = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(&key) {
                debug!(channel = %self.spec.name, url = %request.url, "coalescing identical request");
                return existing.clone();
            }
            let handle = Pending::new();
            in_flight.insert(key, handle.clone());
            handle
        };

        trace!(channel = %self.spec.name, method = %request.method, url = %request.url, "dispatching");
        let in_flight = Arc::clone(&self.in_flight);
        let settled = handle.clone();
        let spec = self.spec.clone();
        let mimetype = self.mimetype;
        let responder = Responder::new(move |completion: Completion| {
            in_flight.lock().remove(&key);
            settled.settle(decode(&spec, mimetype, completion));
        });
        self.transport.dispatch(request, responder);
        handle
    }
}

fn request_key(url: &str, payload: Option<&Value>) -> RequestKey {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update([0u8]);
    if let Some(payload) = payload {
        hasher.update(payload.to_string().as_bytes());
    }
    hasher.finalize().into()
}

fn decode(spec: &ChannelSpec, mimetype: MimeType, completion: Completion) -> SyncResult<ChannelResponse> {
    let response = completion.map_err(failure_to_error)?;
    let body_mime = match response.content_type.as_deref() {
        Some(content_type) => MimeType::from_content_type(content_type).ok_or_else(|| {
            SyncError::Codec(format!("unsupported response content type: {content_type}"))
        })?,
        None => mimetype,
    };
    let value = body_mime.decode(&response.body)?;
    let value = match spec.response_schema(response.status) {
        Some(schema) => schema.unserialize(&value, body_mime)?,
        None => value,
    };
    trace!(channel = %spec.name, status = response.status, "response decoded");
    Ok(ChannelResponse {
        status: response.status,
        value,
    })
}

fn failure_to_error(failure: TransportFailure) -> SyncError {
    let body = if failure.has_json_body() {
        serde_json::from_slice(&failure.body).ok()
    } else {
        None
    };
    debug!(status = ?failure.status, message = %failure.message, "request failed");
    SyncError::Transport {
        status: failure.status,
        body,
        message: failure.message,
    }
}

impl fmt::Debug for RequestChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestChannel")
            .field("name", &self.spec.name)
            .field("method", &self.spec.method)
            .field("path", &self.spec.path)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
