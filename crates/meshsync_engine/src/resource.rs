//! Resource descriptors.
//!
//! A [`ResourceSpec`] names a resource, its schema, and the remote operations
//! (channels) available on it. [`ResourceSpec::standard`] builds the usual
//! get/create/update/put/delete/query set.

use meshsync_codec::{Field, MimeType, Structure};
use meshsync_protocol::Method;
use std::collections::BTreeMap;

/// Description of one remote operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    /// Operation name, such as `get` or `query`.
    pub name: String,
    /// HTTP method.
    pub method: Method,
    /// Path template; a segment equal to `id` is replaced by the identity.
    pub path: String,
    /// Body encoding, overriding the engine default.
    pub mimetype: Option<MimeType>,
    /// Schema for outgoing payloads.
    pub schema: Option<Field>,
    /// Schemas for response payloads, by status code.
    pub responses: BTreeMap<u16, Field>,
    /// Schema for response payloads with no status-specific entry.
    pub fallback: Option<Field>,
}

impl ChannelSpec {
    /// Creates a channel with no schemas.
    pub fn new(name: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method,
            path: path.into(),
            mimetype: None,
            schema: None,
            responses: BTreeMap::new(),
            fallback: None,
        }
    }

    /// Sets the request schema.
    #[must_use]
    pub fn with_schema(mut self, schema: Field) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Registers a response schema for `status`.
    #[must_use]
    pub fn with_response(mut self, status: u16, schema: Field) -> Self {
        self.responses.insert(status, schema);
        self
    }

    /// Registers the fallback response schema.
    #[must_use]
    pub fn with_fallback(mut self, schema: Field) -> Self {
        self.fallback = Some(schema);
        self
    }

    /// Sets the body encoding.
    #[must_use]
    pub fn with_mimetype(mut self, mimetype: MimeType) -> Self {
        self.mimetype = Some(mimetype);
        self
    }

    /// Returns the response schema registered for `status`, if any.
    pub fn response_schema(&self, status: u16) -> Option<&Field> {
        self.responses.get(&status).or(self.fallback.as_ref())
    }

    /// Returns true if the path template has an identity placeholder.
    pub fn has_identity_segment(&self) -> bool {
        self.path.split('/').any(|segment| segment == ID_SEGMENT)
    }
}

pub(crate) const ID_SEGMENT: &str = "id";

/// Description of a resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    /// Resource name.
    pub name: String,
    /// Schema of the resource's attributes, excluding the id.
    pub schema: Structure,
    /// Name of the identity member on the wire.
    pub id_field: String,
    /// Whether the identity is composed by the client, so every save is a
    /// full replace.
    pub composite: bool,
    /// Remote operations, by name.
    pub channels: BTreeMap<String, ChannelSpec>,
}

impl ResourceSpec {
    /// Creates a resource with no channels.
    pub fn new(name: impl Into<String>, schema: Structure) -> Self {
        Self {
            name: name.into(),
            schema,
            id_field: "id".to_string(),
            composite: false,
            channels: BTreeMap::new(),
        }
    }

    /// Creates a resource with the standard channel set rooted at `/{name}`.
    pub fn standard(name: impl Into<String>, schema: Structure) -> Self {
        let name = name.into();
        let collection = format!("/{name}");
        let item = format!("/{name}/{ID_SEGMENT}");
        let body = Field::structure(schema.clone());
        let envelope = Field::structure(
            Structure::new()
                .field("total", Field::integer())
                .field("resources", Field::sequence(body.clone())),
        );

        Self::new(name, schema)
            .with_channel(
                ChannelSpec::new("get", Method::Get, &item)
                    .with_schema(Field::structure(item_query_schema()))
                    .with_fallback(body.clone()),
            )
            .with_channel(
                ChannelSpec::new("create", Method::Post, &collection)
                    .with_schema(body.clone())
                    .with_fallback(body.clone()),
            )
            .with_channel(
                ChannelSpec::new("update", Method::Patch, &item)
                    .with_schema(body.clone())
                    .with_fallback(body.clone()),
            )
            .with_channel(
                ChannelSpec::new("put", Method::Put, &item)
                    .with_schema(body.clone())
                    .with_fallback(body),
            )
            .with_channel(ChannelSpec::new("delete", Method::Delete, &item))
            .with_channel(
                ChannelSpec::new("query", Method::Get, &collection)
                    .with_schema(Field::structure(query_schema()))
                    .with_response(200, envelope.clone())
                    .with_fallback(envelope),
            )
    }

    /// Adds or replaces a channel.
    #[must_use]
    pub fn with_channel(mut self, channel: ChannelSpec) -> Self {
        self.channels.insert(channel.name.clone(), channel);
        self
    }

    /// Sets the identity member name.
    #[must_use]
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Marks the identity as composite.
    #[must_use]
    pub fn composite(mut self) -> Self {
        self.composite = true;
        self
    }

    /// Returns true if the resource has a channel with this name.
    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Returns the schema as a field.
    pub fn body(&self) -> Field {
        Field::structure(self.schema.clone())
    }
}

fn field_list() -> Field {
    Field::sequence(Field::text())
}

fn item_query_schema() -> Structure {
    Structure::new()
        .field("include", field_list())
        .field("exclude", field_list())
}

/// Schema of the standard query parameters.
pub fn query_schema() -> Structure {
    item_query_schema()
        .field("query", Field::any())
        .field("sort", field_list())
        .field("limit", Field::integer())
        .field("offset", Field::integer())
        .field("total", Field::boolean())
}
