//! Queries against a resource's collection endpoint.

use crate::entity::Entity;
use crate::error::SyncResult;
use crate::manager::EntityManager;
use crate::pending::Pending;
use meshsync_protocol::{QueryParams, QueryResults};
use serde_json::Value;
use tracing::debug;

/// Result of one executed query.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// Entities in the returned window, in order.
    pub entities: Vec<Entity>,
    /// Total size of the remote collection, if reported.
    pub total: Option<usize>,
    /// True when the server answered with a complete result (status 200).
    pub complete: bool,
    /// Response status.
    pub status: u16,
}

/// An immutable query description.
///
/// Builders consume and return the query, so a base query can be cloned and
/// narrowed without affecting the original.
#[derive(Debug, Clone)]
pub struct Query {
    manager: EntityManager,
    params: QueryParams,
    channel: String,
}

impl Query {
    pub(crate) fn new(manager: EntityManager) -> Self {
        Self {
            manager,
            params: QueryParams::new(),
            channel: "query".to_string(),
        }
    }

    /// Returns the manager the query runs against.
    pub fn manager(&self) -> &EntityManager {
        &self.manager
    }

    /// Returns the current parameters.
    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    /// Sets the filter expression.
    #[must_use]
    pub fn filter(mut self, query: Value) -> Self {
        self.params.query = Some(query);
        self
    }

    /// Sets the sort keys.
    #[must_use]
    pub fn sort<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.params.sort = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Narrows the included fields.
    #[must_use]
    pub fn include<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.params.include(fields);
        self
    }

    /// Narrows the excluded fields.
    #[must_use]
    pub fn exclude<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.params.exclude(fields);
        self
    }

    /// Sets the window size.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.params.limit = Some(limit);
        self
    }

    /// Sets the window start.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.params.offset = Some(offset);
        self
    }

    /// Requests the total count with the results.
    #[must_use]
    pub fn want_total(mut self) -> Self {
        self.params.total = true;
        self
    }

    /// Clears every parameter.
    #[must_use]
    pub fn reset(mut self) -> Self {
        self.params = QueryParams::new();
        self
    }

    /// Runs the query through another channel of the resource.
    #[must_use]
    pub fn channel(mut self, name: impl Into<String>) -> Self {
        self.channel = name.into();
        self
    }

    pub(crate) fn window(mut self, offset: Option<usize>, limit: Option<usize>) -> Self {
        self.params.offset = offset;
        self.params.limit = limit;
        self
    }

    /// Executes the query.
    ///
    /// Each returned resource is instantiated through the manager, so
    /// entities already held locally are updated in place.
    pub fn execute(&self) -> Pending<QueryOutcome> {
        let channel = match self.manager.channel(&self.channel) {
            Ok(channel) => channel,
            Err(err) => return Pending::rejected(err),
        };
        let params = self.params.to_value();
        debug!(resource = %self.manager.spec().name, params = %params, "query issued");
        let manager = self.manager.clone();
        channel
            .initiate(None, Some(&params), None)
            .map(move |response| {
                let results = QueryResults::from_value(&response.value)?;
                let entities = results
                    .resources
                    .iter()
                    .map(|resource| manager.instantiate(resource, true))
                    .collect::<SyncResult<Vec<_>>>()?;
                Ok(QueryOutcome {
                    entities,
                    total: results.total,
                    complete: response.status == 200,
                    status: response.status,
                })
            })
    }

    /// Returns the size of the remote collection.
    ///
    /// Falls back to the number of returned resources when the server
    /// reports no total.
    pub fn count(&self) -> Pending<usize> {
        let mut query = self.clone();
        query.params.total = true;
        query
            .execute()
            .map(|outcome| Ok(outcome.total.unwrap_or(outcome.entities.len())))
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.manager.ptr_eq(&other.manager)
            && self.params == other.params
            && self.channel == other.channel
    }
}
