//! Entity managers.
//!
//! An [`EntityManager`] is the registry for one resource type. It maps each
//! identity (durable or temporary) to at most one live [`Entity`] and
//! broadcasts lifecycle events for the entities it holds.
//!
//! ## Lock order
//!
//! An entity may take the registry lock while holding its own state lock
//! (to promote a temporary identity). The registry lock is never held while
//! touching entity state, and no lock is held while events are emitted.

use crate::channel::RequestChannel;
use crate::collection::Collection;
use crate::config::EngineConfig;
use crate::entity::{Entity, RefreshOptions};
use crate::error::{SyncError, SyncResult};
use crate::events::{Observable, SubscriptionId};
use crate::identity::{durable_key, Identity};
use crate::path::PropertyPath;
use crate::pending::Pending;
use crate::query::Query;
use crate::resource::ResourceSpec;
use crate::transport::Transport;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle broadcast from a manager.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// An entity was registered under a new identity.
    Added {
        /// The entity.
        entity: Entity,
        /// The identity it was registered under before, if any.
        previous: Option<Identity>,
    },
    /// Attributes of an entity changed.
    Changed {
        /// The entity.
        entity: Entity,
        /// Changed leaf paths.
        paths: Vec<PropertyPath>,
    },
    /// An entity was destroyed and removed from the registry.
    Destroyed {
        /// The entity.
        entity: Entity,
        /// The identity it was registered under.
        identity: Identity,
    },
}

/// Resource description, configuration and channels shared by a manager and
/// its entities.
pub(crate) struct ResourceContext {
    pub(crate) spec: ResourceSpec,
    pub(crate) config: EngineConfig,
    channels: HashMap<String, RequestChannel>,
}

impl ResourceContext {
    fn new(spec: ResourceSpec, transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let channels = spec
            .channels
            .values()
            .map(|channel| {
                (
                    channel.name.clone(),
                    RequestChannel::new(channel.clone(), Arc::clone(&transport), &config),
                )
            })
            .collect();
        Self {
            spec,
            config,
            channels,
        }
    }

    pub(crate) fn channel(&self, name: &str) -> SyncResult<&RequestChannel> {
        self.channels
            .get(name)
            .ok_or_else(|| SyncError::UnknownChannel(name.to_string()))
    }
}

pub(crate) struct ManagerInner {
    pub(crate) context: Arc<ResourceContext>,
    registry: Mutex<HashMap<Identity, Entity>>,
    events: Observable<ManagerEvent>,
}

/// Registry of live entities for one resource type.
///
/// Cloning a manager yields another handle to the same registry.
#[derive(Clone)]
pub struct EntityManager {
    pub(crate) inner: Arc<ManagerInner>,
}

impl EntityManager {
    /// Creates a manager for `spec`, sending calls through `transport`.
    pub fn new(spec: ResourceSpec, transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                context: Arc::new(ResourceContext::new(spec, transport, config)),
                registry: Mutex::new(HashMap::new()),
                events: Observable::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    /// Returns the resource description.
    pub fn spec(&self) -> &ResourceSpec {
        &self.inner.context.spec
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.context.config
    }

    /// Returns a channel by name.
    pub fn channel(&self, name: &str) -> SyncResult<&RequestChannel> {
        self.inner.context.channel(name)
    }

    /// Creates a new local entity from `attrs`.
    ///
    /// Without an id in `attrs` the entity is unsaved and registered under a
    /// temporary identity. Construction attributes are not dirty.
    pub fn create(&self, attrs: &Value) -> SyncResult<Entity> {
        let members = as_members(attrs)?;
        if members
            .get(&self.spec().id_field)
            .and_then(durable_key)
            .is_some()
        {
            return self.instantiate(attrs, false);
        }
        let entity = Entity::construct(&self.inner, None, strip_id(members, &self.spec().id_field), false);
        self.associate(&entity)?;
        Ok(entity)
    }

    /// Returns the entity with durable id `id`, registering an unloaded
    /// placeholder if none is live.
    pub fn get(&self, id: impl Into<Value>) -> SyncResult<Entity> {
        let id = id.into();
        let key = durable_key(&id).ok_or(SyncError::MissingIdentity)?;
        if let Some(existing) = self.lookup(&Identity::Durable(key)) {
            return Ok(existing);
        }
        Ok(self.register(Entity::construct(&self.inner, Some(id), Map::new(), false)))
    }

    /// Returns the live entity registered under `identity`.
    pub fn lookup(&self, identity: &Identity) -> Option<Entity> {
        self.inner.registry.lock().get(identity).cloned()
    }

    /// Returns the entity described by a remote resource value.
    ///
    /// If an entity with the same durable id is live, the data is merged
    /// into it without clobbering local edits; otherwise a new entity is
    /// registered.
    pub fn instantiate(&self, value: &Value, loaded: bool) -> SyncResult<Entity> {
        let members = as_members(value)?;
        let id_field = &self.spec().id_field;
        let id = members
            .get(id_field)
            .filter(|id| durable_key(id).is_some())
            .cloned();

        if let Some(existing) = id
            .as_ref()
            .and_then(Identity::from_value)
            .and_then(|identity| self.lookup(&identity))
        {
            existing.merge_remote(members, loaded);
            return Ok(existing);
        }

        let entity = Entity::construct(&self.inner, id, strip_id(members, id_field), loaded);
        let registered = self.register(entity.clone());
        if !registered.ptr_eq(&entity) {
            registered.merge_remote(members, loaded);
        }
        Ok(registered)
    }

    /// Registers `entity` under its current identity.
    ///
    /// Registering a second instance under an identity already held fails
    /// with `Conflict`.
    pub fn associate(&self, entity: &Entity) -> SyncResult<()> {
        let identity = entity.identity();
        {
            let mut registry = self.inner.registry.lock();
            match registry.get(&identity) {
                Some(existing) if existing.ptr_eq(entity) => return Ok(()),
                Some(_) => return Err(self.conflict(&identity)),
                None => {
                    registry.insert(identity.clone(), entity.clone());
                }
            }
        }
        debug!(resource = %self.spec().name, identity = %identity, "entity associated");
        self.emit(&ManagerEvent::Added {
            entity: entity.clone(),
            previous: None,
        });
        Ok(())
    }

    /// Removes `entity` from the registry. Returns false if it was not held.
    pub fn dissociate(&self, entity: &Entity) -> bool {
        let mut registry = self.inner.registry.lock();
        let before = registry.len();
        registry.retain(|_, held| !held.ptr_eq(entity));
        registry.len() != before
    }

    /// Loads the entity with durable id `id`, at most once unless it is
    /// refreshed explicitly.
    pub fn load(&self, id: impl Into<Value>, params: Option<Value>) -> Pending<Entity> {
        match self.get(id) {
            Ok(entity) => {
                let mut options = RefreshOptions::new().conditional();
                options.params = params;
                entity.refresh_with(options)
            }
            Err(err) => Pending::rejected(err),
        }
    }

    /// Starts a query against this resource.
    pub fn query(&self) -> Query {
        Query::new(self.clone())
    }

    /// Creates a collection over `query`, or over all resources.
    pub fn collection(&self, query: Option<Query>) -> Collection {
        Collection::new(self.clone(), query.unwrap_or_else(|| self.query()))
    }

    /// Drops every registered entity.
    pub fn clear(&self) {
        let dropped = std::mem::take(&mut *self.inner.registry.lock());
        debug!(resource = %self.spec().name, count = dropped.len(), "registry cleared");
    }

    /// Returns the number of registered entities.
    pub fn len(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Returns true if no entity is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(
        &self,
        listener: impl Fn(&ManagerEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.events.subscribe(listener)
    }

    /// Subscribes a channel to lifecycle events.
    pub fn subscribe_channel(&self) -> (SubscriptionId, Receiver<ManagerEvent>) {
        self.inner.events.subscribe_channel()
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Returns true if both handles refer to the same registry.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn emit(&self, event: &ManagerEvent) {
        self.inner.events.emit(event);
    }

    /// Moves `entity` from `previous` to `durable` in one registry update.
    pub(crate) fn promote(
        &self,
        entity: &Entity,
        previous: &Identity,
        durable: Identity,
    ) -> SyncResult<()> {
        let mut registry = self.inner.registry.lock();
        if let Some(existing) = registry.get(&durable) {
            if !existing.ptr_eq(entity) {
                warn!(resource = %self.spec().name, identity = %durable, "durable identity already held");
                return Err(self.conflict(&durable));
            }
        }
        registry.remove(previous);
        registry.insert(durable, entity.clone());
        Ok(())
    }

    fn register(&self, entity: Entity) -> Entity {
        let identity = entity.identity();
        {
            let mut registry = self.inner.registry.lock();
            if let Some(existing) = registry.get(&identity) {
                return existing.clone();
            }
            registry.insert(identity, entity.clone());
        }
        self.emit(&ManagerEvent::Added {
            entity: entity.clone(),
            previous: None,
        });
        entity
    }

    fn conflict(&self, identity: &Identity) -> SyncError {
        SyncError::Conflict {
            resource: self.spec().name.clone(),
            id: identity.to_string(),
        }
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("resource", &self.spec().name)
            .field("entities", &self.len())
            .finish()
    }
}

fn as_members(value: &Value) -> SyncResult<&Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| SyncError::protocol("expected a resource mapping"))
}

fn strip_id(members: &Map<String, Value>, id_field: &str) -> Map<String, Value> {
    let mut attrs = members.clone();
    attrs.remove(id_field);
    attrs
}
