//! Synchronized entities.
//!
//! An [`Entity`] is one locally held resource instance. It tracks which
//! attribute paths were edited locally (dirty paths) and keeps an ordered
//! queue of in-flight operations per kind, so remote responses are applied
//! in request order regardless of the order in which they complete:
//!
//! - **refresh**: when a response arrives, every older refresh still
//!   pending resolves with the same data. A late response for a refresh
//!   that was already resolved this way is ignored.
//! - **save**: dirty paths are snapshotted when the save is issued. A failed
//!   save re-marks its paths only if no other pending save covers them and
//!   no later save has already persisted them.
//! - **destroy**: repeated calls share one handle until it is rejected.
//!
//! Remote data is merged with `noclobber`: paths that are dirty, being
//! saved, or persisted by a save issued after the request keep their local
//! values.

use crate::error::{SyncError, SyncResult};
use crate::events::{Observable, SubscriptionId};
use crate::identity::{durable_key, Identity, TempId};
use crate::manager::{EntityManager, ManagerEvent, ManagerInner, ResourceContext};
use crate::path::{self, PropertyPath};
use crate::pending::Pending;
use crate::channel::ChannelResponse;
use meshsync_codec::ValidationError;
use meshsync_protocol::Status;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Event emitted by a single entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityEvent {
    /// Attributes changed.
    Changed {
        /// Changed leaf paths.
        paths: Vec<PropertyPath>,
    },
    /// A save completed.
    Saved {
        /// Status of the save response, if it is a known status.
        status: Option<Status>,
    },
    /// The entity was destroyed.
    Destroyed,
}

/// Derived lifecycle state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// No durable id and no save in flight.
    Unsaved,
    /// A create is in flight.
    Creating,
    /// Has a durable id but no server data yet.
    Unloaded,
    /// Has a durable id and server data, nothing in flight.
    Persisted,
    /// A save is in flight.
    Updating,
    /// A refresh is in flight.
    Refreshing,
    /// Destroyed and removed from its manager.
    Destroyed,
}

/// Options for [`Entity::refresh_with`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshOptions {
    /// Extra parameters sent with the request.
    pub params: Option<Value>,
    /// Skip the call if the entity is loaded or a refresh is in flight.
    pub conditional: bool,
}

impl RefreshOptions {
    /// Creates forced refresh options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the refresh conditional.
    #[must_use]
    pub fn conditional(mut self) -> Self {
        self.conditional = true;
        self
    }

    /// Sets request parameters.
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// Options for [`Entity::save_with`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOptions {
    /// Extra top-level members merged into the payload.
    pub params: Option<Value>,
    /// Send the full body instead of only the dirty paths.
    pub all: bool,
}

impl SaveOptions {
    /// Creates default save options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends the full body.
    #[must_use]
    pub fn all(mut self) -> Self {
        self.all = true;
        self
    }

    /// Sets extra payload members.
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// Options for [`Entity::set_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Leave paths that are dirty or being saved untouched.
    pub noclobber: bool,
    /// Do not emit change events.
    pub silent: bool,
}

struct RefreshOp {
    seq: u64,
    handle: Pending<Entity>,
    settled: bool,
}

struct SaveOp {
    seq: u64,
    handle: Pending<Entity>,
    paths: BTreeSet<PropertyPath>,
    creating: bool,
}

struct EntityState {
    id: Option<Value>,
    attrs: Map<String, Value>,
    loaded: bool,
    dirty: BTreeSet<PropertyPath>,
    refreshes: Vec<RefreshOp>,
    saves: Vec<SaveOp>,
    destroy: Option<Pending<Identity>>,
    destroyed: bool,
    status: Option<Status>,
    /// Paths persisted by completed saves, with the sequence number of the
    /// latest save that persisted each. Kept while an older refresh or save
    /// is still pending.
    persisted: BTreeMap<PropertyPath, u64>,
    next_seq: u64,
}

impl EntityState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn id_key(&self) -> Option<String> {
        self.id.as_ref().and_then(durable_key)
    }

    fn identity(&self, temp_id: TempId) -> Identity {
        match self.id_key() {
            Some(key) => Identity::Durable(key),
            None => Identity::Temporary(temp_id),
        }
    }

    fn mark_dirty(&mut self, path: PropertyPath) {
        if self.dirty.iter().any(|held| shields(held, &path)) {
            return;
        }
        self.dirty.retain(|held| !path.is_ancestor_of(held));
        self.dirty.insert(path);
    }

    /// Paths remote data must not overwrite.
    fn protected(&self, after: Option<u64>) -> Vec<PropertyPath> {
        let mut protected: Vec<PropertyPath> = self.dirty.iter().cloned().collect();
        for op in &self.saves {
            protected.extend(op.paths.iter().cloned());
        }
        if let Some(seq) = after {
            protected.extend(
                self.persisted
                    .iter()
                    .filter(|(_, persisted)| **persisted > seq)
                    .map(|(path, _)| path.clone()),
            );
        }
        protected
    }

    /// Returns true if a pending save, or a save issued after `seq` that has
    /// already completed, covers `path`.
    fn covered(&self, path: &PropertyPath, seq: u64) -> bool {
        self.saves
            .iter()
            .any(|op| op.paths.iter().any(|held| shields(held, path)))
            || self
                .persisted
                .iter()
                .any(|(held, persisted)| *persisted > seq && shields(held, path))
    }

    fn record_persisted(&mut self, path: PropertyPath, seq: u64) {
        self.persisted
            .entry(path)
            .and_modify(|persisted| *persisted = (*persisted).max(seq))
            .or_insert(seq);
    }

    fn apply_remote(
        &mut self,
        data: &Map<String, Value>,
        id_field: &str,
        after: Option<u64>,
    ) -> Vec<PropertyPath> {
        let mut data = data.clone();
        data.remove(id_field);
        let protected = self.protected(after);
        let mut changed = Vec::new();
        path::merge(
            &mut self.attrs,
            &data,
            None,
            &|path| protected.iter().any(|held| shields(held, path)),
            &mut changed,
        );
        changed
    }

    fn prune_refreshes(&mut self) {
        let settled = self.refreshes.iter().take_while(|op| op.settled).count();
        self.refreshes.drain(..settled);
    }

    /// Drops persisted paths no pending request predates.
    fn prune_persisted(&mut self) {
        let oldest = self
            .refreshes
            .iter()
            .filter(|op| !op.settled)
            .map(|op| op.seq)
            .chain(self.saves.iter().map(|op| op.seq))
            .min();
        match oldest {
            Some(oldest) => self.persisted.retain(|_, persisted| *persisted > oldest),
            None => self.persisted.clear(),
        }
    }
}

pub(crate) struct EntityInner {
    manager: Weak<ManagerInner>,
    context: Arc<ResourceContext>,
    temp_id: TempId,
    state: Mutex<EntityState>,
    events: Observable<EntityEvent>,
}

/// A synchronized resource instance.
///
/// Cloning an entity yields another handle to the same instance.
#[derive(Clone)]
pub struct Entity {
    pub(crate) inner: Arc<EntityInner>,
}

enum SavePlan {
    Defer(Pending<Entity>),
    Done(Pending<Entity>),
    Issue {
        seq: u64,
        handle: Pending<Entity>,
        channel: &'static str,
        id: Option<String>,
        payload: Value,
    },
}

impl Entity {
    pub(crate) fn construct(
        manager: &Arc<ManagerInner>,
        id: Option<Value>,
        attrs: Map<String, Value>,
        loaded: bool,
    ) -> Self {
        Self {
            inner: Arc::new(EntityInner {
                manager: Arc::downgrade(manager),
                context: Arc::clone(&manager.context),
                temp_id: TempId::generate(),
                state: Mutex::new(EntityState {
                    id,
                    attrs,
                    loaded,
                    dirty: BTreeSet::new(),
                    refreshes: Vec::new(),
                    saves: Vec::new(),
                    destroy: None,
                    destroyed: false,
                    status: None,
                    persisted: BTreeMap::new(),
                    next_seq: 0,
                }),
                events: Observable::new(),
            }),
        }
    }

    /// Returns the manager this entity belongs to, if it is still alive.
    pub fn manager(&self) -> Option<EntityManager> {
        self.inner.manager.upgrade().map(EntityManager::from_inner)
    }

    fn id_field(&self) -> &str {
        &self.inner.context.spec.id_field
    }

    /// Returns the durable id, if assigned.
    pub fn id(&self) -> Option<Value> {
        self.inner.state.lock().id.clone()
    }

    /// Returns the temporary id while no durable id is assigned.
    pub fn temp_id(&self) -> Option<TempId> {
        let state = self.inner.state.lock();
        state.id_key().is_none().then_some(self.inner.temp_id)
    }

    /// Returns the registry identity.
    pub fn identity(&self) -> Identity {
        self.inner.state.lock().identity(self.inner.temp_id)
    }

    /// Returns true once server data has been merged in.
    pub fn is_loaded(&self) -> bool {
        self.inner.state.lock().loaded
    }

    /// Returns true once the entity has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Returns the derived lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        let state = self.inner.state.lock();
        if state.destroyed {
            Lifecycle::Destroyed
        } else if state.saves.iter().any(|op| op.creating) {
            Lifecycle::Creating
        } else if state.id_key().is_none() {
            Lifecycle::Unsaved
        } else if !state.saves.is_empty() {
            Lifecycle::Updating
        } else if state.refreshes.iter().any(|op| !op.settled) {
            Lifecycle::Refreshing
        } else if state.loaded {
            Lifecycle::Persisted
        } else {
            Lifecycle::Unloaded
        }
    }

    /// Returns the status of the last successful save.
    pub fn status(&self) -> Option<Status> {
        self.inner.state.lock().status
    }

    /// Returns the paths edited locally since the last successful save.
    pub fn dirty_paths(&self) -> Vec<PropertyPath> {
        self.inner.state.lock().dirty.iter().cloned().collect()
    }

    /// Returns the value at a dotted path.
    pub fn get(&self, path: &str) -> Option<Value> {
        let state = self.inner.state.lock();
        path::lookup(&state.attrs, &PropertyPath::new(path)).cloned()
    }

    /// Returns true if the top-level attribute is present.
    pub fn has(&self, attr: &str) -> bool {
        self.inner.state.lock().attrs.contains_key(attr)
    }

    /// Returns a copy of the attributes, without the id.
    pub fn attributes(&self) -> Map<String, Value> {
        self.inner.state.lock().attrs.clone()
    }

    /// Returns the attributes together with the id.
    pub fn snapshot(&self) -> Value {
        let state = self.inner.state.lock();
        let mut snapshot = state.attrs.clone();
        if let Some(id) = &state.id {
            snapshot.insert(self.id_field().to_string(), id.clone());
        }
        Value::Object(snapshot)
    }

    /// Validates the attributes against the resource schema.
    pub fn validate(&self) -> SyncResult<Value> {
        let attrs = Value::Object(self.attributes());
        Ok(self.inner.context.spec.body().validate(&attrs, None)?)
    }

    /// Returns true if both handles refer to the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Subscribes to this entity's events.
    pub fn subscribe(
        &self,
        listener: impl Fn(&EntityEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.events.subscribe(listener)
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Sets attributes, marking every changed leaf path dirty.
    pub fn set(&self, props: &Value) -> SyncResult<Vec<PropertyPath>> {
        self.set_with(props, SetOptions::default())
    }

    /// Sets a single attribute at a dotted path.
    pub fn set_path(&self, path: &str, value: Value) -> SyncResult<Vec<PropertyPath>> {
        let mut props = Map::new();
        path::assign(&mut props, &PropertyPath::new(path), value);
        self.set(&Value::Object(props))
    }

    /// Sets attributes with explicit options.
    ///
    /// The id member, if present, is ignored; identities are assigned by
    /// the remote store.
    pub fn set_with(&self, props: &Value, options: SetOptions) -> SyncResult<Vec<PropertyPath>> {
        let props = props
            .as_object()
            .ok_or_else(|| SyncError::Validation(ValidationError::token("invalid")))?;
        let changed = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return Err(SyncError::Destroyed);
            }
            let mut props = props.clone();
            props.remove(self.id_field());
            let protected = if options.noclobber {
                state.protected(None)
            } else {
                Vec::new()
            };
            let mut changed = Vec::new();
            path::merge(
                &mut state.attrs,
                &props,
                None,
                &|path| protected.iter().any(|held| shields(held, path)),
                &mut changed,
            );
            for path in &changed {
                state.mark_dirty(path.clone());
            }
            changed
        };
        if !options.silent {
            self.notify_changed(changed.clone());
        }
        Ok(changed)
    }

    /// Merges server data without clobbering local edits.
    pub(crate) fn merge_remote(&self, data: &Map<String, Value>, loaded: bool) {
        let changed = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            let changed = state.apply_remote(data, self.id_field(), None);
            state.loaded |= loaded;
            changed
        };
        self.notify_changed(changed);
    }

    fn notify_changed(&self, paths: Vec<PropertyPath>) {
        if paths.is_empty() {
            return;
        }
        trace!(identity = %self.identity(), changed = paths.len(), "entity changed");
        self.inner.events.emit(&EntityEvent::Changed {
            paths: paths.clone(),
        });
        if let Some(manager) = self.manager() {
            manager.emit(&ManagerEvent::Changed {
                entity: self.clone(),
                paths,
            });
        }
    }

    /// Refreshes from the remote store.
    pub fn refresh(&self) -> Pending<Entity> {
        self.refresh_with(RefreshOptions::new())
    }

    /// Refreshes from the remote store with explicit options.
    ///
    /// A conditional refresh returns the newest in-flight refresh, or an
    /// already resolved handle if the entity is loaded.
    pub fn refresh_with(&self, options: RefreshOptions) -> Pending<Entity> {
        let (seq, id, handle) = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return Pending::rejected(SyncError::Destroyed);
            }
            let Some(id) = state.id_key() else {
                return Pending::rejected(SyncError::MissingIdentity);
            };
            if options.conditional {
                if let Some(op) = state.refreshes.iter().rev().find(|op| !op.settled) {
                    return op.handle.clone();
                }
                if state.loaded {
                    return Pending::resolved(self.clone());
                }
            }
            let seq = state.next_seq();
            let handle = Pending::new();
            state.refreshes.push(RefreshOp {
                seq,
                handle: handle.clone(),
                settled: false,
            });
            (seq, id, handle)
        };

        trace!(identity = %id, seq, "refresh issued");
        let outcome = match self.inner.context.channel("get") {
            Ok(channel) => channel.initiate(Some(id.as_str()), options.params.as_ref(), None),
            Err(err) => Pending::rejected(err),
        };
        let this = self.clone();
        outcome.on_settle(move |outcome| this.finish_refresh(seq, outcome));
        handle
    }

    fn finish_refresh(&self, seq: u64, outcome: SyncResult<ChannelResponse>) {
        let outcome = outcome.and_then(|response| response_members(response.value));
        let (settle, changed) = {
            let mut state = self.inner.state.lock();
            let Some(position) = state.refreshes.iter().position(|op| op.seq == seq) else {
                return;
            };
            if state.refreshes[position].settled {
                trace!(seq, "refresh already answered by a newer response");
                state.prune_refreshes();
                state.prune_persisted();
                return;
            }
            let result = match outcome {
                Ok(data) => {
                    let changed = if state.destroyed {
                        Vec::new()
                    } else {
                        let changed = state.apply_remote(&data, self.id_field(), Some(seq));
                        state.loaded = true;
                        changed
                    };
                    let handles: Vec<(Pending<Entity>, SyncResult<()>)> = state
                        .refreshes
                        .iter_mut()
                        .filter(|op| !op.settled && op.seq <= seq)
                        .map(|op| {
                            op.settled = true;
                            (op.handle.clone(), Ok(()))
                        })
                        .collect();
                    (handles, changed)
                }
                Err(err) => {
                    let op = &mut state.refreshes[position];
                    op.settled = true;
                    (vec![(op.handle.clone(), Err(err))], Vec::new())
                }
            };
            state.prune_refreshes();
            state.prune_persisted();
            result
        };

        self.notify_changed(changed);
        for (handle, result) in settle {
            handle.settle(result.map(|()| self.clone()));
        }
    }

    /// Saves local changes.
    pub fn save(&self) -> Pending<Entity> {
        self.save_with(SaveOptions::new())
    }

    /// Saves local changes with explicit options.
    ///
    /// New entities are created with their full body. Existing entities
    /// send only dirty paths unless `all` is set; composite-identity
    /// entities always send a full replace. Nothing to send resolves
    /// immediately without a call.
    pub fn save_with(&self, options: SaveOptions) -> Pending<Entity> {
        let plan = self.plan_save(&options);
        match plan {
            SavePlan::Done(handle) => handle,
            SavePlan::Defer(create) => {
                debug!(identity = %self.identity(), "deferring save until the create settles");
                let this = self.clone();
                create.and_then(move |_| this.save_with(options))
            }
            SavePlan::Issue {
                seq,
                handle,
                channel,
                id,
                payload,
            } => {
                trace!(channel, seq, "save issued");
                let outcome = match self.inner.context.channel(channel) {
                    Ok(channel) => channel.initiate(id.as_deref(), Some(&payload), None),
                    Err(err) => Pending::rejected(err),
                };
                let this = self.clone();
                outcome.on_settle(move |outcome| this.finish_save(seq, outcome));
                handle
            }
        }
    }

    fn plan_save(&self, options: &SaveOptions) -> SavePlan {
        let spec = &self.inner.context.spec;
        let mut state = self.inner.state.lock();
        if state.destroyed {
            return SavePlan::Done(Pending::rejected(SyncError::Destroyed));
        }

        let id = state.id_key();
        if id.is_none() {
            if let Some(create) = state.saves.iter().find(|op| op.creating) {
                return SavePlan::Defer(create.handle.clone());
            }
        }

        let creating = id.is_none() && !spec.composite;
        let channel = if spec.composite {
            if id.is_none() {
                return SavePlan::Done(Pending::rejected(SyncError::MissingIdentity));
            }
            "put"
        } else if creating {
            "create"
        } else if options.all && spec.has_channel("put") {
            "put"
        } else {
            "update"
        };

        let mut payload = if creating || options.all || spec.composite {
            match spec.body().extract(&Value::Object(state.attrs.clone())) {
                Value::Object(members) => members,
                _ => Map::new(),
            }
        } else {
            path::project(&state.attrs, &state.dirty)
        };
        if let Some(Value::Object(params)) = &options.params {
            payload.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        if payload.is_empty() && !creating {
            let handle = state
                .saves
                .last()
                .map(|op| op.handle.clone())
                .unwrap_or_else(|| Pending::resolved(self.clone()));
            return SavePlan::Done(handle);
        }

        let seq = state.next_seq();
        let handle = Pending::new();
        let paths = std::mem::take(&mut state.dirty);
        state.saves.push(SaveOp {
            seq,
            handle: handle.clone(),
            paths,
            creating,
        });
        SavePlan::Issue {
            seq,
            handle,
            channel,
            id: if creating { None } else { id },
            payload: Value::Object(payload),
        }
    }

    fn finish_save(&self, seq: u64, outcome: SyncResult<ChannelResponse>) {
        let mut promoted = None;
        let (handle, result, changed) = {
            let mut state = self.inner.state.lock();
            let Some(position) = state.saves.iter().position(|op| op.seq == seq) else {
                return;
            };
            let op = state.saves.remove(position);

            let accepted = match outcome
                .and_then(|response| Ok((response.status, response_members(response.value)?)))
            {
                Ok((status, data)) if op.creating && !state.destroyed => {
                    match self.assign_identity(&mut state, &data) {
                        Ok(previous) => {
                            promoted = Some(previous);
                            Ok((status, data))
                        }
                        Err(err) => Err(err),
                    }
                }
                other => other,
            };

            let changed = match &accepted {
                Ok(_) if state.destroyed => Vec::new(),
                Ok((status, data)) => {
                    state.loaded = true;
                    state.status = Status::from_code(*status).ok();
                    let changed = state.apply_remote(data, self.id_field(), Some(seq));
                    for path in &op.paths {
                        state.record_persisted(path.clone(), seq);
                    }
                    changed
                }
                Err(err) => {
                    debug!(seq, error = %err, "save failed");
                    for path in &op.paths {
                        if !state.covered(path, seq) {
                            state.mark_dirty(path.clone());
                        }
                    }
                    Vec::new()
                }
            };
            state.prune_persisted();
            (op.handle, accepted.map(|(status, _)| status), changed)
        };

        self.notify_changed(changed);
        if let Some(previous) = promoted {
            if let Some(manager) = self.manager() {
                manager.emit(&ManagerEvent::Added {
                    entity: self.clone(),
                    previous: Some(previous),
                });
            }
        }
        match result {
            Ok(status) => {
                self.inner.events.emit(&EntityEvent::Saved {
                    status: Status::from_code(status).ok(),
                });
                handle.resolve(self.clone());
            }
            Err(err) => {
                handle.reject(err);
            }
        }
    }

    /// Takes the durable id from a create response and registers it in
    /// place of the temporary identity.
    fn assign_identity(
        &self,
        state: &mut EntityState,
        data: &Map<String, Value>,
    ) -> SyncResult<Identity> {
        let (id, key) = data
            .get(self.id_field())
            .and_then(|id| durable_key(id).map(|key| (id.clone(), key)))
            .ok_or_else(|| SyncError::protocol("create response carried no identity"))?;
        let previous = Identity::Temporary(self.inner.temp_id);
        if let Some(manager) = self.manager() {
            manager.promote(self, &previous, Identity::Durable(key))?;
        }
        state.id = Some(id);
        Ok(previous)
    }

    /// Destroys the entity.
    ///
    /// Without a durable id this only removes the entity locally. Repeated
    /// calls return the same handle unless the previous attempt failed. The
    /// handle resolves with the identity the entity was registered under.
    pub fn destroy(&self) -> Pending<Identity> {
        let (id, handle) = {
            let mut state = self.inner.state.lock();
            if let Some(handle) = state.destroy.as_ref().filter(|h| !h.is_rejected()) {
                return handle.clone();
            }
            let handle = Pending::new();
            state.destroy = Some(handle.clone());
            match state.id_key() {
                Some(id) => (id, handle),
                None => {
                    state.destroyed = true;
                    drop(state);
                    let identity = Identity::Temporary(self.inner.temp_id);
                    self.finish_destroyed(identity.clone());
                    handle.resolve(identity);
                    return handle;
                }
            }
        };

        trace!(identity = %id, "destroy issued");
        let outcome = match self.inner.context.channel("delete") {
            Ok(channel) => channel.initiate(Some(id.as_str()), None, None),
            Err(err) => Pending::rejected(err),
        };
        let this = self.clone();
        let settled = handle.clone();
        outcome.on_settle(move |outcome| match outcome {
            Ok(_) => {
                let identity = {
                    let mut state = this.inner.state.lock();
                    let identity = state.identity(this.inner.temp_id);
                    state.id = None;
                    state.destroyed = true;
                    identity
                };
                this.finish_destroyed(identity.clone());
                settled.resolve(identity);
            }
            Err(err) => {
                settled.reject(err);
            }
        });
        handle
    }

    fn finish_destroyed(&self, identity: Identity) {
        debug!(identity = %identity, "entity destroyed");
        let manager = self.manager();
        if let Some(manager) = &manager {
            manager.dissociate(self);
        }
        self.inner.events.emit(&EntityEvent::Destroyed);
        if let Some(manager) = manager {
            manager.emit(&ManagerEvent::Destroyed {
                entity: self.clone(),
                identity,
            });
        }
    }

    pub(crate) fn config(&self) -> &crate::config::EngineConfig {
        &self.inner.context.config
    }
}

/// Returns true if `held` equals `path` or lies above it.
fn shields(held: &PropertyPath, path: &PropertyPath) -> bool {
    held == path || held.is_ancestor_of(path)
}

fn response_members(value: Value) -> SyncResult<Map<String, Value>> {
    match value {
        Value::Object(members) => Ok(members),
        Value::Null => Ok(Map::new()),
        _ => Err(SyncError::protocol("expected a resource mapping")),
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("resource", &self.inner.context.spec.name)
            .field("identity", &self.identity())
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}
