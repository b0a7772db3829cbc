//! Windowed collection cache.
//!
//! A [`Collection`] caches a sparse, position-addressed view of a remote
//! collection. Loads are served from the cache when the requested window is
//! already resident; otherwise only the uncached remainder is fetched and
//! merged at its absolute positions.
//!
//! Each active query has a generation. Replacing or resetting the query
//! bumps it, and a response fetched under an older generation still
//! resolves its caller but leaves the cache untouched.

use crate::entity::{Entity, SaveOptions};
use crate::events::{Observable, SubscriptionId};
use crate::identity::Identity;
use crate::manager::{EntityManager, ManagerEvent};
use crate::path::PropertyPath;
use crate::pending::Pending;
use crate::query::{Query, QueryOutcome};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Event emitted by a collection.
#[derive(Debug, Clone)]
pub enum CollectionEvent {
    /// Membership or ordering changed.
    Updated,
    /// A member's attributes changed.
    Changed {
        /// The member.
        entity: Entity,
        /// Changed leaf paths.
        paths: Vec<PropertyPath>,
    },
}

/// Window requested from [`Collection::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LoadParams {
    /// First position; `None` means the whole collection.
    pub offset: Option<usize>,
    /// Window size; `None` runs to the end of the collection.
    pub limit: Option<usize>,
    /// Bypass the cache and refetch the window.
    pub reload: bool,
}

impl LoadParams {
    /// Requests the whole collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests `limit` resources starting at `offset`.
    pub fn window(offset: usize, limit: usize) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
            reload: false,
        }
    }

    /// Sets the first position.
    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Sets the window size.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Forces a refetch.
    #[must_use]
    pub fn reload(mut self) -> Self {
        self.reload = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LoadKey {
    generation: u64,
    params: LoadParams,
}

struct CollectionState {
    query: Query,
    items: BTreeMap<usize, Entity>,
    index: HashMap<Identity, Entity>,
    total: Option<usize>,
    generation: u64,
    last_load: Option<(LoadKey, Pending<Vec<Entity>>)>,
}

impl CollectionState {
    fn models(&self) -> Vec<Entity> {
        self.items.values().cloned().collect()
    }

    fn end(&self) -> usize {
        let resident = self.items.keys().next_back().map_or(0, |last| last + 1);
        self.total.map_or(resident, |total| total.max(resident))
    }

    fn slice(&self, start: usize, limit: Option<usize>) -> Vec<Entity> {
        let end = limit.map_or(usize::MAX, |limit| start.saturating_add(limit));
        self.items.range(start..end).map(|(_, e)| e.clone()).collect()
    }

    fn reindex(&mut self) {
        self.index = self
            .items
            .values()
            .map(|entity| (entity.identity(), entity.clone()))
            .collect();
    }

    fn holds(&self, entity: &Entity) -> bool {
        self.items.values().any(|held| held.ptr_eq(entity))
    }

    fn shift(&mut self, from: usize, up: bool, by: usize) {
        let items = std::mem::take(&mut self.items);
        self.items = items
            .into_iter()
            .map(|(position, entity)| match (position >= from, up) {
                (true, true) => (position + by, entity),
                (true, false) => (position - by, entity),
                (false, _) => (position, entity),
            })
            .collect();
    }
}

pub(crate) struct CollectionInner {
    manager: EntityManager,
    state: Mutex<CollectionState>,
    events: Observable<CollectionEvent>,
    subscription: SubscriptionId,
}

impl Drop for CollectionInner {
    fn drop(&mut self) {
        self.manager.unsubscribe(self.subscription);
    }
}

/// A sparse, windowed cache over a resource query.
///
/// Members are the manager's canonical entities; the collection never holds
/// private copies. Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl Collection {
    pub(crate) fn new(manager: EntityManager, query: Query) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<CollectionInner>| {
            let listener = weak.clone();
            let subscription = manager.subscribe(move |event| {
                if let Some(inner) = listener.upgrade() {
                    Collection { inner }.on_manager_event(event);
                }
            });
            CollectionInner {
                manager,
                state: Mutex::new(CollectionState {
                    query,
                    items: BTreeMap::new(),
                    index: HashMap::new(),
                    total: None,
                    generation: 0,
                    last_load: None,
                }),
                events: Observable::new(),
                subscription,
            }
        });
        Self { inner }
    }

    /// Returns the manager backing this collection.
    pub fn manager(&self) -> &EntityManager {
        &self.inner.manager
    }

    /// Returns the active query.
    pub fn query(&self) -> Query {
        self.inner.state.lock().query.clone()
    }

    /// Returns the total size of the remote collection, if known.
    pub fn total(&self) -> Option<usize> {
        self.inner.state.lock().total
    }

    /// Returns the number of resident entities.
    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    /// Returns true if no entity is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the entity at an absolute position.
    pub fn at(&self, position: usize) -> Option<Entity> {
        self.inner.state.lock().items.get(&position).cloned()
    }

    /// Returns the member registered under `identity`.
    pub fn get(&self, identity: &Identity) -> Option<Entity> {
        self.inner.state.lock().index.get(identity).cloned()
    }

    /// Returns every resident entity in position order.
    pub fn models(&self) -> Vec<Entity> {
        self.inner.state.lock().models()
    }

    /// Loads a window, fetching only the part not already cached.
    ///
    /// An identical load issued under the same query returns the earlier
    /// handle unless that one was rejected.
    pub fn load(&self, params: LoadParams) -> Pending<Vec<Entity>> {
        let (key, query, fetch_offset, start, limit) = {
            let state = self.inner.state.lock();
            let key = LoadKey {
                generation: state.generation,
                params,
            };
            if !params.reload {
                if let Some((last, handle)) = &state.last_load {
                    if *last == key && !handle.is_rejected() {
                        trace!("coalescing identical collection load");
                        return handle.clone();
                    }
                }
                if params.offset.is_none() && state.total.is_some() {
                    return Pending::resolved(state.models());
                }
            }

            let start = params.offset.unwrap_or(0);
            let limit = params
                .limit
                .or_else(|| state.total.map(|total| total.saturating_sub(start)));
            let mut offset = start;
            let mut remaining = limit;
            if !params.reload {
                while remaining != Some(0) && state.items.contains_key(&offset) {
                    remaining = remaining.map(|n| n - 1);
                    offset += 1;
                }
                if remaining == Some(0) {
                    trace!(offset = start, ?limit, "window served from cache");
                    return Pending::resolved(state.slice(start, limit));
                }
            }

            let query = state
                .query
                .clone()
                .window(Some(offset), remaining)
                .want_total();
            (key, query, offset, start, limit)
        };

        debug!(offset = fetch_offset, ?limit, generation = key.generation, "fetching collection window");
        let weak = Arc::downgrade(&self.inner);
        let handle = query.execute().map(move |outcome| {
            Ok(match weak.upgrade() {
                Some(inner) => Collection { inner }.merge_window(key.generation, fetch_offset, start, limit, outcome),
                None => outcome.entities,
            })
        });
        let mut state = self.inner.state.lock();
        if state.generation == key.generation {
            state.last_load = Some((key, handle.clone()));
        }
        handle
    }

    fn merge_window(
        &self,
        generation: u64,
        fetch_offset: usize,
        start: usize,
        limit: Option<usize>,
        outcome: QueryOutcome,
    ) -> Vec<Entity> {
        let window = {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                debug!(generation, current = state.generation, "ignoring stale collection response");
                return outcome.entities;
            }
            for (i, entity) in outcome.entities.iter().enumerate() {
                let position = fetch_offset + i;
                state
                    .items
                    .retain(|held_at, held| *held_at == position || !held.ptr_eq(entity));
                state.items.insert(position, entity.clone());
            }
            if let Some(total) = outcome.total {
                state.total = Some(total);
            }
            state.reindex();
            state.slice(start, limit)
        };
        self.inner.events.emit(&CollectionEvent::Updated);
        window
    }

    /// Clears the cache, optionally switching to a new query.
    ///
    /// Loads still in flight resolve their callers but no longer touch the
    /// cache.
    pub fn reset(&self, query: Option<Query>) {
        {
            let mut state = self.inner.state.lock();
            if let Some(query) = query {
                state.query = query;
            }
            state.generation += 1;
            state.items.clear();
            state.index.clear();
            state.total = None;
            state.last_load = None;
            debug!(generation = state.generation, "collection reset");
        }
        self.inner.events.emit(&CollectionEvent::Updated);
    }

    /// Inserts entities at `position`, or appends them.
    ///
    /// Entities already present are skipped. Later positions shift up and
    /// a known total grows accordingly.
    pub fn add(&self, entities: &[Entity], position: Option<usize>) {
        {
            let mut state = self.inner.state.lock();
            let fresh: Vec<Entity> = entities
                .iter()
                .filter(|entity| !state.holds(entity))
                .cloned()
                .collect();
            if fresh.is_empty() {
                return;
            }
            let at = position.unwrap_or_else(|| state.end());
            state.shift(at, true, fresh.len());
            for (i, entity) in fresh.iter().enumerate() {
                state.items.insert(at + i, entity.clone());
            }
            if let Some(total) = state.total.as_mut() {
                *total += fresh.len();
            }
            state.reindex();
        }
        self.inner.events.emit(&CollectionEvent::Updated);
    }

    /// Removes entities, shifting later positions down.
    pub fn remove(&self, entities: &[Entity]) {
        let mut removed = false;
        {
            let mut state = self.inner.state.lock();
            for entity in entities {
                let Some(position) = state
                    .items
                    .iter()
                    .find(|(_, held)| held.ptr_eq(entity))
                    .map(|(position, _)| *position)
                else {
                    continue;
                };
                state.items.remove(&position);
                state.shift(position + 1, false, 1);
                if let Some(total) = state.total.as_mut() {
                    *total = total.saturating_sub(1);
                }
                removed = true;
            }
            if removed {
                state.reindex();
            }
        }
        if removed {
            self.inner.events.emit(&CollectionEvent::Updated);
        }
    }

    /// Creates an entity, saves it, and adds it once the save succeeds.
    pub fn create(
        &self,
        attrs: &Value,
        options: SaveOptions,
        position: Option<usize>,
    ) -> Pending<Entity> {
        let entity = match self.inner.manager.create(attrs) {
            Ok(entity) => entity,
            Err(err) => return Pending::rejected(err),
        };
        let weak = Arc::downgrade(&self.inner);
        entity.save_with(options).map(move |entity| {
            if let Some(inner) = weak.upgrade() {
                Collection { inner }.add(std::slice::from_ref(&entity), position);
            }
            Ok(entity)
        })
    }

    /// Subscribes to collection events.
    pub fn subscribe(
        &self,
        listener: impl Fn(&CollectionEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.events.subscribe(listener)
    }

    /// Subscribes a channel to collection events.
    pub fn subscribe_channel(&self) -> (SubscriptionId, Receiver<CollectionEvent>) {
        self.inner.events.subscribe_channel()
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    fn on_manager_event(&self, event: &ManagerEvent) {
        match event {
            ManagerEvent::Changed { entity, paths } => {
                if self.inner.state.lock().holds(entity) {
                    self.inner.events.emit(&CollectionEvent::Changed {
                        entity: entity.clone(),
                        paths: paths.clone(),
                    });
                }
            }
            ManagerEvent::Destroyed { entity, .. } => {
                self.remove(std::slice::from_ref(entity));
            }
            ManagerEvent::Added {
                entity,
                previous: Some(previous),
            } => {
                let mut state = self.inner.state.lock();
                if state.index.get(previous).is_some_and(|held| held.ptr_eq(entity)) {
                    state.index.remove(previous);
                    state.index.insert(entity.identity(), entity.clone());
                }
            }
            ManagerEvent::Added { previous: None, .. } => {}
        }
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Collection")
            .field("resource", &self.inner.manager.spec().name)
            .field("resident", &state.items.len())
            .field("total", &state.total)
            .field("generation", &state.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::resource::ResourceSpec;
    use crate::transport::{Responder, Transport};
    use meshsync_codec::{Field, Structure};
    use meshsync_protocol::{TransportRequest, TransportResponse};
    use serde_json::json;

    /// Serves `{total: 6, resources}` windows of ids 0..6.
    struct Six {
        urls: Mutex<Vec<String>>,
    }

    impl Transport for Six {
        fn dispatch(&self, request: TransportRequest, responder: Responder) {
            let params = request
                .query_string()
                .map(meshsync_codec::decode_form)
                .unwrap_or(Value::Null);
            let offset = params["offset"].as_u64().unwrap_or(0) as usize;
            let limit = params["limit"].as_u64().map_or(6, |l| l as usize);
            let resources: Vec<Value> = (offset..(offset + limit).min(6))
                .map(|id| json!({"id": id, "name": format!("n{id}")}))
                .collect();
            self.urls.lock().push(request.url.clone());
            responder.succeed(TransportResponse::json(
                200,
                json!({"total": 6, "resources": resources}).to_string(),
            ));
        }
    }

    fn setup() -> (Arc<Six>, EntityManager) {
        let transport = Arc::new(Six {
            urls: Mutex::new(Vec::new()),
        });
        let manager = EntityManager::new(
            ResourceSpec::standard("item", Structure::new().field("name", Field::text())),
            transport.clone(),
            EngineConfig::new(),
        );
        (transport, manager)
    }

    fn ids(entities: &[Entity]) -> Vec<Value> {
        entities.iter().map(|e| e.id().unwrap()).collect()
    }

    #[test]
    fn fetches_only_the_uncached_remainder() {
        let (transport, manager) = setup();
        let collection = manager.collection(None);
        let first = collection.load(LoadParams::window(0, 2)).outcome().unwrap().unwrap();
        assert_eq!(ids(&first), vec![json!(0), json!(1)]);
        assert_eq!(collection.total(), Some(6));

        let second = collection.load(LoadParams::window(0, 4)).outcome().unwrap().unwrap();
        assert_eq!(ids(&second), vec![json!(0), json!(1), json!(2), json!(3)]);
        assert_eq!(
            *transport.urls.lock(),
            vec![
                "/item?limit=2&total=true".to_string(),
                "/item?limit=2&offset=2&total=true".to_string(),
            ]
        );

        let all = collection.load(LoadParams::new().with_offset(0)).outcome().unwrap().unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(transport.urls.lock().len(), 3);
        let cached = collection.load(LoadParams::new()).outcome().unwrap().unwrap();
        assert_eq!(cached.len(), 6);
        assert_eq!(transport.urls.lock().len(), 3);
    }

    #[test]
    fn add_and_remove_shift_positions() {
        let (_, manager) = setup();
        let collection = manager.collection(None);
        collection.load(LoadParams::window(0, 3)).outcome().unwrap().unwrap();
        let extra = manager.instantiate(&json!({"id": "x"}), true).unwrap();
        collection.add(std::slice::from_ref(&extra), Some(1));
        assert!(collection.at(1).unwrap().ptr_eq(&extra));
        assert_eq!(collection.at(2).unwrap().id(), Some(json!(1)));
        assert_eq!(collection.total(), Some(7));

        let first = collection.at(0).unwrap();
        collection.remove(&[first]);
        assert!(collection.at(0).unwrap().ptr_eq(&extra));
        assert_eq!(collection.total(), Some(6));
        assert!(collection.get(&Identity::Durable("0".into())).is_none());
    }

    #[test]
    fn destroyed_members_are_removed() {
        let (_, manager) = setup();
        let collection = manager.collection(None);
        collection.load(LoadParams::window(0, 2)).outcome().unwrap().unwrap();
        let (_, rx) = collection.subscribe_channel();
        let member = collection.at(0).unwrap();
        member.destroy().outcome().unwrap().unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.at(0).unwrap().id(), Some(json!(1)));
        assert!(matches!(rx.try_recv().unwrap(), CollectionEvent::Updated));
    }

    #[test]
    fn member_changes_are_forwarded() {
        let (_, manager) = setup();
        let collection = manager.collection(None);
        collection.load(LoadParams::window(0, 1)).outcome().unwrap().unwrap();
        let (_, rx) = collection.subscribe_channel();
        collection.at(0).unwrap().set(&json!({"name": "renamed"})).unwrap();
        manager.instantiate(&json!({"id": 5, "name": "outside"}), true).unwrap();
        match rx.try_recv().unwrap() {
            CollectionEvent::Changed { paths, .. } => {
                assert_eq!(paths, vec![PropertyPath::new("name")]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reset_clears_the_cache() {
        let (transport, manager) = setup();
        let collection = manager.collection(None);
        collection.load(LoadParams::window(0, 2)).outcome().unwrap().unwrap();
        collection.reset(Some(manager.query().filter(json!({"name": "n1"}))));
        assert!(collection.is_empty());
        assert_eq!(collection.total(), None);
        collection.load(LoadParams::window(0, 2)).outcome().unwrap().unwrap();
        assert_eq!(transport.urls.lock().len(), 2);
        assert!(transport.urls.lock()[1].contains("query="));
    }

    #[test]
    fn dropping_the_collection_unsubscribes() {
        let (_, manager) = setup();
        let collection = manager.collection(None);
        drop(collection);
        manager.instantiate(&json!({"id": 1}), true).unwrap();
    }
}
