//! Observable event streams.
//!
//! [`Observable`] is composed into entities, managers and collections.
//! Listeners are called synchronously from `emit`, after the listener list
//! lock has been released, so a listener may subscribe, unsubscribe or emit
//! further events without deadlocking.

use parking_lot::Mutex;
use std::fmt;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

/// Identifies a subscription so it can be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listeners<E> {
    next_id: u64,
    entries: Vec<(SubscriptionId, Listener<E>)>,
}

/// A list of listeners for events of type `E`.
pub struct Observable<E> {
    listeners: Mutex<Listeners<E>>,
}

impl<E> Default for Observable<E> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            }),
        }
    }
}

impl<E> Observable<E> {
    /// Creates an observable with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let mut listeners = self.listeners.lock();
        let id = SubscriptionId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry, _)| *entry != id);
        listeners.entries.len() != before
    }

    /// Calls every listener with `event`, in subscription order.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    /// Returns the number of listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().entries.len()
    }
}

impl<E: Clone + Send + 'static> Observable<E> {
    /// Subscribes a channel that receives a copy of every event.
    ///
    /// The subscription stays registered after the receiver is dropped;
    /// sends to a closed channel are ignored.
    pub fn subscribe_channel(&self) -> (SubscriptionId, Receiver<E>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let id = self.subscribe(move |event: &E| {
            let _ = tx.lock().send(event.clone());
        });
        (id, rx)
    }
}

impl<E> fmt::Debug for Observable<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
