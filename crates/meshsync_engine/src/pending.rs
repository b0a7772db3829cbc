//! Shared asynchronous result handles.
//!
//! A [`Pending`] is settled exactly once, with either a value or a
//! [`SyncError`]. Every clone observes the same outcome. Continuations
//! registered with [`Pending::on_settle`] run synchronously, in registration
//! order, on whichever thread settles the handle; one registered after
//! settlement runs immediately on the caller's thread.
//!
//! Handles also implement [`Future`], so async callers can simply `.await`
//! them.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tracing::warn;

type Callback<T> = Box<dyn FnOnce(SyncResult<T>) + Send>;

enum Slot<T> {
    Waiting {
        callbacks: Vec<Callback<T>>,
        wakers: Vec<Waker>,
    },
    Settled(SyncResult<T>),
}

/// A shared, settle-once result handle.
pub struct Pending<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Clone for Pending<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Pending<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Pending<T> {
    /// Creates an unsettled handle.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Waiting {
                callbacks: Vec::new(),
                wakers: Vec::new(),
            })),
        }
    }

    /// Creates a handle already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Settled(Ok(value)))),
        }
    }

    /// Creates a handle already rejected with `error`.
    pub fn rejected(error: SyncError) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Settled(Err(error)))),
        }
    }

    /// Resolves the handle. Returns false if it was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Rejects the handle. Returns false if it was already settled.
    pub fn reject(&self, error: SyncError) -> bool {
        self.settle(Err(error))
    }

    /// Settles the handle with `outcome`.
    ///
    /// A second settlement is ignored and returns false.
    pub fn settle(&self, outcome: SyncResult<T>) -> bool {
        let (callbacks, wakers) = {
            let mut slot = self.slot.lock();
            let Slot::Waiting { callbacks, wakers } = &mut *slot else {
                warn!("result handle settled twice; ignoring the second outcome");
                return false;
            };
            let taken = (std::mem::take(callbacks), std::mem::take(wakers));
            *slot = Slot::Settled(outcome.clone());
            taken
        };
        for callback in callbacks {
            callback(outcome.clone());
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Returns true until the handle is settled.
    pub fn is_pending(&self) -> bool {
        matches!(&*self.slot.lock(), Slot::Waiting { .. })
    }

    /// Returns true if the handle was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(&*self.slot.lock(), Slot::Settled(Err(_)))
    }

    /// Returns the outcome, if settled.
    pub fn outcome(&self) -> Option<SyncResult<T>> {
        match &*self.slot.lock() {
            Slot::Settled(outcome) => Some(outcome.clone()),
            Slot::Waiting { .. } => None,
        }
    }

    /// Runs `callback` with the outcome once the handle settles.
    pub fn on_settle(&self, callback: impl FnOnce(SyncResult<T>) + Send + 'static) {
        let outcome = {
            let mut slot = self.slot.lock();
            match &mut *slot {
                Slot::Waiting { callbacks, .. } => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                Slot::Settled(outcome) => outcome.clone(),
            }
        };
        callback(outcome);
    }

    /// Derives a handle from this one's value.
    pub fn map<U, F>(&self, f: F) -> Pending<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> SyncResult<U> + Send + 'static,
    {
        let next = Pending::new();
        let derived = next.clone();
        self.on_settle(move |outcome| {
            next.settle(outcome.and_then(f));
        });
        derived
    }

    /// Chains another operation onto this one's outcome, success or not.
    pub fn and_then<U, F>(&self, f: F) -> Pending<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(SyncResult<T>) -> Pending<U> + Send + 'static,
    {
        let next = Pending::new();
        let derived = next.clone();
        self.on_settle(move |outcome| {
            f(outcome).on_settle(move |inner| {
                next.settle(inner);
            });
        });
        derived
    }

    /// Blocks the current thread until the handle settles.
    ///
    /// Must not be called from the thread that is expected to settle it.
    pub fn wait(&self) -> SyncResult<T> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.on_settle(move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.recv()
            .unwrap_or_else(|_| Err(SyncError::protocol("result handle dropped unsettled")))
    }
}

impl<T> Pending<T> {
    /// Returns true if both handles share the same slot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T: Clone + Send + 'static> Future for Pending<T> {
    type Output = SyncResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.lock();
        match &mut *slot {
            Slot::Settled(outcome) => Poll::Ready(outcome.clone()),
            Slot::Waiting { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.slot.lock() {
            Slot::Waiting { .. } => "pending",
            Slot::Settled(Ok(_)) => "resolved",
            Slot::Settled(Err(_)) => "rejected",
        };
        f.debug_struct("Pending").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn settles_once() {
        let handle = Pending::new();
        assert!(handle.is_pending());
        assert!(handle.resolve(1));
        assert!(!handle.resolve(2));
        assert!(!handle.reject(SyncError::Timeout));
        assert_eq!(handle.outcome(), Some(Ok(1)));
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let handle: Pending<u32> = Pending::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            handle.on_settle(move |_| order.lock().push(i));
        }
        handle.resolve(7);
        let order_after = Arc::clone(&order);
        handle.on_settle(move |_| order_after.lock().push(3));
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn clones_share_outcome() {
        let handle: Pending<&'static str> = Pending::new();
        let other = handle.clone();
        assert!(handle.ptr_eq(&other));
        other.reject(SyncError::MissingIdentity);
        assert!(handle.is_rejected());
        assert!(!handle.ptr_eq(&Pending::new()));
    }

    #[test]
    fn map_and_chain() {
        let handle: Pending<u32> = Pending::new();
        let doubled = handle.map(|n| Ok(n * 2));
        let chained = doubled.and_then(|outcome| match outcome {
            Ok(n) => Pending::resolved(format!("n={n}")),
            Err(e) => Pending::rejected(e),
        });
        handle.resolve(21);
        assert_eq!(doubled.outcome(), Some(Ok(42)));
        assert_eq!(chained.outcome(), Some(Ok("n=42".to_string())));
    }

    #[test]
    fn map_propagates_rejection() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let handle: Pending<u32> = Pending::rejected(SyncError::Timeout);
        let mapped = handle.map(move |n| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(n)
        });
        assert_eq!(mapped.outcome(), Some(Err(SyncError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wait_across_threads() {
        let handle: Pending<u32> = Pending::new();
        let settler = handle.clone();
        let worker = std::thread::spawn(move || {
            settler.resolve(5);
        });
        assert_eq!(handle.wait(), Ok(5));
        worker.join().unwrap();
    }
}
