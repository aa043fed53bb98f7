use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use crate::event::EventRecord;

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// The full collection, replacing whatever the listener held.
    Snapshot(Vec<EventRecord>),
    Added(EventRecord),
    Modified(EventRecord),
    Removed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    /// Strictly increasing per source.
    pub sequence: u64,
    pub change: Change,
}

pub type ChangeCallback = Box<dyn Fn(&ChangeNotification) + Send + Sync>;

type SharedCallback = Arc<dyn Fn(&ChangeNotification) + Send + Sync>;

/// Handle returned by `subscribe`. The listener is removed when the handle
/// is dropped or [`Subscription::unsubscribe`] is called.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Listener registry shared by a store and its subscription handles.
///
/// Delivery is serialized: notifications reach every listener in sequence
/// order. Callbacks must not write back to the emitting store.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<ListenerSet>,
}

#[derive(Default)]
struct ListenerSet {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, SharedCallback)>>,
    delivery: Mutex<u64>,
}

impl Listeners {
    pub fn subscribe(&self, on_change: ChangeCallback) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::from(on_change)));
        debug!(listener = id, "listener subscribed");

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .callbacks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(listener, _)| *listener != id);
                debug!(listener = id, "listener unsubscribed");
            }
        })
    }

    pub fn len(&self) -> usize {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Assigns the next sequence number to `change` and delivers it.
    /// Returns the sequence used.
    pub fn emit(&self, change: Change) -> u64 {
        let mut last_sequence = self
            .inner
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *last_sequence += 1;
        let notification = ChangeNotification {
            sequence: *last_sequence,
            change,
        };

        let callbacks: Vec<SharedCallback> = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        trace!(
            sequence = notification.sequence,
            listeners = callbacks.len(),
            "delivering change notification"
        );
        for callback in callbacks {
            callback(&notification);
        }

        notification.sequence
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish()
    }
}
