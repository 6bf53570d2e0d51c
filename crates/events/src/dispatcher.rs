//! Typed publish/subscribe dispatcher.
//!
//! Events are a closed enum implementing [`Event`]; each variant maps to
//! a `Kind` and subscribers register per kind. [`Dispatcher::publish`]
//! invokes the callbacks of the event's kind synchronously, in
//! subscription order, on the publishing thread.
//!
//! The subscriber list is snapshotted before callbacks run and no lock is
//! held while they execute, so a callback may freely subscribe,
//! unsubscribe or publish. Changes made during a publish pass take effect
//! from the next pass.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An event that can be routed by kind.
pub trait Event: Clone + Send + Sync + 'static {
    /// Discriminant subscribers register against.
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Shared subscriber callback.
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned by [`Dispatcher::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber<E> {
    id: SubscriptionId,
    callback: Callback<E>,
}

impl<E> Clone for Subscriber<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast tap.
const DEFAULT_TAP_CAPACITY: usize = 1024;

/// In-process typed event dispatcher.
///
/// Designed to be shared via `Arc<Dispatcher<E>>` between the producer
/// (the connection) and any number of consumers.
///
/// ```rust
/// use taskpulse_events::{Dispatcher, Event};
///
/// #[derive(Clone)]
/// struct Tick(u32);
///
/// impl Event for Tick {
///     type Kind = ();
///     fn kind(&self) {}
/// }
///
/// let dispatcher = Dispatcher::default();
/// dispatcher.subscribe((), |tick: &Tick| println!("tick {}", tick.0));
/// dispatcher.publish(Tick(1));
/// ```
pub struct Dispatcher<E: Event> {
    subscribers: Mutex<HashMap<E::Kind, Vec<Subscriber<E>>>>,
    next_id: AtomicU64,
    tap: broadcast::Sender<E>,
}

impl<E: Event> Dispatcher<E> {
    /// Create a dispatcher whose broadcast tap buffers `tap_capacity` events.
    ///
    /// Tap receivers that fall further behind observe `RecvError::Lagged`;
    /// callback subscribers are unaffected.
    pub fn new(tap_capacity: usize) -> Self {
        let (tap, _) = broadcast::channel(tap_capacity);
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            tap,
        }
    }

    /// Append a callback for `kind`.
    pub fn subscribe<F>(&self, kind: E::Kind, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe_callback(kind, Arc::new(callback))
    }

    /// Append an already shared callback for `kind`.
    ///
    /// The same `Arc` may be registered several times; each registration
    /// is invoked separately.
    pub fn subscribe_callback(&self, kind: E::Kind, callback: Callback<E>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .entry(kind)
            .or_default()
            .push(Subscriber { id, callback });
        tracing::trace!(?kind, subscription = id.0, "Subscriber added");
        id
    }

    /// Remove the subscription `id` from `kind`. Returns `false` if it was
    /// not registered.
    pub fn unsubscribe(&self, kind: E::Kind, id: SubscriptionId) -> bool {
        self.remove_first(kind, |sub| sub.id == id)
    }

    /// Remove the first registration of `callback` under `kind`.
    pub fn remove_callback(&self, kind: E::Kind, callback: &Callback<E>) -> bool {
        self.remove_first(kind, |sub| Arc::ptr_eq(&sub.callback, callback))
    }

    /// Number of callbacks currently registered for `kind`.
    pub fn subscriber_count(&self, kind: E::Kind) -> usize {
        self.subscribers.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every callback registered for its kind, then to
    /// the broadcast tap.
    ///
    /// A panicking callback is logged and skipped; the remaining callbacks
    /// still run and the panic never reaches the publisher. Returns the
    /// number of callbacks that completed normally.
    pub fn publish(&self, event: E) -> usize {
        let kind = event.kind();
        let snapshot: Vec<Subscriber<E>> = match self.subscribers.lock().get(&kind) {
            Some(list) => list.clone(),
            None => Vec::new(),
        };

        let mut delivered = 0;
        for sub in &snapshot {
            match catch_unwind(AssertUnwindSafe(|| (sub.callback)(&event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    tracing::error!(
                        ?kind,
                        subscription = sub.id.0,
                        panic = %panic_message(panic.as_ref()),
                        "Event subscriber panicked",
                    );
                }
            }
        }

        // A SendError only means nobody is tapping.
        let _ = self.tap.send(event);
        delivered
    }

    /// Receive every published event asynchronously.
    pub fn tap(&self) -> broadcast::Receiver<E> {
        self.tap.subscribe()
    }

    fn remove_first(&self, kind: E::Kind, matches: impl Fn(&Subscriber<E>) -> bool) -> bool {
        let mut subscribers = self.subscribers.lock();
        let Some(list) = subscribers.get_mut(&kind) else {
            return false;
        };
        match list.iter().position(matches) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }
}

impl<E: Event> Default for Dispatcher<E> {
    fn default() -> Self {
        Self::new(DEFAULT_TAP_CAPACITY)
    }
}

impl<E: Event> fmt::Debug for Dispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<E::Kind, usize> = self
            .subscribers
            .lock()
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        f.debug_struct("Dispatcher")
            .field("subscribers", &counts)
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
