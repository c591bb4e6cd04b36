//! Synchronous event dispatch with prioritized listeners.
//!
//! The reader task calls [`EventDispatcher::dispatch`] for every decoded
//! event. Delivery is strictly priority-then-registration order and works on
//! a snapshot of the registry, so a listener adding or removing
//! registrations (including itself) mid-callback never skips or
//! double-delivers to unrelated listeners for the current event.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

use crate::event::ManagerEvent;

/// Reaction point for inbound events.
///
/// Callbacks run on the reader task and must not block it: long-running
/// reaction logic hands off to its activity's own waiting mechanism (a
/// channel or [`Notify`](tokio::sync::Notify)) instead of executing inline.
pub trait EventListener: Send + Sync {
    /// Called for every dispatched event whose type matches the listener's
    /// interest set.
    fn on_event(&self, event: &ManagerEvent);
}

/// Dispatch priority. Within one event, all `High` listeners run before all
/// `Normal` listeners, which run before all `Low` listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ListenerPriority {
    /// Before normal listeners.
    High,
    /// Default priority.
    #[default]
    Normal,
    /// After normal listeners; used by passive observers.
    Low,
}

impl ListenerPriority {
    fn rank(&self) -> u8 {
        match self {
            ListenerPriority::High => 0,
            ListenerPriority::Normal => 1,
            ListenerPriority::Low => 2,
        }
    }
}

/// The set of event types a listener wants.
#[derive(Debug, Clone)]
pub enum Interest {
    /// Every event, used by passive observers.
    All,
    /// Only events whose name is in the set (case-insensitive).
    Events(HashSet<String>),
}

impl Interest {
    /// Build a named interest set. Names are matched case-insensitively.
    pub fn events<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Interest::Events(
            names
                .into_iter()
                .map(|n| n.as_ref().to_ascii_lowercase())
                .collect(),
        )
    }

    /// Whether an event name matches this interest set.
    pub fn matches(&self, event_name: &str) -> bool {
        match self {
            Interest::All => true,
            Interest::Events(names) => names.contains(&event_name.to_ascii_lowercase()),
        }
    }
}

/// Handle returned by [`EventDispatcher::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

struct Registration {
    id: u64,
    priority: ListenerPriority,
    interest: Interest,
    listener: Arc<dyn EventListener>,
}

/// Registry of active listeners, safe under concurrent mutation.
pub struct EventDispatcher {
    // Kept sorted by (priority rank, registration order) so dispatch is a
    // straight scan.
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            registrations: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener with a priority and interest set.
    pub fn register(
        &self,
        listener: Arc<dyn EventListener>,
        priority: ListenerPriority,
        interest: Interest,
    ) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Registration {
            id,
            priority,
            interest,
            listener,
        };

        let mut registrations = self.registrations.lock();
        // Insert after every registration of the same or higher priority:
        // ids are monotonic, so this keeps registration order within a
        // priority level.
        let pos = registrations
            .iter()
            .position(|r| r.priority.rank() > priority.rank())
            .unwrap_or(registrations.len());
        registrations.insert(pos, registration);
        trace!("[DISPATCH] registered listener {} at {:?}", id, priority);
        ListenerHandle(id)
    }

    /// Remove a listener. Idempotent; safe to call from within the
    /// listener's own callback.
    pub fn unregister(&self, handle: ListenerHandle) -> bool {
        let mut registrations = self.registrations.lock();
        match registrations.iter().position(|r| r.id == handle.0) {
            Some(pos) => {
                registrations.remove(pos);
                trace!("[DISPATCH] unregistered listener {}", handle.0);
                true
            }
            None => false,
        }
    }

    /// Whether a handle is still registered.
    pub fn is_registered(&self, handle: ListenerHandle) -> bool {
        self.registrations.lock().iter().any(|r| r.id == handle.0)
    }

    /// Number of active registrations.
    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Whether no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.lock().is_empty()
    }

    /// Drop every registration. Called at connection teardown after the
    /// synthetic disconnect dispatch — no further events can ever arrive,
    /// so nothing may keep paying dispatch cost.
    pub(crate) fn clear(&self) {
        self.registrations.lock().clear();
    }

    /// Deliver one event synchronously to every matching listener, highest
    /// priority first, registration order breaking ties.
    ///
    /// A panicking callback is caught and reported; it never prevents
    /// delivery to the remaining listeners.
    pub fn dispatch(&self, event: &ManagerEvent) {
        // Snapshot under the lock, call outside it: callbacks may register
        // or unregister listeners without deadlocking, and mutation cannot
        // affect delivery of the current event.
        let snapshot: Vec<Arc<dyn EventListener>> = {
            let registrations = self.registrations.lock();
            registrations
                .iter()
                .filter(|r| r.interest.matches(event.name()))
                .map(|r| Arc::clone(&r.listener))
                .collect()
        };

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                error!("listener panicked while handling {}", event.name());
            }
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.len())
            .finish()
    }
}

/// RAII deregistration.
///
/// Activities hold one of these for their lifetime so the listener is
/// removed on every exit path — success, failure, timeout, or the caller
/// dropping the future mid-await. Unregistration is idempotent, so an early
/// explicit [`unregister`](ListenerGuard::unregister) followed by drop is
/// fine.
pub struct ListenerGuard {
    dispatcher: Arc<EventDispatcher>,
    handle: ListenerHandle,
}

impl ListenerGuard {
    /// Wrap a registration.
    pub fn new(dispatcher: Arc<EventDispatcher>, handle: ListenerHandle) -> Self {
        Self {
            dispatcher,
            handle,
        }
    }

    /// The wrapped handle.
    pub fn handle(&self) -> ListenerHandle {
        self.handle
    }

    /// Unregister now instead of at drop.
    pub fn unregister(&self) {
        self.dispatcher.unregister(self.handle);
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.dispatcher.unregister(self.handle);
    }
}
