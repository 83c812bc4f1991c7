#![forbid(unsafe_code)]

//! Multicast events: a subscriber registry plus a synchronous dispatcher.
//!
//! # Design
//!
//! [`Event<A, R, P>`] owns a registry mapping [`SlotKey`] to a shared
//! [`Slot`], a set of keys pending removal, and a dispatch depth counter.
//! Dispatch takes a snapshot of the live slots under the registry lock,
//! releases the lock, and visits each slot once. Removal of revoked slots is
//! deferred to a cleanup pass that only runs when the calling thread has no
//! dispatch in flight, so a subscriber may disconnect itself (or others) and
//! connect new subscribers while being invoked. Dispatches on other threads
//! hold their own snapshot and never block cleanup.
//!
//! ```text
//! emit(args)
//!   lock ─► depth[thread] += 1, snapshot = live slots in key order ─► unlock
//!   for slot in snapshot:  slot.invoke(args) ─► Some(r) | None (revoked)
//!   lock ─► depth[thread] -= 1 ─► unlock
//!   clean: if depth[thread] == 0 { erase pending }
//! ```
//!
//! # Performance
//!
//! | Operation          | Complexity                        |
//! |--------------------|-----------------------------------|
//! | `connect()`        | O(log S)                          |
//! | `emit()`/`notify()`| O(S) plus one snapshot allocation |
//! | disconnect         | O(log S), cleanup O(D log S)      |
//! | `subscriber_count()` | O(1)                            |
//!
//! S = registered subscribers, D = subscribers pending removal.
//!
//! # Failure Modes
//!
//! - **Panicking subscriber**: the panic propagates to the caller of
//!   `emit`. The dispatch depth is restored by a drop guard, so the registry
//!   stays consistent and later cleanup passes still run.
//! - **Subscriber leak**: connections stored indefinitely keep their
//!   subscribers alive. Set [`EventConfig::subscriber_warn_threshold`] to
//!   get a `warn!` record when the live count crosses a limit.
//!
//! # Invariants
//!
//! 1. Every key in the pending set is also in the slot map, and its slot
//!    is cleared.
//! 2. The slot map is never shrunk by a thread whose dispatch depth is
//!    non-zero.
//! 3. Dispatch visits subscribers in registration order.
//! 4. A subscriber connected during a dispatch is first invoked by the next
//!    dispatch.
//! 5. No user code runs, and no user callable is dropped, while the
//!    registry lock is held.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{self, Rc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{self, Arc};
use std::thread::{self, ThreadId};

use tracing::{debug, trace, trace_span, warn};

use crate::collect::{Collect, Collector, Discard};
use crate::connection::{Connection, Registry};
use crate::policy::{Local, LockPolicy, RegistryLock, Threaded, sealed};
use crate::slot::{CallbackRef, Slot, SlotKey};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

type SlotRef<A, R, P> = <P as LockPolicy>::Shared<Slot<A, R, P>>;

/// Configuration for an [`Event`].
#[derive(Debug, Clone)]
pub struct EventConfig {
    /// Name attached to log records.
    pub label: Cow<'static, str>,
    /// Emit a warning when the live subscriber count grows past this value.
    pub subscriber_warn_threshold: Option<usize>,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            label: Cow::Borrowed("event"),
            subscriber_warn_threshold: None,
        }
    }
}

impl EventConfig {
    /// Default configuration with the given label.
    #[must_use]
    pub fn new(label: impl Into<Cow<'static, str>>) -> Self {
        Self::default().with_label(label)
    }

    /// Set the log label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    /// Warn once each time the live subscriber count crosses `threshold`.
    #[must_use]
    pub fn with_subscriber_warn_threshold(mut self, threshold: usize) -> Self {
        self.subscriber_warn_threshold = Some(threshold);
        self
    }

    /// Disable the subscriber count warning.
    #[must_use]
    pub fn without_subscriber_warning(mut self) -> Self {
        self.subscriber_warn_threshold = None;
        self
    }
}

struct RegistryState<A: 'static, R: 'static, P: LockPolicy> {
    slots: BTreeMap<SlotKey, SlotRef<A, R, P>>,
    pending: BTreeSet<SlotKey>,
    next_key: u64,
    /// Dispatch depth per thread; threads at depth zero are absent.
    dispatching: Vec<(ThreadId, usize)>,
    over_threshold: bool,
}

impl<A: 'static, R: 'static, P: LockPolicy> RegistryState<A, R, P> {
    fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            pending: BTreeSet::new(),
            next_key: 0,
            dispatching: Vec::new(),
            over_threshold: false,
        }
    }

    #[inline]
    fn live_count(&self) -> usize {
        self.slots.len() - self.pending.len()
    }

    fn insert(&mut self, callback: CallbackRef<A, R, P>) -> SlotKey {
        let key = SlotKey::new(self.next_key);
        self.next_key += 1;
        self.slots.insert(key, P::share(Slot::new(key, callback)));
        key
    }

    /// Returns the threshold when this insertion crossed it.
    fn threshold_crossed(&mut self, threshold: Option<usize>) -> Option<usize> {
        let threshold = threshold?;
        let over = self.live_count() > threshold;
        let crossed = over && !self.over_threshold;
        self.over_threshold = over;
        crossed.then_some(threshold)
    }

    fn depth_on(&self, thread: ThreadId) -> usize {
        self.dispatching
            .iter()
            .find(|(id, _)| *id == thread)
            .map_or(0, |(_, depth)| *depth)
    }

    fn total_depth(&self) -> usize {
        self.dispatching.iter().map(|(_, depth)| depth).sum()
    }

    fn begin_dispatch(&mut self, thread: ThreadId) -> Vec<SlotRef<A, R, P>> {
        match self.dispatching.iter_mut().find(|(id, _)| *id == thread) {
            Some((_, depth)) => *depth += 1,
            None => self.dispatching.push((thread, 1)),
        }
        self.slots
            .iter()
            .filter(|(key, _)| !self.pending.contains(*key))
            .map(|(_, slot)| slot.clone())
            .collect()
    }

    fn end_dispatch(&mut self, thread: ThreadId) {
        let entry = self.dispatching.iter().position(|(id, _)| *id == thread);
        debug_assert!(entry.is_some(), "unbalanced dispatch depth");
        if let Some(index) = entry {
            self.dispatching[index].1 -= 1;
            if self.dispatching[index].1 == 0 {
                self.dispatching.swap_remove(index);
            }
        }
    }

    /// Returns `None` if `key` is unknown or already revoked.
    fn revoke(&mut self, key: SlotKey) -> Option<Option<CallbackRef<A, R, P>>> {
        if self.pending.contains(&key) {
            return None;
        }
        let slot = self.slots.get(&key)?;
        debug_assert_eq!(slot.key(), key);
        let released = slot.clear();
        self.pending.insert(key);
        Some(released)
    }

    fn revoke_all(&mut self) -> Vec<CallbackRef<A, R, P>> {
        let mut released = Vec::new();
        for (key, slot) in &self.slots {
            if self.pending.insert(*key) {
                released.extend(slot.clear());
            }
        }
        released
    }

    fn sweep(&mut self, thread: ThreadId) -> Vec<SlotRef<A, R, P>> {
        if self.pending.is_empty() || self.depth_on(thread) > 0 {
            return Vec::new();
        }
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .filter_map(|key| self.slots.remove(&key))
            .collect()
    }

    fn drain(&mut self) -> (Vec<SlotRef<A, R, P>>, Vec<CallbackRef<A, R, P>>) {
        self.pending.clear();
        let slots: Vec<_> = std::mem::take(&mut self.slots).into_values().collect();
        let released = slots.iter().filter_map(|slot| slot.clear()).collect();
        (slots, released)
    }
}

struct EventCore<A: 'static, R: 'static, P: LockPolicy> {
    id: u64,
    config: EventConfig,
    state: P::RegistryLock<RegistryState<A, R, P>>,
}

impl<A: 'static, R: 'static, P: LockPolicy> EventCore<A, R, P> {
    /// Physically remove revoked slots unless this thread is dispatching.
    fn clean(&self) {
        let thread = thread::current().id();
        let removed = self.state.with(|state| state.sweep(thread));
        if !removed.is_empty() {
            trace!(
                event = %self.config.label,
                removed = removed.len(),
                "cleanup pass"
            );
        }
    }
}

impl<A: 'static, R: 'static, P: LockPolicy> sealed::Sealed for EventCore<A, R, P> {}

impl<A: 'static, R: 'static, P: LockPolicy> Registry for EventCore<A, R, P> {
    fn close(&self, key: SlotKey) -> bool {
        let revoked = self.state.with(|state| state.revoke(key));
        let closed = revoked.is_some();
        // The released callable drops here, after the registry lock.
        drop(revoked);
        if closed {
            trace!(event = %self.config.label, key = key.get(), "subscriber disconnected");
        }
        self.clean();
        closed
    }

    fn is_live(&self, key: SlotKey) -> bool {
        self.state
            .with(|state| state.slots.contains_key(&key) && !state.pending.contains(&key))
    }
}

struct DispatchGuard<'a, A: 'static, R: 'static, P: LockPolicy> {
    core: &'a EventCore<A, R, P>,
}

impl<A: 'static, R: 'static, P: LockPolicy> Drop for DispatchGuard<'_, A, R, P> {
    fn drop(&mut self) {
        if thread::panicking() {
            debug!(
                event = %self.core.config.label,
                "dispatch unwinding through a panicking subscriber"
            );
        }
        let thread = thread::current().id();
        self.core.state.with(|state| state.end_dispatch(thread));
        self.core.clean();
    }
}

/// A multicast event with callbacks of shape `Fn(&A) -> R`.
///
/// Multi-argument signatures use a tuple for `A`. The policy `P` selects
/// [`Local`] (single-threaded, no synchronization) or [`Threaded`].
///
/// Dropping the event revokes every subscriber; connections still held
/// elsewhere become [`Orphaned`](crate::ConnectionState::Orphaned) and their
/// disconnect is a no-op.
///
/// # Example
///
/// ```
/// use tether_core::Event;
///
/// let event: Event<i32, i32> = Event::new();
/// let _double = event.connect(|x| x * 2);
/// let _square = event.connect(|x| x * x);
/// assert_eq!(event.emit(&3), vec![6, 9]);
/// ```
pub struct Event<A: 'static, R: 'static = (), P: LockPolicy = Local> {
    core: P::Shared<EventCore<A, R, P>>,
}

/// Thread-safe event.
pub type SyncEvent<A, R = ()> = Event<A, R, Threaded>;

impl<A: 'static, R: 'static, P: LockPolicy> Event<A, R, P> {
    /// Create an event with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EventConfig::default())
    }

    /// Create an event with the given configuration.
    #[must_use]
    pub fn with_config(config: EventConfig) -> Self {
        let core = EventCore {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            config,
            state: RegistryLock::new(RegistryState::new()),
        };
        Self {
            core: P::share(core),
        }
    }

    /// Configuration this event was built with.
    #[must_use]
    pub fn config(&self) -> &EventConfig {
        &self.core.config
    }

    /// Number of subscribers the next dispatch will invoke.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.state.with(|state| state.live_count())
    }

    /// Whether any subscriber is connected.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    /// Invoke every subscriber and collect the results in registration
    /// order. A subscriber revoked mid-dispatch contributes `R::default()`.
    pub fn emit(&self, args: &A) -> Vec<R>
    where
        R: Default,
    {
        self.dispatch_with(args, Collect::new())
    }

    /// Invoke every subscriber and drop the results.
    pub fn notify(&self, args: &A) {
        self.dispatch_with(args, Discard);
    }

    /// Invoke every subscriber, reporting each outcome to `collector`.
    pub fn dispatch_with<C: Collector<R>>(&self, args: &A, mut collector: C) -> C::Output {
        let thread = thread::current().id();
        let snapshot = self.core.state.with(|state| state.begin_dispatch(thread));
        let _span = trace_span!(
            "event_dispatch",
            event = %self.core.config.label,
            subscribers = snapshot.len()
        )
        .entered();
        let guard = DispatchGuard { core: &*self.core };

        collector.reserve(snapshot.len());
        for slot in &snapshot {
            match slot.invoke(args) {
                Some(result) => collector.invoked(result),
                None => collector.absent(),
            }
        }

        drop(guard);
        collector.finish()
    }

    /// Revoke every subscriber. Outstanding connections become
    /// [`Revoked`](crate::ConnectionState::Revoked).
    pub fn disconnect_all(&self) {
        let released = self.core.state.with(RegistryState::revoke_all);
        let revoked = released.len();
        drop(released);
        trace!(event = %self.core.config.label, revoked, "all subscribers disconnected");
        self.core.clean();
    }

    fn attach(
        &self,
        callback: CallbackRef<A, R, P>,
        registry: P::Weak<P::DynRegistry>,
    ) -> Connection<P> {
        let threshold = self.core.config.subscriber_warn_threshold;
        let (key, live, crossed) = self.core.state.with(|state| {
            let key = state.insert(callback);
            (key, state.live_count(), state.threshold_crossed(threshold))
        });
        trace!(
            event = %self.core.config.label,
            key = key.get(),
            subscribers = live,
            "subscriber connected"
        );
        if let Some(threshold) = crossed {
            warn!(
                event = %self.core.config.label,
                subscribers = live,
                threshold,
                "subscriber count exceeded warning threshold; connections may be leaking"
            );
        }
        Connection::new(registry, self.core.id, key)
    }
}

impl<A: 'static, R: 'static> Event<A, R, Local> {
    /// Register `callback` and return the handle that keeps it connected.
    pub fn connect<F>(&self, callback: F) -> Connection<Local>
    where
        F: Fn(&A) -> R + 'static,
    {
        let callback: Rc<dyn Fn(&A) -> R> = Rc::new(callback);
        let weak = Rc::downgrade(&self.core);
        let registry: rc::Weak<dyn Registry> = weak;
        self.attach(callback, registry)
    }
}

impl<A: 'static, R: 'static> Event<A, R, Threaded> {
    /// Register `callback` and return the handle that keeps it connected.
    ///
    /// May run concurrently with dispatch on other threads; the new
    /// subscriber is first invoked by dispatches that start afterwards.
    pub fn connect<F>(&self, callback: F) -> Connection<Threaded>
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        let callback: Arc<dyn Fn(&A) -> R + Send + Sync> = Arc::new(callback);
        let weak = Arc::downgrade(&self.core);
        let registry: sync::Weak<dyn Registry + Send + Sync> = weak;
        self.attach(callback, registry)
    }
}

impl<A: 'static, R: 'static, P: LockPolicy> Default for Event<A, R, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: 'static, R: 'static, P: LockPolicy> Drop for Event<A, R, P> {
    fn drop(&mut self) {
        let (slots, released) = self.core.state.with(RegistryState::drain);
        if !slots.is_empty() {
            trace!(
                event = %self.core.config.label,
                subscribers = slots.len(),
                "event dropped with live subscribers"
            );
        }
        // Callables drop first: they may hold connections to this event.
        drop(released);
        drop(slots);
    }
}

impl<A: 'static, R: 'static, P: LockPolicy> fmt::Debug for Event<A, R, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (registered, pending, depth) = self.core.state.with(|state| {
            (state.slots.len(), state.pending.len(), state.total_depth())
        });
        f.debug_struct("Event")
            .field("label", &self.core.config.label)
            .field("thread_safe", &P::THREAD_SAFE)
            .field("subscribers", &(registered - pending))
            .field("pending_removal", &pending)
            .field("dispatch_depth", &depth)
            .finish()
    }
}
