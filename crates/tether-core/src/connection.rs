#![forbid(unsafe_code)]

//! Revocable RAII handles for event subscriptions.
//!
//! # Design
//!
//! A [`Connection`] holds a weak pointer to its event's registry, the event's
//! id, and its slot key. It never points at the slot itself: liveness is
//! answered by the registry, so a handle whose event has been dropped simply
//! fails to upgrade its weak pointer and becomes inert.
//!
//! ```text
//!   Event ──owns──► registry ──owns──► slot {key, callable}
//!                      ▲
//!   Connection ──weak──┘  (+ key)
//! ```
//!
//! # Invariants
//!
//! 1. A connection is either linked (weak registry pointer and key) or
//!    retired (no link). Retirement happens on disconnect or drop and is
//!    permanent; moving a handle transfers its link.
//! 2. At most one handle is ever linked to a given slot (`Connection` is not
//!    `Clone`).
//! 3. Ordering, equality, and hashing use `(event id, slot key)` and take no
//!    locks.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::DisconnectError;
use crate::policy::{Local, LockPolicy, sealed};
use crate::slot::SlotKey;

/// The operations a connection needs from the event that created it.
///
/// Implemented by the crate's event registries only.
pub trait Registry: sealed::Sealed {
    /// Revoke the subscriber at `key`. Returns `false` if the key is not
    /// registered or already revoked.
    fn close(&self, key: SlotKey) -> bool;

    /// Whether `key` is registered and not revoked.
    fn is_live(&self, key: SlotKey) -> bool;
}

/// Observable state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The subscriber will be invoked by the next dispatch.
    Live,
    /// The event is alive but no longer holds this subscriber.
    Revoked,
    /// The owning event was dropped.
    Orphaned,
    /// This handle was disconnected.
    Retired,
}

struct Link<P: LockPolicy> {
    registry: P::Weak<P::DynRegistry>,
    event_id: u64,
    key: SlotKey,
}

/// Handle for one subscription; disconnects the subscriber when dropped.
///
/// Returned by [`Event::connect`](crate::Event::connect). Dropping the handle
/// (or calling [`disconnect`](Self::disconnect)) guarantees the subscriber is
/// not invoked by any dispatch that starts afterwards. A dispatch already in
/// progress may still run it once.
#[must_use = "dropping a Connection disconnects its subscriber immediately"]
pub struct Connection<P: LockPolicy = Local> {
    link: Option<Link<P>>,
}

impl<P: LockPolicy> Connection<P> {
    pub(crate) fn new(registry: P::Weak<P::DynRegistry>, event_id: u64, key: SlotKey) -> Self {
        Self {
            link: Some(Link {
                registry,
                event_id,
                key,
            }),
        }
    }

    /// Revoke the subscriber. Idempotent.
    pub fn disconnect(&mut self) {
        let _ = self.try_disconnect();
    }

    /// Revoke the subscriber, reporting why nothing happened if it was
    /// already gone. The handle is retired either way.
    pub fn try_disconnect(&mut self) -> Result<(), DisconnectError> {
        let link = self.link.take().ok_or(DisconnectError::Retired)?;
        let registry = P::upgrade(&link.registry).ok_or(DisconnectError::Orphaned)?;
        if registry.close(link.key) {
            Ok(())
        } else {
            Err(DisconnectError::NotRegistered)
        }
    }

    /// Whether the subscriber will be invoked by the next dispatch.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Live
    }

    /// Current state of this handle.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        let Some(link) = &self.link else {
            return ConnectionState::Retired;
        };
        match P::upgrade(&link.registry) {
            None => ConnectionState::Orphaned,
            Some(registry) if registry.is_live(link.key) => ConnectionState::Live,
            Some(_) => ConnectionState::Revoked,
        }
    }

    /// Slot key, or `None` once retired.
    #[must_use]
    pub fn key(&self) -> Option<SlotKey> {
        self.link.as_ref().map(|link| link.key)
    }

    fn identity(&self) -> Option<(u64, SlotKey)> {
        self.link.as_ref().map(|link| (link.event_id, link.key))
    }
}

impl<P: LockPolicy> Drop for Connection<P> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl<P: LockPolicy> PartialEq for Connection<P> {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl<P: LockPolicy> Eq for Connection<P> {}

impl<P: LockPolicy> PartialOrd for Connection<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: LockPolicy> Ord for Connection<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl<P: LockPolicy> Hash for Connection<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl<P: LockPolicy> fmt::Debug for Connection<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Event;
    use crate::policy::Threaded;
    use std::cell::Cell;
    use std::collections::BTreeSet;
    use std::rc::Rc;

    #[test]
    fn live_until_disconnected() {
        let event: Event<()> = Event::new();
        let mut conn = event.connect(|_| {});
        assert!(conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Live);

        conn.disconnect();
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Retired);
        assert_eq!(conn.key(), None);
    }

    #[test]
    fn disconnect_twice_is_noop() {
        let count = Rc::new(Cell::new(0u32));
        let event: Event<()> = Event::new();
        let c = Rc::clone(&count);
        let mut conn = event.connect(move |_| c.set(c.get() + 1));

        assert_eq!(conn.try_disconnect(), Ok(()));
        assert_eq!(conn.try_disconnect(), Err(DisconnectError::Retired));
        conn.disconnect();
        drop(conn);

        event.notify(&());
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn drop_disconnects() {
        let count = Rc::new(Cell::new(0u32));
        let event: Event<()> = Event::new();
        let c = Rc::clone(&count);
        let conn = event.connect(move |_| c.set(c.get() + 1));

        event.notify(&());
        drop(conn);
        event.notify(&());
        assert_eq!(count.get(), 1);
        assert_eq!(event.subscriber_count(), 0);
    }

    #[test]
    fn move_transfers_ownership() {
        let count = Rc::new(Cell::new(0u32));
        let event: Event<()> = Event::new();
        let c = Rc::clone(&count);
        let conn = event.connect(move |_| c.set(c.get() + 1));

        let mut holder = Vec::new();
        holder.push(conn);
        event.notify(&());
        assert_eq!(count.get(), 1);

        holder.clear();
        event.notify(&());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn orphaned_after_event_drop() {
        let event: Event<()> = Event::new();
        let mut conn = event.connect(|_| {});
        drop(event);

        assert_eq!(conn.state(), ConnectionState::Orphaned);
        assert!(!conn.is_connected());
        assert_eq!(conn.try_disconnect(), Err(DisconnectError::Orphaned));
        assert_eq!(conn.state(), ConnectionState::Retired);
    }

    #[test]
    fn revoked_after_disconnect_all() {
        let event: Event<()> = Event::new();
        let mut conn = event.connect(|_| {});
        event.disconnect_all();

        assert_eq!(conn.state(), ConnectionState::Revoked);
        assert_eq!(conn.try_disconnect(), Err(DisconnectError::NotRegistered));
    }

    #[test]
    fn ordering_follows_registration() {
        let event: Event<()> = Event::new();
        let a = event.connect(|_| {});
        let b = event.connect(|_| {});
        let c = event.connect(|_| {});
        assert!(a < b && b < c);
        assert_ne!(a, b);

        let set: BTreeSet<_> = [c, a, b].into_iter().collect();
        let keys: Vec<_> = set.iter().filter_map(Connection::key).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn identity_distinguishes_events() {
        let first: Event<()> = Event::new();
        let second: Event<()> = Event::new();
        let a = first.connect(|_| {});
        let b = second.connect(|_| {});
        // Both are the first key of their event but belong to different events.
        assert_eq!(a.key(), b.key());
        assert_ne!(a, b);
    }

    #[test]
    fn retired_handles_compare_equal() {
        let event: Event<()> = Event::new();
        let mut a = event.connect(|_| {});
        let mut b = event.connect(|_| {});
        a.disconnect();
        b.disconnect();
        assert_eq!(a, b);
    }

    #[test]
    fn threaded_connection_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Connection<Threaded>>();
    }

    #[test]
    fn debug_format() {
        let event: Event<()> = Event::new();
        let conn = event.connect(|_| {});
        let dbg = format!("{conn:?}");
        assert!(dbg.contains("Connection"));
        assert!(dbg.contains("Live"));
    }
}
