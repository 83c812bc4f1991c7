#![forbid(unsafe_code)]

//! Subscriber slots: one registered callable behind a revocable cell.
//!
//! A slot is shared between the registry and any dispatch snapshot that
//! captured it. Clearing a slot replaces its callable with "absent" without
//! removing it from the registry, so a dispatch that already holds the slot
//! degrades to the collector's default instead of observing freed state.
//!
//! # Failure Modes
//!
//! | Situation                              | Behavior                          |
//! |----------------------------------------|-----------------------------------|
//! | Cleared between snapshot and call      | `invoke` returns `None`           |
//! | Cleared while the callable is running  | The running call completes        |
//! | Callable disconnects itself mid-call   | No deadlock: no lock is held      |

use std::fmt;

use crate::policy::{LockPolicy, SlotLock};

/// Strong reference to a type-erased subscriber callable.
pub(crate) type CallbackRef<A, R, P> =
    <P as LockPolicy>::Shared<<P as LockPolicy>::Callback<A, R>>;

/// Identity of one subscriber within its event.
///
/// Keys are allocated in increasing order and never reused by the same
/// event, so sorting by key yields registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey(u64);

impl SlotKey {
    #[inline]
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw key value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct Slot<A: 'static, R: 'static, P: LockPolicy> {
    key: SlotKey,
    callback: P::SlotLock<Option<CallbackRef<A, R, P>>>,
}

impl<A: 'static, R: 'static, P: LockPolicy> Slot<A, R, P> {
    pub(crate) fn new(key: SlotKey, callback: CallbackRef<A, R, P>) -> Self {
        Self {
            key,
            callback: SlotLock::new(Some(callback)),
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> SlotKey {
        self.key
    }

    /// Call the stored callable, or return `None` if the slot was cleared.
    ///
    /// The slot lock is released before the callable runs.
    pub(crate) fn invoke(&self, args: &A) -> Option<R> {
        let callback = self.callback.read(Option::clone)?;
        Some((*callback)(args))
    }

    /// Replace the callable with "absent" and hand it back.
    ///
    /// The caller must drop the returned value only after releasing every
    /// registry lock: dropping a closure may drop captured connections,
    /// which re-enter the event.
    #[must_use = "drop the released callable outside the registry lock"]
    pub(crate) fn clear(&self) -> Option<CallbackRef<A, R, P>> {
        self.callback.write(Option::take)
    }

    #[inline]
    pub(crate) fn is_cleared(&self) -> bool {
        self.callback.read(Option::is_none)
    }
}

impl<A: 'static, R: 'static, P: LockPolicy> fmt::Debug for Slot<A, R, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("key", &self.key)
            .field("cleared", &self.is_cleared())
            .finish()
    }
}
