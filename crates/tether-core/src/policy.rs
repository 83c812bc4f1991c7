#![forbid(unsafe_code)]

//! Locking policies that parameterize every event component.
//!
//! # Design
//!
//! An event is built from three kinds of shared state: the registry (slot
//! map, pending-removal set, dispatch depth), one callable cell per slot,
//! and the reference-counted pointers that tie connections back to their
//! event. [`LockPolicy`] names a concrete primitive for each of these so the
//! dispatch algorithm in [`crate::event`] is written once and compiled for
//! both policies.
//!
//! | Concern        | [`Local`]       | [`Threaded`]                         |
//! |----------------|-----------------|--------------------------------------|
//! | Registry lock  | `RefCell<T>`    | `ReentrantMutex<RefCell<T>>`         |
//! | Slot lock      | `RefCell<T>`    | `RwLock<T>`                          |
//! | Shared pointer | `Rc` / `rc::Weak` | `Arc` / `sync::Weak`               |
//! | Callback       | `dyn Fn(&A) -> R` | `dyn Fn(&A) -> R + Send + Sync`    |
//!
//! # Invariants
//!
//! 1. A closure passed to [`RegistryLock::with`] or the [`SlotLock`]
//!    accessors never runs user code and never re-enters the same lock's
//!    accessor. Under `Local` a violation panics (`RefCell` borrow rules)
//!    instead of silently corrupting state.
//! 2. The registry lock is always taken before a slot lock, never after.

use std::cell::RefCell;
use std::ops::Deref;
use std::rc::{self, Rc};
use std::sync::{self, Arc};

use parking_lot::{ReentrantMutex, RwLock};

use crate::connection::Registry;

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Exclusive access to an event's registry state.
pub trait RegistryLock<T> {
    /// Wrap `value` in the lock.
    fn new(value: T) -> Self;

    /// Run `f` with exclusive access to the protected value.
    fn with<U>(&self, f: impl FnOnce(&mut T) -> U) -> U;
}

/// Read/write access to a single slot's callable.
pub trait SlotLock<T> {
    /// Wrap `value` in the lock.
    fn new(value: T) -> Self;

    /// Run `f` with shared access.
    fn read<U>(&self, f: impl FnOnce(&T) -> U) -> U;

    /// Run `f` with exclusive access.
    fn write<U>(&self, f: impl FnOnce(&mut T) -> U) -> U;
}

/// Compile-time selection of the synchronization primitives used by
/// [`Event`](crate::Event) and [`Connection`](crate::Connection).
///
/// This trait is sealed; the crate provides [`Local`] and [`Threaded`].
pub trait LockPolicy: sealed::Sealed + Sized + 'static {
    /// Whether values built with this policy may be shared across threads.
    const THREAD_SAFE: bool;

    /// Lock guarding the registry.
    type RegistryLock<T>: RegistryLock<T>;
    /// Lock guarding one slot's callable.
    type SlotLock<T>: SlotLock<T>;
    /// Strong shared pointer.
    type Shared<T: ?Sized>: Clone + Deref<Target = T>;
    /// Non-owning counterpart of [`Self::Shared`].
    type Weak<T: ?Sized>: Clone;
    /// Type-erased subscriber callable.
    type Callback<A: 'static, R: 'static>: Fn(&A) -> R + ?Sized;
    /// Type-erased registry a connection points back to.
    type DynRegistry: Registry + ?Sized;

    /// Move `value` into a new shared allocation.
    fn share<T>(value: T) -> Self::Shared<T>;

    /// Create a weak pointer to `shared`.
    fn downgrade<T: ?Sized>(shared: &Self::Shared<T>) -> Self::Weak<T>;

    /// Recover a strong pointer if the allocation is still alive.
    fn upgrade<T: ?Sized>(weak: &Self::Weak<T>) -> Option<Self::Shared<T>>;
}

/// Single-threaded policy: no synchronization, `!Send` handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Local;

/// Thread-safe policy: reentrant registry lock, per-slot `RwLock`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Threaded;

/// Alias for [`Local`].
pub type SingleThreaded = Local;

/// Alias for [`Threaded`].
pub type ThreadSafe = Threaded;

impl sealed::Sealed for Local {}
impl sealed::Sealed for Threaded {}

impl LockPolicy for Local {
    const THREAD_SAFE: bool = false;

    type RegistryLock<T> = RefCell<T>;
    type SlotLock<T> = RefCell<T>;
    type Shared<T: ?Sized> = Rc<T>;
    type Weak<T: ?Sized> = rc::Weak<T>;
    type Callback<A: 'static, R: 'static> = dyn Fn(&A) -> R;
    type DynRegistry = dyn Registry;

    #[inline]
    fn share<T>(value: T) -> Rc<T> {
        Rc::new(value)
    }

    #[inline]
    fn downgrade<T: ?Sized>(shared: &Rc<T>) -> rc::Weak<T> {
        Rc::downgrade(shared)
    }

    #[inline]
    fn upgrade<T: ?Sized>(weak: &rc::Weak<T>) -> Option<Rc<T>> {
        weak.upgrade()
    }
}

impl LockPolicy for Threaded {
    const THREAD_SAFE: bool = true;

    type RegistryLock<T> = ReentrantMutex<RefCell<T>>;
    type SlotLock<T> = RwLock<T>;
    type Shared<T: ?Sized> = Arc<T>;
    type Weak<T: ?Sized> = sync::Weak<T>;
    type Callback<A: 'static, R: 'static> = dyn Fn(&A) -> R + Send + Sync;
    type DynRegistry = dyn Registry + Send + Sync;

    #[inline]
    fn share<T>(value: T) -> Arc<T> {
        Arc::new(value)
    }

    #[inline]
    fn downgrade<T: ?Sized>(shared: &Arc<T>) -> sync::Weak<T> {
        Arc::downgrade(shared)
    }

    #[inline]
    fn upgrade<T: ?Sized>(weak: &sync::Weak<T>) -> Option<Arc<T>> {
        weak.upgrade()
    }
}

impl<T> RegistryLock<T> for RefCell<T> {
    #[inline]
    fn new(value: T) -> Self {
        RefCell::new(value)
    }

    #[inline]
    fn with<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        f(&mut self.borrow_mut())
    }
}

impl<T> RegistryLock<T> for ReentrantMutex<RefCell<T>> {
    #[inline]
    fn new(value: T) -> Self {
        ReentrantMutex::new(RefCell::new(value))
    }

    #[inline]
    fn with<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let guard = self.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }
}

impl<T> SlotLock<T> for RefCell<T> {
    #[inline]
    fn new(value: T) -> Self {
        RefCell::new(value)
    }

    #[inline]
    fn read<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        f(&self.borrow())
    }

    #[inline]
    fn write<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        f(&mut self.borrow_mut())
    }
}

impl<T> SlotLock<T> for RwLock<T> {
    #[inline]
    fn new(value: T) -> Self {
        RwLock::new(value)
    }

    #[inline]
    fn read<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        f(&RwLock::read(self))
    }

    #[inline]
    fn write<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        f(&mut RwLock::write(self))
    }
}
