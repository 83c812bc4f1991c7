#![forbid(unsafe_code)]

//! Tether: multicast events with revocable RAII connections.
//!
//! # Role
//! `tether-core` lets an owner broadcast a call to any number of
//! subscribers. Each subscription is represented by a [`Connection`] whose
//! lifetime bounds the subscriber's: drop the handle and the subscriber is
//! never invoked again.
//!
//! # Primary responsibilities
//! - **Event**: registry of subscribers plus a synchronous, reentrancy-safe
//!   dispatcher ([`Event::emit`], [`Event::notify`], [`Event::dispatch_with`]).
//! - **Connection**: move-only handle that disconnects on drop and becomes
//!   inert when its event is dropped first.
//! - **Collectors**: strategies for combining subscriber results
//!   ([`Collect`], [`Discard`], [`Fold`]).
//! - **Lock policies**: [`Local`] for single-threaded use, [`Threaded`] for
//!   events shared across threads.
//!
//! # Invariants
//! - A subscriber disconnected before a dispatch starts is not invoked by it.
//! - Subscribers may connect, disconnect (themselves or others), and
//!   dispatch the same event recursively from inside a callback.
//! - Dispatch visits subscribers in registration order.
//!
//! # Example
//!
//! ```
//! use tether_core::{Connection, Event};
//!
//! let resized: Event<(u16, u16)> = Event::new();
//! let mut conn: Connection = resized.connect(|(w, h)| {
//!     assert!(*w > 0 && *h > 0);
//! });
//! resized.notify(&(80, 24));
//! conn.disconnect();
//! assert!(!resized.has_subscribers());
//! ```

pub mod collect;
pub mod connection;
pub mod error;
pub mod event;
pub mod policy;
mod slot;

pub use collect::{Collect, Collector, Discard, Fold};
pub use connection::{Connection, ConnectionState, Registry};
pub use error::DisconnectError;
pub use event::{Event, EventConfig, SyncEvent};
pub use policy::{Local, LockPolicy, RegistryLock, SingleThreaded, SlotLock, ThreadSafe, Threaded};
pub use slot::SlotKey;

/// Connection handle for a [`SyncEvent`].
pub type SyncConnection = Connection<Threaded>;
