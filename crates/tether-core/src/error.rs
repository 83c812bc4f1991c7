//! Diagnostic errors.
//!
//! Dispatch, connect, and disconnect never fail. [`DisconnectError`] only
//! explains why [`Connection::try_disconnect`](crate::Connection::try_disconnect)
//! had nothing to do; [`Connection::disconnect`](crate::Connection::disconnect)
//! and `Drop` discard it.

use std::fmt;

/// Why a disconnect request was a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectError {
    /// The handle was already disconnected.
    Retired,
    /// The owning event was dropped before the handle.
    Orphaned,
    /// The event no longer holds this subscriber (for example after
    /// [`Event::disconnect_all`](crate::Event::disconnect_all)).
    NotRegistered,
}

impl fmt::Display for DisconnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retired => write!(f, "connection already disconnected"),
            Self::Orphaned => write!(f, "owning event was dropped"),
            Self::NotRegistered => write!(f, "subscriber is no longer registered"),
        }
    }
}

impl std::error::Error for DisconnectError {}
