//! Capabilities shared by every layer of a chain.
//!
//! A chain is wired at construction time: each layer owns the [`Transmit`]
//! below it and hands the layer beneath a [`Deliver`] callback for inbound
//! data. Layers never own the layer above them.

use crate::error::Result;
use bytes::Bytes;

/// Downward capability: push data towards the socket.
pub trait Transmit: Send + Sync + 'static {
    /// Queue `data` for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Disconnected`] once the session is closing.
    fn send(&self, data: Bytes) -> Result<()>;

    /// Request the underlying session to close.
    ///
    /// Returns `true` only for the call that actually initiated the close.
    fn close(&self) -> bool;

    /// Whether the underlying session has left the open state.
    fn is_closed(&self) -> bool;
}

/// Upward capability: receive data coming from the socket.
///
/// Invoked only from the owning session's driver task, so implementations
/// may keep unsynchronized state.
pub trait Deliver: Send + 'static {
    /// Handle inbound data.
    ///
    /// # Errors
    ///
    /// Returning an error closes the session.
    fn deliver(&mut self, data: Bytes) -> Result<()>;

    /// The session has reached the closed state. Called exactly once.
    fn closed(&mut self) {}
}

impl<T: Transmit + ?Sized> Transmit for Box<T> {
    fn send(&self, data: Bytes) -> Result<()> {
        (**self).send(data)
    }

    fn close(&self) -> bool {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

impl<T: Deliver + ?Sized> Deliver for Box<T> {
    fn deliver(&mut self, data: Bytes) -> Result<()> {
        (**self).deliver(data)
    }

    fn closed(&mut self) {
        (**self).closed();
    }
}
