//! Notice publishing/subscription abstraction.
//!
//! The bus replaces a globally reachable "reload everything" callback: a view
//! subscribes for its own session and refreshes when a notice arrives. Delivery
//! is at-least-once and best-effort; the ledger store stays the source of truth,
//! so a missed notice only delays a refresh.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use crate::envelope::SessionId;

/// Messages that belong to a session.
pub trait Scoped {
    fn session_id(&self) -> SessionId;
}

/// A subscription to the notice stream.
///
/// Intended for a single consuming thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything already delivered without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Pub/sub bus for ledger notices.
///
/// `publish()` failures are surfaced to the caller, which logs them; the
/// transition that produced the notice has already been committed.
pub trait EventBus<M: Scoped>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    /// Receive every published message.
    fn subscribe(&self) -> Subscription<M>;

    /// Receive only the messages published for `session_id`.
    fn subscribe_session(&self, session_id: SessionId) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    M: Scoped,
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }

    fn subscribe_session(&self, session_id: SessionId) -> Subscription<M> {
        (**self).subscribe_session(session_id)
    }
}
