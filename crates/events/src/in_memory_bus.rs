//! In-memory notice bus.

use std::sync::{Mutex, mpsc};

use crate::bus::{EventBus, Scoped, Subscription};
use crate::envelope::SessionId;

#[derive(Debug)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    Poisoned,
}

#[derive(Debug)]
struct Subscriber<M> {
    scope: Option<SessionId>,
    sender: mpsc::Sender<M>,
}

/// In-memory pub/sub bus with per-session fan-out.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<Subscriber<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, scope: Option<SessionId>) -> Subscription<M> {
        let (sender, rx) = mpsc::channel();

        // A poisoned lock still yields a subscription; it just never receives.
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(Subscriber { scope, sender }),
            Err(_) => tracing::warn!("notice bus lock poisoned; subscription will stay empty"),
        }

        Subscription::new(rx)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Scoped + Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        let session = message.session_id();

        // Dead subscribers are dropped while publishing.
        subs.retain(|sub| match sub.scope {
            Some(scope) if scope != session => true,
            _ => sub.sender.send(message.clone()).is_ok(),
        });

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        self.register(None)
    }

    fn subscribe_session(&self, session_id: SessionId) -> Subscription<M> {
        self.register(Some(session_id))
    }
}
