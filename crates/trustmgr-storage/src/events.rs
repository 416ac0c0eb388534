// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Storage events and a small channel-based listener registry.
//
// Each listener owns the receiving half of an unbounded channel. Delivery
// never blocks the sender and never happens while the registry lock is held,
// so a listener may call straight back into the component that notified it.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use trustmgr_core::types::PublicKey;

/// Change notifications emitted by the trust store.
///
/// Delivery is at-least-once; handlers must be idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    /// Updates were persisted for these applications but not yet delivered.
    PendingChanges(Vec<PublicKey>),
    /// The peers confirmed the pending updates.
    PendingChangesCompleted(Vec<PublicKey>),
    /// All claimed-application state was wiped.
    StorageReset,
    /// Claimed applications were deleted, explicitly or by cascade.
    ApplicationsRemoved(Vec<PublicKey>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A registered listener: its id and its event stream.
#[derive(Debug)]
pub struct Subscription<E> {
    pub id: ListenerId,
    pub events: UnboundedReceiver<E>,
}

/// Fan-out of cloned events to registered listeners.
#[derive(Debug)]
pub struct ListenerRegistry<E> {
    next_id: AtomicU64,
    senders: Mutex<Vec<(ListenerId, UnboundedSender<E>)>>,
}

impl<E: Clone> ListenerRegistry<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            senders: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self) -> Subscription<E> {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push((id, tx));
        debug!(listener = id.0, "listener registered");
        Subscription { id, events: rx }
    }

    /// Returns `false` if `id` was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut senders = self.lock();
        let before = senders.len();
        senders.retain(|(existing, _)| *existing != id);
        senders.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener. Listeners whose receiver was
    /// dropped are pruned.
    pub fn notify(&self, event: E) {
        let targets: Vec<_> = self.lock().clone();

        let mut closed = Vec::new();
        for (id, tx) in &targets {
            if tx.send(event.clone()).is_err() {
                closed.push(*id);
            }
        }

        if !closed.is_empty() {
            self.lock().retain(|(id, _)| !closed.contains(id));
            debug!(pruned = closed.len(), "dropped closed listeners");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, UnboundedSender<E>)>> {
        // The vector stays consistent even if a holder panicked.
        self.senders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E: Clone> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listener_receives_each_event() {
        let registry = ListenerRegistry::new();
        let mut a = registry.register();
        let mut b = registry.register();

        registry.notify(StorageEvent::StorageReset);

        assert_eq!(a.events.try_recv().unwrap(), StorageEvent::StorageReset);
        assert_eq!(b.events.try_recv().unwrap(), StorageEvent::StorageReset);
        assert!(a.events.try_recv().is_err());
    }

    #[test]
    fn unregistered_listener_receives_nothing() {
        let registry = ListenerRegistry::new();
        let mut sub = registry.register();
        assert!(registry.unregister(sub.id));
        assert!(!registry.unregister(sub.id));

        registry.notify(StorageEvent::StorageReset);
        assert!(sub.events.try_recv().is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let registry: ListenerRegistry<StorageEvent> = ListenerRegistry::new();
        let kept = registry.register();
        drop(registry.register());
        assert_eq!(registry.len(), 2);

        registry.notify(StorageEvent::StorageReset);
        assert_eq!(registry.len(), 1);
        drop(kept);
    }
}
