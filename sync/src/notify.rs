//! Sync event notifications.
//!
//! Surrounding layers (bridge, editors, status UI) observe sync through
//! callbacks. Subscriptions return a handle; dropping the handle
//! unregisters the callback, so an observer that outlives the engine is
//! impossible by construction and no lifecycle cycle exists.
//!
//! Events are delivered from a dedicated dispatch task, the process's
//! "UI thread equivalent": emitting is a channel send, never a
//! re-entrant callback on the engine's own task.

use crate::state::{SyncPhase, SyncReport};
use carrel_core::ConflictInfo;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events surfaced to observers.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Overall sync progress in `0..=1`
    Progress(f64),
    /// A conflict was detected and needs (or got) resolution
    ConflictDetected(Box<ConflictInfo>),
    PhaseChanged(SyncPhase),
    Completed(SyncReport),
}

/// A registered observer callback.
pub type EventCallback = Box<dyn Fn(&SyncEvent) + Send + Sync + 'static>;

/// Fan-out of sync events to registered observers.
pub struct Notifier {
    subscribers: Arc<DashMap<u64, EventCallback>>,
    next_id: AtomicU64,
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl Notifier {
    /// Create the notifier and spawn its dispatch task.
    pub fn new() -> Arc<Self> {
        let subscribers: Arc<DashMap<u64, EventCallback>> = Arc::new(DashMap::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<SyncEvent>();

        let dispatch_targets = Arc::clone(&subscribers);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for entry in dispatch_targets.iter() {
                    (entry.value())(&event);
                }
            }
        });

        Arc::new(Self {
            subscribers,
            next_id: AtomicU64::new(1),
            tx,
        })
    }

    /// Register a callback. The callback fires until the returned handle
    /// is dropped.
    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, callback);
        SubscriptionHandle {
            id,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Queue an event for dispatch.
    pub fn emit(&self, event: SyncEvent) {
        // Send fails only when the dispatcher is gone at shutdown.
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Unregisters its callback on drop.
pub struct SubscriptionHandle {
    id: u64,
    subscribers: Arc<DashMap<u64, EventCallback>>,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.subscribers.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let notifier = Notifier::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_cb = Arc::clone(&seen);
        let _handle = notifier.subscribe(Box::new(move |event| {
            if matches!(event, SyncEvent::Progress(_)) {
                seen_in_cb.fetch_add(1, Ordering::SeqCst);
            }
        }));

        notifier.emit(SyncEvent::Progress(0.25));
        notifier.emit(SyncEvent::Progress(0.5));

        // The dispatch task runs asynchronously.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropping_the_handle_unregisters() {
        let notifier = Notifier::new();
        let handle = notifier.subscribe(Box::new(|_| {}));
        assert_eq!(notifier.subscriber_count(), 1);
        drop(handle);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribed_callbacks_stop_firing() {
        let notifier = Notifier::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_cb = Arc::clone(&seen);
        let handle = notifier.subscribe(Box::new(move |_| {
            seen_in_cb.fetch_add(1, Ordering::SeqCst);
        }));

        notifier.emit(SyncEvent::Progress(0.1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(handle);
        notifier.emit(SyncEvent::Progress(0.2));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
