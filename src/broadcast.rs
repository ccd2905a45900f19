//! Registry of live WebSocket subscribers and best-effort fan-out.
//!
//! Each subscriber owns a bounded queue drained by its socket writer. A
//! broadcast never waits: a subscriber whose queue is full or whose writer is
//! gone is removed, and delivery to everyone else continues.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};

/// Frames queued per subscriber before it counts as stalled
pub const SUBSCRIBER_QUEUE: usize = 16;

pub type ConnectionId = u64;

/// One serialized frame, shared by every subscriber queue
pub type Frame = Arc<str>;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<ConnectionId, Sender<Frame>>>,
}

/// Outcome of one broadcast
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: Vec<ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber; the receiver feeds its socket writer.
    pub fn register(&self) -> (ConnectionId, Receiver<Frame>) {
        self.register_with_capacity(SUBSCRIBER_QUEUE)
    }

    pub fn register_with_capacity(&self, capacity: usize) -> (ConnectionId, Receiver<Frame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        log::info!("[WS] Client {} connected ({} total)", id, self.len());
        (id, rx)
    }

    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            log::info!("[WS] Client {} disconnected ({} total)", id, self.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `message` for every subscriber.
    ///
    /// Iterates over a snapshot of the registry so registration is never
    /// blocked by a broadcast in progress.
    pub fn broadcast(&self, message: &str) -> BroadcastReport {
        let snapshot: Vec<(ConnectionId, Sender<Frame>)> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let frame: Frame = Arc::from(message);
        let mut report = BroadcastReport::default();
        for (id, tx) in snapshot {
            match tx.try_send(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    log::warn!("[WS] Client {} is not keeping up, dropping it", id);
                    report.dropped.push(id);
                }
                Err(TrySendError::Closed(_)) => report.dropped.push(id),
            }
        }

        for id in &report.dropped {
            self.unregister(*id);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = registry.register();
        let (b, _rx_b) = registry.register();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert!(registry.unregister(a));
        assert!(!registry.unregister(a));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_subscriber_removed_others_delivered() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let (id, rx) = registry.register();
            ids.push(id);
            receivers.push(Some(rx));
        }
        // Subscriber 2 goes away
        receivers[2] = None;

        let report = registry.broadcast("tick");
        assert_eq!(report.delivered, 4);
        assert_eq!(report.dropped, vec![ids[2]]);
        assert_eq!(registry.len(), 4);

        for (i, rx) in receivers.iter_mut().enumerate() {
            if let Some(rx) = rx {
                assert_eq!(&*rx.try_recv().unwrap(), "tick", "subscriber {}", i);
            }
        }
    }

    #[test]
    fn test_stalled_subscriber_dropped() {
        let registry = ConnectionRegistry::new();
        let (slow, _slow_rx) = registry.register_with_capacity(2);
        let (_fast, mut fast_rx) = registry.register_with_capacity(2);

        for i in 0..3 {
            registry.broadcast(&format!("msg {}", i));
            // Fast subscriber keeps draining
            assert!(fast_rx.try_recv().is_ok());
        }
        assert_eq!(registry.len(), 1);
        assert!(!registry.unregister(slow));
    }

    #[test]
    fn test_subscribers_share_one_frame() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();
        registry.broadcast("snapshot");

        let a = rx_a.try_recv().unwrap();
        let b = rx_b.try_recv().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(&*a, "snapshot");
    }

    #[test]
    fn test_broadcast_to_empty_registry() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.broadcast("x"), BroadcastReport::default());
    }
}
