//! Change propagation between store writers and their observers.
//!
//! Every successful write publishes a [`ChangeEvent`] on a [`ChangeBus`].
//! Publishing is synchronous: when `publish` returns, the event is queued in
//! every live [`Subscription`]. Changes made by other processes reach the bus
//! through a [`FileWatcher`] or the HTTP event stream, with whatever latency
//! the underlying notification has.

pub mod watcher;

pub use watcher::FileWatcher;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{trace, warn};

use crate::storage::CatalogName;

const BUS_CAPACITY: usize = 256;

/// Which store a change touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "store", content = "catalog", rename_all = "lowercase")]
pub enum ChangeKind {
    Catalog(CatalogName),
    Overrides,
    /// Events were dropped; observers must recompute from scratch.
    Resync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Written through this process.
    Local,
    /// Observed on disk or over the network.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub revision: u64,
    pub origin: Origin,
}

impl ChangeEvent {
    pub fn touches_catalogs(&self) -> bool {
        matches!(self.kind, ChangeKind::Catalog(_) | ChangeKind::Resync)
    }

    pub fn touches_overrides(&self) -> bool {
        matches!(self.kind, ChangeKind::Overrides | ChangeKind::Resync)
    }
}

/// In-process broadcast channel for store changes.
#[derive(Clone)]
pub struct ChangeBus {
    sender: broadcast::Sender<ChangeEvent>,
    revision: Arc<AtomicU64>,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            sender,
            revision: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Announce a change written by this process.
    pub fn publish(&self, kind: ChangeKind) -> ChangeEvent {
        self.emit(kind, Origin::Local)
    }

    /// Announce a change observed from outside this process.
    pub fn publish_external(&self, kind: ChangeKind) -> ChangeEvent {
        self.emit(kind, Origin::External)
    }

    fn emit(&self, kind: ChangeKind, origin: Origin) -> ChangeEvent {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let event = ChangeEvent {
            kind,
            revision,
            origin,
        };
        // Having no subscribers is fine.
        let delivered = self.sender.send(event).unwrap_or(0);
        trace!(?kind, ?origin, revision, delivered, "change published");
        event
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            revision: Arc::clone(&self.revision),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }
}

fn resync(revision: &AtomicU64) -> ChangeEvent {
    ChangeEvent {
        kind: ChangeKind::Resync,
        revision: revision.load(Ordering::SeqCst),
        origin: Origin::Local,
    }
}

/// A live registration on a [`ChangeBus`]. Dropping it unsubscribes.
pub struct Subscription {
    receiver: broadcast::Receiver<ChangeEvent>,
    revision: Arc<AtomicU64>,
}

impl Subscription {
    /// Wait for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "change subscriber lagged, forcing resync");
                Some(resync(&self.revision))
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Next already-queued event, if any.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "change subscriber lagged, forcing resync");
                Some(resync(&self.revision))
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_every_subscriber_before_returning() {
        let bus = ChangeBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let sent = bus.publish(ChangeKind::Catalog(CatalogName::Custom));

        assert_eq!(a.try_recv(), Some(sent));
        assert_eq!(b.try_recv(), Some(sent));
        assert_eq!(a.try_recv(), None);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = ChangeBus::new();
        let event = bus.publish(ChangeKind::Overrides);
        assert_eq!(event.revision, 1);
        assert_eq!(bus.revision(), 1);
    }

    #[test]
    fn test_revisions_increase() {
        let bus = ChangeBus::new();
        let first = bus.publish(ChangeKind::Overrides);
        let second = bus.publish_external(ChangeKind::Catalog(CatalogName::Default));
        assert!(second.revision > first.revision);
        assert_eq!(second.origin, Origin::External);
    }

    #[test]
    fn test_dropped_subscription_unsubscribes() {
        let bus = ChangeBus::new();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_lagging_subscriber_gets_resync() {
        let bus = ChangeBus::new();
        let mut sub = bus.subscribe();
        for _ in 0..(BUS_CAPACITY + 10) {
            bus.publish(ChangeKind::Overrides);
        }
        let event = sub.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::Resync);
        assert!(event.touches_catalogs());
        assert!(event.touches_overrides());
    }

    #[tokio::test]
    async fn test_recv_async() {
        let bus = ChangeBus::new();
        let mut sub = bus.subscribe();
        let publisher = bus.clone();
        tokio::spawn(async move {
            publisher.publish(ChangeKind::Catalog(CatalogName::Custom));
        });
        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Catalog(CatalogName::Custom));
    }

    #[test]
    fn test_event_json_shape() {
        let event = ChangeEvent {
            kind: ChangeKind::Catalog(CatalogName::Custom),
            revision: 3,
            origin: Origin::Local,
        };
        let value = serde_json::to_value(event).unwrap();
        assert_eq!(value["kind"]["store"], "catalog");
        assert_eq!(value["kind"]["catalog"], "custom");
        assert_eq!(value["origin"], "local");
    }
}
