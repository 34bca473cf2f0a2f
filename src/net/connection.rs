//! Connection identity and the live-connection count of a server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier used to correlate a connection's log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Count of open connections, observable by a closing server.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    live: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (live, _) = watch::channel(0);
        Self {
            live: Arc::new(live),
        }
    }

    /// Register an accepted connection holding `permit` until it closes.
    pub fn open(&self, permit: OwnedSemaphorePermit) -> ConnectionSlot {
        self.live.send_modify(|n| *n += 1);
        ConnectionSlot {
            id: ConnectionId::next(),
            live: Arc::clone(&self.live),
            _permit: permit,
        }
    }

    pub fn live(&self) -> u64 {
        *self.live.borrow()
    }

    /// Wait for every connection to close, giving up after `limit`.
    ///
    /// Returns whether the count reached zero in time.
    pub async fn drained(&self, limit: Duration) -> bool {
        let mut rx = self.live.subscribe();
        let drained = matches!(
            tokio::time::timeout(limit, rx.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        );
        drained
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// An open connection's place in the tracker and the listener's limit.
/// Dropping it frees both.
#[derive(Debug)]
pub struct ConnectionSlot {
    id: ConnectionId,
    live: Arc<watch::Sender<u64>>,
    _permit: OwnedSemaphorePermit,
}

impl ConnectionSlot {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.live.send_modify(|n| *n = n.saturating_sub(1));
        tracing::trace!(connection_id = %self.id, "Connection slot released");
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::Semaphore;

    use super::*;

    async fn permit(limit: &Arc<Semaphore>) -> OwnedSemaphorePermit {
        Arc::clone(limit).acquire_owned().await.unwrap()
    }

    #[tokio::test]
    async fn slots_count_and_release() {
        let limit = Arc::new(Semaphore::new(2));
        let tracker = ConnectionTracker::new();

        let first = tracker.open(permit(&limit).await);
        let second = tracker.open(permit(&limit).await);
        assert_eq!(tracker.live(), 2);
        assert_ne!(first.id(), second.id());
        assert_eq!(limit.available_permits(), 0);

        drop(first);
        assert_eq!(tracker.live(), 1);
        assert_eq!(limit.available_permits(), 1);
        drop(second);
        assert_eq!(tracker.live(), 0);
    }

    #[tokio::test]
    async fn drained_waits_for_open_slots() {
        let limit = Arc::new(Semaphore::new(1));
        let tracker = ConnectionTracker::new();
        assert!(tracker.drained(Duration::from_millis(10)).await);

        let slot = tracker.open(permit(&limit).await);
        assert!(!tracker.drained(Duration::from_millis(30)).await);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(slot);
        });
        assert!(tracker.drained(Duration::from_secs(2)).await);
    }

    #[test]
    fn ids_display_with_prefix() {
        assert!(ConnectionId::next().to_string().starts_with("conn-"));
    }
}
