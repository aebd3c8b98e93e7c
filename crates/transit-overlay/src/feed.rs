//! Push channel for entity snapshots.
//!
//! Uses platform-agnostic `async_channel` so producers can live on any
//! executor (or none). The overlay drains the receiver at the start of each
//! animation tick; only the newest snapshot is applied.

use crate::entity::EntityRecord;
use crate::error::{Error, Result};

/// A full snapshot of the live entity list.
pub type Snapshot = Vec<EntityRecord>;

/// Create a connected feed sender/receiver pair.
pub fn channel() -> (FeedSender, FeedReceiver) {
    let (tx, rx) = async_channel::unbounded();
    (FeedSender { tx }, FeedReceiver { rx })
}

/// Producer side of the entity feed. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FeedSender {
    tx: async_channel::Sender<Snapshot>,
}

impl FeedSender {
    /// Push a snapshot without waiting.
    pub fn push(&self, snapshot: Snapshot) -> Result<()> {
        self.tx.try_send(snapshot).map_err(|_| Error::FeedClosed)
    }

    /// Push a snapshot from async code.
    pub async fn send(&self, snapshot: Snapshot) -> Result<()> {
        self.tx.send(snapshot).await.map_err(|_| Error::FeedClosed)
    }

    /// Returns whether the overlay side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the entity feed, owned by the overlay.
#[derive(Debug)]
pub struct FeedReceiver {
    rx: async_channel::Receiver<Snapshot>,
}

impl FeedReceiver {
    /// Drain every pending snapshot and return the newest, if any.
    pub fn latest(&self) -> Option<Snapshot> {
        let mut latest = None;
        let mut skipped = 0usize;
        while let Ok(snapshot) = self.rx.try_recv() {
            if latest.is_some() {
                skipped += 1;
            }
            latest = Some(snapshot);
        }
        if skipped > 0 {
            tracing::debug!(skipped, "superseded feed snapshots dropped");
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(ids: &[&str]) -> Snapshot {
        ids.iter()
            .map(|id| EntityRecord {
                id: (*id).to_string(),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_latest_wins() {
        let (tx, rx) = channel();
        assert!(rx.latest().is_none());

        tx.push(snapshot(&["a"])).unwrap();
        tx.push(snapshot(&["a", "b"])).unwrap();
        tx.push(snapshot(&["c"])).unwrap();

        let latest = rx.latest().unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, "c");

        // Drained.
        assert!(rx.latest().is_none());
    }

    #[test]
    fn test_push_after_receiver_dropped() {
        let (tx, rx) = channel();
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.push(snapshot(&["a"])), Err(Error::FeedClosed));
    }
}
