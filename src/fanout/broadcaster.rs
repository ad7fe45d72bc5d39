//! Single-writer, multi-reader pub/sub over a bounded broadcast ring.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};

use super::events::{Published, PushEvent};

/// Publishes ledger changes. Sending never waits on observers: each one reads
/// from a shared ring of `capacity` slots and loses the oldest events if it
/// falls behind.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<Published>,
    // held across send so sequence numbers go out in order
    next_seq: Arc<Mutex<u64>>,
}

/// What an observer gets from `Observer::recv`.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(Published),
    /// The observer fell behind and `skipped` events were dropped for it.
    /// It should pull a fresh snapshot from the ledger.
    Lagged { skipped: u64 },
}

pub struct Observer {
    rx: broadcast::Receiver<Published>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        info!("Fan-out broadcaster initialized with capacity {}", capacity);
        Self {
            tx,
            next_seq: Arc::new(Mutex::new(1)),
        }
    }

    /// Publish to every connected observer. Returns the number reached; zero
    /// observers is not an error.
    pub fn publish(&self, event: PushEvent) -> usize {
        let mut seq = self.next_seq.lock().unwrap_or_else(|p| p.into_inner());
        let published = Published { seq: *seq, event };
        *seq += 1;

        match self.tx.send(published) {
            Ok(count) => {
                debug!(observers = count, "Published ledger event");
                count
            }
            Err(_) => 0,
        }
    }

    /// New observers only see events published after this call.
    pub fn subscribe(&self) -> Observer {
        Observer {
            rx: self.tx.subscribe(),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub(crate) fn raw_receiver(&self) -> broadcast::Receiver<Published> {
        self.tx.subscribe()
    }
}

impl Observer {
    /// `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.rx.recv().await {
            Ok(published) => Some(Delivery::Event(published)),
            Err(RecvError::Lagged(skipped)) => Some(Delivery::Lagged { skipped }),
            Err(RecvError::Closed) => None,
        }
    }

    pub fn try_recv(&mut self) -> Option<Delivery> {
        use broadcast::error::TryRecvError;
        match self.rx.try_recv() {
            Ok(published) => Some(Delivery::Event(published)),
            Err(TryRecvError::Lagged(skipped)) => Some(Delivery::Lagged { skipped }),
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deleted(student_id: u64) -> PushEvent {
        PushEvent::StudentDeleted { student_id }
    }

    #[tokio::test]
    async fn every_observer_sees_events_in_publish_order() {
        let broadcaster = Broadcaster::new(16);
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        for id in 1..=3 {
            assert_eq!(broadcaster.publish(deleted(id)), 2);
        }

        for observer in [&mut a, &mut b] {
            for id in 1..=3 {
                let Some(Delivery::Event(p)) = observer.recv().await else {
                    panic!("expected event");
                };
                assert_eq!(p.seq, id);
                assert_eq!(p.event, deleted(id));
            }
        }
    }

    #[tokio::test]
    async fn late_observers_get_no_replay() {
        let broadcaster = Broadcaster::new(16);
        assert_eq!(broadcaster.publish(deleted(1)), 0);

        let mut late = broadcaster.subscribe();
        assert_eq!(late.try_recv(), None);

        broadcaster.publish(deleted(2));
        let Some(Delivery::Event(p)) = late.recv().await else {
            panic!("expected event");
        };
        assert_eq!(p.event, deleted(2));
    }

    #[tokio::test]
    async fn slow_observer_lags_without_blocking_others() {
        let broadcaster = Broadcaster::new(2);
        let mut slow = broadcaster.subscribe();
        let mut fast = broadcaster.subscribe();

        for id in 1..=5 {
            broadcaster.publish(deleted(id));
            // fast observer keeps up
            assert!(matches!(fast.recv().await, Some(Delivery::Event(_))));
        }

        assert_eq!(slow.recv().await, Some(Delivery::Lagged { skipped: 3 }));
        let Some(Delivery::Event(p)) = slow.recv().await else {
            panic!("expected event");
        };
        assert_eq!(p.seq, 4);
    }

    #[test]
    fn observer_count_tracks_subscriptions() {
        let broadcaster = Broadcaster::new(4);
        let first = broadcaster.subscribe();
        let _second = broadcaster.subscribe();
        assert_eq!(broadcaster.observer_count(), 2);
        drop(first);
        assert_eq!(broadcaster.observer_count(), 1);
    }
}
