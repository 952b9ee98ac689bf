// src/root/publish.rs

//! Fan-out of unilateral root events.
//!
//! Settled and cancelled notices are broadcast to every current subscriber.
//! Each subscriber owns its own unbounded queue and pulls at its own pace,
//! so a slow trigger thread can never stall delivery to the others.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use serde::Serialize;

/// Payload of a unilateral event published by a root.
#[derive(Debug, Serialize)]
pub struct UnilateralEvent {
    pub root: PathBuf,
    /// Root generation counter at publish time.
    pub tick: u64,
    /// Clock string, `c:<root-number>:<tick>`.
    pub clock: String,
    /// True exactly once per quiescent period.
    pub settled: bool,
    /// True when the root has been cancelled; terminal for subscribers.
    pub canceled: bool,
}

/// Broadcast publisher with one queue per subscriber.
#[derive(Default)]
pub struct Publisher {
    senders: Mutex<Vec<Sender<Arc<UnilateralEvent>>>>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscriber {
        let (tx, rx) = unbounded();
        self.senders.lock().push(tx);
        Subscriber { rx }
    }

    /// Deliver `event` to every live subscriber, dropping queues whose
    /// subscriber has gone away.
    pub fn enqueue(&self, event: UnilateralEvent) {
        let event = Arc::new(event);
        self.senders
            .lock()
            .retain(|tx| tx.send(Arc::clone(&event)).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().len()
    }
}

/// Receiving side of a subscription.
pub struct Subscriber {
    rx: Receiver<Arc<UnilateralEvent>>,
}

impl Subscriber {
    /// Non-blocking: the next buffered event, if any.
    pub fn get_next(&self) -> Option<Arc<UnilateralEvent>> {
        self.rx.try_recv().ok()
    }

    /// Block for up to `timeout` waiting for the next event.
    ///
    /// Returns `Ok(None)` when the publisher side has been dropped.
    pub fn wait_next(
        &self,
        timeout: Duration,
    ) -> Result<Option<Arc<UnilateralEvent>>, RecvTimeoutError> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(e @ RecvTimeoutError::Timeout) => Err(e),
        }
    }

    /// The raw channel, for use in `crossbeam_channel::select!`.
    pub fn channel(&self) -> &Receiver<Arc<UnilateralEvent>> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(tick: u64, settled: bool) -> UnilateralEvent {
        UnilateralEvent {
            root: PathBuf::from("/r"),
            tick,
            clock: format!("c:1:{tick}"),
            settled,
            canceled: false,
        }
    }

    #[test]
    fn every_subscriber_sees_every_event() {
        let publisher = Publisher::new();
        let a = publisher.subscribe();
        let b = publisher.subscribe();

        publisher.enqueue(event(1, true));
        publisher.enqueue(event(2, true));

        assert_eq!(a.get_next().unwrap().tick, 1);
        assert_eq!(a.get_next().unwrap().tick, 2);
        assert_eq!(b.get_next().unwrap().tick, 1);
        assert_eq!(b.get_next().unwrap().tick, 2);
        assert!(a.get_next().is_none());
    }

    #[test]
    fn slow_subscriber_does_not_block_publish() {
        let publisher = Publisher::new();
        let _slow = publisher.subscribe();
        let fast = publisher.subscribe();

        for tick in 0..1000 {
            publisher.enqueue(event(tick, true));
        }
        // The fast subscriber drains; the slow one never reads and that is fine.
        let mut seen = 0;
        while fast.get_next().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 1000);
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let publisher = Publisher::new();
        let sub = publisher.subscribe();
        drop(sub);

        publisher.enqueue(event(1, true));
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
