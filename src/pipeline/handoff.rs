//! Single-slot, exactly-once handoff from a stage to the supervisor.
//!
//! The map-optimize stage publishes a detached snapshot of its terminal
//! state; the supervisor consumes it once after all stages have finished.
//! A second publish before the consume, or a consume after the producer
//! dropped without publishing, indicates a broken single-producer /
//! single-consumer contract and is surfaced as a hard error rather than
//! masked.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

/// Poll interval while the consumer waits for a payload.
const CONSUME_POLL: Duration = Duration::from_millis(10);

/// Handoff protocol violations. All fatal.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HandoffError {
    #[error("handoff slot already holds an unconsumed payload")]
    AlreadyPublished,

    #[error("handoff payload was already consumed")]
    AlreadyConsumed,

    #[error("handoff producer dropped without publishing a payload")]
    ProducerDropped,
}

#[derive(Debug)]
struct Inner<T> {
    slot: Mutex<Option<T>>,
    published: AtomicBool,
    consumed: AtomicBool,
    acknowledged: AtomicBool,
    producer_dropped: AtomicBool,
}

/// Producer half of the handoff channel.
#[derive(Debug)]
pub struct HandoffSender<T> {
    inner: Arc<Inner<T>>,
}

/// Consumer half of the handoff channel.
#[derive(Debug)]
pub struct HandoffReceiver<T> {
    inner: Arc<Inner<T>>,
}

/// Create a connected single-slot producer/consumer pair.
pub fn handoff_channel<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let inner = Arc::new(Inner {
        slot: Mutex::new(None),
        published: AtomicBool::new(false),
        consumed: AtomicBool::new(false),
        acknowledged: AtomicBool::new(false),
        producer_dropped: AtomicBool::new(false),
    });
    (
        HandoffSender {
            inner: inner.clone(),
        },
        HandoffReceiver { inner },
    )
}

impl<T> HandoffSender<T> {
    /// Place the payload in the slot. The payload must already be a
    /// structurally independent copy of the producer's live state.
    pub fn publish(&self, payload: T) -> Result<(), HandoffError> {
        // The slot is filled under the lock before `published` flips, so
        // a consumer that observes the flag always finds the payload.
        let mut slot = lock_slot(&self.inner.slot);
        if self.inner.published.load(Ordering::Acquire) {
            return Err(HandoffError::AlreadyPublished);
        }
        *slot = Some(payload);
        self.inner.published.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether the consumer has taken the payload. Once true, the producer
    /// may release any resources it held open pending delivery.
    pub fn acknowledged(&self) -> bool {
        self.inner.acknowledged.load(Ordering::Acquire)
    }

    /// Poll until the consumer acknowledges receipt, or give up once the
    /// run flag drops. Returns whether the acknowledgment was observed.
    pub fn wait_for_ack(&self, keep_waiting: impl Fn() -> bool) -> bool {
        while !self.acknowledged() {
            if !keep_waiting() {
                return false;
            }
            std::thread::sleep(CONSUME_POLL);
        }
        true
    }
}

impl<T> Drop for HandoffSender<T> {
    fn drop(&mut self) {
        self.inner.producer_dropped.store(true, Ordering::Release);
    }
}

impl<T> HandoffReceiver<T> {
    /// Block (by polling) until a payload is available, take it, and
    /// acknowledge receipt to the producer.
    pub fn consume(&self) -> Result<T, HandoffError> {
        if self.inner.consumed.load(Ordering::Acquire) {
            return Err(HandoffError::AlreadyConsumed);
        }
        loop {
            if self.inner.published.load(Ordering::Acquire) {
                break;
            }
            if self.inner.producer_dropped.load(Ordering::Acquire) {
                // Re-check: the producer may have published right before
                // dropping its handle.
                if self.inner.published.load(Ordering::Acquire) {
                    break;
                }
                return Err(HandoffError::ProducerDropped);
            }
            std::thread::sleep(CONSUME_POLL);
        }
        if self.inner.consumed.swap(true, Ordering::AcqRel) {
            return Err(HandoffError::AlreadyConsumed);
        }
        let payload = lock_slot(&self.inner.slot)
            .take()
            .ok_or(HandoffError::AlreadyConsumed)?;
        self.inner.acknowledged.store(true, Ordering::Release);
        Ok(payload)
    }

    /// Non-blocking probe for an available payload.
    pub fn is_ready(&self) -> bool {
        self.inner.published.load(Ordering::Acquire)
            && !self.inner.consumed.load(Ordering::Acquire)
    }
}

fn lock_slot<T>(slot: &Mutex<Option<T>>) -> std::sync::MutexGuard<'_, Option<T>> {
    match slot.lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_consume_delivers_once() {
        let (tx, rx) = handoff_channel();
        tx.publish(vec![1u32, 2, 3]).unwrap();
        assert!(rx.is_ready());
        assert_eq!(rx.consume().unwrap(), vec![1, 2, 3]);
        assert!(tx.acknowledged());
    }

    #[test]
    fn second_consume_fails_cleanly() {
        let (tx, rx) = handoff_channel();
        tx.publish(7u64).unwrap();
        assert_eq!(rx.consume().unwrap(), 7);
        assert_eq!(rx.consume().unwrap_err(), HandoffError::AlreadyConsumed);
    }

    #[test]
    fn double_publish_is_a_protocol_violation() {
        let (tx, _rx) = handoff_channel();
        tx.publish(1u8).unwrap();
        assert_eq!(tx.publish(2u8).unwrap_err(), HandoffError::AlreadyPublished);
    }

    #[test]
    fn consume_after_producer_drop_without_publish_fails() {
        let (tx, rx) = handoff_channel::<u8>();
        drop(tx);
        assert_eq!(rx.consume().unwrap_err(), HandoffError::ProducerDropped);
    }

    #[test]
    fn publish_just_before_drop_still_delivers() {
        let (tx, rx) = handoff_channel();
        tx.publish(9i32).unwrap();
        drop(tx);
        assert_eq!(rx.consume().unwrap(), 9);
    }

    #[test]
    fn consumed_payload_is_detached_from_producer_state() {
        let (tx, rx) = handoff_channel();
        let mut live = vec![1u32, 2, 3];
        // The producer publishes a deep copy, then keeps mutating its
        // live state.
        tx.publish(live.clone()).unwrap();
        live.push(4);
        live[0] = 99;
        assert_eq!(rx.consume().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn concurrent_publish_consume_never_loses_payload() {
        // The consumer races the producer on a fresh channel each round;
        // delivery must succeed no matter how the two interleave.
        for round in 0..200u32 {
            let (tx, rx) = handoff_channel();
            let consumer = std::thread::spawn(move || rx.consume());
            tx.publish(round).unwrap();
            assert_eq!(consumer.join().unwrap().unwrap(), round);
            assert!(tx.acknowledged());
        }
    }

    #[test]
    fn consume_blocks_until_publish() {
        let (tx, rx) = handoff_channel();
        let h = std::thread::spawn(move || rx.consume().unwrap());
        std::thread::sleep(Duration::from_millis(30));
        tx.publish(42u32).unwrap();
        assert_eq!(h.join().unwrap(), 42);
        assert!(tx.wait_for_ack(|| true));
    }
}
