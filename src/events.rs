//! Pipeline event channel: a bounded multi-producer single-consumer queue
//! that sheds the OLDEST pending event when full. Adapters must never
//! block on the pipeline; under sustained backpressure the freshest events
//! win and every shed entry is counted by the sending adapter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::models::RawEvent;

#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The queue was full; the oldest pending event was evicted to make
    /// room for this one.
    ShedOldest,
    /// The receiver is gone; the pipeline is shutting down.
    Closed,
}

struct QueueShared {
    buf: Mutex<VecDeque<RawEvent>>,
    notify: Notify,
    capacity: usize,
    senders: AtomicUsize,
    receiver_gone: AtomicBool,
}

pub struct EventSender {
    shared: Arc<QueueShared>,
}

pub struct EventReceiver {
    shared: Arc<QueueShared>,
}

pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let shared = Arc::new(QueueShared {
        buf: Mutex::new(VecDeque::with_capacity(capacity)),
        notify: Notify::new(),
        capacity,
        senders: AtomicUsize::new(1),
        receiver_gone: AtomicBool::new(false),
    });
    (
        EventSender {
            shared: Arc::clone(&shared),
        },
        EventReceiver { shared },
    )
}

impl EventSender {
    /// Enqueue without blocking. When the queue is at capacity the front
    /// (oldest) entry is dropped to make room.
    pub fn send(&self, event: RawEvent) -> SendOutcome {
        if self.shared.receiver_gone.load(Ordering::Acquire) {
            return SendOutcome::Closed;
        }

        let shed = {
            let mut buf = self.shared.buf.lock().unwrap_or_else(|e| e.into_inner());
            let shed = if buf.len() >= self.shared.capacity {
                buf.pop_front().is_some()
            } else {
                false
            };
            buf.push_back(event);
            shed
        };

        self.shared.notify.notify_one();
        if shed {
            SendOutcome::ShedOldest
        } else {
            SendOutcome::Queued
        }
    }
}

impl Clone for EventSender {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for EventSender {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last sender gone: wake the receiver so it can observe closure.
            self.shared.notify.notify_one();
        }
    }
}

impl EventReceiver {
    /// Next pending event, oldest first. Returns `None` once every sender
    /// has been dropped and the queue is drained.
    pub async fn recv(&mut self) -> Option<RawEvent> {
        loop {
            {
                let mut buf = self.shared.buf.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(event) = buf.pop_front() {
                    return Some(event);
                }
            }
            if self.shared.senders.load(Ordering::Acquire) == 0 {
                // Drained and closed.
                return None;
            }
            self.shared.notify.notified().await;
        }
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        self.shared.receiver_gone.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceId;

    fn event(hash: &str) -> RawEvent {
        RawEvent {
            source: SourceId::EthPoll,
            blockchain: "ethereum".to_string(),
            tx_hash: hash.to_string(),
            log_index: 0,
            sequence: 0,
            block_ref: None,
            from_addr: "0xa".to_string(),
            to_addr: "0xb".to_string(),
            symbol: "WETH".to_string(),
            amount: 1.0,
            usd_value: 3_000.0,
            timestamp: 0,
            raw: None,
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = event_queue(8);
        assert_eq!(tx.send(event("0x1")), SendOutcome::Queued);
        assert_eq!(tx.send(event("0x2")), SendOutcome::Queued);

        assert_eq!(rx.recv().await.unwrap().tx_hash, "0x1");
        assert_eq!(rx.recv().await.unwrap().tx_hash, "0x2");
    }

    #[tokio::test]
    async fn test_full_queue_sheds_oldest() {
        let (tx, mut rx) = event_queue(2);
        assert_eq!(tx.send(event("0x1")), SendOutcome::Queued);
        assert_eq!(tx.send(event("0x2")), SendOutcome::Queued);
        assert_eq!(tx.send(event("0x3")), SendOutcome::ShedOldest);

        // 0x1 (the oldest pending) was evicted; 0x2 and 0x3 survive.
        assert_eq!(rx.recv().await.unwrap().tx_hash, "0x2");
        assert_eq!(rx.recv().await.unwrap().tx_hash, "0x3");
    }

    #[tokio::test]
    async fn test_recv_returns_none_after_last_sender_drops() {
        let (tx, mut rx) = event_queue(4);
        let tx2 = tx.clone();
        tx.send(event("0x1"));
        drop(tx);
        drop(tx2);

        // Pending events still drain before closure is reported.
        assert_eq!(rx.recv().await.unwrap().tx_hash, "0x1");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_receiver_drop_is_closed() {
        let (tx, rx) = event_queue(4);
        drop(rx);
        assert_eq!(tx.send(event("0x1")), SendOutcome::Closed);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_send() {
        let (tx, mut rx) = event_queue(4);
        let handle = tokio::spawn(async move { rx.recv().await });
        tokio::task::yield_now().await;
        tx.send(event("0xabc"));
        let received = handle.await.unwrap().unwrap();
        assert_eq!(received.tx_hash, "0xabc");
    }
}
