//! Bounded event queue between interrupt context and the task loop
//!
//! The producer side never blocks and never takes a lock that the consumer
//! can hold: `try_post` either enqueues or reports the queue as full. The
//! consumer side can drain without blocking (bare-metal polling), block on a
//! dedicated thread, or await from an async runtime.

use async_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Producer handle, safe to use from interrupt context
pub struct EventSender<T> {
    tx: Sender<T>,
    dropped: Arc<AtomicU64>,
}

// Manual impl: `T` itself need not be Clone
impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> EventSender<T> {
    /// Enqueue an event without blocking
    pub fn try_post(&self, event: T) -> crate::Result<()> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                let capacity = self.tx.capacity().unwrap_or(0);
                warn!(
                    "Event queue full (capacity {}), dropped {} event(s) so far",
                    capacity, dropped
                );
                Err(crate::Error::QueueFull { capacity })
            }
            Err(TrySendError::Closed(_)) => {
                Err(crate::Error::Channel("event queue closed".to_string()))
            }
        }
    }

    /// Number of events rejected because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Close the queue; pending events can still be drained
    pub fn close(&self) -> bool {
        self.tx.close()
    }
}

/// Consumer handle for the task loop
pub struct EventReceiver<T> {
    rx: Receiver<T>,
}

impl<T> Clone for EventReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T> EventReceiver<T> {
    /// Take the next pending event, if any
    pub fn try_recv(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    /// Block the calling thread until an event arrives
    pub fn recv_blocking(&self) -> crate::Result<T> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Wait for the next event from an async context
    pub async fn recv(&self) -> crate::Result<T> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Events currently waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create a bounded event queue
///
/// Returns (EventSender for interrupt context, EventReceiver for the task loop)
pub fn create_event_queue<T>(capacity: usize) -> (EventSender<T>, EventReceiver<T>) {
    let (tx, rx) = bounded(capacity.max(1));

    (
        EventSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        EventReceiver { rx },
    )
}
