//! UpdateQueue - FIFO hand-off from the feed thread to the applier.
//!
//! An unbounded channel split into non-clonable producer and consumer
//! halves, so the single-producer/single-consumer discipline is enforced
//! by ownership rather than convention. Enqueue never blocks; the
//! applier waits on dequeue instead of spinning.

use std::cell::Cell;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::message::UpdateRecord;

/// Default depth above which the producer logs a backlog warning.
pub const DEFAULT_WARN_DEPTH: usize = 10_000;

/// Create an unbounded update queue.
///
/// `warn_depth` is diagnostic only: depth is never used for flow
/// control, so a sustained producer/consumer imbalance grows the queue
/// without bound. The warning is the observable symptom.
pub fn unbounded(warn_depth: usize) -> (UpdateProducer, UpdateConsumer) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        UpdateProducer {
            tx,
            warn_depth,
            warned: Cell::new(false),
        },
        UpdateConsumer { rx },
    )
}

/// Why a blocking dequeue returned without a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DequeueError {
    /// No record arrived within the wait window
    #[error("dequeue timed out")]
    TimedOut,
    /// The producer half was dropped and the queue is drained
    #[error("producer disconnected")]
    Disconnected,
}

/// The feed-side half of the queue. Exactly one exists per queue.
pub struct UpdateProducer {
    tx: Sender<UpdateRecord>,
    warn_depth: usize,
    warned: Cell<bool>,
}

impl UpdateProducer {
    /// Append a record at the tail. Never blocks.
    pub fn enqueue(&self, record: UpdateRecord) {
        let depth = self.tx.len();
        if depth >= self.warn_depth {
            if !self.warned.replace(true) {
                warn!(depth, "update queue backlog above warn threshold");
            }
        } else if depth < self.warn_depth / 2 {
            self.warned.set(false);
        }
        if self.tx.send(record).is_err() {
            // Consumer gone; only reachable when the applier died first.
            debug!("update queue consumer gone, dropping record");
        }
    }

    /// Approximate queue depth, for monitoring only.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Returns true if no records are waiting.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// The applier-side half of the queue. Exactly one exists per queue.
pub struct UpdateConsumer {
    rx: Receiver<UpdateRecord>,
}

impl UpdateConsumer {
    /// Remove and return the head record, or `None` when the queue is
    /// empty (or the producer is gone). Never blocks.
    pub fn try_dequeue(&self) -> Option<UpdateRecord> {
        match self.rx.try_recv() {
            Ok(record) => Some(record),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the head record. The applier loop uses
    /// this so it can park between records and still observe its stop
    /// flag periodically.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<UpdateRecord, DequeueError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => DequeueError::TimedOut,
            RecvTimeoutError::Disconnected => DequeueError::Disconnected,
        })
    }

    /// Approximate queue depth, for monitoring only.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true if no records are waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// A depth-only view of the queue, for diagnostics from other
    /// threads. The probe never consumes records.
    pub fn depth_probe(&self) -> DepthProbe {
        DepthProbe {
            rx: self.rx.clone(),
        }
    }
}

/// Read-only depth observer handed to the engine for `queue_depth()`.
#[derive(Clone)]
pub struct DepthProbe {
    rx: Receiver<UpdateRecord>,
}

impl DepthProbe {
    /// Approximate queue depth.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true if no records are waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
