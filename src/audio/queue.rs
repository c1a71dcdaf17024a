//! Bounded hand-off of captured blocks from the audio callback to the writer.
//!
//! The producer side never blocks: a full queue drops the incoming block.
//! The consumer waits with a timeout so it can re-check termination state.
//! Written blocks can be handed back through a spare channel so the
//! callback reuses their allocations instead of allocating per tick.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded};

/// Create a queue holding at most `capacity` captured blocks.
#[must_use]
pub fn capture_queue(capacity: usize) -> (CaptureProducer, CaptureConsumer) {
    let (tx, rx) = bounded::<Vec<f32>>(capacity);
    let (spare_tx, spare_rx) = bounded::<Vec<f32>>(capacity);

    (
        CaptureProducer {
            tx,
            spares: spare_rx,
            held: None,
        },
        CaptureConsumer { rx, spares: spare_tx },
    )
}

pub struct CaptureProducer {
    tx: Sender<Vec<f32>>,
    spares: Receiver<Vec<f32>>,
    held: Option<Vec<f32>>,
}

impl CaptureProducer {
    /// Copy `samples` into a block and enqueue it without blocking.
    /// Returns `false` when the queue was full and the block was dropped.
    pub fn push(&mut self, samples: &[f32]) -> bool {
        let mut block = self
            .held
            .take()
            .or_else(|| self.spares.try_recv().ok())
            .unwrap_or_default();
        block.clear();
        block.extend_from_slice(samples);

        match self.tx.try_send(block) {
            Ok(()) => true,
            Err(TrySendError::Full(block) | TrySendError::Disconnected(block)) => {
                self.held = Some(block);
                false
            }
        }
    }
}

/// Outcome of a timed wait on the queue.
#[derive(Debug, PartialEq)]
pub enum Popped {
    Block(Vec<f32>),
    /// Nothing arrived within the timeout.
    Empty,
    /// The producer is gone and every block has been taken.
    Closed,
}

pub struct CaptureConsumer {
    rx: Receiver<Vec<f32>>,
    spares: Sender<Vec<f32>>,
}

impl CaptureConsumer {
    pub fn pop_timeout(&self, timeout: Duration) -> Popped {
        match self.rx.recv_timeout(timeout) {
            Ok(block) => Popped::Block(block),
            Err(RecvTimeoutError::Timeout) => Popped::Empty,
            Err(RecvTimeoutError::Disconnected) => Popped::Closed,
        }
    }

    pub fn try_pop(&self) -> Option<Vec<f32>> {
        match self.rx.try_recv() {
            Ok(block) => Some(block),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Return a written block's buffer to the producer for reuse.
    pub fn recycle(&self, block: Vec<f32>) {
        let _ = self.spares.try_send(block);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
