//! The real-time side of a re-record pass.
//!
//! [`DuplexCallback::process`] runs once per hardware tick on the audio
//! thread: it fills the playback buffer from the decoded lookahead and hands
//! a copy of the captured buffer to the capture queue. It never blocks and
//! never logs. Captured buffers come from the queue's spare pool and played
//! buffers are handed back to the controller, so memory is only allocated or
//! freed here when one of those pools runs dry.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::decode::{BlockFeed, Pull};
use super::queue::CaptureProducer;

/// State shared between the audio thread and the stream controller.
#[derive(Debug, Default)]
pub struct StreamState {
    finishing: AtomicBool,
    ticks: AtomicU64,
    captured: AtomicU64,
    dropped: AtomicU64,
    underruns: AtomicU64,
    overrun_samples: AtomicU64,
    fault: Mutex<Option<String>>,
}

impl StreamState {
    #[must_use]
    pub fn is_finishing(&self) -> bool {
        self.finishing.load(Ordering::Acquire)
    }

    /// Record a transport failure. Only the first one is kept.
    pub fn report_fault(&self, message: impl Into<String>) {
        if let Ok(mut fault) = self.fault.lock()
            && fault.is_none()
        {
            *fault = Some(message.into());
        }
    }

    #[must_use]
    pub fn fault(&self) -> Option<String> {
        self.fault.lock().ok().and_then(|f| f.clone())
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Count captured samples the transport had to discard before they
    /// reached the callback.
    pub fn record_overrun(&self, samples: usize) {
        self.overrun_samples.fetch_add(samples as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn overrun_samples(&self) -> u64 {
        self.overrun_samples.load(Ordering::Relaxed)
    }
}

pub struct DuplexCallback {
    feed: BlockFeed,
    capture: CaptureProducer,
    state: std::sync::Arc<StreamState>,
    tail_blocks: usize,
    tail_remaining: usize,
    started: bool,
    finished: bool,
}

impl DuplexCallback {
    #[must_use]
    pub const fn new(
        feed: BlockFeed,
        capture: CaptureProducer,
        state: std::sync::Arc<StreamState>,
        tail_blocks: usize,
    ) -> Self {
        Self {
            feed,
            capture,
            state,
            tail_blocks,
            tail_remaining: 0,
            started: false,
            finished: false,
        }
    }

    /// Handle one tick: `input` was just captured, `output` must be filled
    /// for playback before returning.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        self.state.ticks.fetch_add(1, Ordering::Relaxed);

        let capture = if self.finished {
            output.fill(0.0);
            self.take_tail()
        } else {
            match self.feed.pull() {
                Pull::Block(block) => {
                    self.started = true;
                    let n = block.samples.len().min(output.len());
                    output[..n].copy_from_slice(&block.samples[..n]);
                    output[n..].fill(0.0);
                    if block.last {
                        self.finish();
                    }
                    self.feed.recycle(block.samples);
                    true
                }
                Pull::Pending => {
                    output.fill(0.0);
                    self.state.underruns.fetch_add(1, Ordering::Relaxed);
                    // Leading silence before the first decoded block is not recorded.
                    self.started
                }
                Pull::Exhausted => {
                    output.fill(0.0);
                    self.finish();
                    self.take_tail()
                }
            }
        };

        if capture {
            if self.capture.push(input) {
                self.state.captured.fetch_add(1, Ordering::Relaxed);
            } else {
                self.state.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.tail_remaining = if self.started { self.tail_blocks } else { 0 };
        self.state.finishing.store(true, Ordering::Release);
    }

    const fn take_tail(&mut self) -> bool {
        if self.tail_remaining == 0 {
            return false;
        }
        self.tail_remaining -= 1;
        true
    }
}
