//! Duplex audio transport.
//!
//! cpal has no duplex stream, so [`CpalTransport`] opens an input stream and
//! an output stream on the resolved devices and joins them on the output
//! side:
//!
//! ```text
//!  input device ──► input callback ──► rtrb ring (captured samples)
//!                                              │
//!                                              ▼
//!  output device ◄── output callback ◄── Reblocker ──► DuplexCallback::process
//! ```
//!
//! The [`Reblocker`] hides the device's buffer size: the duplex callback
//! always sees exactly one block of input and one block of output.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, Stream, StreamConfig};

use super::StreamFormat;
use super::device::{DevicePair, cpal_device, device_name};
use super::duplex::{DuplexCallback, StreamState};
use crate::error::{Result, ScrubError};

/// Captured-sample ring capacity, in blocks.
const RING_BLOCKS: usize = 8;

/// Opens a running duplex stream that drives `callback` once per block.
pub trait Transport {
    fn open(
        &self,
        devices: DevicePair,
        format: StreamFormat,
        callback: DuplexCallback,
        state: Arc<StreamState>,
    ) -> Result<Box<dyn ActiveTransport>>;
}

/// A running duplex stream. Closing stops the callback and drops it.
pub trait ActiveTransport {
    fn close(self: Box<Self>) -> Result<()>;
}

/// Transport over the default cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalTransport;

impl Transport for CpalTransport {
    fn open(
        &self,
        devices: DevicePair,
        format: StreamFormat,
        callback: DuplexCallback,
        state: Arc<StreamState>,
    ) -> Result<Box<dyn ActiveTransport>> {
        let host = cpal::default_host();
        let output_device = cpal_device(&host, devices.output)?;
        let input_device = cpal_device(&host, devices.input)?;

        tracing::info!(
            "opening duplex stream: output '{}', input '{}'",
            device_name(&output_device),
            device_name(&input_device)
        );

        let stream_config = StreamConfig {
            channels: format.channels,
            sample_rate: format.sample_rate,
            buffer_size: BufferSize::Fixed(format.block_frames as u32),
        };

        let (mut producer, consumer) =
            rtrb::RingBuffer::<f32>::new(format.block_samples() * RING_BLOCKS);

        let capture_state = Arc::clone(&state);
        let input_state = Arc::clone(&state);
        let input = input_device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    push_captured(&mut producer, data, &capture_state);
                },
                move |err: cpal::StreamError| {
                    input_state.report_fault(format!("input stream: {err}"));
                },
                None,
            )
            .map_err(|e| ScrubError::Transport(format!("failed to build input stream: {e}")))?;

        let mut reblocker = Reblocker::new(callback, consumer, format.block_samples());
        let output_state = Arc::clone(&state);
        let output = output_device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    reblocker.fill(data);
                },
                move |err: cpal::StreamError| {
                    output_state.report_fault(format!("output stream: {err}"));
                },
                None,
            )
            .map_err(|e| ScrubError::Transport(format!("failed to build output stream: {e}")))?;

        input
            .play()
            .map_err(|e| ScrubError::Transport(format!("failed to start input stream: {e}")))?;
        output
            .play()
            .map_err(|e| ScrubError::Transport(format!("failed to start output stream: {e}")))?;

        tracing::debug!(
            "duplex stream running: {} Hz, {} ch, {} frames per block",
            format.sample_rate,
            format.channels,
            format.block_frames
        );

        Ok(Box::new(CpalStreams { input, output }))
    }
}

struct CpalStreams {
    input: Stream,
    output: Stream,
}

impl ActiveTransport for CpalStreams {
    fn close(self: Box<Self>) -> Result<()> {
        let output = self
            .output
            .pause()
            .map_err(|e| ScrubError::Transport(format!("failed to stop output stream: {e}")));
        let input = self
            .input
            .pause()
            .map_err(|e| ScrubError::Transport(format!("failed to stop input stream: {e}")));
        // Dropping the streams releases the devices and the callback.
        drop(self);
        output.and(input)
    }
}

/// Copy a device input buffer into the ring. The ring only fills up when
/// playback stalls; whatever does not fit is discarded and counted.
fn push_captured(ring: &mut rtrb::Producer<f32>, data: &[f32], state: &StreamState) {
    let n = ring.slots().min(data.len());
    if let Ok(chunk) = ring.write_chunk_uninit(n) {
        chunk.fill_from_iter(data.iter().copied());
    }
    if n < data.len() {
        state.record_overrun(data.len() - n);
    }
}

/// Adapts arbitrarily sized device buffers to fixed-size duplex blocks.
pub struct Reblocker {
    callback: DuplexCallback,
    captured: rtrb::Consumer<f32>,
    input: Vec<f32>,
    output: Vec<f32>,
    cursor: usize,
}

impl Reblocker {
    #[must_use]
    pub fn new(callback: DuplexCallback, captured: rtrb::Consumer<f32>, block_samples: usize) -> Self {
        Self {
            callback,
            captured,
            input: vec![0.0; block_samples],
            output: vec![0.0; block_samples],
            cursor: block_samples,
        }
    }

    /// Fill a device output buffer, running the duplex callback whenever the
    /// current block has been fully played.
    pub fn fill(&mut self, data: &mut [f32]) {
        let mut written = 0;
        while written < data.len() {
            if self.cursor == self.output.len() {
                self.next_block();
            }
            let n = (self.output.len() - self.cursor).min(data.len() - written);
            data[written..written + n].copy_from_slice(&self.output[self.cursor..self.cursor + n]);
            self.cursor += n;
            written += n;
        }
    }

    fn next_block(&mut self) {
        let available = self.captured.slots().min(self.input.len());
        let mut taken = 0;
        if let Ok(chunk) = self.captured.read_chunk(available) {
            let (first, second) = chunk.as_slices();
            self.input[..first.len()].copy_from_slice(first);
            self.input[first.len()..first.len() + second.len()].copy_from_slice(second);
            taken = first.len() + second.len();
            chunk.commit_all();
        }
        self.input[taken..].fill(0.0);

        self.callback.process(&self.input, &mut self.output);
        self.cursor = 0;
    }
}
