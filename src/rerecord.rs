//! Stream controller for one re-record pass.
//!
//! Resolves the device pair, starts the decoder lookahead, opens the duplex
//! transport with a [`DuplexCallback`] installed, and writes captured blocks
//! on the calling thread until the source has ended and the capture queue
//! has gone quiet. Shutdown always closes the transport before finalizing
//! the output file.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::audio::StreamFormat;
use crate::audio::decode::{DecodeWorker, Decoder, spawn_lookahead};
use crate::audio::device::{DeviceCatalog, resolve_pair};
use crate::audio::duplex::{DuplexCallback, StreamState};
use crate::audio::queue::{CaptureConsumer, Popped, capture_queue};
use crate::audio::transport::{ActiveTransport, Transport};
use crate::audio::writer::{BlockSink, SinkFactory};
use crate::config::AudioConfig;
use crate::error::{Result, ScrubError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Resolving,
    Streaming,
    Finishing,
    Draining,
    Closed,
    Failed,
}

/// Shared flag for stopping a pass early. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of a completed pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RerecordReport {
    pub blocks_written: u64,
    pub frames_written: u64,
    /// Duplex callback invocations.
    pub ticks: u64,
    /// Captured blocks discarded because the queue was full.
    pub dropped: u64,
    pub underruns: u64,
    /// Input samples discarded because the capture ring was full.
    pub overrun_samples: u64,
    pub decoded_blocks: u64,
    /// Blocks written during the post-stream drain window.
    pub drained: u64,
    pub cancelled: bool,
    pub phases: Vec<StreamPhase>,
}

struct PhaseTrail {
    phases: Vec<StreamPhase>,
}

impl PhaseTrail {
    fn new() -> Self {
        Self {
            phases: vec![StreamPhase::Idle],
        }
    }

    fn current(&self) -> StreamPhase {
        self.phases.last().copied().unwrap_or(StreamPhase::Idle)
    }

    fn enter(&mut self, next: StreamPhase) {
        tracing::debug!("stream phase: {:?} -> {next:?}", self.current());
        self.phases.push(next);
    }
}

enum LoopExit {
    SourceEnded,
    Cancelled,
}

/// Moves blocks from the capture queue into the sink.
struct Pump<'a> {
    consumer: &'a CaptureConsumer,
    sink: &'a mut dyn BlockSink,
    written: u64,
}

impl<'a> Pump<'a> {
    fn new(consumer: &'a CaptureConsumer, sink: &'a mut dyn BlockSink) -> Self {
        Self {
            consumer,
            sink,
            written: 0,
        }
    }

    fn write(&mut self, block: Vec<f32>) -> Result<()> {
        self.sink.write_block(&block)?;
        self.consumer.recycle(block);
        self.written += 1;
        Ok(())
    }

    /// Write blocks as they arrive until the callback has finished and the
    /// queue stays empty for a full `wait`. Buffers the callback has played
    /// are freed here rather than on the audio thread.
    fn stream(
        &mut self,
        state: &StreamState,
        worker: &DecodeWorker,
        cancel: &CancelToken,
        wait: Duration,
    ) -> Result<LoopExit> {
        loop {
            worker.release_spent();
            if cancel.is_cancelled() {
                return Ok(LoopExit::Cancelled);
            }
            if let Some(fault) = state.fault() {
                return Err(ScrubError::Transport(fault));
            }

            match self.consumer.pop_timeout(wait) {
                Popped::Block(block) => self.write(block)?,
                Popped::Empty if state.is_finishing() => return Ok(LoopExit::SourceEnded),
                Popped::Empty => {}
                Popped::Closed if state.is_finishing() => return Ok(LoopExit::SourceEnded),
                Popped::Closed => {
                    return Err(ScrubError::Transport(
                        "duplex stream stopped before the source ended".to_string(),
                    ));
                }
            }
        }
    }

    /// Take whatever is already queued, for at most `budget`.
    fn drain(&mut self, budget: Duration) -> Result<u64> {
        let deadline = Instant::now() + budget;
        let mut drained = 0;
        while Instant::now() < deadline {
            let Some(block) = self.consumer.try_pop() else {
                break;
            };
            self.write(block)?;
            drained += 1;
        }
        Ok(drained)
    }
}

/// Runs re-record passes against a fixed set of collaborators.
pub struct Rerecorder<'a> {
    catalog: &'a dyn DeviceCatalog,
    transport: &'a dyn Transport,
    decoder: &'a dyn Decoder,
    sinks: &'a dyn SinkFactory,
    settings: &'a AudioConfig,
}

impl<'a> Rerecorder<'a> {
    #[must_use]
    pub const fn new(
        catalog: &'a dyn DeviceCatalog,
        transport: &'a dyn Transport,
        decoder: &'a dyn Decoder,
        sinks: &'a dyn SinkFactory,
        settings: &'a AudioConfig,
    ) -> Self {
        Self {
            catalog,
            transport,
            decoder,
            sinks,
            settings,
        }
    }

    /// Play `input` through the output device while recording the input
    /// device into `output`.
    pub fn run(&self, input: &Path, output: &Path, cancel: &CancelToken) -> Result<RerecordReport> {
        tracing::info!("re-recording {} -> {}", input.display(), output.display());

        let mut trail = PhaseTrail::new();
        let result = self.execute(input, output, cancel, &mut trail);
        if let Err(ref e) = result {
            tracing::debug!("re-record failed in {:?}: {e}", trail.current());
            trail.enter(StreamPhase::Failed);
        }
        result
    }

    #[allow(clippy::too_many_lines)]
    fn execute(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancelToken,
        trail: &mut PhaseTrail,
    ) -> Result<RerecordReport> {
        let settings = self.settings;
        settings.validate()?;
        let format = StreamFormat::from_config(settings);

        trail.enter(StreamPhase::Resolving);
        let devices = resolve_pair(
            self.catalog,
            &settings.output_device,
            &settings.input_device,
            settings.channels,
        )?;
        tracing::info!(
            "using output device index {}, input device index {}",
            devices.output,
            devices.input
        );

        let source = self.decoder.open(input, format)?;
        let mut sink = self.sinks.create(output, format)?;
        let (feed, worker) = match spawn_lookahead(source, input, settings.lookahead_blocks) {
            Ok(parts) => parts,
            Err(e) => {
                abandon_output(sink, output);
                return Err(e);
            }
        };

        let (producer, consumer) = capture_queue(settings.queue_capacity);
        let state = Arc::new(StreamState::default());
        let callback = DuplexCallback::new(feed, producer, Arc::clone(&state), settings.tail_blocks);

        let transport = match self.transport.open(devices, format, callback, Arc::clone(&state)) {
            Ok(t) => t,
            Err(e) => {
                let _ = worker.join();
                abandon_output(sink, output);
                return Err(e);
            }
        };

        trail.enter(StreamPhase::Streaming);
        tracing::info!("stream started");

        let mut pump = Pump::new(&consumer, sink.as_mut());
        let exit = match pump.stream(&state, &worker, cancel, settings.wait_timeout()) {
            Ok(exit) => exit,
            Err(e) => {
                let transport_failed = matches!(e, ScrubError::Transport(_));
                tear_down(transport, sink, worker);
                if transport_failed {
                    remove_output(output);
                }
                return Err(e);
            }
        };

        let cancelled = match exit {
            LoopExit::SourceEnded => {
                trail.enter(StreamPhase::Finishing);
                false
            }
            LoopExit::Cancelled => {
                tracing::info!("cancelled, draining captured audio");
                true
            }
        };

        trail.enter(StreamPhase::Draining);
        let drained = match pump.drain(settings.drain_budget()) {
            Ok(n) => n,
            Err(e) => {
                tear_down(transport, sink, worker);
                return Err(e);
            }
        };
        let blocks_written = pump.written;
        let discarded = consumer.len();
        if discarded > 0 {
            tracing::debug!("drain budget elapsed, discarding {discarded} queued blocks");
        }

        let frames_written = sink.frames_written();
        let closed = transport.close();
        let finalized = sink.finalize();
        let decoded = worker.join();

        if let Err(e) = closed {
            remove_output(output);
            return Err(e);
        }
        finalized?;
        let decoded_blocks = decoded?;
        trail.enter(StreamPhase::Closed);

        let report = RerecordReport {
            blocks_written,
            frames_written,
            ticks: state.ticks(),
            dropped: state.dropped(),
            underruns: state.underruns(),
            overrun_samples: state.overrun_samples(),
            decoded_blocks,
            drained,
            cancelled,
            phases: trail.phases.clone(),
        };

        if report.dropped > 0 {
            tracing::warn!(
                "{} captured blocks dropped (writer fell behind), recording has gaps",
                report.dropped
            );
        }
        if report.overrun_samples > 0 {
            tracing::warn!(
                "{} input samples lost to capture ring overruns, recording has gaps",
                report.overrun_samples
            );
        }
        tracing::info!(
            "recording finished: {} frames in {} blocks",
            report.frames_written,
            report.blocks_written
        );

        Ok(report)
    }
}

/// Best-effort shutdown after a failure: stop the transport, flush what was
/// written, and reap the decoder.
fn tear_down(transport: Box<dyn ActiveTransport>, sink: Box<dyn BlockSink>, worker: DecodeWorker) {
    if let Err(e) = transport.close() {
        tracing::warn!("failed to close transport: {e}");
    }
    if let Err(e) = sink.finalize() {
        tracing::warn!("failed to finalize output: {e}");
    }
    if let Err(e) = worker.join() {
        tracing::debug!("decoder stopped with: {e}");
    }
}

fn abandon_output(sink: Box<dyn BlockSink>, output: &Path) {
    if let Err(e) = sink.finalize() {
        tracing::debug!("failed to finalize abandoned output: {e}");
    }
    remove_output(output);
}

fn remove_output(output: &Path) {
    if output.exists()
        && let Err(e) = std::fs::remove_file(output)
    {
        tracing::warn!("failed to remove {}: {e}", output.display());
    }
}
