//! Synthetic collaborators for exercising the pipeline without audio
//! hardware or subprocesses.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::StreamFormat;
use super::decode::{Decoder, PcmSource};
use super::device::{DeviceCatalog, DeviceInfo, DevicePair};
use super::duplex::{DuplexCallback, StreamState};
use super::transport::{ActiveTransport, Transport};
use super::writer::{BlockSink, SinkFactory, WavEncoding, WavSink};
use crate::error::{Result, ScrubError};

/// In-memory PCM source yielding prepared blocks.
pub struct MemorySource {
    blocks: std::vec::IntoIter<Vec<f32>>,
}

impl MemorySource {
    pub fn from_blocks(blocks: Vec<Vec<f32>>) -> Self {
        Self {
            blocks: blocks.into_iter(),
        }
    }

    /// `frames` frames whose samples count up from zero, cut into blocks.
    pub fn ramp(format: StreamFormat, frames: usize) -> Self {
        let samples = Self::ramp_values(frames * format.channels as usize);
        Self::from_blocks(
            samples
                .chunks(format.block_samples())
                .map(<[f32]>::to_vec)
                .collect(),
        )
    }

    pub fn ramp_values(samples: usize) -> Vec<f32> {
        (0..samples).map(|i| i as f32).collect()
    }
}

impl PcmSource for MemorySource {
    fn next_block(&mut self) -> Result<Option<Vec<f32>>> {
        Ok(self.blocks.next())
    }
}

/// Yields `good_blocks` silent blocks, then fails like a corrupt file.
pub struct FailingSource {
    block_samples: usize,
    remaining: usize,
}

impl FailingSource {
    pub const fn new(format: StreamFormat, good_blocks: usize) -> Self {
        Self {
            block_samples: format.block_samples(),
            remaining: good_blocks,
        }
    }
}

impl PcmSource for FailingSource {
    fn next_block(&mut self) -> Result<Option<Vec<f32>>> {
        if self.remaining == 0 {
            return Err(ScrubError::Decode {
                path: PathBuf::from("corrupt.mp3"),
                reason: "decoder exited with exit status: 1: Invalid data found".to_string(),
            });
        }
        self.remaining -= 1;
        Ok(Some(vec![0.0; self.block_samples]))
    }
}

/// Decoder producing a ramp of `frames` frames for any path.
pub struct RampDecoder {
    pub frames: usize,
}

impl Decoder for RampDecoder {
    fn open(&self, _path: &Path, format: StreamFormat) -> Result<Box<dyn PcmSource>> {
        Ok(Box::new(MemorySource::ramp(format, self.frames)))
    }
}

/// Decoder whose sources fail after `good_blocks` blocks.
pub struct FailingDecoder {
    pub good_blocks: usize,
}

impl Decoder for FailingDecoder {
    fn open(&self, _path: &Path, format: StreamFormat) -> Result<Box<dyn PcmSource>> {
        Ok(Box::new(FailingSource::new(format, self.good_blocks)))
    }
}

pub struct FakeCatalog {
    devices: Vec<DeviceInfo>,
}

impl FakeCatalog {
    pub fn new(devices: Vec<(&str, u16, u16)>) -> Self {
        Self {
            devices: devices
                .into_iter()
                .enumerate()
                .map(|(index, (name, inputs, outputs))| DeviceInfo {
                    index,
                    name: name.to_string(),
                    max_input_channels: inputs,
                    max_output_channels: outputs,
                })
                .collect(),
        }
    }

    /// A virtual cable pair: output "Cable Input", input "Cable Output".
    pub fn cable() -> Self {
        Self::new(vec![
            ("Speakers", 0, 2),
            ("Cable Input", 0, 2),
            ("Cable Output", 2, 0),
        ])
    }
}

impl DeviceCatalog for FakeCatalog {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }
}

/// What the synthetic transport feeds the callback as captured input.
#[derive(Debug, Clone, Copy)]
pub enum CaptureSignal {
    /// Every sample of tick `n` equals `n`.
    Counter,
    /// The previous tick's output, i.e. a perfect cable with one block of latency.
    Loopback,
}

/// Software duplex transport ticking the callback on its own thread.
pub struct SyntheticTransport {
    signal: CaptureSignal,
    tick: Duration,
    startup: Duration,
    fail_open: bool,
    fault_after: Option<u64>,
    opened: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
}

impl SyntheticTransport {
    pub fn new(signal: CaptureSignal) -> Self {
        Self {
            signal,
            tick: Duration::from_millis(1),
            startup: Duration::from_millis(20),
            fail_open: false,
            fault_after: None,
            opened: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub const fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub const fn fault_after(mut self, ticks: u64) -> Self {
        self.fault_after = Some(ticks);
        self
    }

    pub const fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// How many times a stream was successfully opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Streams opened and not yet closed.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared handle to the live [`running`](Self::running) count.
    pub fn running_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.running)
    }
}

impl Transport for SyntheticTransport {
    fn open(
        &self,
        _devices: DevicePair,
        format: StreamFormat,
        mut callback: DuplexCallback,
        state: Arc<StreamState>,
    ) -> Result<Box<dyn ActiveTransport>> {
        if self.fail_open {
            return Err(ScrubError::Transport(
                "failed to build output stream: device busy".to_string(),
            ));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let (signal, tick, startup, fault_after) =
            (self.signal, self.tick, self.startup, self.fault_after);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(startup);
            let mut input = vec![0.0f32; format.block_samples()];
            let mut output = vec![0.0f32; format.block_samples()];
            let mut n = 0u64;

            while !thread_stop.load(Ordering::SeqCst) {
                match signal {
                    CaptureSignal::Counter => input.fill(n as f32),
                    CaptureSignal::Loopback => input.copy_from_slice(&output),
                }
                callback.process(&input, &mut output);
                n += 1;
                if fault_after == Some(n) {
                    state.report_fault("synthetic device disappeared");
                }
                std::thread::sleep(tick);
            }
        });

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.running.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SyntheticStream {
            stop,
            handle: Some(handle),
            running: Arc::clone(&self.running),
        }))
    }
}

struct SyntheticStream {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicUsize>,
}

impl ActiveTransport for SyntheticStream {
    fn close(mut self: Box<Self>) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| ScrubError::Transport("synthetic stream panicked".to_string()))?;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Everything a [`MemorySink`] received.
#[derive(Debug, Default)]
pub struct Recorded {
    pub blocks: Vec<Vec<f32>>,
    pub finalized: usize,
    /// Running transport streams seen at each finalize.
    pub running_at_finalize: Vec<usize>,
}

/// Sink factory keeping written blocks in memory.
#[derive(Default, Clone)]
pub struct MemorySinks {
    pub recorded: Arc<Mutex<Recorded>>,
    pub created: Arc<AtomicUsize>,
    running: Option<Arc<AtomicUsize>>,
    fail_after: Option<usize>,
}

impl MemorySinks {
    /// Note how many of `transport`'s streams are still running whenever a
    /// sink is finalized.
    pub fn watching(transport: &SyntheticTransport) -> Self {
        Self {
            running: Some(transport.running_counter()),
            ..Self::default()
        }
    }

    /// Fail every write after the first `blocks` blocks, like a full disk.
    pub const fn failing_after(mut self, blocks: usize) -> Self {
        self.fail_after = Some(blocks);
        self
    }

    pub fn running_at_finalize(&self) -> Vec<usize> {
        self.recorded
            .lock()
            .map(|r| r.running_at_finalize.clone())
            .unwrap_or_default()
    }

    pub fn blocks(&self) -> Vec<Vec<f32>> {
        self.recorded
            .lock()
            .map(|r| r.blocks.clone())
            .unwrap_or_default()
    }

    pub fn finalized(&self) -> usize {
        self.recorded.lock().map(|r| r.finalized).unwrap_or_default()
    }
}

impl SinkFactory for MemorySinks {
    fn create(&self, path: &Path, format: StreamFormat) -> Result<Box<dyn BlockSink>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySink {
            recorded: Arc::clone(&self.recorded),
            path: path.to_path_buf(),
            running: self.running.clone(),
            remaining: self.fail_after,
            channels: u64::from(format.channels),
            samples: 0,
        }))
    }
}

struct MemorySink {
    recorded: Arc<Mutex<Recorded>>,
    path: PathBuf,
    running: Option<Arc<AtomicUsize>>,
    remaining: Option<usize>,
    channels: u64,
    samples: u64,
}

impl BlockSink for MemorySink {
    fn write_block(&mut self, samples: &[f32]) -> Result<()> {
        match self.remaining {
            Some(0) => {
                return Err(ScrubError::Write {
                    path: self.path.clone(),
                    reason: "No space left on device (os error 28)".to_string(),
                });
            }
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        if let Ok(mut r) = self.recorded.lock() {
            r.blocks.push(samples.to_vec());
        }
        self.samples += samples.len() as u64;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.samples / self.channels
    }

    fn finalize(self: Box<Self>) -> Result<()> {
        if let Ok(mut r) = self.recorded.lock() {
            r.finalized += 1;
            if let Some(running) = &self.running {
                r.running_at_finalize.push(running.load(Ordering::SeqCst));
            }
        }
        Ok(())
    }
}

/// Real WAV files that report a full disk after `fail_after` blocks.
pub struct DiskFullSinks {
    pub fail_after: usize,
}

impl SinkFactory for DiskFullSinks {
    fn create(&self, path: &Path, format: StreamFormat) -> Result<Box<dyn BlockSink>> {
        Ok(Box::new(DiskFullSink {
            inner: WavSink::create(path, format, WavEncoding::default())?,
            path: path.to_path_buf(),
            remaining: self.fail_after,
        }))
    }
}

struct DiskFullSink {
    inner: WavSink,
    path: PathBuf,
    remaining: usize,
}

impl BlockSink for DiskFullSink {
    fn write_block(&mut self, samples: &[f32]) -> Result<()> {
        if self.remaining == 0 {
            return Err(ScrubError::Write {
                path: self.path.clone(),
                reason: "No space left on device (os error 28)".to_string(),
            });
        }
        self.remaining -= 1;
        self.inner.write_block(samples)
    }

    fn frames_written(&self) -> u64 {
        self.inner.frames_written()
    }

    fn finalize(self: Box<Self>) -> Result<()> {
        Box::new(self.inner).finalize()
    }
}
