//! Decoding of arbitrary source files into PCM blocks.
//!
//! Decoding runs out of process (`ffmpeg` writing raw `f32le` to a pipe) and
//! is pulled by a dedicated lookahead thread, so the audio callback only
//! ever takes already-decoded blocks from a bounded channel.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};

use super::StreamFormat;
use crate::error::{Result, ScrubError};

/// Played buffers waiting to be freed off the audio thread.
const SPENT_BLOCKS: usize = 64;

/// Keep at most this much of the decoder's stderr for error reports.
const STDERR_LIMIT: usize = 4096;

/// A finite, non-restartable sequence of interleaved PCM blocks.
pub trait PcmSource: Send {
    /// The next block, or `Ok(None)` once the source is exhausted. Blocks
    /// hold whole frames; only the last may be shorter than requested.
    fn next_block(&mut self) -> Result<Option<Vec<f32>>>;
}

/// Opens a [`PcmSource`] for a file.
pub trait Decoder {
    fn open(&self, path: &Path, format: StreamFormat) -> Result<Box<dyn PcmSource>>;
}

/// Decoder that shells out to ffmpeg (or a compatible program).
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    program: String,
}

impl FfmpegDecoder {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Decoder for FfmpegDecoder {
    fn open(&self, path: &Path, format: StreamFormat) -> Result<Box<dyn PcmSource>> {
        Ok(Box::new(FfmpegSource::spawn(&self.program, path, format)?))
    }
}

pub struct FfmpegSource {
    path: PathBuf,
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    channels: usize,
    buf: Vec<u8>,
    finished: bool,
}

impl FfmpegSource {
    pub fn spawn(program: &str, path: &Path, format: StreamFormat) -> Result<Self> {
        let decode_err = |reason: String| ScrubError::Decode {
            path: path.to_path_buf(),
            reason,
        };

        let mut child = Command::new(program)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-f", "f32le", "-acodec", "pcm_f32le", "-ac"])
            .arg(format.channels.to_string())
            .arg("-ar")
            .arg(format.sample_rate.to_string())
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| decode_err(format!("failed to start {program}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| decode_err(format!("{program} has no stdout pipe")))?;

        // Drain stderr concurrently so a chatty decoder cannot stall on a full pipe.
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                if text.len() > STDERR_LIMIT {
                    let mut cut = text.len() - STDERR_LIMIT;
                    while !text.is_char_boundary(cut) {
                        cut += 1;
                    }
                    text = text.split_off(cut);
                }
                text
            })
        });

        tracing::debug!("spawned {program} for {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            child,
            stdout,
            stderr,
            channels: format.channels as usize,
            buf: vec![0u8; format.block_samples() * 4],
            finished: false,
        })
    }

    /// Read until the block buffer is full or the pipe hits EOF.
    fn fill(&mut self) -> Result<usize> {
        let mut filled = 0;
        while filled < self.buf.len() {
            match self.stdout.read(&mut self.buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(ScrubError::Decode {
                        path: self.path.clone(),
                        reason: format!("failed to read decoder output: {e}"),
                    });
                }
            }
        }
        Ok(filled)
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        let status = self.child.wait().map_err(|e| ScrubError::Decode {
            path: self.path.clone(),
            reason: format!("failed to wait for decoder: {e}"),
        })?;
        let stderr = self
            .stderr
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(ScrubError::Decode {
                path: self.path.clone(),
                reason: format!("decoder exited with {status}: {}", stderr.trim()),
            })
        }
    }
}

impl PcmSource for FfmpegSource {
    fn next_block(&mut self) -> Result<Option<Vec<f32>>> {
        if self.finished {
            return Ok(None);
        }

        let filled = self.fill()?;
        let frame_bytes = 4 * self.channels;
        // Drop an incomplete trailing frame, if any.
        let usable = filled - filled % frame_bytes;

        if usable == 0 {
            self.finish()?;
            return Ok(None);
        }

        let samples = self.buf[..usable]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Some(samples))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// A decoded block as handed to the audio callback.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBlock {
    pub samples: Vec<f32>,
    /// Set on the final block of the source.
    pub last: bool,
}

/// Result of a non-blocking pull from the lookahead.
#[derive(Debug, PartialEq)]
pub enum Pull {
    Block(DecodedBlock),
    /// Nothing decoded yet; the decoder is still running.
    Pending,
    /// The decoder has stopped and every block has been taken.
    Exhausted,
}

/// Callback-side handle to the decoded lookahead buffer.
pub struct BlockFeed {
    rx: Receiver<DecodedBlock>,
    spent: Sender<Vec<f32>>,
}

impl BlockFeed {
    #[cfg(test)]
    pub(crate) const fn from_channels(rx: Receiver<DecodedBlock>, spent: Sender<Vec<f32>>) -> Self {
        Self { rx, spent }
    }

    /// Hand a played buffer back so it is freed on the controller thread.
    /// Falls back to dropping it here when the spent channel is full.
    pub fn recycle(&self, samples: Vec<f32>) {
        let _ = self.spent.try_send(samples);
    }

    pub fn pull(&self) -> Pull {
        match self.rx.try_recv() {
            Ok(block) => Pull::Block(block),
            Err(TryRecvError::Empty) => Pull::Pending,
            Err(TryRecvError::Disconnected) => Pull::Exhausted,
        }
    }
}

/// Controller-side handle to the lookahead thread.
pub struct DecodeWorker {
    path: PathBuf,
    handle: JoinHandle<Result<u64>>,
    spent: Receiver<Vec<f32>>,
}

impl DecodeWorker {
    /// Free buffers the callback has finished playing. Returns how many.
    pub fn release_spent(&self) -> usize {
        self.spent.try_iter().count()
    }

    /// Wait for the thread and return how many blocks it delivered, or the
    /// decode failure that stopped it.
    pub fn join(self) -> Result<u64> {
        self.handle.join().unwrap_or_else(|_| {
            Err(ScrubError::Decode {
                path: self.path,
                reason: "decoder thread panicked".to_string(),
            })
        })
    }
}

/// Start a thread that pulls `source` up to `depth` blocks ahead of the
/// callback. The thread stops when the source ends, fails, or the feed is
/// dropped.
pub fn spawn_lookahead(
    mut source: Box<dyn PcmSource>,
    path: &Path,
    depth: usize,
) -> Result<(BlockFeed, DecodeWorker)> {
    let (tx, rx) = bounded::<DecodedBlock>(depth);
    let (spent_tx, spent_rx) = bounded::<Vec<f32>>(SPENT_BLOCKS.max(depth));

    let handle = std::thread::Builder::new()
        .name("rescrub-decode".to_string())
        .spawn(move || {
            let mut delivered = 0u64;
            let mut current = source.next_block()?;

            while let Some(samples) = current.take() {
                let next = source.next_block();
                let last = matches!(next, Ok(None));

                if tx.send(DecodedBlock { samples, last }).is_err() {
                    tracing::debug!("block feed dropped, stopping decoder after {delivered} blocks");
                    return Ok(delivered);
                }
                delivered += 1;
                current = next?;
            }

            Ok(delivered)
        })
        .map_err(|e| ScrubError::Decode {
            path: path.to_path_buf(),
            reason: format!("failed to start decoder thread: {e}"),
        })?;

    Ok((
        BlockFeed { rx, spent: spent_tx },
        DecodeWorker {
            path: path.to_path_buf(),
            handle,
            spent: spent_rx,
        },
    ))
}
