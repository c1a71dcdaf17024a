use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use super::StreamFormat;
use crate::config::AudioConfig;
use crate::error::{Result, ScrubError};

/// Append-only destination for captured blocks.
pub trait BlockSink {
    /// Append interleaved samples verbatim.
    fn write_block(&mut self, samples: &[f32]) -> Result<()>;

    fn frames_written(&self) -> u64;

    /// Flush and finalize the container. Called exactly once.
    fn finalize(self: Box<Self>) -> Result<()>;
}

/// Creates the sink for one re-record pass.
pub trait SinkFactory {
    fn create(&self, path: &Path, format: StreamFormat) -> Result<Box<dyn BlockSink>>;
}

/// Bit depth and sample encoding of the output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavEncoding {
    pub bits_per_sample: u16,
    pub float: bool,
}

impl WavEncoding {
    #[must_use]
    pub const fn from_config(config: &AudioConfig) -> Self {
        Self {
            bits_per_sample: config.bits_per_sample,
            float: config.float_samples,
        }
    }
}

impl Default for WavEncoding {
    fn default() -> Self {
        Self {
            bits_per_sample: 24,
            float: false,
        }
    }
}

impl SinkFactory for WavEncoding {
    fn create(&self, path: &Path, format: StreamFormat) -> Result<Box<dyn BlockSink>> {
        Ok(Box::new(WavSink::create(path, format, *self)?))
    }
}

/// WAV file sink; converts float samples to the configured integer depth.
pub struct WavSink {
    path: PathBuf,
    writer: WavWriter<BufWriter<File>>,
    channels: u64,
    float: bool,
    scale: f32,
    samples: u64,
}

impl WavSink {
    pub fn create(path: &Path, format: StreamFormat, encoding: WavEncoding) -> Result<Self> {
        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: encoding.bits_per_sample,
            sample_format: if encoding.float {
                SampleFormat::Float
            } else {
                SampleFormat::Int
            },
        };

        let writer = WavWriter::create(path, spec).map_err(|e| ScrubError::Write {
            path: path.to_path_buf(),
            reason: format!("failed to create WAV file: {e}"),
        })?;

        tracing::debug!(
            "writing {} ({} Hz, {} ch, {} bit)",
            path.display(),
            format.sample_rate,
            format.channels,
            encoding.bits_per_sample
        );

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            channels: u64::from(format.channels),
            float: encoding.float,
            scale: int_scale(encoding.bits_per_sample),
            samples: 0,
        })
    }
}

/// Largest positive integer sample at `bits`.
fn int_scale(bits: u16) -> f32 {
    ((1i64 << (bits - 1)) - 1) as f32
}

impl BlockSink for WavSink {
    fn write_block(&mut self, samples: &[f32]) -> Result<()> {
        for &s in samples {
            let written = if self.float {
                self.writer.write_sample(s)
            } else {
                let clamped = s.clamp(-1.0, 1.0);
                self.writer.write_sample((clamped * self.scale).round() as i32)
            };
            written.map_err(|e| ScrubError::Write {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        }
        self.samples += samples.len() as u64;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.samples / self.channels
    }

    fn finalize(self: Box<Self>) -> Result<()> {
        let Self { path, writer, .. } = *self;
        writer.finalize().map_err(|e| ScrubError::Write {
            path: path.clone(),
            reason: format!("failed to finalize WAV file: {e}"),
        })?;
        tracing::debug!("finalized {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMAT: StreamFormat = StreamFormat::new(44100, 2, 4);

    #[test]
    fn writes_24_bit_pcm() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("out.wav");

        let mut sink: Box<dyn BlockSink> = WavEncoding::default()
            .create(&path, FORMAT)
            .unwrap_or_else(|e| panic!("{e}"));
        sink.write_block(&[0.0, 0.5, -0.5, 1.0, 2.0, -2.0])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(sink.frames_written(), 3);
        sink.finalize().unwrap_or_else(|e| panic!("{e}"));

        let mut reader = hound::WavReader::open(&path).unwrap_or_else(|e| panic!("{e}"));
        let spec = reader.spec();
        assert_eq!(spec.bits_per_sample, 24);
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(reader.duration(), 3);

        let samples: Vec<i32> = reader
            .samples::<i32>()
            .map(|s| s.unwrap_or_else(|e| panic!("{e}")))
            .collect();
        let max = 8_388_607;
        assert_eq!(samples, vec![0, 4_194_304, -4_194_304, max, max, -max]);
    }

    #[test]
    fn writes_16_bit_pcm() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("out16.wav");
        let encoding = WavEncoding {
            bits_per_sample: 16,
            float: false,
        };
        let mut sink = WavSink::create(&path, StreamFormat::new(8000, 1, 4), encoding)
            .unwrap_or_else(|e| panic!("{e}"));
        sink.write_block(&[1.0, -1.0]).unwrap_or_else(|e| panic!("{e}"));
        Box::new(sink).finalize().unwrap_or_else(|e| panic!("{e}"));

        let mut reader = hound::WavReader::open(&path).unwrap_or_else(|e| panic!("{e}"));
        let samples: Vec<i16> = reader
            .samples::<i16>()
            .map(|s| s.unwrap_or_else(|e| panic!("{e}")))
            .collect();
        assert_eq!(samples, vec![i16::MAX, -i16::MAX]);
    }

    #[test]
    fn writes_float_samples_verbatim() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("float.wav");
        let encoding = WavEncoding {
            bits_per_sample: 32,
            float: true,
        };
        let mut sink = WavSink::create(&path, FORMAT, encoding).unwrap_or_else(|e| panic!("{e}"));
        sink.write_block(&[0.125, -1.5]).unwrap_or_else(|e| panic!("{e}"));
        Box::new(sink).finalize().unwrap_or_else(|e| panic!("{e}"));

        let mut reader = hound::WavReader::open(&path).unwrap_or_else(|e| panic!("{e}"));
        let samples: Vec<f32> = reader
            .samples::<f32>()
            .map(|s| s.unwrap_or_else(|e| panic!("{e}")))
            .collect();
        assert_eq!(samples, vec![0.125, -1.5]);
    }

    #[test]
    fn empty_file_is_valid() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("empty.wav");
        let sink = WavEncoding::default()
            .create(&path, FORMAT)
            .unwrap_or_else(|e| panic!("{e}"));
        sink.finalize().unwrap_or_else(|e| panic!("{e}"));

        let reader = hound::WavReader::open(&path).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(reader.duration(), 0);
    }

    #[test]
    fn unwritable_path_is_a_write_failure() {
        let result = WavEncoding::default().create(Path::new("/nonexistent/dir/out.wav"), FORMAT);
        let Err(err) = result else {
            panic!("expected create to fail");
        };
        assert!(matches!(err, ScrubError::Write { .. }));
        assert!(err.to_string().contains("/nonexistent/dir/out.wav"));
    }
}
