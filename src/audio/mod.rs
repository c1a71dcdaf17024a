pub mod decode;
pub mod device;
pub mod duplex;
pub mod queue;
pub mod transport;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;

use crate::config::AudioConfig;

/// Shape of the PCM exchanged between every stage of one re-record pass:
/// interleaved 32-bit float at a fixed rate and channel count, in blocks of
/// `block_frames` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_frames: usize,
}

impl StreamFormat {
    #[must_use]
    pub const fn new(sample_rate: u32, channels: u16, block_frames: usize) -> Self {
        Self {
            sample_rate,
            channels,
            block_frames,
        }
    }

    #[must_use]
    pub const fn from_config(config: &AudioConfig) -> Self {
        Self::new(config.sample_rate, config.channels, config.block_frames)
    }

    /// Interleaved samples in one full block.
    #[must_use]
    pub const fn block_samples(&self) -> usize {
        self.block_frames * self.channels as usize
    }

    #[must_use]
    pub const fn frames_in(&self, samples: usize) -> usize {
        samples / self.channels as usize
    }
}
