use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, ScrubError};

fn default_output_device() -> String {
    "CABLE Input".to_string()
}

fn default_input_device() -> String {
    "CABLE Output".to_string()
}

const fn default_sample_rate() -> u32 {
    44100
}

const fn default_channels() -> u16 {
    2
}

const fn default_block_frames() -> usize {
    1024
}

const fn default_bits_per_sample() -> u16 {
    24
}

const fn default_queue_capacity() -> usize {
    64
}

const fn default_lookahead_blocks() -> usize {
    32
}

const fn default_wait_timeout_ms() -> u64 {
    500
}

const fn default_drain_ms() -> u64 {
    500
}

fn default_decoder_program() -> String {
    "ffmpeg".to_string()
}

const fn default_true() -> bool {
    true
}

fn default_bitrate() -> String {
    "12k".to_string()
}

fn default_reencode_command() -> Vec<String> {
    [
        "python3",
        "-m",
        "demucs.encodec",
        "--bitrate",
        "{bitrate}",
        "{input}",
        "-o",
        "{output}",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

fn default_rerecord_suffix() -> String {
    "_rerecord.wav".to_string()
}

fn default_output_suffix() -> String {
    "_clean.wav".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub decoder: DecoderConfig,

    #[serde(default)]
    pub reencode: ReencodeConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Substring of the device that plays the decoded source.
    #[serde(default = "default_output_device")]
    pub output_device: String,

    /// Substring of the device that captures the loopback.
    #[serde(default = "default_input_device")]
    pub input_device: String,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Frames per duplex callback invocation.
    #[serde(default = "default_block_frames")]
    pub block_frames: usize,

    #[serde(default = "default_bits_per_sample")]
    pub bits_per_sample: u16,

    /// Write IEEE float samples instead of integer PCM (requires 32 bits).
    #[serde(default)]
    pub float_samples: bool,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_lookahead_blocks")]
    pub lookahead_blocks: usize,

    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,

    /// Blocks still captured after the source has ended.
    #[serde(default)]
    pub tail_blocks: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_device: default_output_device(),
            input_device: default_input_device(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            block_frames: default_block_frames(),
            bits_per_sample: default_bits_per_sample(),
            float_samples: false,
            queue_capacity: default_queue_capacity(),
            lookahead_blocks: default_lookahead_blocks(),
            wait_timeout_ms: default_wait_timeout_ms(),
            drain_ms: default_drain_ms(),
            tail_blocks: 0,
        }
    }
}

impl AudioConfig {
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    #[must_use]
    pub const fn drain_budget(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ScrubError::Config("audio.sample_rate must be non-zero".to_string()));
        }
        if self.channels == 0 {
            return Err(ScrubError::Config("audio.channels must be non-zero".to_string()));
        }
        if self.block_frames == 0 {
            return Err(ScrubError::Config("audio.block_frames must be non-zero".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ScrubError::Config(
                "audio.queue_capacity must be non-zero".to_string(),
            ));
        }
        if self.lookahead_blocks == 0 {
            return Err(ScrubError::Config(
                "audio.lookahead_blocks must be non-zero".to_string(),
            ));
        }
        match (self.float_samples, self.bits_per_sample) {
            (false, 16 | 24 | 32) | (true, 32) => Ok(()),
            (true, bits) => Err(ScrubError::Config(format!(
                "audio.float_samples requires 32 bits per sample, got {bits}"
            ))),
            (false, bits) => Err(ScrubError::Config(format!(
                "unsupported audio.bits_per_sample {bits} (available: 16, 24, 32)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecoderConfig {
    #[serde(default = "default_decoder_program")]
    pub program: String,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            program: default_decoder_program(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReencodeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bitrate")]
    pub bitrate: String,

    /// Command template; `{bitrate}`, `{input}` and `{output}` are substituted.
    #[serde(default = "default_reencode_command")]
    pub command: Vec<String>,
}

impl Default for ReencodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bitrate: default_bitrate(),
            command: default_reencode_command(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_rerecord_suffix")]
    pub rerecord_suffix: String,

    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            rerecord_suffix: default_rerecord_suffix(),
            output_suffix: default_output_suffix(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ScrubError::Config(format!(
                "config file not found: {} (create it or omit --config to use defaults)",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            ScrubError::Config(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml_ng::from_str(&contents).map_err(|e| {
            ScrubError::Config(format!(
                "failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()
    }

    /// Load the file at the default location, falling back to built-in
    /// defaults when it does not exist.
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            tracing::debug!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    #[must_use]
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        config_dir.join("rescrub/config.yaml")
    }

    /// Expand `~` in a path string to the user's home directory.
    #[must_use]
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(rest);
        }
        PathBuf::from(path)
    }
}
