use std::io;
use std::path::PathBuf;

use crate::audio::device::Direction;

#[derive(Debug, thiserror::Error)]
pub enum ScrubError {
    #[error("no {direction} device matching '{name}' with at least {channels} channels")]
    DeviceNotFound {
        name: String,
        direction: Direction,
        channels: u16,
    },

    #[error("decode failed for {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("audio transport error: {0}")]
    Transport(String),

    #[error("write failed for {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },

    #[error("re-encode failed for {}: {reason}", input.display())]
    Reencode { input: PathBuf, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ScrubError>;
