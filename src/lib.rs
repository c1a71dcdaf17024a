pub mod audio;
pub mod batch;
pub mod config;
pub mod error;
pub mod reencode;
pub mod rerecord;
