//! Sequential processing of several input files.
//!
//! Each file is re-recorded to `<stem><rerecord_suffix>` and then either
//! re-encoded to `<stem><output_suffix>` or, without a re-encoder, renamed
//! there. A failed re-encode keeps the intermediate file and moves on to the
//! next input; any re-record failure stops the batch.

use std::path::{Path, PathBuf};

use crate::config::BatchConfig;
use crate::error::{Result, ScrubError};
use crate::reencode::Reencoder;
use crate::rerecord::{CancelToken, Rerecorder};

/// Notifications for whoever is presenting the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    Status(String),
    /// `current` of `total` files have been handled.
    Progress { current: usize, total: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReencodeFailure {
    /// The re-recorded file, left on disk.
    pub intermediate: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Final output files, in input order.
    pub completed: Vec<PathBuf>,
    pub reencode_failures: Vec<ReencodeFailure>,
    pub cancelled: bool,
}

/// Intermediate and final paths for `input`, next to it.
#[must_use]
pub fn output_paths(input: &Path, config: &BatchConfig) -> (PathBuf, PathBuf) {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    (
        input.with_file_name(format!("{stem}{}", config.rerecord_suffix)),
        input.with_file_name(format!("{stem}{}", config.output_suffix)),
    )
}

pub fn process_files(
    inputs: &[PathBuf],
    config: &BatchConfig,
    rerecorder: &Rerecorder<'_>,
    reencoder: Option<&dyn Reencoder>,
    cancel: &CancelToken,
    observer: &mut dyn FnMut(BatchEvent),
) -> Result<BatchSummary> {
    let total = inputs.len();
    let mut summary = BatchSummary::default();

    for (idx, input) in inputs.iter().enumerate() {
        let current = idx + 1;
        if cancel.is_cancelled() {
            observer(BatchEvent::Status(format!(
                "cancelled, {} of {total} files left unprocessed",
                total - idx
            )));
            summary.cancelled = true;
            break;
        }

        let (intermediate, output) = output_paths(input, config);
        observer(BatchEvent::Status(format!(
            "processing {} ({current}/{total})",
            input.display()
        )));

        let report = rerecorder.run(input, &intermediate, cancel)?;
        if report.dropped > 0 {
            observer(BatchEvent::Status(format!(
                "  {} blocks dropped while recording",
                report.dropped
            )));
        }
        if report.cancelled {
            observer(BatchEvent::Status(format!(
                "  cancelled, partial recording kept at {}",
                intermediate.display()
            )));
            summary.cancelled = true;
            break;
        }

        match reencoder {
            Some(reencoder) => match reencoder.reencode(&intermediate, &output) {
                Ok(()) => {
                    if let Err(e) = std::fs::remove_file(&intermediate) {
                        tracing::warn!("failed to remove {}: {e}", intermediate.display());
                    }
                    observer(BatchEvent::Status(format!("  -> {}", output.display())));
                    summary.completed.push(output);
                }
                Err(e) => {
                    tracing::error!("{e}");
                    observer(BatchEvent::Status(format!(
                        "  re-encode failed, keeping {}: {e}",
                        intermediate.display()
                    )));
                    summary.reencode_failures.push(ReencodeFailure {
                        intermediate,
                        reason: e.to_string(),
                    });
                }
            },
            None => {
                std::fs::rename(&intermediate, &output).map_err(|e| ScrubError::Write {
                    path: output.clone(),
                    reason: format!("failed to move {} into place: {e}", intermediate.display()),
                })?;
                observer(BatchEvent::Status(format!("  -> {}", output.display())));
                summary.completed.push(output);
            }
        }

        observer(BatchEvent::Progress { current, total });
    }

    Ok(summary)
}
