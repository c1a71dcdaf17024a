//! External re-encoding of a re-recorded file.

use std::path::Path;
use std::process::Command;

use crate::config::ReencodeConfig;
use crate::error::{Result, ScrubError};

/// Transforms one WAV file into another.
pub trait Reencoder {
    fn reencode(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Runs an external program built from a command template.
///
/// `{bitrate}`, `{input}` and `{output}` are substituted in every argument.
/// The first element is the program.
#[derive(Debug, Clone)]
pub struct CommandReencoder {
    template: Vec<String>,
    bitrate: String,
}

impl CommandReencoder {
    pub fn new(template: Vec<String>, bitrate: impl Into<String>) -> Result<Self> {
        let bitrate = bitrate.into();
        if template.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(ScrubError::Config(
                "reencode.command must name a program".to_string(),
            ));
        }
        if bitrate.trim().is_empty() {
            return Err(ScrubError::Config(
                "reencode.bitrate must not be empty".to_string(),
            ));
        }
        Ok(Self { template, bitrate })
    }

    pub fn from_config(config: &ReencodeConfig) -> Result<Self> {
        Self::new(config.command.clone(), config.bitrate.clone())
    }

    /// The full argument vector for one invocation.
    #[must_use]
    pub fn command_for(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.template
            .iter()
            .map(|arg| {
                arg.replace("{bitrate}", &self.bitrate)
                    .replace("{input}", &input)
                    .replace("{output}", &output)
            })
            .collect()
    }
}

impl Reencoder for CommandReencoder {
    fn reencode(&self, input: &Path, output: &Path) -> Result<()> {
        let argv = self.command_for(input, output);
        let Some((program, args)) = argv.split_first() else {
            return Err(ScrubError::Config("reencode.command is empty".to_string()));
        };

        tracing::info!("re-encoding {} at {}", input.display(), self.bitrate);
        tracing::debug!("running {}", argv.join(" "));

        let result = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| ScrubError::Reencode {
                input: input.to_path_buf(),
                reason: format!("failed to run {program}: {e}"),
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ScrubError::Reencode {
                input: input.to_path_buf(),
                reason: format!("{program} exited with {}: {}", result.status, stderr.trim()),
            });
        }

        Ok(())
    }
}
