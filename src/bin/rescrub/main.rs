use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

use rescrub::audio::decode::FfmpegDecoder;
use rescrub::audio::device::{CpalCatalog, Direction, available_devices, find_device_index};
use rescrub::audio::transport::CpalTransport;
use rescrub::audio::writer::WavEncoding;
use rescrub::batch::{BatchEvent, process_files};
use rescrub::config::Config;
use rescrub::error::ScrubError;
use rescrub::reencode::{CommandReencoder, Reencoder};
use rescrub::rerecord::{CancelToken, RerecordReport, Rerecorder};

#[derive(Parser)]
#[command(
    name = "rescrub",
    about = "Launder audio files through a loopback re-recording",
    long_about = "Rescrub plays each input file through an output audio device while \
        recording the matching input device (typically the two ends of a virtual \
        audio cable) into a new WAV file. The re-recorded file can then be passed \
        through an external lossy re-encoder to produce the final output."
)]
struct Cli {
    /// Path to config file
    ///
    /// Defaults to ~/.config/rescrub/config.yaml if not specified; built-in
    /// defaults are used when that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    ///
    /// Sets the log level to debug for the rescrub crate, showing stream
    /// phase transitions, decoder activity and device selection.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List audio devices
    ///
    /// Shows every device of the default audio host with its index and
    /// input/output channel counts. The devices the configured names
    /// resolve to are marked.
    Devices,

    /// Re-record a single file
    ///
    /// Plays INPUT through the output device and records the input device
    /// into OUTPUT as a WAV file. Stops when the source ends, or on Ctrl+C
    /// after writing what was already captured.
    Rerecord {
        /// Audio file to play (anything the decoder can read)
        input: PathBuf,

        /// WAV file to write
        output: PathBuf,

        /// Substring of the playback device name
        #[arg(long)]
        output_device: Option<String>,

        /// Substring of the capture device name
        #[arg(long)]
        input_device: Option<String>,
    },

    /// Re-record and re-encode a batch of files
    ///
    /// Each file is re-recorded next to itself and then re-encoded with the
    /// configured command. Without FILES, every *.mp3 in the current
    /// directory is processed in name order.
    Scrub {
        /// Files to process
        files: Vec<PathBuf>,

        /// Skip the re-encode stage and keep the re-recorded WAV as output
        #[arg(long)]
        no_reencode: bool,

        /// Bitrate passed to the re-encoder
        #[arg(long)]
        bitrate: Option<String>,
    },

    /// Generate shell completions
    ///
    /// Prints a completion script for the given shell to stdout.
    /// Source or install the output to enable tab completion.
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, elvish, powershell)
        shell: Shell,
    },
}

fn load_config(cli: &Cli) -> Result<Config, ScrubError> {
    match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("rescrub=debug,info")
    } else {
        EnvFilter::new("rescrub=info,warn")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    install_completions_if_missing();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = run(cli);
    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

/// Auto-install shell completions for `$SHELL` if the completion file does not
/// already exist. Errors are ignored.
fn install_completions_if_missing() {
    let Ok(shell_env) = std::env::var("SHELL") else {
        return;
    };

    let Some(home) = dirs::home_dir() else {
        return;
    };

    let (shell, path) = if shell_env.ends_with("/bash") {
        let dir = home.join(".local/share/bash-completion/completions");
        (Shell::Bash, dir.join("rescrub"))
    } else if shell_env.ends_with("/zsh") {
        (Shell::Zsh, home.join(".zfunc/_rescrub"))
    } else if shell_env.ends_with("/fish") {
        (Shell::Fish, home.join(".config/fish/completions/rescrub.fish"))
    } else {
        return;
    };

    if path.exists() {
        return;
    }

    if let Some(parent) = path.parent()
        && std::fs::create_dir_all(parent).is_err()
    {
        return;
    }

    let mut buf = Vec::new();
    generate(shell, &mut Cli::command(), "rescrub", &mut buf);

    let _ = std::fs::write(&path, buf);
}

fn run(cli: Cli) -> Result<(), ScrubError> {
    if let Command::Completions { shell } = cli.command {
        generate(shell, &mut Cli::command(), "rescrub", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = load_config(&cli)?;

    match cli.command {
        Command::Devices => run_devices(&config),
        Command::Rerecord {
            input,
            output,
            output_device,
            input_device,
        } => {
            if let Some(name) = output_device {
                config.audio.output_device = name;
            }
            if let Some(name) = input_device {
                config.audio.input_device = name;
            }
            run_rerecord(&config, &input, &output)
        }
        Command::Scrub {
            files,
            no_reencode,
            bitrate,
        } => {
            if no_reencode {
                config.reencode.enabled = false;
            }
            if let Some(bitrate) = bitrate {
                config.reencode.bitrate = bitrate;
            }
            run_scrub(&config, files)
        }
        Command::Completions { .. } => Ok(()),
    }
}

fn run_devices(config: &Config) -> Result<(), ScrubError> {
    let catalog = CpalCatalog;
    let devices = available_devices(&catalog)?;

    if devices.is_empty() {
        println!("No audio devices found.");
        return Ok(());
    }

    let channels = config.audio.channels;
    let output = find_device_index(&catalog, &config.audio.output_device, Direction::Output, channels).ok();
    let input = find_device_index(&catalog, &config.audio.input_device, Direction::Input, channels).ok();

    for device in &devices {
        let marker = if output == Some(device.index) {
            " (playback)"
        } else if input == Some(device.index) {
            " (capture)"
        } else {
            ""
        };
        println!(
            "  {}: {} [in: {}, out: {}]{marker}",
            device.index, device.name, device.max_input_channels, device.max_output_channels
        );
    }

    Ok(())
}

/// Cancel `token` on the first Ctrl+C.
fn cancel_on_ctrl_c(token: CancelToken) {
    let spawned = std::thread::Builder::new()
        .name("rescrub-signal".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::warn!("Ctrl+C handling unavailable: {e}");
                    return;
                }
            };
            rt.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupted, finishing up");
                    token.cancel();
                }
            });
        });

    if let Err(e) = spawned {
        tracing::warn!("Ctrl+C handling unavailable: {e}");
    }
}

fn print_report(report: &RerecordReport, sample_rate: u32) {
    let seconds = report.frames_written as f64 / f64::from(sample_rate);
    println!(
        "Recorded {seconds:.1}s ({} frames, {} blocks)",
        report.frames_written, report.blocks_written
    );
    if report.dropped > 0 || report.underruns > 0 || report.overrun_samples > 0 {
        println!(
            "  {} blocks dropped, {} playback underruns, {} input samples lost to overruns",
            report.dropped, report.underruns, report.overrun_samples
        );
    }
    if report.cancelled {
        println!("  stopped early by interrupt");
    }
}

fn ffmpeg_decoder(config: &Config) -> FfmpegDecoder {
    let program = Config::expand_path(&config.decoder.program);
    FfmpegDecoder::new(program.to_string_lossy())
}

fn run_rerecord(config: &Config, input: &Path, output: &Path) -> Result<(), ScrubError> {
    let catalog = CpalCatalog;
    let transport = CpalTransport;
    let decoder = ffmpeg_decoder(config);
    let sinks = WavEncoding::from_config(&config.audio);
    let rerecorder = Rerecorder::new(&catalog, &transport, &decoder, &sinks, &config.audio);

    let cancel = CancelToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let report = rerecorder.run(input, output, &cancel)?;
    print_report(&report, config.audio.sample_rate);
    println!("Wrote {}", output.display());
    Ok(())
}

/// Every `*.mp3` in `dir`, sorted by name.
fn mp3_files(dir: &Path) -> Result<Vec<PathBuf>, ScrubError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn run_scrub(config: &Config, files: Vec<PathBuf>) -> Result<(), ScrubError> {
    let files = if files.is_empty() {
        mp3_files(Path::new("."))?
    } else {
        files
    };

    if files.is_empty() {
        println!("No input files (and no *.mp3 in the current directory).");
        return Ok(());
    }

    let reencoder = if config.reencode.enabled {
        Some(CommandReencoder::from_config(&config.reencode)?)
    } else {
        None
    };

    let catalog = CpalCatalog;
    let transport = CpalTransport;
    let decoder = ffmpeg_decoder(config);
    let sinks = WavEncoding::from_config(&config.audio);
    let rerecorder = Rerecorder::new(&catalog, &transport, &decoder, &sinks, &config.audio);

    let cancel = CancelToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let summary = process_files(
        &files,
        &config.batch,
        &rerecorder,
        reencoder.as_ref().map(|r| r as &dyn Reencoder),
        &cancel,
        &mut |event| match event {
            BatchEvent::Status(line) => println!("{line}"),
            BatchEvent::Progress { current, total } => tracing::debug!("progress {current}/{total}"),
        },
    )?;

    println!();
    println!("{} of {} files done", summary.completed.len(), files.len());
    for failure in &summary.reencode_failures {
        println!(
            "  re-encode failed, kept {}: {}",
            failure.intermediate.display(),
            failure.reason
        );
    }

    Ok(())
}
