use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use env_logger::{Builder as LoggerBuilder, Env, Target};
use indicatif::{ProgressBar, ProgressStyle};
use kinesis_pipe::{
    FfmpegLogLevel, FrameReader, FrameRenderer, KinesisRepository, PipeError, PixelFormat,
    ProgressCallback, ProgressInfo, RenderOptions, StartSelector, StreamRepository,
    StreamingEngine, parse_duration,
};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  kinesis-pipe list --json\n  kinesis-pipe pipe -n front-door -d 30s -f 2 > frames.bin\n  kinesis-pipe pipe -a arn:aws:kinesisvideo:... -t 10m -d PT5M -o frames.bin --progress\n  kinesis-pipe inspect frames.bin\n  kinesis-pipe completions zsh > _kinesis-pipe";

#[derive(Debug, Parser)]
#[command(
    name = "kinesis-pipe",
    version,
    about = "Relay decoded Kinesis Video frames to stdout or a file",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging on stderr.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress spinner on stderr while piping.
    #[arg(long, global = true)]
    progress: bool,

    /// FFmpeg log level (quiet, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// AWS region, overriding the environment.
    #[arg(long, global = true)]
    region: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the streams visible to the current credentials.
    #[command(
        about = "List streams",
        visible_alias = "ls",
        after_help = "Examples:\n  kinesis-pipe list\n  kinesis-pipe list --json"
    )]
    List {
        /// Output the stream list as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Relay frames of one stream into a sink for a bounded duration.
    #[command(
        about = "Pipe decoded frames to stdout or a file",
        after_help = "Each frame is written as an 8-byte big-endian length followed by the raw pixels.\n\nExamples:\n  kinesis-pipe pipe -n front-door -d 30s > frames.bin\n  kinesis-pipe pipe -n front-door -t earliest -d 1h -f 0 --pixel-format gray8 -o frames.bin"
    )]
    Pipe {
        /// Stream name.
        #[arg(short = 'n', long)]
        stream_name: Option<String>,
        /// Stream ARN.
        #[arg(short = 'a', long)]
        stream_arn: Option<String>,
        /// Where to start: now, earliest, or how long ago (e.g. 10m, PT10M).
        #[arg(short = 't', long, default_value = "now")]
        start: String,
        /// How long to keep piping (e.g. 30s, 1m 30s, PT1M30S).
        #[arg(short = 'd', long, default_value = "PT0S")]
        duration: String,
        /// Maximum frames per second of stream time; 0 keeps every frame.
        #[arg(short = 'f', long, default_value_t = 2.0)]
        frames_per_second: f64,
        /// Output pixel format (rgb8, bgr8, rgba8, gray8).
        #[arg(long, default_value = "rgb8")]
        pixel_format: String,
        /// Output width; height follows the aspect ratio unless also given.
        #[arg(long)]
        width: Option<u32>,
        /// Output height; width follows the aspect ratio unless also given.
        #[arg(long)]
        height: Option<u32>,
        /// Output file. Defaults to stdout.
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        /// Allow overwriting an existing output file.
        #[arg(long)]
        overwrite: bool,
    },

    /// Summarize a file produced by `pipe`.
    #[command(
        about = "Summarize a framed output file",
        after_help = "Examples:\n  kinesis-pipe inspect frames.bin\n  kinesis-pipe inspect frames.bin --json"
    )]
    Inspect {
        /// Framed file to read.
        input: PathBuf,
        /// Output the summary as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

fn init_logging(global: &GlobalOptions) {
    let default_filter = if global.verbose { "debug" } else { "info" };
    LoggerBuilder::from_env(Env::default().default_filter_or(default_filter))
        .target(Target::Stderr)
        .init();
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    let level = match &global.log_level {
        Some(level) => level.parse::<FfmpegLogLevel>()?,
        None if global.verbose => FfmpegLogLevel::Warning,
        None => FfmpegLogLevel::Error,
    };
    kinesis_pipe::set_ffmpeg_log_level(level);
    Ok(())
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn render_options(
    pixel_format: &str,
    width: Option<u32>,
    height: Option<u32>,
    frames_per_second: f64,
) -> Result<RenderOptions, PipeError> {
    Ok(RenderOptions::new()
        .with_pixel_format(pixel_format.parse::<PixelFormat>()?)
        .with_resolution(width, height)
        .with_frames_per_second(frames_per_second))
}

/// Spinner on stderr fed from engine progress.
struct SpinnerProgress {
    bar: ProgressBar,
}

impl SpinnerProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {msg}",
        )?);
        bar.enable_steady_tick(Duration::from_millis(120));
        Ok(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for SpinnerProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.bar.set_message(format!(
            "{} elements, {} frames, {} bytes, {:.1}s left",
            info.elements,
            info.frames,
            info.bytes_written,
            info.remaining().as_secs_f64()
        ));
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.global);
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::List { json } => {
            let repository = KinesisRepository::connect(cli.global.region.clone())?;
            let streams = repository.list_streams()?;
            if json {
                let payload: Vec<_> = streams
                    .iter()
                    .map(|stream| json!({ "name": stream.name, "arn": stream.arn }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else if streams.is_empty() {
                eprintln!("{}", "no streams found".yellow());
            } else {
                for stream in &streams {
                    println!(
                        "{}\t{}",
                        stream.name.as_deref().unwrap_or("-").bold(),
                        stream.arn.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        Commands::Pipe {
            stream_name,
            stream_arn,
            start,
            duration,
            frames_per_second,
            pixel_format,
            width,
            height,
            output,
            overwrite,
        } => {
            if stream_name.is_none() && stream_arn.is_none() {
                return Err("one of --stream-name or --stream-arn is required".into());
            }
            let duration = parse_duration(&duration)?;
            let selector = StartSelector::parse(&start, SystemTime::now())?;
            let options = render_options(&pixel_format, width, height, frames_per_second)?;
            log::info!(
                "Piping stream {} for {:?} from {selector:?} as {}",
                stream_name.as_deref().or(stream_arn.as_deref()).unwrap_or_default(),
                duration,
                options.pixel_format
            );

            let mut engine =
                StreamingEngine::new(KinesisRepository::connect(cli.global.region.clone())?);
            let spinner = if cli.global.progress {
                let spinner = Arc::new(SpinnerProgress::new()?);
                engine = engine.with_progress(spinner.clone());
                Some(spinner)
            } else {
                None
            };

            let stream = engine
                .find_stream_info(stream_name.as_deref(), stream_arn.as_deref())?
                .ok_or_else(|| {
                    PipeError::StreamNotFound(
                        stream_name.or(stream_arn).unwrap_or_default(),
                    )
                })?;

            let mut renderer = FrameRenderer::new(options);
            let result = match &output {
                Some(path) => {
                    ensure_writable_path(path, overwrite)?;
                    let sink = BufWriter::new(File::create(path)?);
                    engine.pipe(duration, &stream, &selector, &mut renderer, sink)
                }
                None => {
                    let sink = BufWriter::new(std::io::stdout().lock());
                    engine.pipe(duration, &stream, &selector, &mut renderer, sink)
                }
            };
            if let Some(spinner) = &spinner {
                spinner.finish();
            }
            let report = result?;

            eprintln!(
                "{} {} frames ({} bytes) from {} in {:.1}s ({:?})",
                "piped".green().bold(),
                report.frames,
                report.bytes_written,
                stream,
                report.elapsed.as_secs_f64(),
                report.stop_reason
            );
        }
        Commands::Inspect { input, json } => {
            let reader = FrameReader::new(BufReader::new(File::open(&input)?));
            let mut frames = 0_u64;
            let mut payload_bytes = 0_u64;
            let mut smallest: Option<usize> = None;
            let mut largest = 0_usize;
            for payload in reader {
                let length = payload?.len();
                frames += 1;
                payload_bytes += length as u64;
                smallest = Some(smallest.map_or(length, |current| current.min(length)));
                largest = largest.max(length);
            }

            if json {
                let payload = json!({
                    "file": input.display().to_string(),
                    "frames": frames,
                    "payload_bytes": payload_bytes,
                    "smallest_frame": smallest,
                    "largest_frame": (frames > 0).then_some(largest),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("File: {}", input.display());
                println!("Frames: {frames}");
                println!("Payload bytes: {payload_bytes}");
                if let Some(smallest) = smallest {
                    println!("Frame size: {smallest}..={largest} bytes");
                }
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "kinesis-pipe", &mut std::io::stdout());
        }
    }

    std::io::stdout().flush()?;
    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands, render_options};
    use clap::Parser;
    use kinesis_pipe::PixelFormat;

    #[test]
    fn pipe_defaults_match_documented_values() {
        let cli = Cli::parse_from(["kinesis-pipe", "pipe", "-n", "front-door"]);
        let Commands::Pipe {
            stream_name,
            start,
            duration,
            frames_per_second,
            output,
            ..
        } = cli.command
        else {
            panic!("expected pipe command");
        };
        assert_eq!(stream_name.as_deref(), Some("front-door"));
        assert_eq!(start, "now");
        assert_eq!(duration, "PT0S");
        assert_eq!(frames_per_second, 2.0);
        assert!(output.is_none());
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::parse_from(["kinesis-pipe", "list", "--json", "--verbose", "--region", "eu-west-1"]);
        assert!(cli.global.verbose);
        assert_eq!(cli.global.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn render_options_from_flags() {
        let options = render_options("GRAY", Some(320), None, 0.0).unwrap();
        assert_eq!(options.pixel_format, PixelFormat::Gray8);
        assert_eq!(options.width, Some(320));
        assert_eq!(options.frames_per_second, None);
        assert!(render_options("yuv420p", None, None, 2.0).is_err());
    }
}
