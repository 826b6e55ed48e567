use anyhow::{Context, Result};
use bytesize::ByteSize;
use clap::{Parser, Subcommand};
use disconvert::config::DEFAULT_CONFIG_FILE;
use disconvert::fingerprint::DEFAULT_STORE_FILE;
use disconvert::probe::Prober;
use disconvert::Tools;
use std::path::PathBuf;
use std::time::Duration;
use thread_priority::{set_current_thread_priority, ThreadPriority};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod interactive;
mod runner;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Paths file: a header line, the source directory, the output directory.
    #[arg(long, global = true, env = "DISCONVERT_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Fingerprints of videos that were already handled.
    #[arg(long, global = true, env = "DISCONVERT_STORE", default_value = DEFAULT_STORE_FILE)]
    store: PathBuf,

    #[arg(long, global = true, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    #[arg(long, global = true, env = "FFPROBE_PATH", default_value = "ffprobe")]
    ffprobe: PathBuf,

    /// Kill an ffmpeg/ffprobe run that takes longer than this (e.g. "2h").
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    tool_timeout: Option<Duration>,

    /// Lower the priority of the runtime threads and the encoders they spawn.
    #[arg(long, global = true)]
    low_priority: bool,

    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Check the source directory once and print a summary (the default).
    Run(runner::RunArgs),
    /// Start and stop batches from a prompt, watching their progress.
    Interactive,
    /// Print the codec and frame rate ffprobe reports for each file.
    Probe {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Everything the front ends share, fixed for the life of the process.
pub(crate) struct Settings {
    pub config_path: PathBuf,
    pub store_path: PathBuf,
    pub tools: Tools,
}

fn main() -> Result<()> {
    human_panic::setup_panic!();
    let args = Args::parse();
    // Before anything that may want to log.
    init_tracing(args.verbose);

    let low_priority = args.low_priority;
    if low_priority {
        report_priority(lower_priority());
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .on_thread_start(move || {
            if low_priority {
                report_priority(lower_priority());
            }
        })
        .build()
        .context("start tokio runtime")?;

    runtime.block_on(run(args))
}

fn lower_priority() -> Result<(), thread_priority::Error> {
    set_current_thread_priority(ThreadPriority::Min)
}

fn report_priority(result: Result<(), thread_priority::Error>) {
    if let Err(e) = result {
        tracing::warn!("could not lower thread priority: {e:?}");
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let settings = Settings {
        config_path: args.config,
        store_path: args.store,
        tools: Tools {
            ffmpeg: args.ffmpeg,
            ffprobe: args.ffprobe,
            timeout: args.tool_timeout,
        },
    };

    match args.command.unwrap_or(Command::Run(runner::RunArgs::default())) {
        Command::Run(run_args) => runner::run(&settings, run_args).await,
        Command::Interactive => interactive::run(&settings).await,
        Command::Probe { files } => probe(&settings.tools, files).await,
    }
}

async fn probe(tools: &Tools, files: Vec<PathBuf>) -> Result<()> {
    let prober = Prober::new(tools);
    for file in files {
        let size = tokio::fs::metadata(&file)
            .await
            .with_context(|| format!("stat '{}'", file.display()))?
            .len();
        let codec = prober.codec(&file).await;
        let fps = prober.frame_rate(&file).await;
        println!(
            "{}: codec={} fps={fps:.3} size={}",
            file.display(),
            if codec.is_empty() { "<unknown>" } else { &codec },
            ByteSize(size)
        );
    }
    Ok(())
}
