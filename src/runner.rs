//! One-shot batch with a progress bar, then a printed summary.

use crate::Settings;
use anyhow::Result;
use disconvert::batch::ProgressEvent;
use disconvert::pipeline::HEADLESS_PREFIX;
use disconvert::{run_batch, BatchHooks, Config, Pipeline, PipelineOptions};
use indicatif::ProgressStyle;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, info_span, Instrument, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

#[derive(Debug, Default, clap::Args)]
pub struct RunArgs {
    /// Directory to check, instead of the one in the paths file.
    #[arg(long)]
    source: Option<PathBuf>,

    /// Directory for shrunk copies, instead of the one in the paths file.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write --source/--output back to the paths file.
    #[arg(long)]
    save: bool,
}

pub async fn run(settings: &Settings, args: RunArgs) -> Result<()> {
    info!("Initializing...");
    settings.tools.require_encoder()?;

    let mut config = Config::load(&settings.config_path)?;
    if let Some(source) = args.source {
        config.source_dir = Some(source);
    }
    if let Some(output) = args.output {
        config.output_dir = Some(output);
    }
    if args.save {
        config.save(&settings.config_path)?;
    }
    let source = config.source_dir()?.to_path_buf();
    let output = config.output_dir()?.to_path_buf();
    info!(source = %source.display(), "source directory");
    info!(output = %output.display(), "directory for shrunk videos");

    let options = PipelineOptions::new(output).with_prefix(HEADLESS_PREFIX);
    let mut pipeline = Pipeline::open(&settings.tools, &settings.store_path, options).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let hooks = BatchHooks::new().with_events(tx);
    let batch = async move {
        let summary = run_batch(&mut pipeline, &source, &hooks).await;
        drop(hooks);
        summary
    };

    let header_span = info_span!("batch");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    let display = render(UnboundedReceiverStream::new(rx)).instrument(header_span.clone());

    let (summary, ()) = tokio::join!(batch, display);
    drop(header_span);

    println!("{}", summary?);
    Ok(())
}

async fn render(mut events: UnboundedReceiverStream<ProgressEvent>) {
    while let Some(event) = events.next().await {
        match event {
            ProgressEvent::BatchStarted { videos, .. } => {
                Span::current().pb_set_length(videos as u64);
            }
            ProgressEvent::FileStarted { name, .. } => {
                Span::current().pb_set_message(&name);
            }
            ProgressEvent::FileFinished { name, result, .. } => {
                match result {
                    Ok(outcome) => debug!(file = %name, %outcome, "finished"),
                    Err(reason) => error!(file = %name, "failed: {reason}"),
                }
                Span::current().pb_inc(1);
            }
            ProgressEvent::BatchComplete(_) => break,
        }
    }
}
