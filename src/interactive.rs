//! Prompt-driven controller. Batches run on a background task; the prompt
//! stays usable and progress arrives as events on a channel.

use crate::Settings;
use anyhow::{Context, Result};
use disconvert::batch::ProgressEvent;
use disconvert::config::parse_dir;
use disconvert::pipeline::INTERACTIVE_PREFIX;
use disconvert::{run_batch, BatchHooks, BatchSummary, Config, Pipeline, PipelineOptions};
use indicatif::ProgressStyle;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strum::{Display, EnumString};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, info_span, warn, Instrument, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

const HELP: &str = "\
commands:
  start            check the source directory
  redo             run again after a finished batch
  stop             stop after the current file
  status           show progress
  source <dir>     set and save the source directory
  output <dir>     set and save the directory for shrunk videos
  paths            show both directories
  debug            toggle per-file messages
  help             show this
  quit             leave (waits for the current file)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
enum Verb {
    Start,
    Redo,
    Stop,
    Status,
    Source,
    Output,
    Paths,
    Debug,
    Help,
    #[strum(serialize = "quit", serialize = "exit")]
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum Status {
    Ready,
    Running,
    Stopping,
    Complete,
    Failed,
}

struct Job {
    handle: JoinHandle<Result<BatchSummary>>,
    stop: Arc<AtomicBool>,
    span: Span,
}

struct Controller<'a> {
    settings: &'a Settings,
    config: Config,
    events: mpsc::UnboundedSender<ProgressEvent>,
    job: Option<Job>,
    status: Status,
    debug: bool,
    videos: usize,
    processed: usize,
    current: Option<String>,
    last: Option<BatchSummary>,
}

pub async fn run(settings: &Settings) -> Result<()> {
    settings.tools.require_encoder()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut controller = Controller::new(settings, Config::load(&settings.config_path)?, tx);
    controller.print_paths();
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            biased;
            Some(event) = rx.recv() => controller.on_event(event),
            result = finished(&mut controller.job) => controller.on_finished(result),
            line = lines.next_line() => {
                match line.context("read command")? {
                    Some(line) if controller.command(&line) => {}
                    _ => break,
                }
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}

/// Splits a prompt line into its command and argument.
///
/// Blank lines give `Ok(None)`; an unknown command comes back as the offending word.
fn parse_command(line: &str) -> Result<Option<(Verb, &str)>, &str> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, arg) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(word, arg)| (word, arg.trim()));
    Verb::from_str(word).map(|verb| Some((verb, arg))).map_err(|_| word)
}

/// Resolves when the running batch ends; never, when none is running.
async fn finished(job: &mut Option<Job>) -> Result<Result<BatchSummary>, JoinError> {
    match job {
        Some(job) => (&mut job.handle).await,
        None => std::future::pending().await,
    }
}

impl<'a> Controller<'a> {
    fn new(
        settings: &'a Settings,
        config: Config,
        events: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self {
            settings,
            config,
            events,
            job: None,
            status: Status::Ready,
            debug: false,
            videos: 0,
            processed: 0,
            current: None,
            last: None,
        }
    }

    /// Handles one prompt line. Returns false when the user wants to leave.
    fn command(&mut self, line: &str) -> bool {
        let (verb, arg) = match parse_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return true,
            Err(word) => {
                warn!("unknown command '{word}', try 'help'");
                return true;
            }
        };

        match verb {
            Verb::Start => {
                self.start();
            }
            Verb::Redo if self.last.is_none() => warn!("nothing to redo yet, use 'start'"),
            Verb::Redo => {
                self.start();
            }
            Verb::Stop => self.stop(),
            Verb::Status => self.print_status(),
            Verb::Source | Verb::Output => self.set_dir(verb, arg),
            Verb::Paths => self.print_paths(),
            Verb::Debug => {
                self.debug = !self.debug;
                info!(
                    "per-file messages {}",
                    if self.debug { "shown" } else { "hidden" }
                );
            }
            Verb::Help => println!("{HELP}"),
            Verb::Quit => return false,
        }
        true
    }

    /// Launches a batch in the background. Returns whether one was started.
    fn start(&mut self) -> bool {
        if self.job.is_some() {
            warn!("a batch is already running");
            return false;
        }
        let (Some(source), Some(output)) =
            (self.config.source_dir.clone(), self.config.output_dir.clone())
        else {
            warn!("Please set both source and output directories");
            return false;
        };

        let tools = self.settings.tools.clone();
        let store_path = self.settings.store_path.clone();
        let options = PipelineOptions::new(output).with_prefix(INTERACTIVE_PREFIX);
        let stop = Arc::new(AtomicBool::new(false));
        let hooks = BatchHooks::new()
            .with_events(self.events.clone())
            .with_stop(stop.clone());

        let span = info_span!("batch", source = %source.display());
        span.pb_set_style(&ProgressStyle::default_bar());
        let handle = tokio::spawn(
            async move {
                let mut pipeline = Pipeline::open(&tools, store_path, options).await?;
                run_batch(&mut pipeline, &source, &hooks).await
            }
            .instrument(span.clone()),
        );

        self.job = Some(Job { handle, stop, span });
        self.status = Status::Running;
        self.videos = 0;
        self.processed = 0;
        self.current = None;
        info!("Status: {}", self.status);
        true
    }

    fn stop(&mut self) {
        match &self.job {
            Some(job) => {
                job.stop.store(true, Ordering::SeqCst);
                self.status = Status::Stopping;
                info!("stopping after the current file");
            }
            None => info!("nothing is running"),
        }
    }

    fn set_dir(&mut self, verb: Verb, arg: &str) {
        let Some(dir) = parse_dir(arg) else {
            warn!("usage: {} <directory>", if verb == Verb::Source { "source" } else { "output" });
            return;
        };
        if verb == Verb::Source {
            if !dir.is_dir() {
                warn!("'{}' is not a directory", dir.display());
                return;
            }
            self.config.source_dir = Some(dir);
        } else {
            self.config.output_dir = Some(dir);
        }

        if let Err(e) = self.config.save(&self.settings.config_path) {
            error!("could not save paths: {e:#}");
        }
        if self.job.is_some() {
            info!("the running batch keeps its directories; the change applies to the next one");
        }
        self.print_paths();
    }

    fn on_event(&mut self, event: ProgressEvent) {
        let span = self.job.as_ref().map(|job| &job.span);
        match event {
            ProgressEvent::BatchStarted { entries, videos, .. } => {
                self.videos = videos;
                if let Some(span) = span {
                    span.pb_set_length(videos as u64);
                }
                if videos == 0 {
                    info!("No video files found among {entries} files");
                }
            }
            ProgressEvent::FileStarted { name, .. } => {
                if self.debug {
                    info!("Checking: {name}");
                }
                if let Some(span) = span {
                    span.pb_set_message(&name);
                }
                self.current = Some(name);
            }
            ProgressEvent::FileFinished { name, result, .. } => {
                self.processed += 1;
                self.current = None;
                if let Some(span) = span {
                    span.pb_inc(1);
                }
                if self.debug {
                    match result {
                        Ok(outcome) => info!("{name}: {outcome}"),
                        Err(reason) => warn!("{name}: {reason}"),
                    }
                }
            }
            ProgressEvent::BatchComplete(_) => {}
        }
    }

    fn on_finished(&mut self, result: Result<Result<BatchSummary>, JoinError>) {
        self.job = None;
        self.current = None;
        match result {
            Ok(Ok(summary)) => {
                self.status = Status::Complete;
                for line in summary.to_string().lines() {
                    info!("{line}");
                }
                self.last = Some(summary);
            }
            Ok(Err(e)) => {
                self.status = Status::Failed;
                error!("batch failed: {e:#}");
            }
            Err(e) => {
                self.status = Status::Failed;
                error!("batch task ended abnormally: {e}");
            }
        }
        info!("Status: {}", self.status);
    }

    async fn shutdown(mut self) {
        let Some(job) = self.job.take() else {
            return;
        };
        job.stop.store(true, Ordering::SeqCst);
        info!("waiting for the current file to finish");
        let result = job.handle.await;
        drop(job.span);
        self.on_finished(result);
    }

    fn print_status(&self) {
        println!("Status: {}", self.status);
        println!(
            "{}/{} files processed ({} videos found)",
            self.processed, self.videos, self.videos
        );
        println!(
            "Current file: {}",
            self.current.as_deref().unwrap_or("None")
        );
    }

    fn print_paths(&self) {
        println!("Source: {}", describe(self.config.source_dir.as_ref()));
        println!("Output for shrunk videos: {}", describe(self.config.output_dir.as_ref()));
    }
}

fn describe(dir: Option<&PathBuf>) -> String {
    dir.map_or_else(|| "Not set".to_owned(), |d| d.display().to_string())
}
