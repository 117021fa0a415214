use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::broadcast::error::TryRecvError;

use slidekit::config::{default_data_directory, load_config, Config};
use slidekit::logging::init_logging;
use slidekit::{CombinedResult, JobParams, JobState, Service, Submission};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const PPTX_MIME: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";

#[derive(Parser)]
#[command(
    name = "slidekit",
    version,
    about = "Render slide decks to SVG and extract positioned text for translation"
)]
struct Cli {
    /// Decks (.pptx) to process
    #[arg(required = true)]
    decks: Vec<PathBuf>,

    /// Path to config.json (defaults to ~/.slidekit)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Source language recorded with the job
    #[arg(long)]
    source_lang: Option<String>,

    /// Target language recorded with the job
    #[arg(long)]
    target_lang: Option<String>,

    /// Also store a layout thumbnail per slide
    #[arg(long)]
    thumbnails: bool,

    /// Print the combined result of every completed job
    #[arg(long)]
    results: bool,
}

#[derive(Serialize)]
struct JobReport {
    deck: String,
    job_id: String,
    session_id: String,
    state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<CombinedResult>,
}

fn load(cli: &Cli) -> Result<Config, String> {
    match &cli.config {
        Some(path) => load_config(path).map_err(|e| e.to_string()),
        None => default_data_directory()
            .map(Config::default_for)
            .ok_or_else(|| "cannot determine home directory; pass --config".to_string()),
    }
}

fn is_presentation(path: &Path) -> bool {
    mime_guess::from_path(path)
        .iter_raw()
        .any(|mime| mime == PPTX_MIME)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("slidekit: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("slidekit: {}", e);
    }

    info!("Starting slidekit v{}", env!("CARGO_PKG_VERSION"));

    let service = match Service::start(config) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            warn!("Ctrl-C handler not installed: {}", e);
        }
    }

    let params = JobParams {
        source_lang: cli.source_lang.clone(),
        target_lang: cli.target_lang.clone(),
        want_thumbnails: cli.thumbnails,
    };

    let mut events = service.subscribe();
    let mut submitted: Vec<(PathBuf, Submission)> = Vec::new();
    let mut failed = false;
    for deck in &cli.decks {
        if !is_presentation(deck) {
            error!("{}: not a .pptx presentation, skipping", deck.display());
            failed = true;
            continue;
        }
        match service.submit_path(deck, None, params.clone()) {
            Ok(submission) => submitted.push((deck.clone(), submission)),
            Err(e) => {
                error!("{}: {}", deck.display(), e);
                failed = true;
            }
        }
    }

    loop {
        loop {
            match events.try_recv() {
                Ok(event) => info!(
                    "[{}] {} {}% {}",
                    event.job_id, event.state, event.progress_pct, event.stage_label
                ),
                Err(TryRecvError::Lagged(skipped)) => warn!("Missed {} progress events", skipped),
                Err(_) => break,
            }
        }

        let done = submitted.iter().all(|(_, s)| {
            service
                .get_status(&s.job_id)
                .is_some_and(|status| status.state.is_terminal())
        });
        if done {
            break;
        }
        if interrupted.load(Ordering::SeqCst) {
            warn!("Interrupted, cancelling queued jobs");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    // Running jobs finish; queued ones are cancelled.
    service.shutdown();

    for (deck, submission) in submitted {
        let status = service.get_status(&submission.job_id);
        let state = status.as_ref().map(|s| s.state).unwrap_or(JobState::Failed);
        failed |= state != JobState::Completed;

        let result = if cli.results && state == JobState::Completed {
            match service.fetch_results(&submission.session_id) {
                Ok(result) => Some(result),
                Err(e) => {
                    error!("{}: {}", deck.display(), e);
                    None
                }
            }
        } else {
            None
        };

        let report = JobReport {
            deck: deck.display().to_string(),
            job_id: submission.job_id,
            session_id: submission.session_id,
            state,
            error: status.and_then(|s| s.error),
            result,
        };
        match serde_json::to_string(&report) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Cannot encode report: {}", e),
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
