//! pbo-relay: watch a directory for changed PBO files and send them to a
//! webhook.
//!
//! Each run hashes the matching files, zips the ones whose content changed
//! since the last run, and posts the archives to the main webhook with a
//! pacing delay between submissions. Oversized archives and per-file
//! problems are reported to an administrative webhook instead. Fingerprints
//! are kept in a JSON file so a restart does not resend anything.

#![warn(clippy::all)]

mod cli;
mod config;
mod shutdown;
mod state;
mod sync;
mod types;
mod webhook;

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Command;
use config::{expand_tilde, Config};
use state::{HashStore, RunLock};
use sync::detect::{compare_tracked, TrackedState};
use sync::dispatch::Dispatcher;
use sync::gate::SizeGate;
use sync::status::{StatusEvent, StatusReporter};
use sync::SyncContext;
use webhook::{DeliverySink, WebhookSink};

/// Install the global subscriber: stderr, plus a plain-text file when
/// `log_file` is set. The returned guard flushes the file writer on drop.
fn init_logging(level: types::LogLevel, log_file: Option<&str>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let (file_layer, guard) = match log_file {
        Some(raw) => {
            let path = expand_tilde(raw);
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => std::path::PathBuf::from("."),
            };
            let name = path
                .file_name()
                .with_context(|| format!("--log-file has no file name: {}", raw))?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(&dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}

fn create_progress_bar(no_progress_bar: bool) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    if let Ok(style) =
        ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

/// Drive the progress bar from status events until the sender side is gone.
async fn show_status(mut rx: UnboundedReceiver<StatusEvent>, no_progress_bar: bool) {
    let mut bar: Option<ProgressBar> = None;
    while let Some(event) = rx.recv().await {
        match event {
            StatusEvent::Progress { message, percent } => {
                let pb = bar.get_or_insert_with(|| create_progress_bar(no_progress_bar));
                pb.set_position(u64::from(percent));
                pb.set_message(message);
            }
            StatusEvent::FileSubmitted(name) => {
                tracing::debug!(file = %name, "Submitted");
            }
            StatusEvent::Finished(report) => {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
                for issue in &report.issues {
                    tracing::warn!("{}", issue);
                }
                for (name, reason) in &report.failed {
                    tracing::warn!("Not delivered: {} ({})", name, reason);
                }
            }
        }
    }
}

/// Run the status command.
fn run_status(args: cli::StateArgs) -> anyhow::Result<()> {
    let state_path = expand_tilde(&args.state_file);
    if !state_path.exists() {
        println!("No hash state found at {}", state_path.display());
        println!("Run a sync first to create it.");
        return Ok(());
    }

    let store = HashStore::load(&state_path)?;
    println!("Hash state: {}", state_path.display());
    println!("Tracked files: {}", store.len());
    println!();

    match args.directory.as_deref().map(expand_tilde) {
        Some(dir) => {
            for (name, state) in compare_tracked(&store, &dir) {
                let label = match state {
                    TrackedState::Current => "current",
                    TrackedState::Changed => "CHANGED",
                    TrackedState::Missing => "MISSING",
                };
                println!("  {:<8} {}", label, name);
            }
        }
        None => {
            for (name, fingerprint) in store.iter() {
                println!("  {}  {}", fingerprint.get(..12).unwrap_or(fingerprint), name);
            }
        }
    }
    Ok(())
}

/// Run the reset-state command.
async fn run_reset_state(args: cli::ResetStateArgs) -> anyhow::Result<()> {
    let state_path = expand_tilde(&args.state_file);
    if !state_path.exists() {
        println!("No hash state found at {}", state_path.display());
        return Ok(());
    }

    if !args.yes {
        println!("This will delete the hash state at:");
        println!("  {}", state_path.display());
        println!("Every matching file will be sent again on the next run.");
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let _lock = RunLock::acquire(&state_path).await?;
    std::fs::remove_file(&state_path)
        .with_context(|| format!("Failed to delete {}", state_path.display()))?;
    println!("Hash state deleted.");
    Ok(())
}

fn build_context(config: &Config) -> anyhow::Result<SyncContext> {
    let client = webhook::build_client(config.timeout)?;
    let primary: Arc<dyn DeliverySink> =
        Arc::new(WebhookSink::new(client.clone(), config.webhook_url.clone()));
    let admin: Arc<dyn DeliverySink> = if config.log_webhook_url == config.webhook_url {
        Arc::clone(&primary)
    } else {
        Arc::new(WebhookSink::new(client, config.log_webhook_url.clone()))
    };

    let dispatcher = Dispatcher::new(primary, admin, SizeGate::new(config.max_size_mb))
        .with_delay(config.delay)
        .with_mentions(config.role_mention.clone(), config.user_mention.clone())
        .with_idle_notices(config.notify_no_changes);

    Ok(SyncContext {
        directory: config.directory.clone(),
        rule: config.rule.clone(),
        scratch_dir: config.scratch_dir.clone(),
        state_path: config.state_file.clone(),
        dispatcher,
        partial_failure: config.partial_failure,
        force: config.force,
        dry_run: config.dry_run,
    })
}

async fn run_sync(args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = Config::from_cli(args)?;
    tracing::debug!(?config, "Configuration");
    tracing::info!(
        directory = %config.directory.display(),
        rule = %config.rule,
        "Starting pbo-relay"
    );

    let lock = RunLock::acquire(&config.state_file).await?;
    tracing::debug!("Holding {}", lock.path().display());
    let ctx = Arc::new(build_context(&config)?);
    let shutdown_token = shutdown::install_signal_handler()?;

    let (reporter, rx) = StatusReporter::channel();
    let status_task = tokio::spawn(show_status(rx, config.no_progress_bar));

    let mut last_failed = false;
    loop {
        if shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested, exiting...");
            break;
        }

        let report = sync::run_cycle(Arc::clone(&ctx), reporter.clone()).await;
        last_failed = report.is_error();

        let Some(interval) = config.watch_with_interval else {
            break;
        };
        if shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested, exiting...");
            break;
        }
        tracing::info!("Waiting {} seconds...", interval);
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(interval)) => {}
            _ = shutdown_token.cancelled() => {
                tracing::info!("Shutdown during wait, exiting...");
                break;
            }
        }
    }

    drop(reporter);
    let _ = status_task.await;
    remove_scratch_dir(&config.scratch_dir);
    drop(lock);

    if config.watch_with_interval.is_none() && last_failed {
        anyhow::bail!("Run finished with errors");
    }
    Ok(())
}

/// Drop the scratch directory if the run left it empty.
fn remove_scratch_dir(dir: &Path) {
    if std::fs::remove_dir(dir).is_ok() {
        tracing::debug!("Removed scratch directory {}", dir.display());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let _log_guard = init_logging(cli.log_level, cli.log_file.as_deref())?;

    match cli.effective_command() {
        Command::Status(args) => run_status(args),
        Command::ResetState(args) => run_reset_state(args).await,
        Command::Sync(args) => run_sync(args).await,
    }
}
