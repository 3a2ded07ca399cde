mod cli;

use async_trait::async_trait;
use clap::Parser;
use std::any::Any;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use cli::{Cli, Commands, FetchArgs};
use fetchcore::callback::{Callback, ChildCallback, CombinedCallback};
use fetchcore::config::Config;
use fetchcore::observability::{Metrics, init_tracing};
use fetchcore::task::{FileTask, Locator, TaskExt};
use fetchcore::{CombinedContext, CombinedTask, DownloadError, DownloadTask, DownloaderService};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fetchcore: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.telemetry.log_filter);

    let outcome = match cli.command {
        Commands::Fetch(args) => fetch(&config, args).await,
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "fetchcore failed");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every URL was saved
async fn fetch(config: &Config, args: FetchArgs) -> Result<bool, AnyError> {
    tokio::fs::create_dir_all(&args.out).await?;

    let metrics = Arc::new(Metrics::new());
    let stack = fetchcore::stack::build(config, Arc::clone(&metrics))?;
    let tries = args.tries.unwrap_or(config.downloader.max_attempts);

    let task: Arc<dyn CombinedTask<Summary>> = Arc::new(FetchAll {
        targets: args
            .urls
            .iter()
            .map(|url| (url.clone(), args.out.join(file_name(url))))
            .collect(),
        fail_fast: args.fail_fast,
        cache: args.cache,
    });
    let progress: Arc<dyn CombinedCallback<Summary>> = Arc::new(Progress);
    let mut handle = stack.download_combined_with_tries(task, Some(progress), tries)?;

    let summary = tokio::select! {
        summary = &mut handle => summary,
        _ = shutdown_signal() => {
            warn!("Interrupted, cancelling downloads");
            handle.cancel();
            handle.await
        }
    };

    stack.shutdown()?;
    stack.drained().await;
    let snapshot = metrics.snapshot();

    match summary {
        Ok(summary) => {
            info!(
                saved = summary.saved,
                failed = summary.failed,
                retries = snapshot.retries,
                cache_hits = snapshot.cache_hits,
                "Fetch finished"
            );
            println!("saved {}, failed {}", summary.saved, summary.failed);
            Ok(summary.failed == 0)
        }
        Err(e) => {
            error!(error = %e, retries = snapshot.retries, "Fetch failed");
            Ok(false)
        }
    }
}

fn file_name(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.trim_end_matches('/').rsplit('/').next())
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .unwrap_or("index.html")
        .to_string()
}

struct Summary {
    saved: usize,
    failed: usize,
}

struct FetchAll {
    targets: Vec<(String, PathBuf)>,
    fail_fast: bool,
    cache: bool,
}

fn fetch_task(url: &str, destination: PathBuf, cache: bool) -> Arc<dyn DownloadTask<PathBuf>> {
    let task = FileTask::new(url, destination);
    if cache {
        Arc::new(task.cacheable())
    } else {
        Arc::new(task)
    }
}

#[async_trait]
impl CombinedTask<Summary> for FetchAll {
    async fn run(&self, ctx: CombinedContext) -> fetchcore::Result<Summary> {
        let mut handles = Vec::with_capacity(self.targets.len());
        for (url, destination) in &self.targets {
            let task = fetch_task(url, destination.clone(), self.cache);
            handles.push(ctx.submit_download(task, None, self.fail_fast)?);
        }

        ctx.await_all_tasks().await?;

        let mut summary = Summary { saved: 0, failed: 0 };
        for handle in handles {
            match handle.await {
                Ok(_) => summary.saved += 1,
                Err(_) => summary.failed += 1,
            }
        }
        Ok(summary)
    }
}

/// Logs every child download as it starts and ends
struct Progress;

impl Callback<Summary> for Progress {}

impl CombinedCallback<Summary> for Progress {
    fn task_start(&self, locator: &Locator) -> Option<Arc<dyn ChildCallback>> {
        info!(url = %locator, "Downloading");
        Some(Arc::new(ChildProgress {
            locator: locator.clone(),
        }))
    }
}

struct ChildProgress {
    locator: Locator,
}

impl ChildCallback for ChildProgress {
    fn done(&self, result: &dyn Any) {
        match result.downcast_ref::<PathBuf>() {
            Some(path) => info!(url = %self.locator, path = %path.display(), "Saved"),
            None => info!(url = %self.locator, "Saved"),
        }
    }

    fn failed(&self, error: &DownloadError) {
        warn!(url = %self.locator, error = %error, "Download failed");
    }

    fn retry(&self, error: &DownloadError, attempt: u32, max_attempts: u32) {
        warn!(url = %self.locator, attempt, max_attempts, error = %error, "Retrying");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
