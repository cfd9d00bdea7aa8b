//! pm-gateway: pm-crawler main binary
//!
//! Usage:
//!   pm-gateway                    - Start server mode (HTTP API + job worker)
//!   pm-gateway --worker           - Process newline-delimited JSON jobs from stdin
//!   pm-gateway --config <path>    - Load settings from a TOML file
//!   pm-gateway --help             - Show help

use std::path::PathBuf;
use std::sync::Arc;

use pm_api::AppState;
use pm_browser::{BrowserConfig, SessionManager};
use pm_core::Config;
use pm_crawler::{Dispatcher, Operations};
use pm_worker::JobWorker;
use tracing_subscriber::EnvFilter;

/// Run mode
#[derive(Debug, PartialEq, Eq)]
enum RunMode {
    /// HTTP API, plus the in-process job queue when enabled
    Server,
    /// stdin/stdout job worker
    Worker,
    /// Show help
    Help,
    /// Show version
    Version,
}

#[derive(Debug)]
struct Args {
    mode: RunMode,
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1));

    match args.mode {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("pm-gateway {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    // Initialize logging. stdout carries job results in worker mode.
    let filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    if args.mode == RunMode::Worker {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load_from(args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    match args.mode {
        RunMode::Worker => run_worker(config).await,
        RunMode::Server => run_server(config).await,
        _ => Ok(()),
    }
}

/// Parse command line arguments
fn parse_args<I>(args: I) -> Args
where
    I: IntoIterator<Item = String>,
{
    let mut mode = RunMode::Server;
    let mut config = None;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--worker" | "-w" => mode = RunMode::Worker,
            "--config" | "-c" => config = args.next().map(PathBuf::from),
            "--help" | "-h" => {
                return Args {
                    mode: RunMode::Help,
                    config,
                };
            }
            "--version" | "-v" => {
                return Args {
                    mode: RunMode::Version,
                    config,
                };
            }
            _ => {}
        }
    }

    Args { mode, config }
}

/// Print help message
fn print_help() {
    println!("pm-gateway - browser automation service");
    println!();
    println!("Usage:");
    println!("  pm-gateway                  Start server mode (HTTP API + job worker)");
    println!("  pm-gateway --worker         Process JSON jobs from stdin, one per line");
    println!("  pm-gateway --config <path>  Load settings from a TOML file");
    println!("  pm-gateway --help           Show this help message");
    println!("  pm-gateway --version        Show version");
    println!();
    println!("Environment Variables:");
    println!("  API_HOST                Bind address (default: 0.0.0.0)");
    println!("  API_PORT                HTTP API port (default: 8000)");
    println!("  API_KEY                 Bearer key for /api routes (optional)");
    println!("  API_ALLOWED_ORIGINS     Comma-separated CORS origins (default: any)");
    println!("  BROWSER_HEADLESS        Run Chrome headless (default: true)");
    println!("  BROWSER_MAX_PAGES       Concurrent pages (default: 4)");
    println!("  BROWSER_PRELAUNCH       Start Chrome at boot (default: false)");
    println!("  CHROME_PATH             Chrome executable");
    println!("  ARTIFACTS_DIR           Screenshot/markdown/PDF directory (default: public)");
    println!("  LLM_API_KEY             Enables LLM extraction and schema generation");
    println!("  LLM_MODEL               Model name");
    println!("  LLM_PROVIDER            Provider: claude or openai");
    println!("  LLM_BASE_URL            Custom API endpoint");
    println!("  CRAWL_LINK_CONCURRENCY  Links crawled at once by crawlLinks (default: 1)");
    println!("  WORKER_ENABLED          Serve POST /api/jobs (default: true)");
    println!("  WORKER_QUEUE_CAPACITY   Pending job limit (default: 64)");
}

/// Run server mode
async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting pm-gateway...");

    let sessions = Arc::new(SessionManager::chrome(BrowserConfig::from(&config.browser)));
    let operations = Operations::from_config(&config, Arc::clone(&sessions))
        .map_err(|e| anyhow::anyhow!("Failed to create executor: {}", e))?;
    operations.artifacts().ensure_dirs().await?;
    tracing::info!(
        "Artifacts stored under {} and served at {}",
        operations.artifacts().root().display(),
        operations.artifacts().mount()
    );

    if config.browser.prelaunch {
        match sessions.warm_up().await {
            Ok(()) => tracing::info!("Browser launched"),
            Err(e) => tracing::warn!("Browser prelaunch failed, retrying on first request: {}", e),
        }
    }

    let dispatcher = Dispatcher::new(Arc::new(operations));
    let mut state = AppState::new(dispatcher).with_api_key(config.api.key.clone());

    let worker = if config.worker.enabled {
        let worker = JobWorker::from_config(&config)
            .map_err(|e| anyhow::anyhow!("Failed to create job worker: {}", e))?;
        let handle = worker.start(config.worker.queue_capacity);
        state = state.with_jobs(handle.queue());
        tracing::info!(
            "Job worker started (queue capacity {})",
            config.worker.queue_capacity
        );
        Some(handle)
    } else {
        tracing::info!("Job worker disabled");
        None
    };

    tracing::info!("pm-gateway initialized successfully");
    tracing::info!("Press Ctrl+C to exit");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
        tracing::info!("Shutting down...");
    };

    let served = pm_api::start_server(state, &config.api, &config.artifacts, shutdown).await;

    if let Some(worker) = worker {
        worker.stop().await;
    }
    if let Err(e) = sessions.shutdown().await {
        tracing::warn!("Browser shutdown failed: {}", e);
    }

    served?;
    tracing::info!("pm-gateway stopped");
    Ok(())
}

/// Run stdio worker mode
async fn run_worker(config: Config) -> anyhow::Result<()> {
    let worker = JobWorker::from_config(&config)
        .map_err(|e| anyhow::anyhow!("Failed to create job worker: {}", e))?;

    tracing::info!("Reading jobs from stdin");
    let processed = pm_worker::run_stdio(&worker).await?;
    tracing::info!("Processed {} jobs", processed);

    Ok(())
}
