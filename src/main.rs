//! OCR Pipeline
//!
//! One binary for every service of the stack: the PDF processor and OCR
//! agent HTTP API, the bucket-polling OCR worker, the diploma parser that
//! moves OCR results into Postgres, and the provisioning commands for MinIO
//! and Postgres.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ocr_pipeline::config::Config;
use ocr_pipeline::db;
use ocr_pipeline::ocr::OllamaProvider;
use ocr_pipeline::parser::{PgDiplomaSink, ResultParser};
use ocr_pipeline::pdf::{MupdfRasterizer, PdfProcessor};
use ocr_pipeline::provision::{McAdmin, MinioBootstrap, PostgresBootstrap};
use ocr_pipeline::routes;
use ocr_pipeline::state::AppState;
use ocr_pipeline::storage::{ObjectStore, S3Client};
use ocr_pipeline::worker::{open_ledger, Worker};

#[derive(Parser, Debug)]
#[command(name = "ocr-pipeline")]
#[command(author, version, about = "PDF extraction, OCR worker and stack provisioning", long_about = None)]
struct Cli {
    /// Override log filter (e.g. `ocr_pipeline=info`)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the PDF processor and OCR agent HTTP API
    Serve,
    /// Run the OCR worker
    Worker {
        /// Process pending units once and exit
        #[arg(long)]
        once: bool,
    },
    /// Parse OCR results into the diploma tables
    Parse {
        /// Parse pending results once and exit
        #[arg(long)]
        once: bool,
    },
    /// Provision infrastructure
    Provision {
        #[arg(value_enum, default_value_t = ProvisionTarget::All)]
        target: ProvisionTarget,
    },
    /// Make sure the OCR model is available in Ollama
    PullModel,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ProvisionTarget {
    Minio,
    Postgres,
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    dotenvy::dotenv().ok();

    // Initialize tracing
    let filter = match &cli.log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ocr_pipeline=debug,tower_http=debug".into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Worker { once } => run_worker(config, once).await,
        Command::Parse { once } => run_parser(config, once).await,
        Command::Provision { target } => provision(config, target).await,
        Command::PullModel => pull_model(config).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!("Starting OCR Pipeline API v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("S3 endpoint: {}", config.storage.endpoint);
    tracing::info!("PDF bucket: {} ({:?} mode)", config.pdf.bucket, config.pdf.mode);

    let store: Arc<dyn ObjectStore> = Arc::new(S3Client::new(&config.storage));
    let pdf = PdfProcessor::new(store.clone(), Arc::new(MupdfRasterizer::new()), &config.pdf);
    if let Err(e) = pdf.ensure_bucket().await {
        tracing::warn!("Could not ensure bucket {}: {}. Will retry on upload", config.pdf.bucket, e);
    }
    let ocr = Arc::new(OllamaProvider::from_config(&config.ollama));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, store, pdf, ocr);
    let app = routes::app(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("OCR Pipeline listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn run_worker(config: Config, once: bool) -> Result<()> {
    let worker_config = config.worker.clone();
    tracing::info!(
        "Starting OCR worker: {} -> {} / {} (model {}, prompt {})",
        worker_config.source_bucket,
        worker_config.results_bucket,
        worker_config.errors_bucket,
        config.ollama.model,
        worker_config.prompt.as_str()
    );

    let store: Arc<dyn ObjectStore> = Arc::new(S3Client::new(&config.storage));
    let provider = Arc::new(OllamaProvider::from_config(&config.ollama));
    let ledger = open_ledger(
        &worker_config.ledger,
        &config.database.ocr_url,
        &worker_config.source_bucket,
    )
    .await
    .context("Failed to open processed-unit ledger")?;

    let run_once = once || worker_config.run_once;
    let worker = Worker::new(store, provider, ledger, worker_config);

    if run_once {
        let summary = worker.run_once().await?;
        tracing::info!(
            "Done: {} units ({} succeeded, {} failed, {} empty, {} pending)",
            summary.processed,
            summary.succeeded,
            summary.failed,
            summary.empty,
            summary.pending
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    worker.run_continuous(shutdown_rx).await;
    Ok(())
}

async fn run_parser(config: Config, once: bool) -> Result<()> {
    let parser_config = config.parser.clone();
    tracing::info!(
        "Starting diploma parser: {} -> Postgres (review in {}, every {}s)",
        parser_config.results_bucket,
        parser_config.errors_bucket,
        parser_config.poll_interval_secs
    );

    let store: Arc<dyn ObjectStore> = Arc::new(S3Client::new(&config.storage));
    let pool = db::wait_for_pool(&config.database.ocr_url, 30, Duration::from_secs(2))
        .await
        .context("Cannot connect to database")?;
    let parser = ResultParser::new(store, Arc::new(PgDiplomaSink::new(pool)), parser_config);

    if once {
        let summary = parser.run_once().await?;
        tracing::info!(
            "Done: {} reports ({} saved, {} for review, {} failed)",
            summary.found,
            summary.saved,
            summary.review,
            summary.failed
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    parser.run_continuous(shutdown_rx).await;
    Ok(())
}

async fn provision(config: Config, target: ProvisionTarget) -> Result<()> {
    if matches!(target, ProvisionTarget::Minio | ProvisionTarget::All) {
        let p = &config.provision;
        let store: Arc<dyn ObjectStore> = Arc::new(S3Client::with_credentials(
            &config.storage,
            &p.root_user,
            &p.root_password,
        ));
        let admin = McAdmin::connect(
            &p.mc_binary,
            &p.minio_alias,
            &config.storage.endpoint,
            &p.root_user,
            &p.root_password,
        )
        .await?;

        let report = MinioBootstrap::new(store, Arc::new(admin), p)
            .run()
            .await
            .context("MinIO provisioning failed")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if matches!(target, ProvisionTarget::Postgres | ProvisionTarget::All) {
        let summary = PostgresBootstrap::from_config(&config.database.admin_url, &config.provision)
            .run()
            .await
            .context("Postgres provisioning failed")?;

        println!("{:<12} {:<12} uuid-ossp", "database", "owner");
        for row in summary {
            println!(
                "{:<12} {:<12} {}",
                row.database,
                row.owner,
                row.uuid_ossp.as_deref().unwrap_or("missing")
            );
        }
    }

    Ok(())
}

async fn pull_model(config: Config) -> Result<()> {
    let provider = OllamaProvider::from_config(&config.ollama);
    provider
        .wait_until_ready(30, Duration::from_secs(2))
        .await
        .context("Ollama did not become ready")?;
    provider.ensure_model().await?;
    tracing::info!("Model {} is available", provider.model());
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
