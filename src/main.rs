//! Binary entry point for the graphrag service.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// CLI subcommands report to the terminal directly.
#![allow(clippy::print_stdout)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use graphrag::api::{self, AppState};
use graphrag::config::AppConfig;
use graphrag::llm::GeneratorService;
use graphrag::services::{EntityExtractor, GraphBuilder};
use graphrag::storage::{GraphStore, SqliteGraphStore};
use graphrag::observability;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Graph-augmented retrieval question answering service.
#[derive(Debug, Parser)]
#[command(name = "graphrag", version, about)]
struct Cli {
    /// Path to a configuration file (defaults to ./graphrag.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve {
        /// Bind host override.
        #[arg(long)]
        host: Option<String>,
        /// Bind port override.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Ingest a text file into the graph store.
    Ingest {
        /// Path of the file to ingest.
        file: PathBuf,
        /// Source label stored on the document entity.
        #[arg(long)]
        source: Option<String>,
    },
    /// Print graph store statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    observability::init_tracing();

    let cli = Cli::parse();
    let mut config = AppConfig::load().context("failed to load configuration")?;
    if let Some(path) = &cli.config {
        config = config
            .with_file(path)
            .context("failed to load configuration file")?;
    }

    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    }) {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await
        },
        Command::Ingest { file, source } => ingest(config, &file, source.as_deref()).await,
        Command::Stats => stats(config).await,
    }
}

/// Runs the HTTP server until a shutdown signal arrives, then closes the
/// graph store under a bounded timeout.
async fn serve(config: AppConfig) -> anyhow::Result<()> {
    observability::init_metrics(config.metrics_port);

    let graph: Arc<dyn GraphStore> = Arc::new(
        SqliteGraphStore::open(&config.graph.db_path).context("failed to open graph store")?,
    );
    tracing::info!(db_path = %config.graph.db_path.display(), "graph store initialized");

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config, graph.clone()));
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "graphrag server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("graphrag shutting down");
    match tokio::time::timeout(Duration::from_secs(2), graph.close()).await {
        Ok(Ok(())) => tracing::info!("graph store closed"),
        Ok(Err(e)) => tracing::warn!(error = %e, "error closing graph store"),
        Err(_) => tracing::warn!("graph store close timed out, forcing shutdown"),
    }
    tracing::info!("graphrag shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}

/// Ingests a single file from the command line.
async fn ingest(config: AppConfig, file: &PathBuf, source: Option<&str>) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let graph: Arc<dyn GraphStore> = Arc::new(
        SqliteGraphStore::open(&config.graph.db_path).context("failed to open graph store")?,
    );
    let llm = Arc::new(GeneratorService::new(config.llm));
    let builder = GraphBuilder::new(graph.clone(), Arc::new(EntityExtractor::new(llm)));

    let document_id = format!("doc_{}", Uuid::new_v4());
    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().to_string());
    let report = builder
        .build_from_text(
            &text,
            &document_id,
            None,
            source.or(file_name.as_deref()),
        )
        .await
        .map_err(|e| anyhow::anyhow!("ingest failed: {e}"))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    graph.close().await.ok();
    Ok(())
}

/// Prints graph store statistics as JSON.
async fn stats(config: AppConfig) -> anyhow::Result<()> {
    let graph = SqliteGraphStore::open(&config.graph.db_path).context("failed to open graph store")?;
    let stats = graph
        .get_statistics()
        .await
        .map_err(|e| anyhow::anyhow!("failed to read statistics: {e}"))?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
