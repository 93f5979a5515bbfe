use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use mcphub::config::Config;
use mcphub::discovery::{CatalogSync, DiscoveryEngine, StaticCatalog, SyncSummary};
use mcphub::embedding::{Embedder, EmbeddingService};
use mcphub::error::{FatalDecision, FatalErrorGuard};
use mcphub::mcp::McpServer;
use mcphub::startup::{self, StartupAdditionalInfo, StartupLogger};
use mcphub::storage::{StorageManager, ToolEmbeddingStore};

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = mcphub::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Backend catalog file (backends, groups and tool settings)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the discovery meta-tools over stdio
    Serve {
        /// Restrict the endpoint to a group, as `$smart/<group>`
        #[arg(long)]
        group: Option<String>,
    },
    /// Run one search and print the response
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        group: Option<String>,
    },
    /// Print the full definition of one tool
    Describe {
        tool_name: String,
        #[arg(long)]
        group: Option<String>,
    },
    /// Print storage health and index statistics
    Health,
}

struct Hub {
    storage: Arc<StorageManager>,
    store: Arc<ToolEmbeddingStore>,
    engine: Arc<DiscoveryEngine>,
    summaries: Vec<SyncSummary>,
    embedding_model: String,
}

fn scope_for(group: Option<&str>) -> Option<String> {
    group.map(|g| format!("{}/{}", mcphub::discovery::SCOPE_MARKER, g))
}

async fn build_hub(config: &Config, catalog: StaticCatalog) -> Result<Hub> {
    let storage = StorageManager::from_config(&config.storage);
    storage
        .initialize()
        .await
        .context("Failed to connect to the vector store")?;
    let store = Arc::new(ToolEmbeddingStore::new(storage.clone()));

    let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingService::new(config.embedding.clone())?);
    let embedding_model = embedder.model().to_string();

    let catalog = Arc::new(catalog);
    let summaries = CatalogSync::new(store.clone(), embedder.clone())
        .sync_catalog(catalog.as_ref())
        .await;

    let engine = DiscoveryEngine::new(
        store.clone(),
        embedder,
        catalog.clone(),
        catalog,
        config.discovery.clone(),
    );

    Ok(Hub {
        storage,
        store,
        engine: Arc::new(engine),
        summaries,
        embedding_model,
    })
}

fn load_catalog(path: Option<&PathBuf>) -> Result<StaticCatalog> {
    match path {
        Some(path) => Ok(StaticCatalog::from_file(path)?),
        None => {
            warn!("No catalog file given, starting without backends");
            Ok(StaticCatalog::default())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Messages from .env and config file loading go to a scoped subscriber
    let config = tracing::subscriber::with_default(
        startup::bootstrap_subscriber(cli.log_level.as_deref()),
        || Config::load(Some(&cli.config), cli.log_level.clone()),
    )
    .context("Failed to load configuration")?;
    startup::init_logging(&config.logging)?;

    let command = cli.command.unwrap_or(Command::Serve { group: None });
    let group = match &command {
        Command::Serve { group } | Command::Search { group, .. } | Command::Describe { group, .. } => group.clone(),
        Command::Health => None,
    };
    let scope = scope_for(group.as_deref());

    let catalog = load_catalog(cli.catalog.as_ref())?;
    let hub = build_hub(&config, catalog).await.map_err(|e| {
        error!("Startup failed: {:#}", e);
        e
    })?;

    let indexed = hub.summaries.iter().map(|s| s.indexed).sum();
    let skipped = hub.summaries.iter().map(|s| s.skipped).sum();
    let additional = StartupAdditionalInfo::new(hub.embedding_model.clone())
        .with_sync_totals(hub.summaries.len(), indexed, skipped)
        .with_scope(scope.clone());
    StartupLogger::display_startup_info(&config, mcphub::VERSION, Some(&additional));

    let result = match command {
        Command::Serve { .. } => serve(&hub, &config, scope).await,
        Command::Search { query, limit, .. } => {
            let response = hub.engine.search(&query, limit, scope.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Command::Describe { tool_name, .. } => {
            match hub.engine.describe(&tool_name, scope.as_deref()).await? {
                Some(description) => println!("{}", serde_json::to_string_pretty(&description)?),
                None => anyhow::bail!("Tool '{}' not found", tool_name),
            }
            Ok(())
        }
        Command::Health => {
            let health = hub.storage.health().await;
            let stats = hub.store.stats().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "connection": health,
                    "store": stats,
                    "reconnectEpisodes": hub.storage.reconnect_episodes(),
                }))?
            );
            Ok(())
        }
    };

    hub.storage.close().await;
    result
}

/// Serve stdio until EOF, restarting after errors until the failure budget runs out
async fn serve(hub: &Hub, config: &Config, scope: Option<String>) -> Result<()> {
    let mut server = McpServer::new(hub.engine.clone());
    if let Some(scope) = scope {
        server = server.with_scope(scope);
    }

    let guard = FatalErrorGuard::new(
        config.fatal_errors.max_errors,
        Duration::from_secs(config.fatal_errors.window_secs),
    );

    // One reader for every restart so buffered requests survive an error
    let mut reader = tokio::io::BufReader::new(tokio::io::stdin());
    loop {
        match server.serve(&mut reader, tokio::io::stdout()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if guard.record(&e) == FatalDecision::Exit {
                    return Err(e.into());
                }
                info!("Restarting stdio loop");
            }
        }
    }
}
