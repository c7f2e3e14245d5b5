//! clickpath-server - click-to-message attribution service
//!
//! Receives messaging-channel webhooks, attributes each inbound message to the
//! marketing click that produced it and exports engagements to a spreadsheet.

use anyhow::{Context, Result};
use clap::Parser;
use clickpath_common::config::{StoreConfig, TomlConfig};
use clickpath_common::db::{init_database, wait_for_store, SessionStore, SqliteSessionStore};
use clickpath_server::attribution::Resolver;
use clickpath_server::engagement::Committer;
use clickpath_server::export::{run_scheduler, ExportSettings, ExportSyncEngine, SyncTrigger};
use clickpath_server::sheets::HttpSheetClient;
use clickpath_server::{build_router, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "clickpath-server", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "CLICKPATH_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address (overrides server.host)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database path (overrides database.path)
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before tracing starts so [logging] level can seed the filter
    let mut config = TomlConfig::load(args.config.as_deref())?;
    config.apply_env();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(database) = args.database {
        config.database.path = database;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting clickpath-server v{} ({})",
        env!("CARGO_PKG_VERSION"),
        if cfg!(debug_assertions) { "debug" } else { "release" }
    );
    match &args.config {
        Some(path) => info!("Configuration file: {}", path.display()),
        None => info!("No configuration file given, using built-in defaults"),
    }

    config.validate()?;

    info!("Database path: {}", config.database.path.display());
    let pool = init_database(&config.database.path)
        .await
        .with_context(|| format!("opening {}", config.database.path.display()))?;
    let store: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::new(pool));

    let shutdown = CancellationToken::new();
    let trigger = SyncTrigger::new();

    let resolver = Resolver::new(store.clone(), &config.attribution);
    let mut committer = Committer::new(store.clone(), config.engagement.direct_policy);

    let mut scheduler: Option<JoinHandle<()>> = None;
    let export = if config.export.enabled {
        let sheet = HttpSheetClient::from_config(&config.export)
            .context("building spreadsheet client")?;
        let engine = Arc::new(ExportSyncEngine::new(
            store.clone(),
            Arc::new(sheet),
            ExportSettings::from(&config.export),
            shutdown.child_token(),
        ));
        committer = committer.with_trigger(trigger.clone());

        scheduler = Some(tokio::spawn(run_scheduler(
            engine.clone(),
            trigger.clone(),
            config.export.interval(),
            config.export.notify_debounce(),
            shutdown.child_token(),
        )));
        info!(
            sheet = %config.export.sheet_title,
            include_direct = config.export.include_direct,
            "Export enabled"
        );
        Some(engine)
    } else {
        info!("Export disabled");
        None
    };

    if config.server.api_token.is_none() {
        warn!("No API token configured, /api/* is unauthenticated");
    }

    let mut state = AppState::new(store.clone(), resolver, committer)
        .with_api_token(config.server.api_token.clone())
        .with_verify_token(config.server.verify_token.clone());
    if let Some(engine) = export {
        state = state.with_export(engine);
    }

    tokio::spawn(probe_store(
        store,
        config.store.clone(),
        state.clone(),
        shutdown.child_token(),
    ));

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("clickpath-server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();

    // An export in flight finishes its current spreadsheet call, then stops
    // between records
    if let Some(handle) = scheduler {
        let grace = config.export.call_timeout() + Duration::from_secs(5);
        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Export scheduler task failed: {}", e),
            Err(_) => warn!(
                grace_secs = grace.as_secs(),
                "Export scheduler did not stop in time, abandoning it"
            ),
        }
    }

    info!("clickpath-server stopped");
    Ok(())
}

/// Mark the service ready once the store answers
///
/// Keeps retrying in rounds after a round is exhausted; the webhook answers
/// 503 until then.
async fn probe_store(
    store: Arc<dyn SessionStore>,
    config: StoreConfig,
    state: AppState,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = wait_for_store(store.as_ref(), &config) => {
                match outcome {
                    Ok(()) => {
                        state.set_ready(true);
                        info!("Session store ready");
                        return;
                    }
                    Err(e) => {
                        error!(error = %e, "Session store not ready, service will answer 503");
                    }
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(config.connect_retry_delay()) => {}
        }
    }
}
