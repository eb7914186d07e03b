//! verdant-id: localhost companion service for the identification engine

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use verdant_common::config::{
    default_config_path, ensure_database_path, load_toml_config, resolve_root_folder, TomlConfig,
    ROOT_FOLDER_ENV,
};
use verdant_common::events::EventBus;

use verdant_id::config::{resolve_gemini_api_key, EngineSettings};
use verdant_id::db::{self, SqliteStore};
use verdant_id::models::AuthState;
use verdant_id::services::{
    AuthBackend, AuthSignal, BackendClient, GeminiClient, WikiImageLookup,
};
use verdant_id::{AppState, Collaborators, Stores};

const EVENT_BUS_CAPACITY: usize = 100;
const SESSION_CHECK_INTERVAL_SECS: u64 = 300;

#[derive(Parser, Debug)]
#[command(name = "verdant-id")]
#[command(about = "Plant identification companion service")]
#[command(version)]
struct Args {
    /// HTTP port (defaults to `listen_port` from the config file)
    #[arg(short, long, env = "VERDANT_PORT")]
    port: Option<u16>,

    /// Root folder holding the database
    #[arg(short, long, env = ROOT_FOLDER_ENV)]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, env = "VERDANT_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let toml_config = match &config_path {
        Some(path) => load_toml_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TomlConfig::default(),
    };

    // RUST_LOG wins over the configured level
    let default_filter = format!(
        "verdant_id={0},verdant_common={0},tower_http={0}",
        toml_config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting verdant-id {}", env!("CARGO_PKG_VERSION"));
    if config_path.is_none() {
        warn!("No config directory on this platform, using defaults");
    }

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let db_path = ensure_database_path(&root_folder).context("Failed to initialize root folder")?;
    info!("Database: {}", db_path.display());

    let db_pool = db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    let store = Arc::new(SqliteStore::new(db_pool.clone()));
    let api_key = resolve_gemini_api_key(store.as_ref(), &toml_config).await?;
    let settings = EngineSettings {
        config_path: config_path.clone(),
        ..EngineSettings::from_toml(&toml_config)
    };
    let port = args.port.unwrap_or(settings.listen_port);

    let backend_url = toml_config
        .backend_url
        .clone()
        .context("backend_url is not configured")?;
    let backend_anon_key = toml_config
        .backend_anon_key
        .clone()
        .context("backend_anon_key is not configured")?;

    let backend = Arc::new(BackendClient::new(backend_url, backend_anon_key, db_pool.clone())?);

    let collaborators = Collaborators {
        analyzer: Arc::new(GeminiClient::new(api_key)?),
        images: Arc::new(WikiImageLookup::new()?),
        auth_backend: backend.clone(),
        subscriptions: backend.clone(),
    };
    let stores = Stores {
        usage: store.clone(),
        history: store.clone(),
        collection: store.clone(),
        api_keys: store,
    };

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let state = AppState::new(event_bus, collaborators, stores, settings);

    // Auth bootstrap: the persisted session (if any) is the initial report;
    // an empty report triggers an authoritative backend lookup.
    let (signal_tx, signal_rx) = mpsc::channel(16);
    let auth_listener = state.auth.spawn_listener(signal_rx);
    let initial = db::settings::load_session(&db_pool).await?;
    signal_tx.send(AuthSignal::InitialSession(initial)).await?;

    let watch_token = auth_listener.child_token();
    let watch_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SESSION_CHECK_INTERVAL_SECS));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = watch_token.cancelled() => break,
                _ = interval.tick() => {}
            }
            if !matches!(watch_state.auth.current(), AuthState::Authenticated { .. }) {
                continue;
            }
            let signal = match backend.current_session().await {
                Ok(Some(session)) => AuthSignal::TokenRefreshed(session),
                Ok(None) => AuthSignal::SignedOut,
                Err(e) => {
                    warn!(error = %e, "Periodic session check failed");
                    watch_state.record_error(format!("Session check failed: {}", e)).await;
                    continue;
                }
            };
            if signal_tx.send(signal).await.is_err() {
                break;
            }
        }
    });

    let app = verdant_id::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    auth_listener.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
