use std::{net::SocketAddr, process::ExitCode, sync::Arc, time::Instant};

use anyhow::Error as AnyhowError;
use clap::Parser;
use rmcp::{ServiceExt, transport::stdio};
use server::{
    ServerState,
    config::{Cli, ConfigError, ServerConfig},
    mcp::ContextServer,
    middleware::rate_limit::RateLimiter,
    routes,
    sessions::SessionGauge,
};
use services::services::{
    context::AppContext,
    embedding::{EmbeddingError, EmbeddingProvider, RestEmbeddings},
    migrate,
    splitter::{CodeSplitter, LineWindowSplitter},
    sync::{HeadCommitDetector, SyncService},
    vector_store::{RestVectorStore, VectorStore, VectorStoreError},
};
use store::{Registry, SnapshotStore, collection::MigrationLedger};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, prelude::*};

#[derive(Debug, Error)]
pub enum ContextServerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    #[error(transparent)]
    Other(#[from] AnyhowError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(ContextServerError::Config(e)) => {
            eprintln!("configuration error: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn run(cli: Cli) -> Result<(), ContextServerError> {
    // Install rustls crypto provider before any TLS operations
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,server={level},services={level},store={level},git={level},utils={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(filter_string).expect("Failed to create tracing filter");
    // Logs go to stderr: stdout belongs to the stdio transport's framing.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter),
        )
        .init();

    let config = ServerConfig::resolve(&cli)?;

    let context_dir = utils::state::ensure_context_dir()?;
    let snapshot = SnapshotStore::new(context_dir.join(utils::state::SNAPSHOT_FILE));
    let registry = Arc::new(Registry::load(snapshot).await);

    let vector_store: Arc<dyn VectorStore> = Arc::new(RestVectorStore::new(
        &config.vector_store_url,
        config.vector_store_token.clone(),
        config.hybrid_search,
    )?);
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(RestEmbeddings::new(
        &config.embedding_base_url,
        config.embedding_api_key.clone(),
        config.embedding_model.clone(),
        config.embedding_dimension,
    )?);
    let splitter: Arc<dyn CodeSplitter> = Arc::new(LineWindowSplitter::default());
    let ledger = MigrationLedger::load(context_dir.join(utils::state::MIGRATION_FILE));

    let ctx = AppContext::new(
        registry.clone(),
        vector_store,
        embedder,
        splitter,
        ledger,
        context_dir.join(utils::state::CLONES_DIR),
        config.search.clone(),
    );

    // One-shot, idempotent rename of legacy path-hash collections.
    migrate::run_pending_migrations(&ctx).await;

    let sync_handle = SyncService::spawn(
        ctx.clone(),
        Arc::new(HeadCommitDetector::default()),
        config.sync_interval,
    );

    let transport_label = match (config.transport.stdio_enabled(), config.transport.http_enabled())
    {
        (true, true) => "both",
        (false, true) => "http",
        _ => "stdio",
    };

    let mut stdio_handle = None;
    if config.transport.stdio_enabled() {
        let ctx = ctx.clone();
        stdio_handle = Some(tokio::spawn(async move {
            match ContextServer::new(ctx).serve(stdio()).await {
                Ok(running) => {
                    if let Err(e) = running.waiting().await {
                        tracing::warn!("Stdio transport ended with error: {e}");
                    }
                }
                Err(e) => tracing::error!("Failed to start stdio transport: {e}"),
            }
        }));
    }

    if config.transport.http_enabled() {
        let rate_limiter = Arc::new(RateLimiter::per_minute(config.rate_limit_per_minute));
        let sweeper = rate_limiter.spawn_sweeper();
        let state = ServerState {
            app: ctx.clone(),
            auth_token: config.auth_token.clone(),
            allowed_origin: config.allowed_origin.clone(),
            rate_limiter,
            sessions: Arc::new(SessionGauge::new()),
            started_at: Instant::now(),
            transport_label,
        };
        let app_router = routes::router(state);

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let listener = tokio::net::TcpListener::bind(format!("{host}:{}", config.port)).await?;
        let actual_port = listener.local_addr()?.port();
        tracing::info!("Server running on http://{host}:{actual_port}");

        axum::serve(
            listener,
            app_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
        sweeper.abort();
    } else if let Some(handle) = stdio_handle.take() {
        // Stdio-only: serve until the client disconnects or we get a signal.
        tokio::select! {
            _ = handle => {}
            _ = shutdown_signal() => {}
        }
    }

    if let Some(handle) = stdio_handle {
        handle.abort();
    }
    sync_handle.abort();
    if let Err(e) = registry.persist_now().await {
        tracing::warn!("Failed to persist snapshot during shutdown: {e}");
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Resolves on SIGINT/SIGTERM. A second signal during shutdown forces an
/// immediate exit.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let terminate = async {
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
            } else {
                tracing::error!("Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }

    tracing::info!("Shutting down; send the signal again to force exit");
    tokio::spawn(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::error!("Forced exit");
        std::process::exit(1);
    });
}
