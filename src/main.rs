//! Pricing oracle service
//!
//! Polls the configured price sources, commits signed pricing records and
//! serves the latest one over HTTP.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pricing_oracle::config::{AppConfig, SourceRole, SIGNING_KEY_ENV};
use pricing_oracle::ledger::Ledger;
use pricing_oracle::oracle::QuoteAggregator;
use pricing_oracle::persistence::LedgerStore;
use pricing_oracle::scheduler::PollScheduler;
use pricing_oracle::server::{create_router, RecordServer, RecordVersion};
use pricing_oracle::signing::{EcdsaSigner, MessageSigner};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config = AppConfig::load()?;
    info!("🚀 Pricing oracle v{} starting", env!("CARGO_PKG_VERSION"));
    info!(config = %config.digest(), "Configuration loaded");

    // Signer
    let signer = load_signer(&config)?;
    info!(public_key = %signer.verifier().public_key_hex(), "🔑 Signing key loaded");
    let signer: Arc<dyn MessageSigner> = Arc::new(signer);

    // Store
    ensure_database_dir(&config.persistence.database_url)?;
    let store = LedgerStore::open(
        &config.persistence.database_url,
        config.persistence.max_connections,
    )
    .await
    .context("Failed to open ledger store")?;
    if let Some(latest) = store.latest_record().await? {
        info!(id = latest.id, timestamp = latest.timestamp, "📒 Resuming ledger");
    }

    // Sources
    let primary = QuoteAggregator::new(
        config.ticker_sources(SourceRole::Primary)?,
        config.source_timeout(),
        config.oracle.granularity,
    )
    .require(config.oracle.base_ticker);

    let secondary = if config.sanity.enabled {
        Some(QuoteAggregator::new(
            config.ticker_sources(SourceRole::Secondary)?,
            config.source_timeout(),
            config.oracle.granularity,
        ))
    } else {
        if config.has_secondary_sources() {
            warn!("Secondary sources configured but sanity check disabled");
        }
        None
    };

    let ledger = Ledger::new(
        store.clone(),
        signer.clone(),
        config.moving_averages.clone(),
    );
    let scheduler = Arc::new(PollScheduler::new(
        primary,
        secondary,
        config.sanity.policy(),
        config.oracle.base_ticker,
        ledger,
        config.poll_interval(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poll_handle = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    // Record API
    let record_server = RecordServer::new(
        store,
        signer,
        config.oracle.poll_interval_secs,
        config.server.staleness_tolerance_secs,
    )
    .with_default_version(RecordVersion::try_from(config.server.default_version)?);
    let app = create_router(Arc::new(record_server));

    let addr: SocketAddr = config
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid server.bind_addr {}", config.server.bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🌐 Record API listening on http://{}", addr);

    let mut server_shutdown = shutdown_rx;
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = server_shutdown.wait_for(|stop| *stop).await;
    });
    let server_handle = tokio::spawn(async move { server.await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("🛑 Shutdown requested");
    let _ = shutdown_tx.send(true);

    if let Err(e) = poll_handle.await {
        error!(error = %e, "Poll task ended abnormally");
    }
    match server_handle.await {
        Ok(Err(e)) => error!(error = %e, "Record API failed"),
        Err(e) => error!(error = %e, "Record API task ended abnormally"),
        Ok(Ok(())) => {}
    }

    info!("👋 Pricing oracle stopped");
    Ok(())
}

/// RUST_LOG filter (default info); ORACLE_LOG_JSON=1 switches to JSON lines
fn init_logging() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("ORACLE_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("Failed to initialize tracing subscriber")?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .context("Failed to initialize tracing subscriber")?;
    }
    Ok(())
}

fn load_signer(config: &AppConfig) -> Result<EcdsaSigner> {
    if let Ok(hex_key) = std::env::var(SIGNING_KEY_ENV) {
        return EcdsaSigner::from_hex(&hex_key)
            .with_context(|| format!("Invalid {}", SIGNING_KEY_ENV));
    }
    EcdsaSigner::load(Path::new(&config.signing.key_path))
}

fn ensure_database_dir(database_url: &str) -> Result<()> {
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}
