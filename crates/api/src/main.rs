use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use drip_core::bundle::SequenceBundle;
use drip_events::{EmailConfig, SmtpDelivery};
use drip_sequencer::{PgEnrollmentStore, SequenceEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drip_api::config::ServerConfig;
use drip_api::router::build_app_router;
use drip_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "drip_api=debug,drip_sequencer=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    if config.cron_secret.is_none() {
        tracing::warn!("CRON_SECRET is not set; trigger endpoints are open (development only)");
    }

    // --- Sequence catalog ---
    let bundle = match &config.sequence_catalog_path {
        Some(path) => SequenceBundle::load(path)
            .with_context(|| format!("Failed to load sequence catalog {}", path.display()))?,
        None => SequenceBundle::builtin(),
    };
    bundle.validate().context("Sequence catalog is inconsistent")?;
    tracing::info!(sequences = bundle.catalog.len(), "Sequence catalog loaded");

    // --- Delivery channel ---
    let email_config = EmailConfig::from_env().context("Invalid SMTP configuration")?;
    tracing::info!(
        smtp_host = %email_config.smtp_host,
        smtp_port = email_config.smtp_port,
        "Loaded SMTP configuration"
    );
    let channel = SmtpDelivery::new(email_config).context("Failed to build SMTP transport")?;

    // --- Database ---
    let pool = drip_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    drip_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    drip_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Scheduler ---
    let engine = SequenceEngine::new(
        Arc::new(PgEnrollmentStore::new(pool)),
        Arc::new(channel),
        Arc::new(bundle.templates),
        Arc::new(bundle.catalog),
        config.engine_settings(),
    );

    // --- App state ---
    let state = AppState {
        engine: Arc::new(engine),
        config: Arc::new(config.clone()),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles SIGINT (Ctrl-C) and, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
