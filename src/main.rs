use axum::{routing::get_service, Router};
use clap::Parser;
use std::path::PathBuf;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use checkmein::api::middleware::session::{create_session_layer, AppState};
use checkmein::config::Config;
use checkmein::db;
use checkmein::services::mailer::Mailer;
use checkmein::services::updates::UpdateBroadcaster;

/// Makerspace check-in kiosk
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Settings file; `CHECKMEIN__*` environment variables override it
    #[arg(default_value = "checkmein.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "checkmein=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    tracing::info!(config = %cli.config.display(), "Starting CheckMeIn");

    let config = Config::load(&cli.config)?;

    let pool = db::create_pool(&config.database_path).await?;
    db::run_migrations(&pool).await?;
    let read_only_pool = db::create_read_only_pool(&config.database_path, &pool).await?;
    tracing::info!(database = %config.database_path, "Database ready");

    let session_layer = create_session_layer(pool.clone(), config.secure_cookies).await?;

    let state = AppState {
        pool,
        read_only_pool,
        mailer: Mailer::new(config.smtp_host.as_deref()),
        updates: UpdateBroadcaster::new(),
        config: config.clone(),
    };

    let app = Router::new()
        .merge(checkmein::api::router())
        .nest_service("/static", get_service(ServeDir::new(&config.static_dir)))
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
