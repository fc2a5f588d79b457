use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tradepost=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;

    ensure_data_dirs(&config.database.url);

    let db = tradepost_db::create_pool(&config.database.url, config.database.max_connections).await?;
    tradepost_db::run_migrations(&db).await?;

    let state = tradepost_core::AppState::new(
        db.clone(),
        tradepost_core::AppConfig {
            jwt_secret: config.jwt_secret(),
        },
    );

    spawn_retention_sweeper(db, &config.retention);

    let app = tradepost_api::build_router()
        .merge(tradepost_ws::gateway_router())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!("listening on {}", config.server.bind_address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// The SQLite driver creates missing database files but not missing parent
/// directories.
fn ensure_data_dirs(database_url: &str) {
    let Some(path) = database_url.strip_prefix("sqlite://") else {
        return;
    };
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing::warn!("could not create data directory {:?}: {}", parent, err);
            }
        }
    }
}

fn spawn_retention_sweeper(db: tradepost_db::DbPool, retention: &config::RetentionConfig) {
    if !retention.enabled {
        return;
    }
    let Some(days) = retention.notification_days else {
        return;
    };
    let interval_seconds = retention.interval_seconds.max(60);

    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(interval_seconds));
        interval.tick().await; // skip immediate first tick
        loop {
            interval.tick().await;
            let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
            match tradepost_db::notifications::purge_older_than(&db, cutoff).await {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::info!(removed, days, "retention: purged old notifications");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "retention sweep failed");
                }
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
