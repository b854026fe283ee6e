//! task-rotation - HTTP Server Entry Point
//!
//! Starts the HTTP server and the periodic reassignment trigger.

use task_rotation::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "task_rotation=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: store={:?}, max_tasks_per_user={}, scheduler={} every {:?}",
        config.store_backend,
        config.max_tasks_per_user,
        if config.scheduler.enabled { "on" } else { "off" },
        config.scheduler.interval
    );

    api::serve(config).await?;

    Ok(())
}
