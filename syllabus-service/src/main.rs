use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;

mod api;
mod config;
mod db;
mod error;
mod inference;
mod ingestion;
mod pipeline;
mod service;
mod syllabus;

use crate::config::load_config;
use crate::db::Database;
use crate::service::SyllabusService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_logging();

    info!(
        "Starting syllabus service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Arc::new(load_config()?);
    info!(
        host = %config.server.host,
        port = config.server.port,
        inference = %config.inference.base_url,
        "Configuration loaded"
    );

    // Metrics recorder must be installed before any counter is touched
    let metrics = PrometheusBuilder::new().install_recorder()?;

    let db = Arc::new(Database::open(&config.database.path)?);
    info!(path = %config.database.path.display(), "Database initialized");

    let service = Arc::new(SyllabusService::new(config.clone(), db).await?);

    // Nothing from a previous process is still running
    service.recover_interrupted_jobs()?;

    let app = api::router(service, metrics);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("syllabus_service=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
