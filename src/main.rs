mod config;
mod db;
mod fetcher;
mod query;
mod routes;

use std::sync::Arc;

use tower_http::services::ServeDir;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::fetcher::{start_background_refresh, Fetcher};
use crate::query::QueryEngine;
use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsdeck=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load("feeds.toml")?;
    info!("Loaded {} feeds from configuration", config.feeds.len());

    // Open the article store
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:newsdeck.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    info!("Database initialized");

    let db = Arc::new(db);

    // Create the ingestion runner
    let fetcher = Arc::new(Fetcher::new(db.clone(), config.feeds.clone()));

    // Start background ingestion
    let bg_fetcher = fetcher.clone();
    let fetch_interval = config.fetch_interval;
    tokio::spawn(async move {
        start_background_refresh(bg_fetcher, fetch_interval).await;
    });

    // Create app state
    let state = Arc::new(AppState {
        db: db.clone(),
        engine: QueryEngine::new(db.clone()),
        fetcher: fetcher.clone(),
    });

    // Build router: JSON API plus the static frontend
    let app = routes::router(state).fallback_service(ServeDir::new("static"));

    // Start server
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("Server starting on http://localhost:{}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
