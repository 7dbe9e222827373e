//! Scorecard - entity metric scoring and query service
//!
//! Collects metric values for catalog entities from registered providers,
//! grades them against thresholds and serves the results over HTTP.

mod catalog;
mod config;
mod db;
mod error;
mod permission;
mod provider;
mod scheduler;
mod service;
mod threshold;
mod web;

use catalog::{CatalogApi, InMemoryCatalog};
use config::ServerConfig;
use db::Store;
use permission::AllowAllPermissions;
use provider::{CatalogCompletenessProvider, MetricProviderRegistry};
use scheduler::RetentionManager;
use service::MetricService;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("scorecard=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting scorecard on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Providers register once at startup; the registry is read-only afterwards.
    let mut registry = MetricProviderRegistry::new();
    registry.register(Arc::new(CatalogCompletenessProvider))?;
    tracing::info!("Registered {} metrics", registry.len());

    let catalog = match &cfg.catalog_path {
        Some(path) => {
            let catalog = InMemoryCatalog::load(path)?;
            tracing::info!("Loaded {} catalog entities from {}", catalog.len(), path);
            catalog
        }
        None => {
            tracing::warn!("SCORECARD_CATALOG_PATH not set, starting with an empty catalog");
            InMemoryCatalog::default()
        }
    };
    let catalog: Arc<dyn CatalogApi> = Arc::new(catalog);

    let service = Arc::new(MetricService::new(
        Arc::new(registry),
        store.clone(),
        catalog,
        Arc::new(AllowAllPermissions),
    ));

    // Start retention
    let retention = RetentionManager::new(store, cfg.retention_days, cfg.retention_interval);
    let retention_task = retention.start();

    // Start web server
    let server = Server::new(cfg, service);
    server.start().await?;

    retention.stop().await;
    let _ = retention_task.await;
    Ok(())
}
