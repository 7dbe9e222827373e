//! Web server module.

mod handlers;

use crate::config::ServerConfig;
use crate::service::MetricService;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub service: Arc<MetricService>,
}

/// HTTP front for the metric service.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, service: Arc<MetricService>) -> Self {
        Self {
            state: AppState { config, service },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            .route("/health", get(handlers::handle_health))
            // Metrics
            .route("/api/metrics", get(handlers::handle_list_metrics))
            .route("/api/metrics/{metric_id}/aggregation", get(handlers::handle_get_aggregation))
            .route("/api/metrics/{metric_id}/entities", get(handlers::handle_get_metric_entities))
            // Entities
            .route(
                "/api/entities/{kind}/{namespace}/{name}/metrics",
                get(handlers::handle_get_entity_metrics),
            )
            .route(
                "/api/entities/{kind}/{namespace}/{name}/metrics/refresh",
                post(handlers::handle_refresh_entity_metrics),
            )
            .route(
                "/api/entities/{kind}/{namespace}/{name}/metrics/{metric_id}/history",
                get(handlers::handle_get_metric_history),
            )
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
