use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use price_resolver::{DerivedPriceService, Settings};

/// Application state shared across handlers
pub struct AppState {
    pub service: DerivedPriceService,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting Price Resolver Service...");

    let settings = Settings::from_env()?;
    let port = settings.port;
    info!(
        "✓ Deriving {} from {} feed endpoints, spot venue {}",
        settings.price_id,
        settings.fetch_policy.endpoints.len(),
        settings.hyperliquid_api_url
    );
    if settings.token_addresses.is_empty() {
        info!("No EVM token addresses configured, DEX tier disabled");
    }

    let service = DerivedPriceService::from_settings(settings)?;
    let state = Arc::new(AppState { service });

    // Build router
    let app = Router::new()
        .route("/price", get(handlers::get_price))
        .route("/health", get(handlers::health_check))
        .layer(CorsLayer::new().allow_origin(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("🚀 Price Resolver Service listening on port {}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

mod handlers;
