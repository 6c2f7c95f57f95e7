use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::AppState;

/// GET /price - current derived price
pub async fn get_price(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PriceResponse>, (StatusCode, String)> {
    match state.service.derive().await {
        Ok(price) => {
            info!("Serving {} via {:?}", price.id, price.factor.source);
            Ok(Json(PriceResponse {
                id: price.id,
                value: price.value,
                timestamp: price.timestamp,
            }))
        }
        Err(e) => {
            warn!("Failed to derive {}: {}", state.service.settings().price_id, e);
            Err((StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

/// GET /health - liveness only, no upstream calls
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
    })
}

// Response types
#[derive(Debug, serde::Serialize)]
pub struct PriceResponse {
    pub id: String,
    pub value: rust_decimal::Decimal,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
