use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::errors;
use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// 200 while the store answers, 503 otherwise.
pub async fn ready(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.ready().await {
        Ok(()) => Json(serde_json::json!({
            "status": "ready",
            "store": services.backend(),
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(store = services.backend(), error = %e, "readiness check failed");
            errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "not_ready", "store unavailable")
        }
    }
}
