//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and the pipeline/ledger services over it
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request DTOs and their mapping onto service requests
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router over already-wired services.
pub fn build_app(services: services::AppServices, max_body_bytes: usize) -> Router {
    routes::router().layer(
        ServiceBuilder::new()
            .layer(Extension(Arc::new(services)))
            .layer(DefaultBodyLimit::max(max_body_bytes)),
    )
}
