use axum::{routing::get, Router};

pub mod auctions;
pub mod system;

/// Router for every endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/ready", get(system::ready))
        .nest("/auctions", auctions::router())
}
