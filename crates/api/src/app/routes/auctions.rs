use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use gavel_core::{AuctionBidderId, AuctionId, AuctionInventoryId};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/:id/encode", post(encode))
        .route("/:id/monitoring", get(monitoring))
        .route("/:id/register-bidder", post(register_bidder))
        .route("/:id/bidders", get(list_bidders))
        .route("/:id/bidders/:auction_bidder_id/payments", get(list_payments))
        .route("/:id/payment", post(pay))
        .route("/:id/pull-out", post(pull_out))
        .route("/:id/cancel-item/:auction_inventory_id", post(cancel_item))
        .route(
            "/:id/auction-inventories/:auction_inventory_id/history",
            get(item_history),
        )
}

fn parse_auction(raw: &str) -> Result<AuctionId, axum::response::Response> {
    errors::parse_id(raw, "auction")
}

pub async fn encode(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::EncodeRequest>,
) -> axum::response::Response {
    let auction_id = match parse_auction(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.encode(auction_id, body.into_rows()).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => errors::service_error_to_response("encode", e),
    }
}

pub async fn monitoring(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let auction_id = match parse_auction(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.monitoring(auction_id).await {
        Ok(items) => Json(serde_json::json!({ "items": items })).into_response(),
        Err(e) => errors::service_error_to_response("monitoring", e),
    }
}

pub async fn register_bidder(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::RegisterBidderRequest>,
) -> axum::response::Response {
    let auction_id = match parse_auction(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let request = match body.into_request() {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.register_bidder(auction_id, request).await {
        Ok(registration) => (StatusCode::CREATED, Json(registration)).into_response(),
        Err(e) => errors::service_error_to_response("register_bidder", e),
    }
}

pub async fn list_bidders(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let auction_id = match parse_auction(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.bidders(auction_id).await {
        Ok(items) => Json(serde_json::json!({ "items": items })).into_response(),
        Err(e) => errors::service_error_to_response("list_bidders", e),
    }
}

pub async fn list_payments(
    Extension(services): Extension<Arc<AppServices>>,
    Path((id, auction_bidder_id)): Path<(String, String)>,
) -> axum::response::Response {
    let auction_id = match parse_auction(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let auction_bidder_id: AuctionBidderId =
        match errors::parse_id(&auction_bidder_id, "auction bidder") {
            Ok(v) => v,
            Err(resp) => return resp,
        };

    match services.payments(auction_id, auction_bidder_id).await {
        Ok(items) => Json(serde_json::json!({ "items": items })).into_response(),
        Err(e) => errors::service_error_to_response("list_payments", e),
    }
}

/// Cashier payment with an explicit amount.
pub async fn pay(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::PaymentRequest>,
) -> axum::response::Response {
    let auction_id = match parse_auction(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let request = match body.into_request() {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.pay(auction_id, request).await {
        Ok(settlement) => (StatusCode::CREATED, Json(settlement.payment)).into_response(),
        Err(e) => errors::service_error_to_response("payment", e),
    }
}

/// Settle selected rows at their computed price.
pub async fn pull_out(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::PullOutRequest>,
) -> axum::response::Response {
    let auction_id = match parse_auction(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let selection = match body.into_selection() {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .pull_out(
            auction_id,
            selection.auction_bidder_id,
            selection.sale_ids,
            selection.method,
        )
        .await
    {
        Ok(settlement) => (StatusCode::CREATED, Json(settlement.payment)).into_response(),
        Err(e) => errors::service_error_to_response("pull_out", e),
    }
}

pub async fn cancel_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path((id, sale_id)): Path<(String, String)>,
) -> axum::response::Response {
    let auction_id = match parse_auction(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let sale_id: AuctionInventoryId = match errors::parse_id(&sale_id, "auction inventory") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.cancel_item(auction_id, sale_id).await {
        Ok(cancellation) => (StatusCode::OK, Json(cancellation.history)).into_response(),
        Err(e) => errors::service_error_to_response("cancel_item", e),
    }
}

pub async fn item_history(
    Extension(services): Extension<Arc<AppServices>>,
    Path((id, sale_id)): Path<(String, String)>,
) -> axum::response::Response {
    let auction_id = match parse_auction(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let sale_id: AuctionInventoryId = match errors::parse_id(&sale_id, "auction inventory") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.history(auction_id, sale_id).await {
        Ok(items) => Json(serde_json::json!({ "items": items })).into_response(),
        Err(e) => errors::service_error_to_response("item_history", e),
    }
}
