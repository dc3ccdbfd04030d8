use std::str::FromStr;
use std::sync::Arc;

use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use gavel_api::app::{build_app, services::AppServices};
use gavel_core::{AuctionId, BidderId};
use gavel_infra::{InMemoryAuctionStore, RegistryStore};
use gavel_manifest::BidderNumber;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(store: Arc<InMemoryAuctionStore>) -> Self {
        // Same router as prod, over a seeded in-memory store, on an ephemeral port.
        let app = build_app(AppServices::in_memory(store), 1024 * 1024);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Seeded {
    server: TestServer,
    client: reqwest::Client,
    auction_id: AuctionId,
    bidder_id: BidderId,
}

/// One auction, bidder #5 and container `ABC-001`.
async fn seeded() -> Seeded {
    let store = Arc::new(InMemoryAuctionStore::new());
    let auction = store.create_auction().await.unwrap();
    let bidder = store
        .create_bidder(BidderNumber::new(5).unwrap(), "Ada", "Lovelace")
        .await
        .unwrap();
    store.create_container("ABC-001").await.unwrap();

    Seeded {
        server: TestServer::spawn(store).await,
        client: reqwest::Client::new(),
        auction_id: auction.id,
        bidder_id: bidder.id,
    }
}

impl Seeded {
    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.server.url(&format!("/auctions/{}{}", self.auction_id, path)))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.server.url(&format!("/auctions/{}{}", self.auction_id, path)))
            .send()
            .await
            .unwrap()
    }

    async fn register(&self) -> Value {
        let res = self
            .post(
                "/register-bidder",
                json!({
                    "bidder_id": self.bidder_id.to_string(),
                    "service_charge": "10",
                    "registration_fee": "100",
                }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        res.json().await.unwrap()
    }
}

fn manifest_row(price: &str) -> Value {
    json!({
        "barcode": "abc-1-2",
        "control_number": 7,
        "description": "office chair",
        "bidder": "5",
        "qty": 1,
        "price": price,
        "manifest_number": "M-100",
    })
}

fn decimal(v: &Value) -> Decimal {
    match v {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        other => Decimal::from_str(&other.to_string()).unwrap(),
    }
}

#[tokio::test]
async fn health_and_readiness_are_public() {
    let fx = seeded().await;

    let res = fx.client.get(fx.server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = fx.client.get(fx.server.url("/ready")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["store"], "in_memory");
}

#[tokio::test]
async fn register_encode_and_pull_out_settle_the_account() {
    let fx = seeded().await;

    let registration = fx.register().await;
    assert_eq!(decimal(&registration["account"]["balance"]), Decimal::from(-100));
    assert_eq!(registration["payment"]["receipt_number"], 0);
    let auction_bidder_id = registration["account"]["id"].as_str().unwrap().to_string();

    let res = fx.post("/encode", json!([manifest_row("1000")])).await;
    assert_eq!(res.status(), StatusCode::OK);
    let outcome: Value = res.json().await.unwrap();
    assert_eq!(outcome["sheet_errors"].as_array().unwrap().len(), 0);
    assert_eq!(outcome["valid_rows"].as_array().unwrap().len(), 1);
    assert_eq!(outcome["monitoring"][0]["barcode"], "ABC-1-2");
    assert_eq!(outcome["monitoring"][0]["control_number"], "0007");
    let sale_id = outcome["valid_rows"][0]["auction_inventory_id"]
        .as_str()
        .unwrap()
        .to_string();

    let res = fx
        .post(
            "/pull-out",
            json!({
                "auction_bidders_id": auction_bidder_id,
                "auction_inventory_ids": [sale_id],
            }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let payment: Value = res.json().await.unwrap();
    assert_eq!(decimal(&payment["amount"]), Decimal::from(1000));
    assert_eq!(payment["receipt_number"], 1);
    assert_eq!(payment["purpose"], "PULL_OUT");

    let bidders: Value = fx.get("/bidders").await.json().await.unwrap();
    assert_eq!(bidders["items"][0]["bidder_number"], "0005");
    assert_eq!(decimal(&bidders["items"][0]["balance"]), Decimal::ZERO);

    let res = fx.get(&format!("/bidders/{auction_bidder_id}/payments")).await;
    assert_eq!(res.status(), StatusCode::OK);
    let payments: Value = res.json().await.unwrap();
    assert_eq!(payments["items"].as_array().unwrap().len(), 2);

    let monitoring: Value = fx.get("/monitoring").await.json().await.unwrap();
    assert_eq!(monitoring["items"][0]["status"], "PAID");
}

#[tokio::test]
async fn resubmitted_rows_are_reported_as_already_encoded() {
    let fx = seeded().await;
    fx.register().await;

    let first = fx.post("/encode", json!({ "rows": [manifest_row("500")] })).await;
    assert_eq!(first.status(), StatusCode::OK);

    let res = fx.post("/encode", json!({ "rows": [manifest_row("500")] })).await;
    assert_eq!(res.status(), StatusCode::OK);
    let outcome: Value = res.json().await.unwrap();
    assert_eq!(outcome["valid_rows"].as_array().unwrap().len(), 0);
    assert_eq!(outcome["sheet_errors"][0]["row_number"], 1);
    assert_eq!(outcome["sheet_errors"][0]["message"], "Already encoded");
    assert_eq!(outcome["monitoring"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn bad_rows_do_not_fail_the_batch() {
    let fx = seeded().await;
    fx.register().await;

    let unknown_bidder = json!({
        "barcode": "ABC-1-3",
        "control_number": "8",
        "bidder": "99",
        "price": "10",
    });
    let res = fx
        .post("/encode", json!([unknown_bidder, {"barcode": "", "bidder": "5"}, manifest_row("10")]))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let outcome: Value = res.json().await.unwrap();
    assert_eq!(outcome["valid_rows"].as_array().unwrap().len(), 1);
    let errors = outcome["sheet_errors"].as_array().unwrap();
    assert!(!errors.is_empty());
    assert_eq!(errors[0]["row_number"], 1);
    assert!(errors.iter().all(|e| e["row_number"] != 3));
}

#[tokio::test]
async fn registering_twice_conflicts() {
    let fx = seeded().await;
    fx.register().await;

    let res = fx
        .post(
            "/register-bidder",
            json!({
                "bidder_id": fx.bidder_id.to_string(),
                "service_charge": 10,
                "registration_fee": 100,
            }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn request_level_failures_map_to_statuses() {
    let fx = seeded().await;

    // Unknown auction.
    let res = fx
        .client
        .post(fx.server.url(&format!("/auctions/{}/encode", AuctionId::new())))
        .json(&json!([manifest_row("1")]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    // Empty batch.
    let res = fx.post("/encode", json!([])).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Malformed id.
    let res = fx.client.get(fx.server.url("/auctions/nope/monitoring")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");

    // Unknown bidder.
    let res = fx
        .post(
            "/register-bidder",
            json!({
                "bidder_id": BidderId::new().to_string(),
                "service_charge": 0,
                "registration_fee": 0,
            }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancelling_a_paid_item_writes_history() {
    let fx = seeded().await;
    let registration = fx.register().await;
    let outcome: Value = fx.post("/encode", json!([manifest_row("1000")])).await.json().await.unwrap();
    let sale_id = outcome["valid_rows"][0]["auction_inventory_id"].as_str().unwrap().to_string();
    let inventory_id = outcome["valid_rows"][0]["inventory_id"].as_str().unwrap().to_string();

    let res = fx
        .post(
            "/payment",
            json!({
                "bidder_id": fx.bidder_id.to_string(),
                "amount": "900",
                "inventory_ids": [inventory_id],
                "payment_method": "CARD",
            }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let payment: Value = res.json().await.unwrap();
    assert_eq!(decimal(&payment["amount"]), Decimal::from(900));
    assert_eq!(payment["method"], "CARD");

    let res = fx.post(&format!("/cancel-item/{sale_id}"), json!({})).await;
    assert_eq!(res.status(), StatusCode::OK);
    let history: Value = res.json().await.unwrap();
    assert_eq!(history["previous_auction_status"], "PAID");
    assert_eq!(history["auction_status"], "CANCELLED");

    let again = fx.post(&format!("/cancel-item/{sale_id}"), json!({})).await;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let rows: Value = fx
        .get(&format!("/auction-inventories/{sale_id}/history"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(rows["items"].as_array().unwrap().len(), 1);

    let bidders: Value = fx.get("/bidders").await.json().await.unwrap();
    assert_eq!(
        bidders["items"][0]["id"],
        registration["account"]["id"],
    );
}
