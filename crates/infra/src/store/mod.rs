//! Storage capability injected into the pipeline and the ledger service.
//!
//! The core never reaches for a global connection: every component receives an
//! `AuctionStore` and calls it explicitly. Two implementations exist:
//! - [`InMemoryAuctionStore`] for tests/dev (single lock, trivially atomic)
//! - [`PostgresAuctionStore`] for production (transactions + unique constraints)
//!
//! Writes that must be atomic are expressed as one `commit_*` call carrying a
//! fully-decided domain outcome (`Settlement`, `Cancellation`, ...).

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use gavel_core::{
    AuctionBidderId, AuctionId, AuctionInventoryId, BidderId, ContainerId, DomainError,
    ExpectedVersion, InventoryId,
};
use gavel_ledger::{
    AuctionBidder, Cancellation, InventoryHistory, NewSaleRecord, Payment, Registration,
    SaleRecord, SaleStatus, Settlement,
};
use gavel_manifest::{
    Bidder, BidderNumber, Container, InventoryItem, InventoryKey, NewInventoryItem,
};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryAuctionStore;
pub use postgres::PostgresAuctionStore;

/// Data-access failure.
///
/// `Conflict` and `NotFound` are raised by storage-level guards (unique
/// constraints, version checks, vanished rows) and are surfaced to callers as
/// business outcomes. `Rejected` carries a domain rule the write itself broke
/// (an out-of-range amount or number). `Backend` is fatal for the request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rejected: {0}")]
    Rejected(DomainError),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Version guard shared by both stores.
pub(crate) fn check_version(expected: ExpectedVersion, actual: u64) -> Result<(), StoreError> {
    expected.check(actual).map_err(|e| match e {
        DomainError::Conflict(msg) => StoreError::Conflict(msg),
        other => StoreError::Rejected(other),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Auction {
    pub id: AuctionId,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Per-row result of [`AuctionStore::commit_sales`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaleInsert {
    Inserted(SaleRecord),
    /// A live sale for the same (auction, bidder, item) already exists.
    AlreadyEncoded,
}

/// One line of the monitoring snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoringRow {
    pub auction_inventory_id: AuctionInventoryId,
    pub auction_bidder_id: AuctionBidderId,
    pub inventory_id: InventoryId,
    pub barcode: String,
    pub control_number: String,
    pub description: String,
    pub bidder_number: String,
    pub bidder_name: String,
    pub quantity: String,
    pub price: Decimal,
    pub manifest_number: String,
    pub status: SaleStatus,
}

/// A registration joined with the bidder directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredBidder {
    #[serde(flatten)]
    pub account: AuctionBidder,
    pub bidder_number: String,
    pub bidder_name: String,
}

/// Registry lookups plus the writes the core owns.
#[async_trait]
pub trait AuctionStore: Send + Sync {
    /// Live (not soft-deleted) auction.
    async fn get_auction(&self, id: AuctionId) -> Result<Option<Auction>, StoreError>;

    async fn get_bidder(&self, id: BidderId) -> Result<Option<Bidder>, StoreError>;

    /// Bulk lookup of bidders *registered in* `auction_id`, keyed by number.
    async fn registered_bidders(
        &self,
        auction_id: AuctionId,
        numbers: &[BidderNumber],
    ) -> Result<HashMap<BidderNumber, AuctionBidder>, StoreError>;

    /// Bulk lookup of containers by container-level barcode.
    async fn containers_by_barcode(
        &self,
        barcodes: &[String],
    ) -> Result<HashMap<String, ContainerId>, StoreError>;

    async fn find_inventories(
        &self,
        keys: &[InventoryKey],
    ) -> Result<HashMap<InventoryKey, InventoryItem>, StoreError>;

    async fn get_inventory(&self, id: InventoryId) -> Result<Option<InventoryItem>, StoreError>;

    /// Bulk create. Items created concurrently by someone else are returned
    /// as they exist in the store.
    async fn create_inventories(
        &self,
        items: Vec<NewInventoryItem>,
    ) -> Result<Vec<InventoryItem>, StoreError>;

    /// (auction bidder, item) pairs with a live sale in the auction.
    async fn encoded_pairs(
        &self,
        auction_id: AuctionId,
    ) -> Result<HashSet<(AuctionBidderId, InventoryId)>, StoreError>;

    /// Insert sale records and accrue their cost onto the owning accounts in
    /// one atomic write. The result is positionally aligned with `rows`.
    async fn commit_sales(
        &self,
        auction_id: AuctionId,
        rows: Vec<NewSaleRecord>,
    ) -> Result<Vec<SaleInsert>, StoreError>;

    async fn monitoring(&self, auction_id: AuctionId) -> Result<Vec<MonitoringRow>, StoreError>;

    /// Persist a registration and its receipt #0. Duplicate (auction, bidder)
    /// is a `Conflict`.
    async fn register_bidder(&self, registration: &Registration) -> Result<(), StoreError>;

    async fn get_auction_bidder(
        &self,
        id: AuctionBidderId,
    ) -> Result<Option<AuctionBidder>, StoreError>;

    async fn find_auction_bidder(
        &self,
        auction_id: AuctionId,
        bidder_id: BidderId,
    ) -> Result<Option<AuctionBidder>, StoreError>;

    async fn list_auction_bidders(
        &self,
        auction_id: AuctionId,
    ) -> Result<Vec<RegisteredBidder>, StoreError>;

    async fn last_receipt_number(&self, id: AuctionBidderId) -> Result<Option<u32>, StoreError>;

    async fn payments(&self, id: AuctionBidderId) -> Result<Vec<Payment>, StoreError>;

    async fn get_sales(&self, ids: &[AuctionInventoryId]) -> Result<Vec<SaleRecord>, StoreError>;

    /// Unpaid sale records of an account for the given items.
    async fn unpaid_sales_for_items(
        &self,
        auction_bidder_id: AuctionBidderId,
        inventory_ids: &[InventoryId],
    ) -> Result<Vec<SaleRecord>, StoreError>;

    /// Apply a settlement atomically: version check, receipt, paid rows, balance.
    async fn commit_settlement(&self, settlement: &Settlement) -> Result<(), StoreError>;

    /// Apply a cancellation atomically: sale status, item status, history row.
    async fn commit_cancellation(&self, cancellation: &Cancellation) -> Result<(), StoreError>;

    async fn inventory_history(
        &self,
        auction_inventory_id: AuctionInventoryId,
    ) -> Result<Vec<InventoryHistory>, StoreError>;
}

/// Create operations of the registries the core consults.
///
/// Owned by the CRUD side of the system; exposed here so tests and seeding can
/// populate either store.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn create_auction(&self) -> Result<Auction, StoreError>;
    async fn soft_delete_auction(&self, id: AuctionId) -> Result<(), StoreError>;
    async fn create_bidder(
        &self,
        bidder_number: BidderNumber,
        first_name: &str,
        last_name: &str,
    ) -> Result<Bidder, StoreError>;
    async fn create_container(&self, barcode: &str) -> Result<Container, StoreError>;
}
