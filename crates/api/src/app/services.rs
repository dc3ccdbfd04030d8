use std::sync::Arc;

use gavel_core::{AuctionBidderId, AuctionId, AuctionInventoryId};
use gavel_infra::{
    EncodeOutcome, InMemoryAuctionStore, LedgerService, ManifestPipeline, MonitoringRow,
    PaymentRequest, PostgresAuctionStore, RegisteredBidder, RegistrationRequest, ServiceError,
    StoreError,
};
use gavel_ledger::{Cancellation, InventoryHistory, Payment, PaymentMethod, Registration, Settlement};
use gavel_manifest::RawManifestRow;

use crate::config::StoreConfig;

#[derive(Clone)]
pub enum AppServices {
    InMemory {
        store: Arc<InMemoryAuctionStore>,
        pipeline: Arc<ManifestPipeline<InMemoryAuctionStore>>,
        ledger: Arc<LedgerService<InMemoryAuctionStore>>,
    },
    Persistent {
        store: Arc<PostgresAuctionStore>,
        pipeline: Arc<ManifestPipeline<PostgresAuctionStore>>,
        ledger: Arc<LedgerService<PostgresAuctionStore>>,
    },
}

pub async fn build_services(config: &StoreConfig) -> Result<AppServices, StoreError> {
    match config {
        StoreConfig::InMemory => {
            tracing::warn!("USE_PERSISTENT_STORES is off; data lives in memory only");
            Ok(AppServices::in_memory(Arc::new(InMemoryAuctionStore::new())))
        }
        StoreConfig::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresAuctionStore::connect(database_url, *max_connections).await?;
            store.migrate().await?;
            Ok(AppServices::persistent(Arc::new(store)))
        }
    }
}

impl AppServices {
    /// In-memory wiring (dev/test). The caller keeps `store` to seed registries.
    pub fn in_memory(store: Arc<InMemoryAuctionStore>) -> Self {
        AppServices::InMemory {
            pipeline: Arc::new(ManifestPipeline::new(store.clone())),
            ledger: Arc::new(LedgerService::new(store.clone())),
            store,
        }
    }

    pub fn persistent(store: Arc<PostgresAuctionStore>) -> Self {
        AppServices::Persistent {
            pipeline: Arc::new(ManifestPipeline::new(store.clone())),
            ledger: Arc::new(LedgerService::new(store.clone())),
            store,
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            AppServices::InMemory { .. } => "in_memory",
            AppServices::Persistent { .. } => "postgres",
        }
    }

    /// Whether the backing store can serve requests.
    pub async fn ready(&self) -> Result<(), StoreError> {
        match self {
            AppServices::InMemory { store, .. } => store.ping(),
            AppServices::Persistent { store, .. } => store.ping().await,
        }
    }

    pub async fn encode(
        &self,
        auction_id: AuctionId,
        rows: Vec<RawManifestRow>,
    ) -> Result<EncodeOutcome, ServiceError> {
        match self {
            AppServices::InMemory { pipeline, .. } => pipeline.encode(auction_id, rows).await,
            AppServices::Persistent { pipeline, .. } => pipeline.encode(auction_id, rows).await,
        }
    }

    pub async fn monitoring(&self, auction_id: AuctionId) -> Result<Vec<MonitoringRow>, ServiceError> {
        match self {
            AppServices::InMemory { pipeline, .. } => pipeline.monitoring(auction_id).await,
            AppServices::Persistent { pipeline, .. } => pipeline.monitoring(auction_id).await,
        }
    }

    pub async fn register_bidder(
        &self,
        auction_id: AuctionId,
        request: RegistrationRequest,
    ) -> Result<Registration, ServiceError> {
        match self {
            AppServices::InMemory { ledger, .. } => ledger.register(auction_id, request).await,
            AppServices::Persistent { ledger, .. } => ledger.register(auction_id, request).await,
        }
    }

    pub async fn pay(
        &self,
        auction_id: AuctionId,
        request: PaymentRequest,
    ) -> Result<Settlement, ServiceError> {
        match self {
            AppServices::InMemory { ledger, .. } => ledger.pay(auction_id, request).await,
            AppServices::Persistent { ledger, .. } => ledger.pay(auction_id, request).await,
        }
    }

    pub async fn pull_out(
        &self,
        auction_id: AuctionId,
        auction_bidder_id: AuctionBidderId,
        sale_ids: Vec<AuctionInventoryId>,
        method: PaymentMethod,
    ) -> Result<Settlement, ServiceError> {
        match self {
            AppServices::InMemory { ledger, .. } => {
                ledger.pull_out(auction_id, auction_bidder_id, sale_ids, method).await
            }
            AppServices::Persistent { ledger, .. } => {
                ledger.pull_out(auction_id, auction_bidder_id, sale_ids, method).await
            }
        }
    }

    pub async fn cancel_item(
        &self,
        auction_id: AuctionId,
        sale_id: AuctionInventoryId,
    ) -> Result<Cancellation, ServiceError> {
        match self {
            AppServices::InMemory { ledger, .. } => ledger.cancel_item(auction_id, sale_id).await,
            AppServices::Persistent { ledger, .. } => ledger.cancel_item(auction_id, sale_id).await,
        }
    }

    pub async fn bidders(&self, auction_id: AuctionId) -> Result<Vec<RegisteredBidder>, ServiceError> {
        match self {
            AppServices::InMemory { ledger, .. } => ledger.bidders(auction_id).await,
            AppServices::Persistent { ledger, .. } => ledger.bidders(auction_id).await,
        }
    }

    pub async fn payments(
        &self,
        auction_id: AuctionId,
        auction_bidder_id: AuctionBidderId,
    ) -> Result<Vec<Payment>, ServiceError> {
        match self {
            AppServices::InMemory { ledger, .. } => ledger.payments(auction_id, auction_bidder_id).await,
            AppServices::Persistent { ledger, .. } => {
                ledger.payments(auction_id, auction_bidder_id).await
            }
        }
    }

    pub async fn history(
        &self,
        auction_id: AuctionId,
        sale_id: AuctionInventoryId,
    ) -> Result<Vec<InventoryHistory>, ServiceError> {
        match self {
            AppServices::InMemory { ledger, .. } => ledger.history(auction_id, sale_id).await,
            AppServices::Persistent { ledger, .. } => ledger.history(auction_id, sale_id).await,
        }
    }
}
