//! Infrastructure layer: storage, manifest pipeline and ledger orchestration.

pub mod error;
pub mod ledger_service;
pub mod manifest_pipeline;
pub mod store;


pub use error::ServiceError;
pub use ledger_service::{LedgerService, PaymentRequest, RegistrationRequest};
pub use manifest_pipeline::{EncodeOutcome, EncodedRow, ManifestPipeline};
pub use store::{
    Auction, AuctionStore, InMemoryAuctionStore, MonitoringRow, PostgresAuctionStore,
    RegisteredBidder, RegistryStore, SaleInsert, StoreError,
};
