use rust_decimal::Decimal;
use serde::Deserialize;

use gavel_core::{AuctionBidderId, AuctionInventoryId, BidderId, InventoryId};
use gavel_infra::{PaymentRequest as LedgerPaymentRequest, RegistrationRequest};
use gavel_ledger::PaymentMethod;
use gavel_manifest::RawManifestRow;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Manifest upload: either a bare array of rows or `{ "rows": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EncodeRequest {
    Rows(Vec<RawManifestRow>),
    Wrapped { rows: Vec<RawManifestRow> },
}

impl EncodeRequest {
    pub fn into_rows(self) -> Vec<RawManifestRow> {
        match self {
            EncodeRequest::Rows(rows) | EncodeRequest::Wrapped { rows } => rows,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterBidderRequest {
    pub bidder_id: String,
    pub service_charge: Decimal,
    pub registration_fee: Decimal,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub bidder_id: String,
    pub amount: Decimal,
    pub inventory_ids: Vec<String>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Deserialize)]
pub struct PullOutRequest {
    pub auction_bidders_id: String,
    pub auction_inventory_ids: Vec<String>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

/// Parsed pull-out selection.
pub struct PullOutSelection {
    pub auction_bidder_id: AuctionBidderId,
    pub sale_ids: Vec<AuctionInventoryId>,
    pub method: PaymentMethod,
}

// -------------------------
// Request → service mapping
// -------------------------

impl RegisterBidderRequest {
    pub fn into_request(self) -> Result<RegistrationRequest, axum::response::Response> {
        Ok(RegistrationRequest {
            bidder_id: errors::parse_id::<BidderId>(&self.bidder_id, "bidder")?,
            service_charge: self.service_charge,
            registration_fee: self.registration_fee,
            method: self.payment_method.unwrap_or_default(),
        })
    }
}

impl PaymentRequest {
    pub fn into_request(self) -> Result<LedgerPaymentRequest, axum::response::Response> {
        let inventory_ids = self
            .inventory_ids
            .iter()
            .map(|id| errors::parse_id::<InventoryId>(id, "inventory"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LedgerPaymentRequest {
            bidder_id: errors::parse_id::<BidderId>(&self.bidder_id, "bidder")?,
            amount: self.amount,
            inventory_ids,
            method: self.payment_method.unwrap_or_default(),
        })
    }
}

impl PullOutRequest {
    pub fn into_selection(self) -> Result<PullOutSelection, axum::response::Response> {
        let sale_ids = self
            .auction_inventory_ids
            .iter()
            .map(|id| errors::parse_id::<AuctionInventoryId>(id, "auction inventory"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PullOutSelection {
            auction_bidder_id: errors::parse_id(&self.auction_bidders_id, "auction bidder")?,
            sale_ids,
            method: self.payment_method.unwrap_or_default(),
        })
    }
}
