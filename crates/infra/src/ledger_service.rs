//! Ledger orchestration: load account state, let `gavel-ledger` decide, commit
//! the decision with the version it was decided from.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use gavel_core::{AuctionBidderId, AuctionId, AuctionInventoryId, BidderId, InventoryId};
use gavel_ledger::{
    AuctionBidder, Cancellation, DirectPayment, InventoryHistory, Payment, PaymentMethod, PullOut,
    RegisterBidder, Registration, SaleRecord, Settlement,
};

use crate::error::ServiceError;
use crate::store::{Auction, AuctionStore, RegisteredBidder};

/// Live auction or `NotFound`.
pub(crate) async fn require_auction<S>(store: &S, id: AuctionId) -> Result<Auction, ServiceError>
where
    S: AuctionStore + ?Sized,
{
    store
        .get_auction(id)
        .await
        .map_err(ServiceError::store("get_auction"))?
        .ok_or_else(|| ServiceError::NotFound(format!("auction {id}")))
}

/// Registration terms supplied by the cashier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub bidder_id: BidderId,
    pub service_charge: Decimal,
    pub registration_fee: Decimal,
    pub method: PaymentMethod,
}

/// Cashier-entered payment against specific won items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub bidder_id: BidderId,
    pub amount: Decimal,
    pub inventory_ids: Vec<InventoryId>,
    pub method: PaymentMethod,
}

pub struct LedgerService<S: ?Sized> {
    store: Arc<S>,
}

impl<S> LedgerService<S>
where
    S: AuctionStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(
        skip(self, request),
        fields(auction_id = %auction_id, bidder_id = %request.bidder_id),
        err
    )]
    pub async fn register(
        &self,
        auction_id: AuctionId,
        request: RegistrationRequest,
    ) -> Result<Registration, ServiceError> {
        require_auction(&*self.store, auction_id).await?;
        self.store
            .get_bidder(request.bidder_id)
            .await
            .map_err(ServiceError::store("get_bidder"))?
            .ok_or_else(|| ServiceError::NotFound(format!("bidder {}", request.bidder_id)))?;

        let existing = self
            .store
            .find_auction_bidder(auction_id, request.bidder_id)
            .await
            .map_err(ServiceError::store("find_auction_bidder"))?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "bidder {} is already registered in auction {auction_id}",
                request.bidder_id
            )));
        }

        let registration = AuctionBidder::register(&RegisterBidder {
            auction_id,
            bidder_id: request.bidder_id,
            service_charge: request.service_charge,
            registration_fee: request.registration_fee,
            method: request.method,
            occurred_at: Utc::now(),
        })?;

        self.store
            .register_bidder(&registration)
            .await
            .map_err(ServiceError::store("register_bidder"))?;

        info!(auction_bidder_id = %registration.account.id, "bidder registered");
        Ok(registration)
    }

    /// Settle the selected sale records at their computed price.
    #[instrument(
        skip(self, sale_ids),
        fields(
            auction_id = %auction_id,
            auction_bidder_id = %auction_bidder_id,
            selected = sale_ids.len()
        ),
        err
    )]
    pub async fn pull_out(
        &self,
        auction_id: AuctionId,
        auction_bidder_id: AuctionBidderId,
        sale_ids: Vec<AuctionInventoryId>,
        method: PaymentMethod,
    ) -> Result<Settlement, ServiceError> {
        require_auction(&*self.store, auction_id).await?;
        let account = self.account_in(auction_id, auction_bidder_id).await?;

        let found = self
            .store
            .get_sales(&sale_ids)
            .await
            .map_err(ServiceError::store("get_sales"))?;
        let rows = sale_ids
            .iter()
            .map(|id| {
                found
                    .iter()
                    .find(|s| s.id == *id)
                    .cloned()
                    .ok_or_else(|| ServiceError::NotFound(format!("auction inventory {id}")))
            })
            .collect::<Result<Vec<SaleRecord>, _>>()?;

        let last_receipt = self.last_receipt(account.id).await?;
        let settlement = account.settle_pull_out(&PullOut {
            rows,
            last_receipt,
            method,
            occurred_at: Utc::now(),
        })?;

        self.commit(&settlement).await?;
        Ok(settlement)
    }

    /// Settle items with an amount supplied by the cashier.
    #[instrument(
        skip(self, request),
        fields(
            auction_id = %auction_id,
            bidder_id = %request.bidder_id,
            selected = request.inventory_ids.len()
        ),
        err
    )]
    pub async fn pay(
        &self,
        auction_id: AuctionId,
        request: PaymentRequest,
    ) -> Result<Settlement, ServiceError> {
        require_auction(&*self.store, auction_id).await?;
        let account = self
            .store
            .find_auction_bidder(auction_id, request.bidder_id)
            .await
            .map_err(ServiceError::store("find_auction_bidder"))?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "registration of bidder {} in auction {auction_id}",
                    request.bidder_id
                ))
            })?;

        let unpaid = self
            .store
            .unpaid_sales_for_items(account.id, &request.inventory_ids)
            .await
            .map_err(ServiceError::store("unpaid_sales_for_items"))?;
        let rows = request
            .inventory_ids
            .iter()
            .map(|item| {
                unpaid
                    .iter()
                    .find(|s| s.inventory_id == *item)
                    .cloned()
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("unpaid sale of inventory {item}"))
                    })
            })
            .collect::<Result<Vec<SaleRecord>, _>>()?;

        let last_receipt = self.last_receipt(account.id).await?;
        let settlement = account.settle_direct(&DirectPayment {
            amount: request.amount,
            rows,
            last_receipt,
            method: request.method,
            occurred_at: Utc::now(),
        })?;

        self.commit(&settlement).await?;
        Ok(settlement)
    }

    /// Cancel a sale record. The bidder's balance is not adjusted.
    #[instrument(skip(self), fields(auction_id = %auction_id, auction_inventory_id = %sale_id), err)]
    pub async fn cancel_item(
        &self,
        auction_id: AuctionId,
        sale_id: AuctionInventoryId,
    ) -> Result<Cancellation, ServiceError> {
        require_auction(&*self.store, auction_id).await?;

        let sale = self
            .store
            .get_sales(&[sale_id])
            .await
            .map_err(ServiceError::store("get_sales"))?
            .into_iter()
            .find(|s| s.id == sale_id && s.auction_id == auction_id)
            .ok_or_else(|| ServiceError::NotFound(format!("auction inventory {sale_id}")))?;
        let item = self
            .store
            .get_inventory(sale.inventory_id)
            .await
            .map_err(ServiceError::store("get_inventory"))?
            .ok_or_else(|| ServiceError::NotFound(format!("inventory {}", sale.inventory_id)))?;

        let cancellation = Cancellation::decide(&sale, item.status, Utc::now())?;
        self.store
            .commit_cancellation(&cancellation)
            .await
            .map_err(ServiceError::store("commit_cancellation"))?;

        info!(previous_status = %sale.status, "sale cancelled");
        Ok(cancellation)
    }

    #[instrument(skip(self), fields(auction_id = %auction_id), err)]
    pub async fn bidders(&self, auction_id: AuctionId) -> Result<Vec<RegisteredBidder>, ServiceError> {
        require_auction(&*self.store, auction_id).await?;
        self.store
            .list_auction_bidders(auction_id)
            .await
            .map_err(ServiceError::store("list_auction_bidders"))
    }

    #[instrument(skip(self), fields(auction_id = %auction_id, auction_bidder_id = %auction_bidder_id), err)]
    pub async fn payments(
        &self,
        auction_id: AuctionId,
        auction_bidder_id: AuctionBidderId,
    ) -> Result<Vec<Payment>, ServiceError> {
        require_auction(&*self.store, auction_id).await?;
        let account = self.account_in(auction_id, auction_bidder_id).await?;
        self.store
            .payments(account.id)
            .await
            .map_err(ServiceError::store("payments"))
    }

    #[instrument(skip(self), fields(auction_id = %auction_id, auction_inventory_id = %sale_id), err)]
    pub async fn history(
        &self,
        auction_id: AuctionId,
        sale_id: AuctionInventoryId,
    ) -> Result<Vec<InventoryHistory>, ServiceError> {
        require_auction(&*self.store, auction_id).await?;
        self.store
            .get_sales(&[sale_id])
            .await
            .map_err(ServiceError::store("get_sales"))?
            .into_iter()
            .find(|s| s.id == sale_id && s.auction_id == auction_id)
            .ok_or_else(|| ServiceError::NotFound(format!("auction inventory {sale_id}")))?;

        self.store
            .inventory_history(sale_id)
            .await
            .map_err(ServiceError::store("inventory_history"))
    }

    async fn account_in(
        &self,
        auction_id: AuctionId,
        auction_bidder_id: AuctionBidderId,
    ) -> Result<AuctionBidder, ServiceError> {
        self.store
            .get_auction_bidder(auction_bidder_id)
            .await
            .map_err(ServiceError::store("get_auction_bidder"))?
            .filter(|a| a.auction_id == auction_id)
            .ok_or_else(|| ServiceError::NotFound(format!("auction bidder {auction_bidder_id}")))
    }

    async fn last_receipt(&self, id: AuctionBidderId) -> Result<Option<u32>, ServiceError> {
        self.store
            .last_receipt_number(id)
            .await
            .map_err(ServiceError::store("last_receipt_number"))
    }

    async fn commit(&self, settlement: &Settlement) -> Result<(), ServiceError> {
        self.store
            .commit_settlement(settlement)
            .await
            .map_err(ServiceError::store("commit_settlement"))?;
        info!(
            receipt_number = settlement.payment.receipt_number,
            amount = %settlement.payment.amount,
            fee_consumed = settlement.fee_consumed,
            "settlement committed"
        );
        Ok(())
    }
}
