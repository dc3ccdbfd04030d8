use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gavel_core::{
    AuctionBidderId, AuctionId, AuctionInventoryId, DomainError, DomainResult, InventoryId,
    PaymentId,
};

/// Settlement status of a sale record.
///
/// `Unpaid` moves to `Paid` or `Cancelled`. `Paid` may still be cancelled (the
/// item leaves the bidder, the receipt stays). `Cancelled` is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleStatus {
    Unpaid,
    Paid,
    Cancelled,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Unpaid => "UNPAID",
            SaleStatus::Paid => "PAID",
            SaleStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaleStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNPAID" => Ok(SaleStatus::Unpaid),
            "PAID" => Ok(SaleStatus::Paid),
            "CANCELLED" => Ok(SaleStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown sale status: {other}"))),
        }
    }
}

/// An item attributed to a bidder in an auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub id: AuctionInventoryId,
    pub auction_id: AuctionId,
    pub auction_bidder_id: AuctionBidderId,
    pub inventory_id: InventoryId,
    pub quantity: String,
    pub price: Decimal,
    pub manifest_number: String,
    pub status: SaleStatus,
    pub payment_id: Option<PaymentId>,
    pub created_at: DateTime<Utc>,
}

impl SaleRecord {
    /// Mark the record settled by `payment_id`.
    pub fn mark_paid(&self, payment_id: PaymentId) -> DomainResult<SaleRecord> {
        if self.status != SaleStatus::Unpaid {
            return Err(DomainError::conflict(format!(
                "auction inventory {} is {} and cannot be paid",
                self.id, self.status
            )));
        }
        Ok(SaleRecord {
            status: SaleStatus::Paid,
            payment_id: Some(payment_id),
            ..self.clone()
        })
    }

    pub fn cancel(&self) -> DomainResult<SaleRecord> {
        if self.status == SaleStatus::Cancelled {
            return Err(DomainError::conflict(format!(
                "auction inventory {} is already cancelled",
                self.id
            )));
        }
        Ok(SaleRecord {
            status: SaleStatus::Cancelled,
            ..self.clone()
        })
    }

    /// Whether this record blocks another encoding of the same bidder/item pair.
    pub fn is_active(&self) -> bool {
        self.status != SaleStatus::Cancelled
    }
}

/// Sale record to be inserted by the manifest committer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSaleRecord {
    pub auction_id: AuctionId,
    pub auction_bidder_id: AuctionBidderId,
    pub inventory_id: InventoryId,
    pub quantity: String,
    pub price: Decimal,
    pub manifest_number: String,
}

impl NewSaleRecord {
    pub fn into_record(self, id: AuctionInventoryId, created_at: DateTime<Utc>) -> SaleRecord {
        SaleRecord {
            id,
            auction_id: self.auction_id,
            auction_bidder_id: self.auction_bidder_id,
            inventory_id: self.inventory_id,
            quantity: self.quantity,
            price: self.price,
            manifest_number: self.manifest_number,
            status: SaleStatus::Unpaid,
            payment_id: None,
            created_at,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn unpaid(auction_bidder_id: AuctionBidderId, price: Decimal) -> SaleRecord {
        NewSaleRecord {
            auction_id: AuctionId::new(),
            auction_bidder_id,
            inventory_id: InventoryId::new(),
            quantity: "1".to_string(),
            price,
            manifest_number: "M-1".to_string(),
        }
        .into_record(AuctionInventoryId::new(), Utc::now())
    }

    #[test]
    fn unpaid_can_be_paid_once() {
        let sale = unpaid(AuctionBidderId::new(), dec!(10));
        let payment_id = PaymentId::new();
        let paid = sale.mark_paid(payment_id).unwrap();
        assert_eq!(paid.status, SaleStatus::Paid);
        assert_eq!(paid.payment_id, Some(payment_id));
        assert!(matches!(
            paid.mark_paid(PaymentId::new()),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn cancelled_is_terminal() {
        let sale = unpaid(AuctionBidderId::new(), dec!(10));
        let cancelled = sale.cancel().unwrap();
        assert!(!cancelled.is_active());
        assert!(cancelled.cancel().is_err());
        assert!(cancelled.mark_paid(PaymentId::new()).is_err());
    }

    #[test]
    fn paid_rows_can_still_be_cancelled() {
        let sale = unpaid(AuctionBidderId::new(), dec!(10));
        let paid = sale.mark_paid(PaymentId::new()).unwrap();
        let cancelled = paid.cancel().unwrap();
        assert_eq!(cancelled.status, SaleStatus::Cancelled);
        assert_eq!(cancelled.payment_id, paid.payment_id);
    }
}
