use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gavel_core::{AuctionInventoryId, DomainResult, InventoryHistoryId, InventoryId};
use gavel_manifest::InventoryStatus;

use crate::sale::{SaleRecord, SaleStatus};

/// Append-only audit row written whenever a sale record is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryHistory {
    pub id: InventoryHistoryId,
    pub auction_inventory_id: AuctionInventoryId,
    pub inventory_id: InventoryId,
    pub previous_inventory_status: InventoryStatus,
    pub previous_auction_status: SaleStatus,
    pub auction_status: SaleStatus,
    pub remarks: String,
    pub created_at: DateTime<Utc>,
}

/// Everything a store must persist atomically for one cancellation.
///
/// The bidder's balance is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cancellation {
    pub sale: SaleRecord,
    pub inventory_status: InventoryStatus,
    pub history: InventoryHistory,
}

impl Cancellation {
    pub fn decide(
        sale: &SaleRecord,
        current_item_status: InventoryStatus,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Cancellation> {
        let cancelled = sale.cancel()?;
        let history = InventoryHistory {
            id: InventoryHistoryId::new(),
            auction_inventory_id: sale.id,
            inventory_id: sale.inventory_id,
            previous_inventory_status: current_item_status,
            previous_auction_status: sale.status,
            auction_status: SaleStatus::Cancelled,
            remarks: format!("cancelled from {}", sale.status),
            created_at: occurred_at,
        };

        Ok(Cancellation {
            sale: cancelled,
            inventory_status: InventoryStatus::Unsold,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sale::tests::unpaid;
    use gavel_core::{AuctionBidderId, DomainError, PaymentId};
    use rust_decimal_macros::dec;

    #[test]
    fn cancellation_records_prior_statuses() {
        let sale = unpaid(AuctionBidderId::new(), dec!(100))
            .mark_paid(PaymentId::new())
            .unwrap();

        let c = Cancellation::decide(&sale, InventoryStatus::Sold, Utc::now()).unwrap();

        assert_eq!(c.sale.status, SaleStatus::Cancelled);
        assert_eq!(c.inventory_status, InventoryStatus::Unsold);
        assert_eq!(c.history.previous_auction_status, SaleStatus::Paid);
        assert_eq!(c.history.previous_inventory_status, InventoryStatus::Sold);
        assert_eq!(c.history.auction_inventory_id, sale.id);
        assert_eq!(c.history.inventory_id, sale.inventory_id);
    }

    #[test]
    fn cancelling_twice_is_a_conflict() {
        let sale = unpaid(AuctionBidderId::new(), dec!(1));
        let c = Cancellation::decide(&sale, InventoryStatus::Sold, Utc::now()).unwrap();
        let err = Cancellation::decide(&c.sale, c.inventory_status, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }
}
