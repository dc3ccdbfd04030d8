use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use gavel_core::{
    AuctionBidderId, AuctionId, AuctionInventoryId, BidderId, ContainerId, InventoryId,
};
use gavel_ledger::{
    AuctionBidder, Cancellation, InventoryHistory, NewSaleRecord, Payment, Registration,
    SaleRecord, SaleStatus, Settlement,
};
use gavel_manifest::{
    Bidder, BidderNumber, Container, InventoryItem, InventoryKey, InventoryStatus,
    NewInventoryItem,
};

use super::{
    check_version, Auction, AuctionStore, MonitoringRow, RegisteredBidder, RegistryStore,
    SaleInsert, StoreError,
};

#[derive(Debug, Default)]
struct State {
    auctions: HashMap<AuctionId, Auction>,
    bidders: HashMap<BidderId, Bidder>,
    containers: HashMap<ContainerId, Container>,
    accounts: HashMap<AuctionBidderId, AuctionBidder>,
    inventories: HashMap<InventoryId, InventoryItem>,
    /// Insertion order doubles as encoding order.
    sales: Vec<SaleRecord>,
    payments: Vec<Payment>,
    histories: Vec<InventoryHistory>,
}

impl State {
    fn sale_mut(&mut self, id: AuctionInventoryId) -> Option<&mut SaleRecord> {
        self.sales.iter_mut().find(|s| s.id == id)
    }

    fn has_live_sale(&self, auction_bidder_id: AuctionBidderId, inventory_id: InventoryId) -> bool {
        self.sales.iter().any(|s| {
            s.auction_bidder_id == auction_bidder_id
                && s.inventory_id == inventory_id
                && s.is_active()
        })
    }
}

/// In-memory auction store.
///
/// Intended for tests/dev. Every write takes the single lock, so each
/// `commit_*` call is atomic with respect to every other call.
#[derive(Debug, Default)]
pub struct InMemoryAuctionStore {
    state: RwLock<State>,
}

impl InMemoryAuctionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails only once a writer panicked while holding the lock.
    pub fn ping(&self) -> Result<(), StoreError> {
        self.read().map(|_| ())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

#[async_trait]
impl AuctionStore for InMemoryAuctionStore {
    async fn get_auction(&self, id: AuctionId) -> Result<Option<Auction>, StoreError> {
        let state = self.read()?;
        Ok(state
            .auctions
            .get(&id)
            .filter(|a| a.deleted_at.is_none())
            .cloned())
    }

    async fn get_bidder(&self, id: BidderId) -> Result<Option<Bidder>, StoreError> {
        Ok(self.read()?.bidders.get(&id).cloned())
    }

    async fn registered_bidders(
        &self,
        auction_id: AuctionId,
        numbers: &[BidderNumber],
    ) -> Result<HashMap<BidderNumber, AuctionBidder>, StoreError> {
        let state = self.read()?;
        let wanted: HashSet<&BidderNumber> = numbers.iter().collect();

        let mut out = HashMap::new();
        for account in state.accounts.values().filter(|a| a.auction_id == auction_id) {
            if let Some(bidder) = state.bidders.get(&account.bidder_id) {
                if wanted.contains(&bidder.bidder_number) {
                    out.insert(bidder.bidder_number, account.clone());
                }
            }
        }
        Ok(out)
    }

    async fn containers_by_barcode(
        &self,
        barcodes: &[String],
    ) -> Result<HashMap<String, ContainerId>, StoreError> {
        let state = self.read()?;
        let wanted: HashSet<&str> = barcodes.iter().map(String::as_str).collect();
        Ok(state
            .containers
            .values()
            .filter(|c| wanted.contains(c.barcode.as_str()))
            .map(|c| (c.barcode.clone(), c.id))
            .collect())
    }

    async fn find_inventories(
        &self,
        keys: &[InventoryKey],
    ) -> Result<HashMap<InventoryKey, InventoryItem>, StoreError> {
        let state = self.read()?;
        let wanted: HashSet<&InventoryKey> = keys.iter().collect();
        Ok(state
            .inventories
            .values()
            .map(|item| (item.key(), item))
            .filter(|(key, _)| wanted.contains(key))
            .map(|(key, item)| (key, item.clone()))
            .collect())
    }

    async fn get_inventory(&self, id: InventoryId) -> Result<Option<InventoryItem>, StoreError> {
        Ok(self.read()?.inventories.get(&id).cloned())
    }

    async fn create_inventories(
        &self,
        items: Vec<NewInventoryItem>,
    ) -> Result<Vec<InventoryItem>, StoreError> {
        let mut state = self.write()?;
        let mut out = Vec::with_capacity(items.len());
        for new in items {
            let existing = state
                .inventories
                .values()
                .find(|i| i.barcode == new.key.barcode && i.control_number == new.key.control_number)
                .cloned();
            let item = match existing {
                Some(item) => item,
                None => {
                    let item = new.into_item(InventoryId::new());
                    state.inventories.insert(item.id, item.clone());
                    item
                }
            };
            out.push(item);
        }
        Ok(out)
    }

    async fn encoded_pairs(
        &self,
        auction_id: AuctionId,
    ) -> Result<HashSet<(AuctionBidderId, InventoryId)>, StoreError> {
        let state = self.read()?;
        Ok(state
            .sales
            .iter()
            .filter(|s| s.auction_id == auction_id && s.is_active())
            .map(|s| (s.auction_bidder_id, s.inventory_id))
            .collect())
    }

    async fn commit_sales(
        &self,
        auction_id: AuctionId,
        rows: Vec<NewSaleRecord>,
    ) -> Result<Vec<SaleInsert>, StoreError> {
        let mut state = self.write()?;

        for row in &rows {
            match state.accounts.get(&row.auction_bidder_id) {
                Some(a) if a.auction_id == auction_id => {}
                _ => {
                    return Err(StoreError::NotFound(format!(
                        "auction bidder {}",
                        row.auction_bidder_id
                    )));
                }
            }
        }

        let mut fresh: Vec<Option<NewSaleRecord>> = Vec::with_capacity(rows.len());
        let mut accrued: HashMap<AuctionBidderId, Vec<_>> = HashMap::new();
        for row in rows {
            let live = state.has_live_sale(row.auction_bidder_id, row.inventory_id)
                || fresh.iter().flatten().any(|r| {
                    r.auction_bidder_id == row.auction_bidder_id
                        && r.inventory_id == row.inventory_id
                });
            if live {
                fresh.push(None);
                continue;
            }
            accrued
                .entry(row.auction_bidder_id)
                .or_default()
                .push(row.price);
            fresh.push(Some(row));
        }

        // Balances are decided before any write; a rejected batch changes nothing.
        let mut accounts = Vec::with_capacity(accrued.len());
        for (account_id, prices) in accrued {
            if let Some(account) = state.accounts.get(&account_id) {
                accounts.push(account.accrue(prices).map_err(StoreError::Rejected)?);
            }
        }

        let now = Utc::now();
        let mut results = Vec::with_capacity(fresh.len());
        for row in fresh {
            let Some(row) = row else {
                results.push(SaleInsert::AlreadyEncoded);
                continue;
            };
            let record = row.into_record(AuctionInventoryId::new(), now);
            if let Some(item) = state.inventories.get_mut(&record.inventory_id) {
                item.status = InventoryStatus::Sold;
            }
            state.sales.push(record.clone());
            results.push(SaleInsert::Inserted(record));
        }
        for account in accounts {
            state.accounts.insert(account.id, account);
        }

        Ok(results)
    }

    async fn monitoring(&self, auction_id: AuctionId) -> Result<Vec<MonitoringRow>, StoreError> {
        let state = self.read()?;
        let mut out = Vec::new();
        for sale in state
            .sales
            .iter()
            .filter(|s| s.auction_id == auction_id && s.is_active())
        {
            let (Some(item), Some(account)) = (
                state.inventories.get(&sale.inventory_id),
                state.accounts.get(&sale.auction_bidder_id),
            ) else {
                continue;
            };
            let Some(bidder) = state.bidders.get(&account.bidder_id) else {
                continue;
            };
            out.push(MonitoringRow {
                auction_inventory_id: sale.id,
                auction_bidder_id: sale.auction_bidder_id,
                inventory_id: sale.inventory_id,
                barcode: item.barcode.clone(),
                control_number: item.control_number.clone(),
                description: item.description.clone(),
                bidder_number: bidder.bidder_number.to_string(),
                bidder_name: bidder.full_name(),
                quantity: sale.quantity.clone(),
                price: sale.price,
                manifest_number: sale.manifest_number.clone(),
                status: sale.status,
            });
        }
        Ok(out)
    }

    async fn register_bidder(&self, registration: &Registration) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let account = &registration.account;

        let duplicate = state
            .accounts
            .values()
            .any(|a| a.auction_id == account.auction_id && a.bidder_id == account.bidder_id);
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "bidder {} is already registered in auction {}",
                account.bidder_id, account.auction_id
            )));
        }

        state.accounts.insert(account.id, account.clone());
        state.payments.push(registration.payment.clone());
        Ok(())
    }

    async fn get_auction_bidder(
        &self,
        id: AuctionBidderId,
    ) -> Result<Option<AuctionBidder>, StoreError> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    async fn find_auction_bidder(
        &self,
        auction_id: AuctionId,
        bidder_id: BidderId,
    ) -> Result<Option<AuctionBidder>, StoreError> {
        let state = self.read()?;
        Ok(state
            .accounts
            .values()
            .find(|a| a.auction_id == auction_id && a.bidder_id == bidder_id)
            .cloned())
    }

    async fn list_auction_bidders(
        &self,
        auction_id: AuctionId,
    ) -> Result<Vec<RegisteredBidder>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<RegisteredBidder> = state
            .accounts
            .values()
            .filter(|a| a.auction_id == auction_id)
            .filter_map(|account| {
                state.bidders.get(&account.bidder_id).map(|bidder| RegisteredBidder {
                    account: account.clone(),
                    bidder_number: bidder.bidder_number.to_string(),
                    bidder_name: bidder.full_name(),
                })
            })
            .collect();
        out.sort_by(|a, b| a.bidder_number.cmp(&b.bidder_number));
        Ok(out)
    }

    async fn last_receipt_number(&self, id: AuctionBidderId) -> Result<Option<u32>, StoreError> {
        let state = self.read()?;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.auction_bidder_id == id)
            .map(|p| p.receipt_number)
            .max())
    }

    async fn payments(&self, id: AuctionBidderId) -> Result<Vec<Payment>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.auction_bidder_id == id)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.receipt_number);
        Ok(out)
    }

    async fn get_sales(&self, ids: &[AuctionInventoryId]) -> Result<Vec<SaleRecord>, StoreError> {
        let state = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.sales.iter().find(|s| s.id == *id).cloned())
            .collect())
    }

    async fn unpaid_sales_for_items(
        &self,
        auction_bidder_id: AuctionBidderId,
        inventory_ids: &[InventoryId],
    ) -> Result<Vec<SaleRecord>, StoreError> {
        let state = self.read()?;
        let wanted: HashSet<&InventoryId> = inventory_ids.iter().collect();
        Ok(state
            .sales
            .iter()
            .filter(|s| {
                s.auction_bidder_id == auction_bidder_id
                    && s.status == SaleStatus::Unpaid
                    && wanted.contains(&s.inventory_id)
            })
            .cloned()
            .collect())
    }

    async fn commit_settlement(&self, settlement: &Settlement) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let account_id = settlement.account.id;

        let current = state
            .accounts
            .get(&account_id)
            .ok_or_else(|| StoreError::NotFound(format!("auction bidder {account_id}")))?;
        check_version(settlement.expected_version, current.version)?;

        let receipt = settlement.payment.receipt_number;
        if state
            .payments
            .iter()
            .any(|p| p.auction_bidder_id == account_id && p.receipt_number == receipt)
        {
            return Err(StoreError::Conflict(format!(
                "receipt {receipt} already issued for auction bidder {account_id}"
            )));
        }

        for paid in &settlement.paid_rows {
            match state.sales.iter().find(|s| s.id == paid.id) {
                Some(s) if s.status == SaleStatus::Unpaid => {}
                Some(s) => {
                    return Err(StoreError::Conflict(format!(
                        "auction inventory {} is {} and cannot be paid",
                        s.id, s.status
                    )));
                }
                None => return Err(StoreError::NotFound(format!("auction inventory {}", paid.id))),
            }
        }

        for paid in &settlement.paid_rows {
            if let Some(sale) = state.sale_mut(paid.id) {
                *sale = paid.clone();
            }
        }
        state.payments.push(settlement.payment.clone());
        state.accounts.insert(account_id, settlement.account.clone());
        Ok(())
    }

    async fn commit_cancellation(&self, cancellation: &Cancellation) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let sale_id = cancellation.sale.id;
        let expected = cancellation.history.previous_auction_status;

        let sale = state
            .sale_mut(sale_id)
            .ok_or_else(|| StoreError::NotFound(format!("auction inventory {sale_id}")))?;
        if sale.status != expected {
            return Err(StoreError::Conflict(format!(
                "auction inventory {sale_id} changed status to {} while being cancelled",
                sale.status
            )));
        }
        *sale = cancellation.sale.clone();

        if let Some(item) = state.inventories.get_mut(&cancellation.sale.inventory_id) {
            item.status = cancellation.inventory_status;
        }
        state.histories.push(cancellation.history.clone());
        Ok(())
    }

    async fn inventory_history(
        &self,
        auction_inventory_id: AuctionInventoryId,
    ) -> Result<Vec<InventoryHistory>, StoreError> {
        let state = self.read()?;
        Ok(state
            .histories
            .iter()
            .filter(|h| h.auction_inventory_id == auction_inventory_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RegistryStore for InMemoryAuctionStore {
    async fn create_auction(&self) -> Result<Auction, StoreError> {
        let auction = Auction {
            id: AuctionId::new(),
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.write()?.auctions.insert(auction.id, auction.clone());
        Ok(auction)
    }

    async fn soft_delete_auction(&self, id: AuctionId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let auction = state
            .auctions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("auction {id}")))?;
        auction.deleted_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    async fn create_bidder(
        &self,
        bidder_number: BidderNumber,
        first_name: &str,
        last_name: &str,
    ) -> Result<Bidder, StoreError> {
        let mut state = self.write()?;
        if state.bidders.values().any(|b| b.bidder_number == bidder_number) {
            return Err(StoreError::Conflict(format!(
                "bidder number {bidder_number} is already taken"
            )));
        }
        let bidder = Bidder {
            id: BidderId::new(),
            bidder_number,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        };
        state.bidders.insert(bidder.id, bidder.clone());
        Ok(bidder)
    }

    async fn create_container(&self, barcode: &str) -> Result<Container, StoreError> {
        let mut state = self.write()?;
        let barcode = barcode.trim().to_uppercase();
        if state.containers.values().any(|c| c.barcode == barcode) {
            return Err(StoreError::Conflict(format!(
                "container {barcode} already exists"
            )));
        }
        let container = Container {
            id: ContainerId::new(),
            barcode,
        };
        state.containers.insert(container.id, container.clone());
        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_ledger::{PaymentMethod, PullOut, RegisterBidder};
    use rust_decimal_macros::dec;

    async fn seeded() -> (InMemoryAuctionStore, Auction, Bidder, AuctionBidder) {
        let store = InMemoryAuctionStore::new();
        let auction = store.create_auction().await.unwrap();
        let bidder = store
            .create_bidder(BidderNumber::new(5).unwrap(), "Ada", "Lovelace")
            .await
            .unwrap();
        let reg = AuctionBidder::register(&RegisterBidder {
            auction_id: auction.id,
            bidder_id: bidder.id,
            service_charge: dec!(10),
            registration_fee: dec!(100),
            method: PaymentMethod::Cash,
            occurred_at: Utc::now(),
        })
        .unwrap();
        store.register_bidder(&reg).await.unwrap();
        (store, auction, bidder, reg.account)
    }

    fn sale(auction_id: AuctionId, account: &AuctionBidder, item: InventoryId) -> NewSaleRecord {
        NewSaleRecord {
            auction_id,
            auction_bidder_id: account.id,
            inventory_id: item,
            quantity: "1".to_string(),
            price: dec!(1000),
            manifest_number: "M-1".to_string(),
        }
    }

    #[tokio::test]
    async fn soft_deleted_auctions_are_hidden() {
        let store = InMemoryAuctionStore::new();
        let auction = store.create_auction().await.unwrap();
        assert!(store.get_auction(auction.id).await.unwrap().is_some());
        store.soft_delete_auction(auction.id).await.unwrap();
        assert!(store.get_auction(auction.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn registered_bidders_only_include_this_auction() {
        let (store, auction, bidder, account) = seeded().await;
        let other = store.create_auction().await.unwrap();

        let here = store
            .registered_bidders(auction.id, &[bidder.bidder_number])
            .await
            .unwrap();
        assert_eq!(here.get(&bidder.bidder_number), Some(&account));

        let elsewhere = store
            .registered_bidders(other.id, &[bidder.bidder_number])
            .await
            .unwrap();
        assert!(elsewhere.is_empty());
    }

    #[tokio::test]
    async fn duplicate_live_sale_is_reported_not_inserted() {
        let (store, auction, _, account) = seeded().await;
        let item = InventoryId::new();

        let first = store
            .commit_sales(auction.id, vec![sale(auction.id, &account, item)])
            .await
            .unwrap();
        assert!(matches!(first[0], SaleInsert::Inserted(_)));

        let second = store
            .commit_sales(auction.id, vec![sale(auction.id, &account, item)])
            .await
            .unwrap();
        assert_eq!(second, vec![SaleInsert::AlreadyEncoded]);

        let after = store.get_auction_bidder(account.id).await.unwrap().unwrap();
        assert_eq!(after.balance, dec!(1000));
        assert_eq!(after.version, account.version + 1);
    }

    #[tokio::test]
    async fn stale_settlement_is_a_conflict() {
        let (store, auction, _, account) = seeded().await;
        let inserted = store
            .commit_sales(auction.id, vec![sale(auction.id, &account, InventoryId::new())])
            .await
            .unwrap();
        let SaleInsert::Inserted(row) = inserted[0].clone() else {
            panic!("expected insert");
        };

        // Decided from the pre-accrual account state.
        let settlement = account
            .settle_pull_out(&PullOut {
                rows: vec![row],
                last_receipt: Some(0),
                method: PaymentMethod::Cash,
                occurred_at: Utc::now(),
            })
            .unwrap();

        let err = store.commit_settlement(&settlement).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.payments(account.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bidder_numbers_and_container_barcodes_are_unique() {
        let (store, _, bidder, _) = seeded().await;
        assert!(matches!(
            store.create_bidder(bidder.bidder_number, "A", "B").await,
            Err(StoreError::Conflict(_))
        ));
        store.create_container("abc-001").await.unwrap();
        assert!(matches!(
            store.create_container("ABC-001").await,
            Err(StoreError::Conflict(_))
        ));
    }
}
