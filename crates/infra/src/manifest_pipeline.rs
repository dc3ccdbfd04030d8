//! Manifest reconciliation pipeline.
//!
//! ```text
//! raw rows
//!   ↓
//! 1. Normalize every row in isolation (collect all failing rules)
//!   ↓
//! 2. Resolve bidder numbers against bidders registered in the auction (one bulk lookup)
//!   ↓
//! 3. Resolve container barcodes, reuse or create inventory items (batched)
//!   ↓
//! 4. Guard against (auction bidder, item) pairs that already have a live sale
//!   ↓
//! 5. Commit sale records + accrual in one store write, re-checking duplicates
//!   ↓
//! valid rows, sheet errors, monitoring snapshot
//! ```
//!
//! A row that fails any stage is turned into a [`SheetError`] and dropped from
//! later stages; it never aborts the batch. Only an unknown auction, an empty
//! batch or a storage failure fail the whole request.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{Span, field, info, instrument};

use gavel_core::{AuctionBidderId, AuctionId, AuctionInventoryId, ContainerId, InventoryId};
use gavel_ledger::{AuctionBidder, NewSaleRecord};
use gavel_manifest::{
    InventoryItem, InventoryKey, ManifestRow, NewInventoryItem, RawManifestRow, RowRejection,
    SheetError, normalize_row,
};

use crate::error::ServiceError;
use crate::ledger_service::require_auction;
use crate::store::{AuctionStore, MonitoringRow, SaleInsert};

/// A row that made it into the auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedRow {
    /// 1-based position of the row in the submitted batch.
    pub row_number: usize,
    pub row: ManifestRow,
    pub auction_inventory_id: AuctionInventoryId,
    pub inventory_id: InventoryId,
    pub auction_bidder_id: AuctionBidderId,
}

/// Result of one encode request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodeOutcome {
    pub monitoring: Vec<MonitoringRow>,
    pub valid_rows: Vec<EncodedRow>,
    /// Ordered by row number; a row with several failing rules appears once per rule.
    pub sheet_errors: Vec<SheetError>,
}

/// Row carried between stages.
struct Staged {
    row_number: usize,
    raw: RawManifestRow,
    row: ManifestRow,
}

struct Resolved {
    staged: Staged,
    account: AuctionBidderId,
    inventory_id: InventoryId,
}

pub struct ManifestPipeline<S: ?Sized> {
    store: Arc<S>,
}

impl<S> ManifestPipeline<S>
where
    S: AuctionStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(
        skip(self, rows),
        fields(
            auction_id = %auction_id,
            row_count = rows.len(),
            committed = field::Empty,
            rejected = field::Empty
        ),
        err
    )]
    pub async fn encode(
        &self,
        auction_id: AuctionId,
        rows: Vec<RawManifestRow>,
    ) -> Result<EncodeOutcome, ServiceError> {
        if rows.is_empty() {
            return Err(ServiceError::Validation("manifest has no rows".to_string()));
        }
        require_auction(&*self.store, auction_id).await?;

        let mut sheet_errors = Vec::new();

        let staged = normalize(rows, &mut sheet_errors);
        let with_bidders = self.resolve_bidders(auction_id, staged, &mut sheet_errors).await?;
        let resolved = self.resolve_inventory(with_bidders, &mut sheet_errors).await?;
        let fresh = self.guard_duplicates(auction_id, resolved, &mut sheet_errors).await?;
        let valid_rows = self.commit(auction_id, fresh, &mut sheet_errors).await?;

        let monitoring = self.monitoring(auction_id).await?;

        sheet_errors.sort_by_key(|e| e.row_number);

        let span = Span::current();
        span.record("committed", valid_rows.len());
        span.record("rejected", sheet_errors.len());
        info!(
            committed = valid_rows.len(),
            rejected = sheet_errors.len(),
            "manifest encoded"
        );

        Ok(EncodeOutcome {
            monitoring,
            valid_rows,
            sheet_errors,
        })
    }

    /// Non-cancelled sale records of the auction, in encoding order.
    #[instrument(skip(self), fields(auction_id = %auction_id), err)]
    pub async fn monitoring(&self, auction_id: AuctionId) -> Result<Vec<MonitoringRow>, ServiceError> {
        require_auction(&*self.store, auction_id).await?;
        self.store
            .monitoring(auction_id)
            .await
            .map_err(ServiceError::store("monitoring"))
    }

    async fn resolve_bidders(
        &self,
        auction_id: AuctionId,
        staged: Vec<Staged>,
        sheet_errors: &mut Vec<SheetError>,
    ) -> Result<Vec<(Staged, AuctionBidder)>, ServiceError> {
        if staged.is_empty() {
            return Ok(vec![]);
        }

        let numbers: Vec<_> = staged
            .iter()
            .map(|s| s.row.bidder_number)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let registered = self
            .store
            .registered_bidders(auction_id, &numbers)
            .await
            .map_err(ServiceError::store("registered_bidders"))?;

        let mut out = Vec::with_capacity(staged.len());
        for s in staged {
            match registered.get(&s.row.bidder_number) {
                Some(account) => out.push((s, account.clone())),
                None => reject(sheet_errors, s, RowRejection::unknown_bidder()),
            }
        }
        Ok(out)
    }

    async fn resolve_inventory(
        &self,
        rows: Vec<(Staged, AuctionBidder)>,
        sheet_errors: &mut Vec<SheetError>,
    ) -> Result<Vec<Resolved>, ServiceError> {
        if rows.is_empty() {
            return Ok(vec![]);
        }

        let barcodes: Vec<String> = rows
            .iter()
            .map(|(s, _)| s.row.container_barcode.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let containers = self
            .store
            .containers_by_barcode(&barcodes)
            .await
            .map_err(ServiceError::store("containers_by_barcode"))?;

        let mut located: Vec<(Staged, AuctionBidder, ContainerId)> = Vec::with_capacity(rows.len());
        for (s, account) in rows {
            match containers.get(&s.row.container_barcode) {
                Some(container_id) => located.push((s, account, *container_id)),
                None => {
                    let rejection = RowRejection::unknown_container(&s.row.container_barcode);
                    reject(sheet_errors, s, rejection);
                }
            }
        }
        if located.is_empty() {
            return Ok(vec![]);
        }

        let keys: Vec<InventoryKey> = located
            .iter()
            .map(|(s, _, _)| s.row.inventory_key())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut items: HashMap<InventoryKey, InventoryItem> = self
            .store
            .find_inventories(&keys)
            .await
            .map_err(ServiceError::store("find_inventories"))?;

        // First row wins the description of an item created by this batch.
        let mut pending = Vec::new();
        let mut queued = HashSet::new();
        for (s, _, container_id) in &located {
            let key = s.row.inventory_key();
            if !items.contains_key(&key) && queued.insert(key.clone()) {
                pending.push(NewInventoryItem {
                    key,
                    description: s.row.description.clone(),
                    container_id: *container_id,
                });
            }
        }
        if !pending.is_empty() {
            let created = self
                .store
                .create_inventories(pending)
                .await
                .map_err(ServiceError::store("create_inventories"))?;
            items.extend(created.into_iter().map(|item| (item.key(), item)));
        }

        located
            .into_iter()
            .map(|(s, account, _)| {
                let key = s.row.inventory_key();
                let item = items.get(&key).ok_or_else(|| {
                    ServiceError::InvariantViolation(format!(
                        "inventory {}/{} was not resolved",
                        key.barcode, key.control_number
                    ))
                })?;
                Ok(Resolved {
                    inventory_id: item.id,
                    account: account.id,
                    staged: s,
                })
            })
            .collect()
    }

    async fn guard_duplicates(
        &self,
        auction_id: AuctionId,
        rows: Vec<Resolved>,
        sheet_errors: &mut Vec<SheetError>,
    ) -> Result<Vec<Resolved>, ServiceError> {
        if rows.is_empty() {
            return Ok(vec![]);
        }

        let mut taken = self
            .store
            .encoded_pairs(auction_id)
            .await
            .map_err(ServiceError::store("encoded_pairs"))?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            if taken.insert((r.account, r.inventory_id)) {
                out.push(r);
            } else {
                reject(sheet_errors, r.staged, RowRejection::already_encoded());
            }
        }
        Ok(out)
    }

    async fn commit(
        &self,
        auction_id: AuctionId,
        rows: Vec<Resolved>,
        sheet_errors: &mut Vec<SheetError>,
    ) -> Result<Vec<EncodedRow>, ServiceError> {
        if rows.is_empty() {
            return Ok(vec![]);
        }

        let records = rows
            .iter()
            .map(|r| NewSaleRecord {
                auction_id,
                auction_bidder_id: r.account,
                inventory_id: r.inventory_id,
                quantity: r.staged.row.quantity.clone(),
                price: r.staged.row.price,
                manifest_number: r.staged.row.manifest_number.clone(),
            })
            .collect();
        let inserts = self
            .store
            .commit_sales(auction_id, records)
            .await
            .map_err(ServiceError::store("commit_sales"))?;

        if inserts.len() != rows.len() {
            return Err(ServiceError::InvariantViolation(format!(
                "store acknowledged {} of {} sale records",
                inserts.len(),
                rows.len()
            )));
        }

        let mut valid = Vec::with_capacity(rows.len());
        for (r, insert) in rows.into_iter().zip(inserts) {
            match insert {
                SaleInsert::Inserted(record) => valid.push(EncodedRow {
                    row_number: r.staged.row_number,
                    row: r.staged.row,
                    auction_inventory_id: record.id,
                    inventory_id: record.inventory_id,
                    auction_bidder_id: record.auction_bidder_id,
                }),
                // Lost the race to a concurrent batch.
                SaleInsert::AlreadyEncoded => {
                    reject(sheet_errors, r.staged, RowRejection::already_encoded())
                }
            }
        }
        Ok(valid)
    }
}

fn normalize(rows: Vec<RawManifestRow>, sheet_errors: &mut Vec<SheetError>) -> Vec<Staged> {
    let mut staged = Vec::with_capacity(rows.len());
    for (idx, raw) in rows.into_iter().enumerate() {
        let row_number = idx + 1;
        match normalize_row(&raw) {
            Ok(row) => staged.push(Staged {
                row_number,
                raw,
                row,
            }),
            Err(rejections) => sheet_errors.extend(
                rejections
                    .into_iter()
                    .map(|r| SheetError::new(row_number, raw.clone(), r)),
            ),
        }
    }
    staged
}

fn reject(sheet_errors: &mut Vec<SheetError>, staged: Staged, rejection: RowRejection) {
    sheet_errors.push(SheetError::new(staged.row_number, staged.raw, rejection));
}
