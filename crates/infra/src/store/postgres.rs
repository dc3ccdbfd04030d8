//! Postgres-backed auction store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate registration, receipt number race, duplicate directory entry |
//! | Database (foreign key violation) | `23503` | `NotFound` | Referenced auction/bidder/container vanished |
//! | Database (other) | Any other | `Backend` | Check constraints, syntax, etc. |
//! | PoolClosed / Other | N/A | `Backend` | Network errors, connection failures |
//! | Out-of-range integer or amount | N/A | `Rejected` | Bidder number above `i32::MAX`, balance overflow |
//!
//! ## Concurrency
//!
//! Every ledger write runs in one transaction that first locks the affected
//! `auction_bidders` rows (`SELECT ... FOR UPDATE`, in id order) and compares
//! their `version` with the decision's expectation. Duplicate live sales are
//! stopped by the partial unique index `auctions_inventories_live_sale`, so two
//! concurrent encodes of the same row cannot both insert.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, field, instrument, warn};
use uuid::Uuid;

use gavel_core::{
    AuctionBidderId, AuctionId, AuctionInventoryId, BidderId, ContainerId, DomainError,
    InventoryHistoryId, InventoryId, PaymentId,
};
use gavel_ledger::{
    AuctionBidder, Cancellation, InventoryHistory, NewSaleRecord, Payment, Registration,
    SaleRecord, SaleStatus, Settlement,
};
use gavel_manifest::{
    Bidder, BidderNumber, Container, InventoryItem, InventoryKey, NewInventoryItem,
};

use super::{
    Auction, AuctionStore, MonitoringRow, RegisteredBidder, RegistryStore, SaleInsert, StoreError,
    check_version,
};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const ACCOUNT_COLUMNS: &str = "ab.id, ab.auction_id, ab.bidder_id, ab.service_charge, \
     ab.registration_fee, ab.balance, ab.already_consumed, ab.version, ab.created_at";

const SALE_COLUMNS: &str = "ai.id, ai.auction_id, ai.auction_bidder_id, ai.inventory_id, \
     ai.quantity, ai.price, ai.manifest_number, ai.status, ai.payment_id, ai.created_at";

/// Postgres-backed auction store.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct PostgresAuctionStore {
    pool: Arc<PgPool>,
}

impl PostgresAuctionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Round-trip to the database; used by the readiness check.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait]
impl AuctionStore for PostgresAuctionStore {
    #[instrument(skip(self), fields(auction_id = %id), err)]
    async fn get_auction(&self, id: AuctionId) -> Result<Option<Auction>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, created_at, deleted_at
            FROM auctions
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_auction", e))?;

        row.as_ref()
            .map(decode_auction)
            .transpose()
            .map_err(|e| decode_error("auction", e))
    }

    #[instrument(skip(self), fields(bidder_id = %id), err)]
    async fn get_bidder(&self, id: BidderId) -> Result<Option<Bidder>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, bidder_number, first_name, last_name
            FROM bidders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_bidder", e))?;

        row.as_ref()
            .map(decode_bidder)
            .transpose()
            .map_err(|e| decode_error("bidder", e))
    }

    #[instrument(
        skip(self, numbers),
        fields(auction_id = %auction_id, requested = numbers.len(), found = field::Empty),
        err
    )]
    async fn registered_bidders(
        &self,
        auction_id: AuctionId,
        numbers: &[BidderNumber],
    ) -> Result<HashMap<BidderNumber, AuctionBidder>, StoreError> {
        // Numbers past the column range cannot have been registered.
        let wanted: Vec<i32> = numbers
            .iter()
            .filter_map(|n| i32::try_from(n.value()).ok())
            .collect();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}, b.bidder_number
            FROM auction_bidders ab
            JOIN bidders b ON b.id = ab.bidder_id
            WHERE ab.auction_id = $1 AND b.bidder_number = ANY($2)
            "#
        ))
        .bind(auction_id.as_uuid())
        .bind(wanted)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("registered_bidders", e))?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in &rows {
            let number = decode_bidder_number(row).map_err(|e| decode_error("bidder", e))?;
            let account = decode_account(row).map_err(|e| decode_error("auction bidder", e))?;
            out.insert(number, account);
        }
        Span::current().record("found", out.len());
        Ok(out)
    }

    #[instrument(skip(self, barcodes), fields(requested = barcodes.len()), err)]
    async fn containers_by_barcode(
        &self,
        barcodes: &[String],
    ) -> Result<HashMap<String, ContainerId>, StoreError> {
        let rows = sqlx::query("SELECT id, barcode FROM containers WHERE barcode = ANY($1)")
            .bind(barcodes.to_vec())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("containers_by_barcode", e))?;

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id")?;
                let barcode: String = row.try_get("barcode")?;
                Ok((barcode, ContainerId::from_uuid(id)))
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(|e| decode_error("container", e))
    }

    #[instrument(skip(self, keys), fields(requested = keys.len()), err)]
    async fn find_inventories(
        &self,
        keys: &[InventoryKey],
    ) -> Result<HashMap<InventoryKey, InventoryItem>, StoreError> {
        let barcodes: Vec<String> = keys.iter().map(|k| k.barcode.clone()).collect();
        let controls: Vec<String> = keys.iter().map(|k| k.control_number.clone()).collect();

        let rows = sqlx::query(
            r#"
            SELECT i.id, i.barcode, i.control_number, i.description, i.container_id, i.status
            FROM inventories i
            JOIN UNNEST($1::text[], $2::text[]) AS k (barcode, control_number)
              ON k.barcode = i.barcode AND k.control_number = i.control_number
            "#,
        )
        .bind(barcodes)
        .bind(controls)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_inventories", e))?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in &rows {
            let item = decode_inventory(row).map_err(|e| decode_error("inventory", e))?;
            out.insert(item.key(), item);
        }
        Ok(out)
    }

    #[instrument(skip(self), fields(inventory_id = %id), err)]
    async fn get_inventory(&self, id: InventoryId) -> Result<Option<InventoryItem>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, barcode, control_number, description, container_id, status
            FROM inventories
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_inventory", e))?;

        row.as_ref()
            .map(decode_inventory)
            .transpose()
            .map_err(|e| decode_error("inventory", e))
    }

    #[instrument(skip(self, items), fields(requested = items.len()), err)]
    async fn create_inventories(
        &self,
        items: Vec<NewInventoryItem>,
    ) -> Result<Vec<InventoryItem>, StoreError> {
        if items.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<Uuid> = items.iter().map(|_| *InventoryId::new().as_uuid()).collect();
        let barcodes: Vec<String> = items.iter().map(|i| i.key.barcode.clone()).collect();
        let controls: Vec<String> = items.iter().map(|i| i.key.control_number.clone()).collect();
        let descriptions: Vec<String> = items.iter().map(|i| i.description.clone()).collect();
        let containers: Vec<Uuid> = items.iter().map(|i| *i.container_id.as_uuid()).collect();

        // Rows created concurrently by another encode are kept as they are.
        sqlx::query(
            r#"
            INSERT INTO inventories (id, barcode, control_number, description, container_id, status)
            SELECT n.id, n.barcode, n.control_number, n.description, n.container_id, 'SOLD'
            FROM UNNEST($1::uuid[], $2::text[], $3::text[], $4::text[], $5::uuid[])
                AS n (id, barcode, control_number, description, container_id)
            ON CONFLICT (barcode, control_number) DO NOTHING
            "#,
        )
        .bind(ids)
        .bind(barcodes)
        .bind(controls)
        .bind(descriptions)
        .bind(containers)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_inventories", e))?;

        let keys: Vec<InventoryKey> = items.into_iter().map(|i| i.key).collect();
        let mut found = self.find_inventories(&keys).await?;
        keys.iter()
            .map(|key| {
                found.remove(key).ok_or_else(|| {
                    StoreError::Backend(format!(
                        "inventory {}/{} missing after insert",
                        key.barcode, key.control_number
                    ))
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(auction_id = %auction_id), err)]
    async fn encoded_pairs(
        &self,
        auction_id: AuctionId,
    ) -> Result<HashSet<(AuctionBidderId, InventoryId)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT auction_bidder_id, inventory_id
            FROM auctions_inventories
            WHERE auction_id = $1 AND status <> 'CANCELLED'
            "#,
        )
        .bind(auction_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("encoded_pairs", e))?;

        rows.iter()
            .map(|row| {
                let ab: Uuid = row.try_get("auction_bidder_id")?;
                let inv: Uuid = row.try_get("inventory_id")?;
                Ok((AuctionBidderId::from_uuid(ab), InventoryId::from_uuid(inv)))
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(|e| decode_error("auction inventory", e))
    }

    #[instrument(
        skip(self, rows),
        fields(auction_id = %auction_id, row_count = rows.len(), inserted = field::Empty),
        err
    )]
    async fn commit_sales(
        &self,
        auction_id: AuctionId,
        rows: Vec<NewSaleRecord>,
    ) -> Result<Vec<SaleInsert>, StoreError> {
        if rows.is_empty() {
            return Ok(vec![]);
        }

        let mut tx = self.begin().await?;

        let mut account_ids: Vec<Uuid> = rows.iter().map(|r| *r.auction_bidder_id.as_uuid()).collect();
        account_ids.sort();
        account_ids.dedup();
        let mut accounts = lock_accounts(&mut tx, &account_ids).await?;
        if let Some(missing) = rows.iter().find(|r| {
            accounts
                .get(&r.auction_bidder_id)
                .is_none_or(|a| a.auction_id != auction_id)
        }) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound(format!(
                "auction bidder {}",
                missing.auction_bidder_id
            )));
        }

        let now = Utc::now();
        let mut results = Vec::with_capacity(rows.len());
        let mut accrued: HashMap<AuctionBidderId, Vec<Decimal>> = HashMap::new();

        for row in rows {
            let record = row.into_record(AuctionInventoryId::new(), now);
            let inserted = sqlx::query(
                r#"
                INSERT INTO auctions_inventories (
                    id, auction_id, auction_bidder_id, inventory_id,
                    quantity, price, manifest_number, status, payment_id, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL, $9)
                ON CONFLICT (auction_id, auction_bidder_id, inventory_id)
                    WHERE status <> 'CANCELLED'
                    DO NOTHING
                RETURNING id
                "#,
            )
            .bind(record.id.as_uuid())
            .bind(record.auction_id.as_uuid())
            .bind(record.auction_bidder_id.as_uuid())
            .bind(record.inventory_id.as_uuid())
            .bind(&record.quantity)
            .bind(record.price)
            .bind(&record.manifest_number)
            .bind(record.status.as_str())
            .bind(record.created_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_sale", e))?;

            if inserted.is_some() {
                accrued
                    .entry(record.auction_bidder_id)
                    .or_default()
                    .push(record.price);
                results.push(SaleInsert::Inserted(record));
            } else {
                results.push(SaleInsert::AlreadyEncoded);
            }
        }

        for (account_id, prices) in accrued {
            let Some(current) = accounts.remove(&account_id) else {
                continue;
            };
            let next = match current.accrue(prices) {
                Ok(next) => next,
                Err(e) => {
                    tx.rollback()
                        .await
                        .map_err(|e| map_sqlx_error("rollback", e))?;
                    return Err(StoreError::Rejected(e));
                }
            };
            write_account(&mut tx, &next, current.version).await?;
        }

        let sold: Vec<Uuid> = results
            .iter()
            .filter_map(|r| match r {
                SaleInsert::Inserted(record) => Some(*record.inventory_id.as_uuid()),
                SaleInsert::AlreadyEncoded => None,
            })
            .collect();
        sqlx::query("UPDATE inventories SET status = 'SOLD' WHERE id = ANY($1)")
            .bind(sold)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("mark_sold", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let inserted = results
            .iter()
            .filter(|r| matches!(r, SaleInsert::Inserted(_)))
            .count();
        Span::current().record("inserted", inserted);
        Ok(results)
    }

    #[instrument(skip(self), fields(auction_id = %auction_id, rows = field::Empty), err)]
    async fn monitoring(&self, auction_id: AuctionId) -> Result<Vec<MonitoringRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                ai.id, ai.auction_bidder_id, ai.inventory_id,
                i.barcode, i.control_number, i.description,
                b.id AS bidder_id, b.bidder_number, b.first_name, b.last_name,
                ai.quantity, ai.price, ai.manifest_number, ai.status
            FROM auctions_inventories ai
            JOIN inventories i ON i.id = ai.inventory_id
            JOIN auction_bidders ab ON ab.id = ai.auction_bidder_id
            JOIN bidders b ON b.id = ab.bidder_id
            WHERE ai.auction_id = $1 AND ai.status <> 'CANCELLED'
            ORDER BY ai.created_at, ai.id
            "#,
        )
        .bind(auction_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("monitoring", e))?;

        let out = rows
            .iter()
            .map(decode_monitoring_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| decode_error("monitoring", e))?;
        Span::current().record("rows", out.len());
        Ok(out)
    }

    #[instrument(
        skip(self, registration),
        fields(
            auction_id = %registration.account.auction_id,
            bidder_id = %registration.account.bidder_id
        ),
        err
    )]
    async fn register_bidder(&self, registration: &Registration) -> Result<(), StoreError> {
        let account = &registration.account;
        let mut tx = self.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO auction_bidders (
                id, auction_id, bidder_id, service_charge, registration_fee,
                balance, already_consumed, version, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(account.auction_id.as_uuid())
        .bind(account.bidder_id.as_uuid())
        .bind(account.service_charge)
        .bind(account.registration_fee)
        .bind(account.balance)
        .bind(account.already_consumed)
        .bind(account.version as i64)
        .bind(account.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!(
                    "bidder {} is already registered in auction {}",
                    account.bidder_id, account.auction_id
                ))
            } else {
                map_sqlx_error("insert_auction_bidder", e)
            }
        })?;

        insert_payment(&mut tx, &registration.payment).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(auction_bidder_id = %id), err)]
    async fn get_auction_bidder(
        &self,
        id: AuctionBidderId,
    ) -> Result<Option<AuctionBidder>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM auction_bidders ab WHERE ab.id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_auction_bidder", e))?;

        row.as_ref()
            .map(decode_account)
            .transpose()
            .map_err(|e| decode_error("auction bidder", e))
    }

    #[instrument(skip(self), fields(auction_id = %auction_id, bidder_id = %bidder_id), err)]
    async fn find_auction_bidder(
        &self,
        auction_id: AuctionId,
        bidder_id: BidderId,
    ) -> Result<Option<AuctionBidder>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM auction_bidders ab \
             WHERE ab.auction_id = $1 AND ab.bidder_id = $2"
        ))
        .bind(auction_id.as_uuid())
        .bind(bidder_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_auction_bidder", e))?;

        row.as_ref()
            .map(decode_account)
            .transpose()
            .map_err(|e| decode_error("auction bidder", e))
    }

    #[instrument(skip(self), fields(auction_id = %auction_id), err)]
    async fn list_auction_bidders(
        &self,
        auction_id: AuctionId,
    ) -> Result<Vec<RegisteredBidder>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}, b.bidder_number, b.first_name, b.last_name
            FROM auction_bidders ab
            JOIN bidders b ON b.id = ab.bidder_id
            WHERE ab.auction_id = $1
            ORDER BY b.bidder_number
            "#
        ))
        .bind(auction_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_auction_bidders", e))?;

        rows.iter()
            .map(|row| {
                let account = decode_account(row)?;
                let bidder = Bidder {
                    id: account.bidder_id,
                    bidder_number: decode_bidder_number(row)?,
                    first_name: row.try_get("first_name")?,
                    last_name: row.try_get("last_name")?,
                };
                Ok(RegisteredBidder {
                    account,
                    bidder_number: bidder.bidder_number.to_string(),
                    bidder_name: bidder.full_name(),
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(|e| decode_error("auction bidder", e))
    }

    #[instrument(skip(self), fields(auction_bidder_id = %id), err)]
    async fn last_receipt_number(&self, id: AuctionBidderId) -> Result<Option<u32>, StoreError> {
        let last: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(receipt_number) FROM payments WHERE auction_bidder_id = $1",
        )
        .bind(id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("last_receipt_number", e))?;
        Ok(last.map(|n| n as u32))
    }

    #[instrument(skip(self), fields(auction_bidder_id = %id), err)]
    async fn payments(&self, id: AuctionBidderId) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, auction_bidder_id, purpose, receipt_number, amount, method, created_at
            FROM payments
            WHERE auction_bidder_id = $1
            ORDER BY receipt_number
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("payments", e))?;

        rows.iter()
            .map(decode_payment)
            .collect::<Result<_, _>>()
            .map_err(|e| decode_error("payment", e))
    }

    #[instrument(skip(self, ids), fields(requested = ids.len()), err)]
    async fn get_sales(&self, ids: &[AuctionInventoryId]) -> Result<Vec<SaleRecord>, StoreError> {
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {SALE_COLUMNS} FROM auctions_inventories ai WHERE ai.id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_sales", e))?;

        rows.iter()
            .map(decode_sale)
            .collect::<Result<_, _>>()
            .map_err(|e| decode_error("auction inventory", e))
    }

    #[instrument(
        skip(self, inventory_ids),
        fields(auction_bidder_id = %auction_bidder_id, requested = inventory_ids.len()),
        err
    )]
    async fn unpaid_sales_for_items(
        &self,
        auction_bidder_id: AuctionBidderId,
        inventory_ids: &[InventoryId],
    ) -> Result<Vec<SaleRecord>, StoreError> {
        let ids: Vec<Uuid> = inventory_ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SALE_COLUMNS}
            FROM auctions_inventories ai
            WHERE ai.auction_bidder_id = $1
              AND ai.inventory_id = ANY($2)
              AND ai.status = 'UNPAID'
            ORDER BY ai.created_at, ai.id
            "#
        ))
        .bind(auction_bidder_id.as_uuid())
        .bind(ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("unpaid_sales_for_items", e))?;

        rows.iter()
            .map(decode_sale)
            .collect::<Result<_, _>>()
            .map_err(|e| decode_error("auction inventory", e))
    }

    #[instrument(
        skip(self, settlement),
        fields(
            auction_bidder_id = %settlement.account.id,
            receipt_number = settlement.payment.receipt_number,
            expected_version = ?settlement.expected_version
        ),
        err
    )]
    async fn commit_settlement(&self, settlement: &Settlement) -> Result<(), StoreError> {
        let account_id = settlement.account.id;
        let mut tx = self.begin().await?;

        let locked = lock_accounts(&mut tx, &[*account_id.as_uuid()]).await?;
        let Some(current) = locked.get(&account_id) else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound(format!("auction bidder {account_id}")));
        };
        if let Err(e) = check_version(settlement.expected_version, current.version) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(e);
        }

        insert_payment(&mut tx, &settlement.payment).await?;

        let ids: Vec<Uuid> = settlement.paid_rows.iter().map(|r| *r.id.as_uuid()).collect();
        let updated = sqlx::query(
            r#"
            UPDATE auctions_inventories
            SET status = 'PAID', payment_id = $1
            WHERE id = ANY($2) AND auction_bidder_id = $3 AND status = 'UNPAID'
            "#,
        )
        .bind(settlement.payment.id.as_uuid())
        .bind(ids)
        .bind(account_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("mark_paid", e))?;

        if updated.rows_affected() != settlement.paid_rows.len() as u64 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Conflict(
                "a selected item was settled or cancelled concurrently".to_string(),
            ));
        }

        write_account(&mut tx, &settlement.account, current.version).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(
        skip(self, cancellation),
        fields(auction_inventory_id = %cancellation.sale.id),
        err
    )]
    async fn commit_cancellation(&self, cancellation: &Cancellation) -> Result<(), StoreError> {
        let sale_id = cancellation.sale.id;
        let history = &cancellation.history;
        let mut tx = self.begin().await?;

        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM auctions_inventories WHERE id = $1 FOR UPDATE",
        )
        .bind(sale_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_sale", e))?;

        let Some(status) = status else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound(format!("auction inventory {sale_id}")));
        };
        if status != history.previous_auction_status.as_str() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Conflict(format!(
                "auction inventory {sale_id} changed status to {status} while being cancelled"
            )));
        }

        sqlx::query("UPDATE auctions_inventories SET status = $1 WHERE id = $2")
            .bind(cancellation.sale.status.as_str())
            .bind(sale_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("cancel_sale", e))?;

        sqlx::query("UPDATE inventories SET status = $1 WHERE id = $2")
            .bind(cancellation.inventory_status.as_str())
            .bind(cancellation.sale.inventory_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("revert_inventory", e))?;

        sqlx::query(
            r#"
            INSERT INTO inventory_histories (
                id, auction_inventory_id, inventory_id, previous_inventory_status,
                previous_auction_status, auction_status, remarks, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(history.id.as_uuid())
        .bind(history.auction_inventory_id.as_uuid())
        .bind(history.inventory_id.as_uuid())
        .bind(history.previous_inventory_status.as_str())
        .bind(history.previous_auction_status.as_str())
        .bind(history.auction_status.as_str())
        .bind(&history.remarks)
        .bind(history.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_history", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(auction_inventory_id = %auction_inventory_id), err)]
    async fn inventory_history(
        &self,
        auction_inventory_id: AuctionInventoryId,
    ) -> Result<Vec<InventoryHistory>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, auction_inventory_id, inventory_id, previous_inventory_status,
                   previous_auction_status, auction_status, remarks, created_at
            FROM inventory_histories
            WHERE auction_inventory_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(auction_inventory_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("inventory_history", e))?;

        rows.iter()
            .map(decode_history)
            .collect::<Result<_, _>>()
            .map_err(|e| decode_error("inventory history", e))
    }
}

#[async_trait]
impl RegistryStore for PostgresAuctionStore {
    #[instrument(skip(self), err)]
    async fn create_auction(&self) -> Result<Auction, StoreError> {
        let auction = Auction {
            id: AuctionId::new(),
            created_at: Utc::now(),
            deleted_at: None,
        };
        sqlx::query("INSERT INTO auctions (id, created_at) VALUES ($1, $2)")
            .bind(auction.id.as_uuid())
            .bind(auction.created_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_auction", e))?;
        Ok(auction)
    }

    #[instrument(skip(self), fields(auction_id = %id), err)]
    async fn soft_delete_auction(&self, id: AuctionId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE auctions SET deleted_at = COALESCE(deleted_at, NOW()) WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("soft_delete_auction", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("auction {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, first_name, last_name), fields(bidder_number = %bidder_number), err)]
    async fn create_bidder(
        &self,
        bidder_number: BidderNumber,
        first_name: &str,
        last_name: &str,
    ) -> Result<Bidder, StoreError> {
        let bidder = Bidder {
            id: BidderId::new(),
            bidder_number,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        };
        let number = db_int(bidder_number.value(), "bidder number", DomainError::validation)?;
        sqlx::query(
            "INSERT INTO bidders (id, bidder_number, first_name, last_name) VALUES ($1, $2, $3, $4)",
        )
        .bind(bidder.id.as_uuid())
        .bind(number)
        .bind(&bidder.first_name)
        .bind(&bidder.last_name)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("bidder number {bidder_number} is already taken"))
            } else {
                map_sqlx_error("create_bidder", e)
            }
        })?;
        Ok(bidder)
    }

    #[instrument(skip(self), err)]
    async fn create_container(&self, barcode: &str) -> Result<Container, StoreError> {
        let container = Container {
            id: ContainerId::new(),
            barcode: barcode.trim().to_uppercase(),
        };
        sqlx::query("INSERT INTO containers (id, barcode) VALUES ($1, $2)")
            .bind(container.id.as_uuid())
            .bind(&container.barcode)
            .execute(&*self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("container {} already exists", container.barcode))
                } else {
                    map_sqlx_error("create_container", e)
                }
            })?;
        Ok(container)
    }
}

/// Lock accounts for the rest of the transaction. `ids` must be sorted so
/// concurrent writers acquire row locks in the same order.
async fn lock_accounts(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[Uuid],
) -> Result<HashMap<AuctionBidderId, AuctionBidder>, StoreError> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {ACCOUNT_COLUMNS}
        FROM auction_bidders ab
        WHERE ab.id = ANY($1)
        ORDER BY ab.id
        FOR UPDATE
        "#
    ))
    .bind(ids.to_vec())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_accounts", e))?;

    let mut out = HashMap::with_capacity(rows.len());
    for row in &rows {
        let account = decode_account(row).map_err(|e| decode_error("auction bidder", e))?;
        out.insert(account.id, account);
    }
    Ok(out)
}

async fn write_account(
    tx: &mut Transaction<'_, Postgres>,
    account: &AuctionBidder,
    locked_version: u64,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE auction_bidders
        SET balance = $1, already_consumed = $2, version = $3
        WHERE id = $4 AND version = $5
        "#,
    )
    .bind(account.balance)
    .bind(account.already_consumed)
    .bind(account.version as i64)
    .bind(account.id.as_uuid())
    .bind(locked_version as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_auction_bidder", e))?;

    if result.rows_affected() != 1 {
        return Err(StoreError::Conflict(format!(
            "ledger was modified concurrently (auction bidder {})",
            account.id
        )));
    }
    Ok(())
}

async fn insert_payment(
    tx: &mut Transaction<'_, Postgres>,
    payment: &Payment,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO payments (
            id, auction_bidder_id, purpose, receipt_number, amount, method, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(payment.id.as_uuid())
    .bind(payment.auction_bidder_id.as_uuid())
    .bind(payment.purpose.as_str())
    .bind(db_int(payment.receipt_number, "receipt number", DomainError::invariant)?)
    .bind(payment.amount)
    .bind(payment.method.as_str())
    .bind(payment.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::Conflict(format!(
                "receipt {} already issued for auction bidder {}",
                payment.receipt_number, payment.auction_bidder_id
            ))
        } else {
            map_sqlx_error("insert_payment", e)
        }
    })?;
    Ok(())
}

// Row decoding

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: core::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn decode_auction(row: &PgRow) -> Result<Auction, sqlx::Error> {
    Ok(Auction {
        id: AuctionId::from_uuid(row.try_get("id")?),
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get::<Option<DateTime<Utc>>, _>("deleted_at")?,
    })
}

fn decode_bidder_number(row: &PgRow) -> Result<BidderNumber, sqlx::Error> {
    let raw: i32 = row.try_get("bidder_number")?;
    BidderNumber::new(raw as u32).map_err(|e| sqlx::Error::ColumnDecode {
        index: "bidder_number".to_string(),
        source: Box::new(e),
    })
}

fn decode_bidder(row: &PgRow) -> Result<Bidder, sqlx::Error> {
    Ok(Bidder {
        id: BidderId::from_uuid(row.try_get("id")?),
        bidder_number: decode_bidder_number(row)?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
    })
}

fn decode_account(row: &PgRow) -> Result<AuctionBidder, sqlx::Error> {
    let version: i64 = row.try_get("version")?;
    Ok(AuctionBidder {
        id: AuctionBidderId::from_uuid(row.try_get("id")?),
        auction_id: AuctionId::from_uuid(row.try_get("auction_id")?),
        bidder_id: BidderId::from_uuid(row.try_get("bidder_id")?),
        service_charge: row.try_get("service_charge")?,
        registration_fee: row.try_get("registration_fee")?,
        balance: row.try_get("balance")?,
        already_consumed: row.try_get("already_consumed")?,
        version: version as u64,
        created_at: row.try_get("created_at")?,
    })
}

fn decode_inventory(row: &PgRow) -> Result<InventoryItem, sqlx::Error> {
    Ok(InventoryItem {
        id: InventoryId::from_uuid(row.try_get("id")?),
        barcode: row.try_get("barcode")?,
        control_number: row.try_get("control_number")?,
        description: row.try_get("description")?,
        container_id: ContainerId::from_uuid(row.try_get("container_id")?),
        status: parse_column(row, "status")?,
    })
}

fn decode_sale(row: &PgRow) -> Result<SaleRecord, sqlx::Error> {
    let payment_id: Option<Uuid> = row.try_get("payment_id")?;
    Ok(SaleRecord {
        id: AuctionInventoryId::from_uuid(row.try_get("id")?),
        auction_id: AuctionId::from_uuid(row.try_get("auction_id")?),
        auction_bidder_id: AuctionBidderId::from_uuid(row.try_get("auction_bidder_id")?),
        inventory_id: InventoryId::from_uuid(row.try_get("inventory_id")?),
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        manifest_number: row.try_get("manifest_number")?,
        status: parse_column(row, "status")?,
        payment_id: payment_id.map(PaymentId::from_uuid),
        created_at: row.try_get("created_at")?,
    })
}

fn decode_payment(row: &PgRow) -> Result<Payment, sqlx::Error> {
    let receipt: i32 = row.try_get("receipt_number")?;
    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get("id")?),
        auction_bidder_id: AuctionBidderId::from_uuid(row.try_get("auction_bidder_id")?),
        purpose: parse_column(row, "purpose")?,
        receipt_number: receipt as u32,
        amount: row.try_get("amount")?,
        method: parse_column(row, "method")?,
        created_at: row.try_get("created_at")?,
    })
}

fn decode_history(row: &PgRow) -> Result<InventoryHistory, sqlx::Error> {
    Ok(InventoryHistory {
        id: InventoryHistoryId::from_uuid(row.try_get("id")?),
        auction_inventory_id: AuctionInventoryId::from_uuid(row.try_get("auction_inventory_id")?),
        inventory_id: InventoryId::from_uuid(row.try_get("inventory_id")?),
        previous_inventory_status: parse_column(row, "previous_inventory_status")?,
        previous_auction_status: parse_column(row, "previous_auction_status")?,
        auction_status: parse_column(row, "auction_status")?,
        remarks: row.try_get("remarks")?,
        created_at: row.try_get("created_at")?,
    })
}

fn decode_monitoring_row(row: &PgRow) -> Result<MonitoringRow, sqlx::Error> {
    let bidder = Bidder {
        id: BidderId::from_uuid(row.try_get("bidder_id")?),
        bidder_number: decode_bidder_number(row)?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
    };
    let status: SaleStatus = parse_column(row, "status")?;
    Ok(MonitoringRow {
        auction_inventory_id: AuctionInventoryId::from_uuid(row.try_get("id")?),
        auction_bidder_id: AuctionBidderId::from_uuid(row.try_get("auction_bidder_id")?),
        inventory_id: InventoryId::from_uuid(row.try_get("inventory_id")?),
        barcode: row.try_get("barcode")?,
        control_number: row.try_get("control_number")?,
        description: row.try_get("description")?,
        bidder_number: bidder.bidder_number.to_string(),
        bidder_name: bidder.full_name(),
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        manifest_number: row.try_get("manifest_number")?,
        status,
    })
}

fn decode_error(what: &str, err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode {what} row: {err}"))
}

/// Narrow a domain integer to the `INTEGER` column it is stored in.
fn db_int(
    value: u32,
    what: &str,
    reject: fn(String) -> DomainError,
) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Rejected(reject(format!("{what} {value} is out of range"))))
}

/// Map SQLx errors to `StoreError`.
///
/// Business outcomes carry a fixed message; the driver's text stays in the logs.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("23505") => {
                warn!(operation, error = %db_err.message(), "unique constraint violated");
                StoreError::Conflict(format!("duplicate record in {operation}"))
            }
            Some("23503") => {
                warn!(operation, error = %db_err.message(), "foreign key violated");
                StoreError::NotFound(format!("a referenced record no longer exists ({operation})"))
            }
            _ => StoreError::Backend(format!(
                "database error in {}: {}",
                operation,
                db_err.message()
            )),
        },
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("unexpected row not found in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_are_backend_errors() {
        assert!(matches!(
            map_sqlx_error("monitoring", sqlx::Error::PoolClosed),
            StoreError::Backend(msg) if msg.contains("monitoring")
        ));
        assert!(matches!(
            map_sqlx_error("get_sales", sqlx::Error::RowNotFound),
            StoreError::NotFound(_)
        ));
        assert!(!is_unique_violation(&sqlx::Error::PoolClosed));
    }

    #[test]
    fn out_of_range_numbers_are_rejected_before_the_driver() {
        assert_eq!(db_int(42, "bidder number", DomainError::validation), Ok(42));
        assert!(matches!(
            db_int(u32::MAX, "bidder number", DomainError::validation),
            Err(StoreError::Rejected(DomainError::Validation(msg))) if msg.contains("4294967295")
        ));
    }

    #[test]
    fn schema_guards_live_sales_and_receipts() {
        assert!(SCHEMA.contains("auctions_inventories_live_sale"));
        assert!(SCHEMA.contains("WHERE status <> 'CANCELLED'"));
        assert!(SCHEMA.contains("UNIQUE (auction_bidder_id, receipt_number)"));
        assert!(SCHEMA.contains("UNIQUE (auction_id, bidder_id)"));
    }
}
