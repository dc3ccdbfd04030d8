//! Settlement decisions: pull-outs and direct payments.
//!
//! Both paths share the same discipline: the registration fee is consumed at most
//! once, the receipt number is one past the highest issued, every selected row
//! must still be unpaid, and the account is debited by the payment amount.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use gavel_core::{DomainError, DomainResult, ExpectedVersion, PaymentId};

use crate::account::{AuctionBidder, overflow};
use crate::payment::{Payment, PaymentMethod, PaymentPurpose, next_receipt_number};
use crate::sale::{SaleRecord, SaleStatus};

/// Command: settle a chosen set of unpaid rows at their computed price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOut {
    pub rows: Vec<SaleRecord>,
    /// Highest receipt number issued to the account so far.
    pub last_receipt: Option<u32>,
    pub method: PaymentMethod,
    pub occurred_at: DateTime<Utc>,
}

/// Command: settle rows with an amount supplied by the cashier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectPayment {
    pub amount: Decimal,
    pub rows: Vec<SaleRecord>,
    pub last_receipt: Option<u32>,
    pub method: PaymentMethod,
    pub occurred_at: DateTime<Utc>,
}

/// Everything a store must persist atomically for one settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settlement {
    /// Account state after the debit.
    pub account: AuctionBidder,
    /// Version the account must still be at when the write lands.
    #[serde(skip)]
    pub expected_version: ExpectedVersion,
    pub payment: Payment,
    /// Selected rows, now `Paid` and pointing at `payment`.
    pub paid_rows: Vec<SaleRecord>,
    /// Whether this settlement netted out the registration fee.
    pub fee_consumed: bool,
}

impl AuctionBidder {
    pub fn settle_pull_out(&self, cmd: &PullOut) -> DomainResult<Settlement> {
        self.ensure_settleable(&cmd.rows)?;

        let mut total = Decimal::ZERO;
        for row in &cmd.rows {
            total = total
                .checked_add(row.price)
                .ok_or_else(|| overflow("pull-out total", row.price))?;
        }
        let mut amount = total
            .checked_add(self.service_charge_on(total)?)
            .ok_or_else(|| overflow("pull-out amount", total))?;
        let fee_consumed = !self.already_consumed;
        if fee_consumed {
            amount -= self.registration_fee;
        }

        self.settle(amount, fee_consumed, &cmd.rows, cmd.last_receipt, cmd.method, cmd.occurred_at)
    }

    pub fn settle_direct(&self, cmd: &DirectPayment) -> DomainResult<Settlement> {
        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        self.ensure_settleable(&cmd.rows)?;

        self.settle(
            cmd.amount,
            !self.already_consumed,
            &cmd.rows,
            cmd.last_receipt,
            cmd.method,
            cmd.occurred_at,
        )
    }

    fn ensure_settleable(&self, rows: &[SaleRecord]) -> DomainResult<()> {
        if rows.is_empty() {
            return Err(DomainError::validation("select at least one item to settle"));
        }
        for row in rows {
            if row.auction_bidder_id != self.id || row.auction_id != self.auction_id {
                return Err(DomainError::not_found(format!(
                    "auction inventory {} for auction bidder {}",
                    row.id, self.id
                )));
            }
            if row.status != SaleStatus::Unpaid {
                return Err(DomainError::conflict(format!(
                    "auction inventory {} is {} and cannot be paid",
                    row.id, row.status
                )));
            }
        }
        let mut ids: Vec<_> = rows.iter().map(|r| r.id).collect();
        ids.sort();
        ids.dedup();
        if ids.len() != rows.len() {
            return Err(DomainError::validation("an item was selected more than once"));
        }
        Ok(())
    }

    fn settle(
        &self,
        amount: Decimal,
        fee_consumed: bool,
        rows: &[SaleRecord],
        last_receipt: Option<u32>,
        method: PaymentMethod,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Settlement> {
        let payment = Payment {
            id: PaymentId::new(),
            auction_bidder_id: self.id,
            purpose: PaymentPurpose::PullOut,
            receipt_number: next_receipt_number(last_receipt),
            amount,
            method,
            created_at: occurred_at,
        };

        let paid_rows = rows
            .iter()
            .map(|r| r.mark_paid(payment.id))
            .collect::<DomainResult<Vec<_>>>()?;

        let balance = self
            .balance
            .checked_sub(amount)
            .ok_or_else(|| overflow("balance", amount))?;
        let account = AuctionBidder {
            balance,
            already_consumed: self.already_consumed || fee_consumed,
            version: self.version + 1,
            ..self.clone()
        };

        Ok(Settlement {
            account,
            expected_version: self.expected_version(),
            payment,
            paid_rows,
            fee_consumed,
        })
    }
}
