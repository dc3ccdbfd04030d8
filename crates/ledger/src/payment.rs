use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gavel_core::{AuctionBidderId, DomainError, PaymentId};

/// Why money changed hands.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentPurpose {
    Registration,
    PullOut,
}

impl PaymentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPurpose::Registration => "REGISTRATION",
            PaymentPurpose::PullOut => "PULL_OUT",
        }
    }
}

impl FromStr for PaymentPurpose {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGISTRATION" => Ok(PaymentPurpose::Registration),
            "PULL_OUT" => Ok(PaymentPurpose::PullOut),
            other => Err(DomainError::validation(format!("unknown payment purpose: {other}"))),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Card,
    BankTransfer,
    Cheque,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Card => "CARD",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::Cheque => "CHEQUE",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CASH" => Ok(PaymentMethod::Cash),
            "CARD" => Ok(PaymentMethod::Card),
            "BANK_TRANSFER" => Ok(PaymentMethod::BankTransfer),
            "CHEQUE" => Ok(PaymentMethod::Cheque),
            other => Err(DomainError::validation(format!("unknown payment method: {other}"))),
        }
    }
}

/// Immutable receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub auction_bidder_id: AuctionBidderId,
    pub purpose: PaymentPurpose,
    /// 0 for the registration receipt, then strictly increasing by one.
    pub receipt_number: u32,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub created_at: DateTime<Utc>,
}

/// Next receipt number given the highest one issued so far for the account.
pub fn next_receipt_number(last: Option<u32>) -> u32 {
    last.map_or(1, |n| n + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipts_continue_after_registration() {
        assert_eq!(next_receipt_number(Some(0)), 1);
        assert_eq!(next_receipt_number(Some(41)), 42);
        assert_eq!(next_receipt_number(None), 1);
    }

    #[test]
    fn storage_strings_parse_back() {
        for p in [PaymentPurpose::Registration, PaymentPurpose::PullOut] {
            assert_eq!(p.as_str().parse::<PaymentPurpose>().unwrap(), p);
        }
        for m in [
            PaymentMethod::Cash,
            PaymentMethod::Card,
            PaymentMethod::BankTransfer,
            PaymentMethod::Cheque,
        ] {
            assert_eq!(m.as_str().parse::<PaymentMethod>().unwrap(), m);
        }
    }
}
