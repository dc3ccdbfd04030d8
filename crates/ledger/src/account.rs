use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gavel_core::{
    AuctionBidderId, AuctionId, BidderId, DomainError, DomainResult, ExpectedVersion, PaymentId,
};

use crate::payment::{Payment, PaymentMethod, PaymentPurpose};

/// A bidder's registration in one auction, carrying the running balance.
///
/// A positive balance is money the bidder owes; the prepaid registration fee
/// opens the account below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionBidder {
    pub id: AuctionBidderId,
    pub auction_id: AuctionId,
    pub bidder_id: BidderId,
    /// Percentage added on top of every purchase.
    pub service_charge: Decimal,
    pub registration_fee: Decimal,
    pub balance: Decimal,
    /// Whether the registration fee has already been netted out of a settlement.
    pub already_consumed: bool,
    /// Bumped on every balance mutation.
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

/// Command: register a bidder for an auction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBidder {
    pub auction_id: AuctionId,
    pub bidder_id: BidderId,
    pub service_charge: Decimal,
    pub registration_fee: Decimal,
    pub method: PaymentMethod,
    pub occurred_at: DateTime<Utc>,
}

/// Outcome of a registration: the new account and its receipt #0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub account: AuctionBidder,
    pub payment: Payment,
}

impl AuctionBidder {
    pub fn register(cmd: &RegisterBidder) -> DomainResult<Registration> {
        if cmd.service_charge.is_sign_negative() || cmd.service_charge > Decimal::ONE_HUNDRED {
            return Err(DomainError::validation(
                "service charge must be a percentage between 0 and 100",
            ));
        }
        if cmd.registration_fee.is_sign_negative() {
            return Err(DomainError::validation("registration fee cannot be negative"));
        }

        let account = AuctionBidder {
            id: AuctionBidderId::new(),
            auction_id: cmd.auction_id,
            bidder_id: cmd.bidder_id,
            service_charge: cmd.service_charge,
            registration_fee: cmd.registration_fee,
            balance: -cmd.registration_fee,
            already_consumed: false,
            version: 1,
            created_at: cmd.occurred_at,
        };
        let payment = Payment {
            id: PaymentId::new(),
            auction_bidder_id: account.id,
            purpose: PaymentPurpose::Registration,
            receipt_number: 0,
            amount: cmd.registration_fee,
            method: cmd.method,
            created_at: cmd.occurred_at,
        };

        Ok(Registration { account, payment })
    }

    /// Service charge owed on `price`.
    pub fn service_charge_on(&self, price: Decimal) -> DomainResult<Decimal> {
        price
            .checked_mul(self.service_charge)
            .map(|v| v / Decimal::ONE_HUNDRED)
            .ok_or_else(|| overflow("service charge", price))
    }

    /// What the bidder owes for an item sold at `price`.
    pub fn charge_for(&self, price: Decimal) -> DomainResult<Decimal> {
        price
            .checked_add(self.service_charge_on(price)?)
            .ok_or_else(|| overflow("charge", price))
    }

    /// Attribute purchases to the account.
    pub fn accrue(
        &self,
        prices: impl IntoIterator<Item = Decimal>,
    ) -> DomainResult<AuctionBidder> {
        let mut balance = self.balance;
        for price in prices {
            balance = balance
                .checked_add(self.charge_for(price)?)
                .ok_or_else(|| overflow("balance", price))?;
        }
        Ok(AuctionBidder {
            balance,
            version: self.version + 1,
            ..self.clone()
        })
    }

    /// Concurrency token for writes decided from this state.
    pub fn expected_version(&self) -> ExpectedVersion {
        ExpectedVersion::exact(self.version)
    }
}

pub(crate) fn overflow(what: &str, amount: Decimal) -> DomainError {
    DomainError::invariant(format!("{what} on {amount} is out of range"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn register(service_charge: Decimal, fee: Decimal) -> Registration {
        AuctionBidder::register(&RegisterBidder {
            auction_id: AuctionId::new(),
            bidder_id: BidderId::new(),
            service_charge,
            registration_fee: fee,
            method: PaymentMethod::Cash,
            occurred_at: Utc::now(),
        })
        .unwrap()
    }

    #[test]
    fn registration_opens_account_with_prepaid_fee() {
        let reg = register(dec!(10), dec!(100));
        assert_eq!(reg.account.balance, dec!(-100));
        assert!(!reg.account.already_consumed);
        assert_eq!(reg.payment.receipt_number, 0);
        assert_eq!(reg.payment.purpose, PaymentPurpose::Registration);
        assert_eq!(reg.payment.amount, dec!(100));
        assert_eq!(reg.payment.auction_bidder_id, reg.account.id);
    }

    #[test]
    fn out_of_range_terms_are_rejected() {
        let base = RegisterBidder {
            auction_id: AuctionId::new(),
            bidder_id: BidderId::new(),
            service_charge: dec!(101),
            registration_fee: dec!(0),
            method: PaymentMethod::Cash,
            occurred_at: Utc::now(),
        };
        assert!(matches!(
            AuctionBidder::register(&base),
            Err(DomainError::Validation(_))
        ));

        let negative_fee = RegisterBidder {
            service_charge: dec!(5),
            registration_fee: dec!(-1),
            ..base
        };
        assert!(AuctionBidder::register(&negative_fee).is_err());
    }

    #[test]
    fn accrual_adds_price_plus_service_charge() {
        let reg = register(dec!(10), dec!(100));
        let after = reg.account.accrue([dec!(1000), dec!(50)]).unwrap();
        assert_eq!(after.balance, dec!(-100) + dec!(1100) + dec!(55));
        assert_eq!(after.version, reg.account.version + 1);
    }

    #[test]
    fn accrual_overflow_is_an_error_not_a_panic() {
        let reg = register(dec!(10), dec!(0));
        let err = reg.account.accrue([Decimal::MAX]).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert!(reg.account.charge_for(Decimal::MAX).is_err());
        assert_eq!(reg.account.charge_for(dec!(200)).unwrap(), dec!(220));
    }
}
