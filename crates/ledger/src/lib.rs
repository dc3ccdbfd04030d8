//! Bidder ledger domain module.
//!
//! A bidder's registration in an auction is a ledger account: it is opened with
//! the prepaid registration fee, accrues the price (plus service charge) of every
//! item attributed to the bidder, and is paid down by receipts. This crate holds
//! the deterministic decision logic only; persistence lives in `gavel-infra`.

pub mod account;
pub mod history;
pub mod payment;
pub mod sale;
pub mod settlement;

pub use account::{AuctionBidder, RegisterBidder, Registration};
pub use history::{Cancellation, InventoryHistory};
pub use payment::{Payment, PaymentMethod, PaymentPurpose, next_receipt_number};
pub use sale::{NewSaleRecord, SaleRecord, SaleStatus};
pub use settlement::{DirectPayment, PullOut, Settlement};
