use core::str::FromStr;

use serde::{Deserialize, Serialize};

use gavel_core::{BidderId, DomainError};

/// Bidder number as printed on paddles and manifests.
///
/// Stored as an integer; leading zeros on input are insignificant and the
/// display form is zero-padded to four digits (`5` -> `0005`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BidderNumber(u32);

impl BidderNumber {
    pub fn new(value: u32) -> Result<Self, DomainError> {
        if value == 0 {
            return Err(DomainError::validation("bidder number must be positive"));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for BidderNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

impl FromStr for BidderNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation(format!(
                "bidder number must be a positive number: {s}"
            )));
        }
        let value: u32 = s.parse().map_err(|_| {
            DomainError::validation(format!("bidder number must be a positive number: {s}"))
        })?;
        Self::new(value)
    }
}

/// Entry of the bidder directory (maintained outside the core).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bidder {
    pub id: BidderId,
    pub bidder_number: BidderNumber,
    pub first_name: String,
    pub last_name: String,
}

impl Bidder {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}
