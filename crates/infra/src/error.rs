//! Error surface of the application services.
//!
//! Domain errors and storage-level guards are folded into one enum so callers
//! (HTTP handlers, tests) map a single type. Only `Store` is an infrastructure
//! failure; every other variant is a deterministic business outcome.

use thiserror::Error;

use gavel_core::DomainError;

use crate::store::StoreError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Malformed or out-of-range input.
    #[error("{0}")]
    Validation(String),
    /// A domain invariant would be violated.
    #[error("{0}")]
    InvariantViolation(String),
    /// A referenced auction, bidder, account or sale record does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// Duplicate registration, already-settled rows, stale ledger version.
    #[error("{0}")]
    Conflict(String),
    /// The storage backend failed.
    #[error("storage failure in {operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ServiceError {
    /// Attach the failing operation to a store error.
    pub fn store(operation: &'static str) -> impl FnOnce(StoreError) -> ServiceError {
        move |err| match err {
            StoreError::Conflict(msg) => ServiceError::Conflict(msg),
            StoreError::NotFound(msg) => ServiceError::NotFound(msg),
            StoreError::Rejected(domain) => ServiceError::from(domain),
            source @ StoreError::Backend(_) => ServiceError::Store { operation, source },
        }
    }

    /// Whether the failure is an infrastructure fault rather than a business outcome.
    pub fn is_internal(&self) -> bool {
        matches!(self, ServiceError::Store { .. })
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => ServiceError::Validation(msg),
            DomainError::InvalidId(msg) => ServiceError::Validation(msg),
            DomainError::InvariantViolation(msg) => ServiceError::InvariantViolation(msg),
            DomainError::NotFound(what) => ServiceError::NotFound(what),
            DomainError::Conflict(msg) => ServiceError::Conflict(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_guards_become_business_outcomes() {
        let conflict = ServiceError::store("commit_settlement")(StoreError::Conflict(
            "ledger was modified concurrently".to_string(),
        ));
        assert_eq!(
            conflict,
            ServiceError::Conflict("ledger was modified concurrently".to_string())
        );
        assert!(!conflict.is_internal());

        let backend = ServiceError::store("monitoring")(StoreError::Backend("boom".to_string()));
        assert!(backend.is_internal());
        assert_eq!(
            backend.to_string(),
            "storage failure in monitoring: storage backend error: boom"
        );
    }

    #[test]
    fn rejected_writes_keep_their_domain_meaning() {
        let overflow = ServiceError::store("commit_sales")(StoreError::Rejected(
            DomainError::invariant("balance on 1 is out of range"),
        ));
        assert!(matches!(overflow, ServiceError::InvariantViolation(_)));
        assert!(!overflow.is_internal());

        let range = ServiceError::store("create_bidder")(StoreError::Rejected(
            DomainError::validation("bidder number is out of range"),
        ));
        assert!(matches!(range, ServiceError::Validation(_)));
    }

    #[test]
    fn domain_errors_keep_their_message() {
        let err: ServiceError = DomainError::not_found("auction bidder 7").into();
        assert_eq!(err.to_string(), "auction bidder 7 not found");
    }
}
