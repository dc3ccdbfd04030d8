use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::row::RawManifestRow;

/// Manifest column a validation rejection refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestField {
    Barcode,
    ControlNumber,
    BidderNumber,
    Price,
}

impl ManifestField {
    pub fn label(&self) -> &'static str {
        match self {
            ManifestField::Barcode => "barcode",
            ManifestField::ControlNumber => "control number",
            ManifestField::BidderNumber => "bidder number",
            ManifestField::Price => "price",
        }
    }
}

/// Closed set of reasons a manifest row can be turned away.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowErrorKind {
    /// Malformed or missing cell.
    Validation { field: ManifestField },
    /// The row points at a bidder or container the auction does not know.
    Referential,
    /// The row was already committed for this auction and bidder.
    Conflict,
}

/// Why one row was rejected. Collected by the pipeline, never thrown.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RowRejection {
    pub kind: RowErrorKind,
    pub message: String,
}

impl RowRejection {
    pub fn missing(field: ManifestField) -> Self {
        Self {
            kind: RowErrorKind::Validation { field },
            message: format!("{} is a required field", field.label()),
        }
    }

    pub fn invalid(field: ManifestField, message: impl Into<String>) -> Self {
        Self {
            kind: RowErrorKind::Validation { field },
            message: message.into(),
        }
    }

    pub fn unknown_bidder() -> Self {
        Self {
            kind: RowErrorKind::Referential,
            message: "bidder number does not exist or not in auction".to_string(),
        }
    }

    pub fn unknown_container(container_barcode: &str) -> Self {
        Self {
            kind: RowErrorKind::Referential,
            message: format!("barcode does not exist in any container: {container_barcode}"),
        }
    }

    pub fn already_encoded() -> Self {
        Self {
            kind: RowErrorKind::Conflict,
            message: "Already encoded".to_string(),
        }
    }
}

/// A rejection tied back to the sheet row that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetError {
    /// 1-based position of the row in the submitted batch.
    pub row_number: usize,
    pub row: RawManifestRow,
    #[serde(flatten)]
    pub kind: RowErrorKind,
    pub message: String,
}

impl SheetError {
    pub fn new(row_number: usize, row: RawManifestRow, rejection: RowRejection) -> Self {
        Self {
            row_number,
            row,
            kind: rejection.kind,
            message: rejection.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_message_uses_human_label() {
        let r = RowRejection::missing(ManifestField::ControlNumber);
        assert_eq!(r.to_string(), "control number is a required field");
        assert_eq!(
            r.kind,
            RowErrorKind::Validation {
                field: ManifestField::ControlNumber
            }
        );
    }

    #[test]
    fn sheet_error_serializes_kind_inline() {
        let err = SheetError::new(3, RawManifestRow::default(), RowRejection::already_encoded());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "conflict");
        assert_eq!(json["message"], "Already encoded");
        assert_eq!(json["row_number"], 3);
    }
}
