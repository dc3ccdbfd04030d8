//! Manifest domain module.
//!
//! Business rules for spreadsheet manifests: the loosely-typed row as it arrives,
//! the strict row produced by normalization, and the per-row rejections the
//! reconciliation pipeline collects. Pure logic only (no IO, no HTTP, no storage).

pub mod bidder;
pub mod inventory;
pub mod normalize;
pub mod rejection;
pub mod row;

pub use bidder::{Bidder, BidderNumber};
pub use inventory::{Container, InventoryItem, InventoryKey, InventoryStatus, NewInventoryItem};
pub use normalize::{container_barcode, normalize_row};
pub use rejection::{ManifestField, RowErrorKind, RowRejection, SheetError};
pub use row::{ManifestRow, RawManifestRow, NO_DESCRIPTION, NO_MANIFEST_NUMBER, NO_QTY};
