use core::str::FromStr;

use serde::{Deserialize, Serialize};

use gavel_core::{ContainerId, DomainError, InventoryId};

/// Lifecycle status of a physical inventory item.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryStatus {
    Unsold,
    Sold,
}

impl InventoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryStatus::Unsold => "UNSOLD",
            InventoryStatus::Sold => "SOLD",
        }
    }
}

impl core::fmt::Display for InventoryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InventoryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNSOLD" => Ok(InventoryStatus::Unsold),
            "SOLD" => Ok(InventoryStatus::Sold),
            other => Err(DomainError::validation(format!("unknown inventory status: {other}"))),
        }
    }
}

/// Identity of an item inside a container: full barcode + control number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InventoryKey {
    pub barcode: String,
    pub control_number: String,
}

impl InventoryKey {
    pub fn new(barcode: impl Into<String>, control_number: impl Into<String>) -> Self {
        Self {
            barcode: barcode.into(),
            control_number: control_number.into(),
        }
    }
}

/// Supplier container (directory entry, looked up by container-level barcode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub barcode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: InventoryId,
    pub barcode: String,
    pub control_number: String,
    pub description: String,
    pub container_id: ContainerId,
    pub status: InventoryStatus,
}

impl InventoryItem {
    pub fn key(&self) -> InventoryKey {
        InventoryKey::new(self.barcode.clone(), self.control_number.clone())
    }
}

/// Item to be created lazily by manifest reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInventoryItem {
    pub key: InventoryKey,
    pub description: String,
    pub container_id: ContainerId,
}

impl NewInventoryItem {
    /// Materialize the item; items first seen on a manifest are already sold.
    pub fn into_item(self, id: InventoryId) -> InventoryItem {
        InventoryItem {
            id,
            barcode: self.key.barcode,
            control_number: self.key.control_number,
            description: self.description,
            container_id: self.container_id,
            status: InventoryStatus::Sold,
        }
    }
}
