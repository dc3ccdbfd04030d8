use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::bidder::BidderNumber;
use crate::inventory::InventoryKey;

/// Description used when the sheet leaves the cell empty.
pub const NO_DESCRIPTION: &str = "NO DESCRIPTION";
/// Quantity used when the sheet leaves the cell empty.
pub const NO_QTY: &str = "NO QTY";
/// Manifest number used when the sheet leaves the cell empty.
pub const NO_MANIFEST_NUMBER: &str = "NO MANIFEST NUMBER";

/// One manifest row exactly as it came out of the spreadsheet.
///
/// Every cell is optional and may arrive as a JSON string or number; numbers are
/// kept in their textual form so normalization sees what the operator typed.
/// Objects and arrays are kept as compact JSON text and rejected per row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawManifestRow {
    #[serde(default, deserialize_with = "cell")]
    pub barcode: Option<String>,
    #[serde(default, alias = "control", alias = "control_no", deserialize_with = "cell")]
    pub control_number: Option<String>,
    #[serde(default, deserialize_with = "cell")]
    pub description: Option<String>,
    #[serde(default, alias = "bidder_number", deserialize_with = "cell")]
    pub bidder: Option<String>,
    #[serde(default, alias = "quantity", deserialize_with = "cell")]
    pub qty: Option<String>,
    #[serde(default, deserialize_with = "cell")]
    pub price: Option<String>,
    #[serde(default, alias = "manifest", deserialize_with = "cell")]
    pub manifest_number: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Cell {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Other(serde_json::Value),
}

impl Cell {
    fn into_text(self) -> String {
        match self {
            Cell::Text(s) => s,
            Cell::Int(n) => n.to_string(),
            Cell::Float(n) => n.to_string(),
            Cell::Bool(b) => b.to_string(),
            Cell::Other(v) => v.to_string(),
        }
    }
}

fn cell<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Cell>::deserialize(deserializer)?.map(Cell::into_text))
}

/// A row that passed normalization; every field is present and canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    /// Full (item-level) barcode, uppercased.
    pub barcode: String,
    /// Container-level barcode derived from `barcode`.
    pub container_barcode: String,
    /// Control number, zero-padded to four digits.
    pub control_number: String,
    pub description: String,
    pub bidder_number: BidderNumber,
    pub quantity: String,
    pub price: Decimal,
    pub manifest_number: String,
}

impl ManifestRow {
    pub fn inventory_key(&self) -> InventoryKey {
        InventoryKey::new(self.barcode.clone(), self.control_number.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_cells_are_kept_as_text() {
        let raw: RawManifestRow = serde_json::from_value(serde_json::json!({
            "barcode": "ABC-1-2",
            "control": 7,
            "bidder": "5",
            "price": 1000.5,
            "qty": 1
        }))
        .unwrap();

        assert_eq!(raw.control_number.as_deref(), Some("7"));
        assert_eq!(raw.price.as_deref(), Some("1000.5"));
        assert_eq!(raw.qty.as_deref(), Some("1"));
        assert_eq!(raw.description, None);
    }

    #[test]
    fn structured_cells_do_not_fail_deserialization() {
        let raw: RawManifestRow = serde_json::from_value(serde_json::json!({
            "barcode": { "code": "ABC-1-2" },
            "price": [10]
        }))
        .unwrap();
        assert_eq!(raw.barcode.as_deref(), Some(r#"{"code":"ABC-1-2"}"#));
        assert_eq!(raw.price.as_deref(), Some("[10]"));
    }

    #[test]
    fn null_cells_are_missing() {
        let raw: RawManifestRow =
            serde_json::from_value(serde_json::json!({ "barcode": null, "price": "10" })).unwrap();
        assert_eq!(raw.barcode, None);
        assert_eq!(raw.price.as_deref(), Some("10"));
    }
}
