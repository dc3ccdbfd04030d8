//! Row normalization: turns one spreadsheet row into a strict [`ManifestRow`].
//!
//! Each rule is checked independently, so a row with several bad cells reports
//! every one of them instead of stopping at the first.

use core::str::FromStr;

use rust_decimal::Decimal;

use crate::bidder::BidderNumber;
use crate::rejection::{ManifestField, RowRejection};
use crate::row::{ManifestRow, RawManifestRow, NO_DESCRIPTION, NO_MANIFEST_NUMBER, NO_QTY};

/// Width control numbers are zero-padded to.
const CONTROL_NUMBER_WIDTH: usize = 4;
/// Width numeric container segments are zero-padded to.
const CONTAINER_SEGMENT_WIDTH: usize = 3;
/// Highest hammer price a row may carry.
pub const MAX_PRICE: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Normalize a raw row, or return every rule it violates.
pub fn normalize_row(raw: &RawManifestRow) -> Result<ManifestRow, Vec<RowRejection>> {
    let mut rejections = Vec::new();

    let barcode = required(&raw.barcode, ManifestField::Barcode, &mut rejections)
        .and_then(|b| collect(plain_barcode(b), &mut rejections))
        .map(|b| b.to_uppercase());

    let control_number = required(&raw.control_number, ManifestField::ControlNumber, &mut rejections)
        .and_then(|c| collect(normalize_control_number(c), &mut rejections));

    let bidder_number = required(&raw.bidder, ManifestField::BidderNumber, &mut rejections)
        .and_then(|b| collect(parse_bidder_number(b), &mut rejections));

    let price = required(&raw.price, ManifestField::Price, &mut rejections)
        .and_then(|p| collect(parse_price(p), &mut rejections));

    let description = present(&raw.description)
        .map(|d| d.to_uppercase())
        .unwrap_or_else(|| NO_DESCRIPTION.to_string());
    let quantity = present(&raw.qty)
        .map(str::to_string)
        .unwrap_or_else(|| NO_QTY.to_string());
    let manifest_number = present(&raw.manifest_number)
        .map(str::to_string)
        .unwrap_or_else(|| NO_MANIFEST_NUMBER.to_string());

    match (barcode, control_number, bidder_number, price) {
        (Some(barcode), Some(control_number), Some(bidder_number), Some(price))
            if rejections.is_empty() =>
        {
            Ok(ManifestRow {
                container_barcode: container_barcode(&barcode),
                barcode,
                control_number,
                description,
                bidder_number,
                quantity,
                price,
                manifest_number,
            })
        }
        _ => Err(rejections),
    }
}

/// Container-level barcode used for existence checks.
///
/// Drops the trailing item segment when the barcode has three or more
/// hyphen-delimited segments and zero-pads numeric segments after the first:
/// `ABC-1-2` -> `ABC-001`.
pub fn container_barcode(barcode: &str) -> String {
    let upper = barcode.trim().to_uppercase();
    let mut segments: Vec<&str> = upper.split('-').collect();
    if segments.len() >= 3 {
        segments.pop();
    }

    segments
        .iter()
        .enumerate()
        .map(|(idx, seg)| {
            if idx > 0 && is_digits(seg) {
                format!("{seg:0>width$}", width = CONTAINER_SEGMENT_WIDTH)
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Objects and arrays arrive as JSON text; a barcode must be a single value.
fn plain_barcode(value: &str) -> Result<&str, RowRejection> {
    match serde_json::from_str::<serde_json::Value>(value) {
        Ok(v) if v.is_object() || v.is_array() => Err(RowRejection::invalid(
            ManifestField::Barcode,
            format!("barcode must be a single value: {value}"),
        )),
        _ => Ok(value),
    }
}

fn normalize_control_number(value: &str) -> Result<String, RowRejection> {
    if !is_digits(value) {
        return Err(RowRejection::invalid(
            ManifestField::ControlNumber,
            format!("control number must be numeric: {value}"),
        ));
    }
    Ok(format!("{value:0>width$}", width = CONTROL_NUMBER_WIDTH))
}

fn parse_bidder_number(value: &str) -> Result<BidderNumber, RowRejection> {
    BidderNumber::from_str(value).map_err(|_| {
        RowRejection::invalid(
            ManifestField::BidderNumber,
            format!("bidder number must be a positive number: {value}"),
        )
    })
}

fn parse_price(value: &str) -> Result<Decimal, RowRejection> {
    let cleaned: String = value.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    match Decimal::from_str(&cleaned) {
        Ok(price) if price > MAX_PRICE => Err(RowRejection::invalid(
            ManifestField::Price,
            format!("price must not exceed {MAX_PRICE}: {value}"),
        )),
        Ok(price) if !price.is_sign_negative() => Ok(price),
        _ => Err(RowRejection::invalid(
            ManifestField::Price,
            format!("price must be a non-negative number: {value}"),
        )),
    }
}

fn present(cell: &Option<String>) -> Option<&str> {
    cell.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required<'a>(
    cell: &'a Option<String>,
    field: ManifestField,
    rejections: &mut Vec<RowRejection>,
) -> Option<&'a str> {
    let value = present(cell);
    if value.is_none() {
        rejections.push(RowRejection::missing(field));
    }
    value
}

fn collect<T>(result: Result<T, RowRejection>, rejections: &mut Vec<RowRejection>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(r) => {
            rejections.push(r);
            None
        }
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rejection::RowErrorKind;
    use rust_decimal_macros::dec;

    fn raw(barcode: &str, control: &str, bidder: &str, price: &str) -> RawManifestRow {
        RawManifestRow {
            barcode: Some(barcode.to_string()),
            control_number: Some(control.to_string()),
            description: None,
            bidder: Some(bidder.to_string()),
            qty: None,
            price: Some(price.to_string()),
            manifest_number: None,
        }
    }

    #[test]
    fn barcode_and_control_number_are_canonicalized() {
        let row = normalize_row(&raw("abc-1-2", "7", "5", "1000")).unwrap();
        assert_eq!(row.barcode, "ABC-1-2");
        assert_eq!(row.container_barcode, "ABC-001");
        assert_eq!(row.control_number, "0007");
        assert_eq!(row.bidder_number.value(), 5);
        assert_eq!(row.price, dec!(1000));
    }

    #[test]
    fn missing_optional_cells_get_sentinels() {
        let row = normalize_row(&raw("ABC-1", "12", "5", "10")).unwrap();
        assert_eq!(row.description, NO_DESCRIPTION);
        assert_eq!(row.quantity, NO_QTY);
        assert_eq!(row.manifest_number, NO_MANIFEST_NUMBER);
    }

    #[test]
    fn description_is_uppercased() {
        let mut r = raw("ABC-1", "12", "5", "10");
        r.description = Some("  office chair ".to_string());
        let row = normalize_row(&r).unwrap();
        assert_eq!(row.description, "OFFICE CHAIR");
    }

    #[test]
    fn price_accepts_thousands_separators() {
        let row = normalize_row(&raw("ABC-1", "12", "5", "1,250.50")).unwrap();
        assert_eq!(row.price, dec!(1250.50));
    }

    #[test]
    fn every_failing_rule_is_reported() {
        let r = RawManifestRow {
            control_number: Some("7A".to_string()),
            bidder: Some("   ".to_string()),
            ..RawManifestRow::default()
        };
        let rejections = normalize_row(&r).unwrap_err();
        let messages: Vec<_> = rejections.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "barcode is a required field",
                "control number must be numeric: 7A",
                "bidder number is a required field",
                "price is a required field",
            ]
        );
        assert!(rejections
            .iter()
            .all(|r| matches!(r.kind, RowErrorKind::Validation { .. })));
    }

    #[test]
    fn negative_or_garbage_price_is_rejected() {
        for bad in ["-5", "abc", "1.2.3", "79228162514264337593543950335", "1000000000.01"] {
            let rejections = normalize_row(&raw("ABC-1", "1", "5", bad)).unwrap_err();
            assert_eq!(rejections.len(), 1);
            assert_eq!(
                rejections[0].kind,
                RowErrorKind::Validation {
                    field: ManifestField::Price
                }
            );
        }
    }

    #[test]
    fn structured_cells_are_rejected_per_field() {
        let rejections = normalize_row(&raw(r#"{"code":"ABC-1-2"}"#, "[7]", "5", "10")).unwrap_err();
        let fields: Vec<_> = rejections.iter().map(|r| r.kind).collect();
        assert_eq!(
            fields,
            vec![
                RowErrorKind::Validation {
                    field: ManifestField::Barcode
                },
                RowErrorKind::Validation {
                    field: ManifestField::ControlNumber
                },
            ]
        );

        // Brackets inside an ordinary barcode are not JSON.
        assert!(normalize_row(&raw("[LOT]-1", "1", "5", "10")).is_ok());
    }

    #[test]
    fn container_barcode_keeps_short_forms() {
        assert_eq!(container_barcode("ABC"), "ABC");
        assert_eq!(container_barcode("abc-12"), "ABC-012");
        assert_eq!(container_barcode("ABC-1234-9"), "ABC-1234");
        assert_eq!(container_barcode("ABC-X-9-1"), "ABC-X-009");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: numeric control numbers normalize to their zero-padded form.
            #[test]
            fn control_numbers_are_padded(n in 0u32..100_000u32) {
                let row = normalize_row(&raw("ABC-1", &n.to_string(), "1", "1")).unwrap();
                prop_assert_eq!(row.control_number, format!("{:04}", n));
            }

            /// Property: dropping the item segment then normalizing again is stable.
            #[test]
            fn container_barcode_is_idempotent(
                prefix in "[A-Z]{1,4}",
                container in 1u32..1000u32,
                item in 1u32..100u32,
            ) {
                let once = container_barcode(&format!("{prefix}-{container}-{item}"));
                prop_assert_eq!(&once, &format!("{prefix}-{container:03}"));
                prop_assert_eq!(container_barcode(&once), once);
            }
        }
    }
}
