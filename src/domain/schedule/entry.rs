//! Cost schedule entries as uploaded by clients.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::classification::NormalizedCode;
use crate::domain::foundation::{Timestamp, ValidationError};

/// One unit-cost line of an uploaded cost schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostScheduleEntry {
    /// Canonical code, the store key.
    pub code: NormalizedCode,
    /// Code exactly as it appeared in the upload.
    pub raw_code: String,
    /// Cost per unit of element quantity.
    pub unit_cost: f64,
    pub currency: String,
    pub source_file: Option<String>,
    pub uploaded_at: Timestamp,
}

/// Upload-level context applied to every row of a schedule.
#[derive(Debug, Clone)]
pub struct ScheduleSource {
    pub filename: Option<String>,
    pub uploaded_at: Timestamp,
    pub default_currency: String,
}

impl CostScheduleEntry {
    /// Parses one row of a `cost_data` upload.
    ///
    /// Accepts the spreadsheet column spellings seen in the wild: the code
    /// under `ebkph`, `ebkp` or `code`; the unit cost under `cost_unit`,
    /// `costUnit`, `kennwert` or `unitCost`, either as a number or a numeric
    /// string (`"1'250.50"` and `"1250,50"` included).
    pub fn from_upload_row(row: &JsonValue, source: &ScheduleSource) -> Result<Self, ValidationError> {
        let object = row
            .as_object()
            .ok_or_else(|| ValidationError::invalid_format("data", "row is not an object"))?;

        let raw_code = ["ebkph", "ebkp", "code"]
            .iter()
            .find_map(|key| object.get(*key).and_then(JsonValue::as_str))
            .ok_or_else(|| ValidationError::empty_field("ebkph"))?;

        let code = NormalizedCode::parse(raw_code).ok_or_else(|| ValidationError::empty_field("ebkph"))?;

        let unit_cost = ["cost_unit", "costUnit", "kennwert", "unitCost"]
            .iter()
            .find_map(|key| object.get(*key))
            .and_then(parse_amount)
            .ok_or_else(|| ValidationError::invalid_format("cost_unit", "missing or not numeric"))?;

        let currency = object
            .get("currency")
            .and_then(JsonValue::as_str)
            .filter(|c| !c.trim().is_empty())
            .map(|c| c.trim().to_uppercase())
            .unwrap_or_else(|| source.default_currency.clone());

        Ok(Self {
            code,
            raw_code: raw_code.to_string(),
            unit_cost,
            currency,
            source_file: source.filename.clone(),
            uploaded_at: source.uploaded_at,
        })
    }
}

fn parse_amount(value: &JsonValue) -> Option<f64> {
    let amount = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => {
            let digits: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, '\'' | ' ' | '\u{2019}'))
                .collect();
            // With both separators present the later one is the decimal mark.
            let decimal = match (digits.rfind(','), digits.rfind('.')) {
                (Some(comma), Some(dot)) if comma > dot => ',',
                (Some(_), None) => ',',
                _ => '.',
            };
            let cleaned: String = digits
                .chars()
                .filter_map(|c| match c {
                    ',' | '.' if c == decimal => Some('.'),
                    ',' | '.' => None,
                    other => Some(other),
                })
                .collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    };
    amount.filter(|amount| amount.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> ScheduleSource {
        ScheduleSource {
            filename: Some("kennwerte.xlsx".to_string()),
            uploaded_at: Timestamp::now(),
            default_currency: "CHF".to_string(),
        }
    }

    #[test]
    fn parses_canonical_row() {
        let entry = CostScheduleEntry::from_upload_row(&json!({"ebkph": "C02.1", "cost_unit": 100}), &source())
            .unwrap();
        assert_eq!(entry.code.as_str(), "C2.1");
        assert_eq!(entry.raw_code, "C02.1");
        assert_eq!(entry.unit_cost, 100.0);
        assert_eq!(entry.currency, "CHF");
        assert_eq!(entry.source_file.as_deref(), Some("kennwerte.xlsx"));
    }

    #[test]
    fn accepts_swiss_formatted_amount_strings() {
        let entry =
            CostScheduleEntry::from_upload_row(&json!({"code": "E1", "kennwert": "1'250,50"}), &source()).unwrap();
        assert_eq!(entry.unit_cost, 1250.5);
    }

    #[test]
    fn mixed_separators_use_the_last_as_decimal_mark() {
        for raw in ["1,250.50", "1.250,50", "1'250.50"] {
            let entry =
                CostScheduleEntry::from_upload_row(&json!({"code": "E1", "kennwert": raw}), &source()).unwrap();
            assert_eq!(entry.unit_cost, 1250.5, "{}", raw);
        }
    }

    #[test]
    fn explicit_currency_wins_over_default() {
        let entry = CostScheduleEntry::from_upload_row(
            &json!({"ebkph": "C1", "cost_unit": 5, "currency": "eur"}),
            &source(),
        )
        .unwrap();
        assert_eq!(entry.currency, "EUR");
    }

    #[test]
    fn rejects_row_without_code() {
        let err = CostScheduleEntry::from_upload_row(&json!({"cost_unit": 5}), &source()).unwrap_err();
        assert_eq!(err, ValidationError::empty_field("ebkph"));
    }

    #[test]
    fn rejects_non_numeric_cost() {
        let result = CostScheduleEntry::from_upload_row(&json!({"ebkph": "C1", "cost_unit": "n/a"}), &source());
        assert!(result.is_err());
    }

    #[test]
    fn rejects_non_object_row() {
        assert!(CostScheduleEntry::from_upload_row(&json!("C1"), &source()).is_err());
    }
}
