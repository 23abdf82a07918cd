//! Structural element records and their cost enrichment.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::domain::classification::{MatchMethod, MatchResult, NormalizedCode};
use crate::domain::cost::element_total;
use crate::domain::foundation::{ElementId, ProjectId, Timestamp, ValidationError};

/// Wire shape of a record delivered by the element stream.
///
/// Producers are not consistent about field names, so the common
/// spellings are accepted as aliases.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    #[serde(
        alias = "id",
        alias = "element_id",
        alias = "guid",
        deserialize_with = "text_or_number"
    )]
    pub element_id: String,

    #[serde(
        default,
        alias = "project",
        alias = "project_id",
        deserialize_with = "optional_text_or_number"
    )]
    pub project_id: Option<String>,

    #[serde(
        default,
        alias = "ebkph",
        alias = "code",
        alias = "classification_code",
        deserialize_with = "optional_text_or_number"
    )]
    pub classification_code: Option<String>,

    #[serde(default, alias = "area")]
    pub quantity: Option<f64>,

    #[serde(default)]
    pub metadata: Map<String, JsonValue>,
}

/// Some producers emit numeric identifiers.
#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Number(serde_json::Number),
}

impl From<TextOrNumber> for String {
    fn from(value: TextOrNumber) -> Self {
        match value {
            TextOrNumber::Text(text) => text,
            TextOrNumber::Number(number) => number.to_string(),
        }
    }
}

fn text_or_number<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    TextOrNumber::deserialize(deserializer).map(String::from)
}

fn optional_text_or_number<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Option::<TextOrNumber>::deserialize(deserializer).map(|value| value.map(String::from))
}

/// Cost fields attached to an element once its code found a schedule entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementCost {
    pub matched_code: NormalizedCode,
    pub match_method: MatchMethod,
    pub unit_cost: f64,
    pub total_cost: f64,
    pub currency: String,
    pub source_file: Option<String>,
    pub enriched_at: Timestamp,
}

/// A structural element as tracked by the relay.
///
/// Created on first observation; `cost` is filled in place whenever a
/// schedule entry matches its code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: ElementId,
    pub project_id: ProjectId,
    /// Classification code as the producer sent it.
    pub raw_code: Option<String>,
    pub code: Option<NormalizedCode>,
    pub quantity: f64,
    #[serde(default)]
    pub metadata: Map<String, JsonValue>,
    #[serde(default)]
    pub cost: Option<ElementCost>,
    pub observed_at: Timestamp,
}

impl Element {
    /// Builds an element from a raw stream payload.
    pub fn from_stream_payload(payload: &JsonValue) -> Result<Self, ValidationError> {
        let record: StreamRecord = serde_json::from_value(payload.clone())
            .map_err(|e| ValidationError::invalid_format("record", e.to_string()))?;
        Self::from_record(record)
    }

    pub fn from_record(record: StreamRecord) -> Result<Self, ValidationError> {
        let id = ElementId::new(record.element_id)?;
        let project_id = match record.project_id {
            Some(project) if !project.trim().is_empty() => ProjectId::new(project)?,
            _ => ProjectId::unassigned(),
        };
        let code = record
            .classification_code
            .as_deref()
            .and_then(NormalizedCode::parse);
        let quantity = record
            .quantity
            .filter(|q| q.is_finite() && *q >= 0.0)
            .unwrap_or(0.0);

        Ok(Self {
            id,
            project_id,
            raw_code: record.classification_code,
            code,
            quantity,
            metadata: record.metadata,
            cost: None,
            observed_at: Timestamp::now(),
        })
    }

    /// Applies a match, replacing any previous cost fields.
    pub fn enrich(&mut self, matched: &MatchResult) {
        let entry = matched.entry();
        self.cost = Some(ElementCost {
            matched_code: entry.code.clone(),
            match_method: matched.method(),
            unit_cost: entry.unit_cost,
            total_cost: element_total(entry.unit_cost, self.quantity),
            currency: entry.currency.clone(),
            source_file: entry.source_file.clone(),
            enriched_at: Timestamp::now(),
        });
    }

    pub fn is_enriched(&self) -> bool {
        self.cost.is_some()
    }

    pub fn total_cost(&self) -> Option<f64> {
        self.cost.as_ref().map(|c| c.total_cost)
    }

    /// Flat JSON rendering published on the enriched-element channel.
    pub fn to_enriched_record(&self) -> JsonValue {
        let mut record = Map::new();
        record.insert("elementId".into(), JsonValue::from(self.id.as_str()));
        record.insert("projectId".into(), JsonValue::from(self.project_id.as_str()));
        record.insert(
            "classificationCode".into(),
            self.raw_code.clone().map(JsonValue::from).unwrap_or(JsonValue::Null),
        );
        record.insert(
            "normalizedCode".into(),
            self.code
                .as_ref()
                .map(|c| JsonValue::from(c.as_str()))
                .unwrap_or(JsonValue::Null),
        );
        record.insert("quantity".into(), JsonValue::from(self.quantity));
        if let Some(cost) = &self.cost {
            record.insert("unitCost".into(), JsonValue::from(cost.unit_cost));
            record.insert("totalCost".into(), JsonValue::from(cost.total_cost));
            record.insert("currency".into(), JsonValue::from(cost.currency.as_str()));
            record.insert("matchMethod".into(), JsonValue::from(cost.match_method.as_str()));
            record.insert("matchedCode".into(), JsonValue::from(cost.matched_code.as_str()));
        }
        record.insert("metadata".into(), JsonValue::Object(self.metadata.clone()));
        JsonValue::Object(record)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classification::find_match;
    use crate::domain::schedule::test_support::schedule;
    use serde_json::json;

    #[test]
    fn parses_canonical_record() {
        let element = Element::from_stream_payload(&json!({
            "elementId": "e-1",
            "projectId": "P",
            "classificationCode": "c 02.1",
            "quantity": 12.5,
            "metadata": {"ifcClass": "IfcWall"}
        }))
        .unwrap();

        assert_eq!(element.id.as_str(), "e-1");
        assert_eq!(element.project_id.as_str(), "P");
        assert_eq!(element.code.as_ref().unwrap().as_str(), "C2.1");
        assert_eq!(element.raw_code.as_deref(), Some("c 02.1"));
        assert_eq!(element.quantity, 12.5);
        assert_eq!(element.metadata["ifcClass"], "IfcWall");
    }

    #[test]
    fn accepts_producer_aliases() {
        let element = Element::from_stream_payload(&json!({
            "id": "e-2",
            "project": "P",
            "ebkph": "E1",
            "area": 3.0
        }))
        .unwrap();

        assert_eq!(element.id.as_str(), "e-2");
        assert_eq!(element.code.unwrap().as_str(), "E1");
        assert_eq!(element.quantity, 3.0);
    }

    #[test]
    fn numeric_identifiers_are_accepted() {
        let element = Element::from_stream_payload(&json!({
            "elementId": 42,
            "projectId": 7,
            "ebkph": "C1"
        }))
        .unwrap();

        assert_eq!(element.id.as_str(), "42");
        assert_eq!(element.project_id.as_str(), "7");
    }

    #[test]
    fn missing_identifier_is_rejected() {
        assert!(Element::from_stream_payload(&json!({"projectId": "P"})).is_err());
        assert!(Element::from_stream_payload(&json!({"elementId": " "})).is_err());
    }

    #[test]
    fn missing_project_and_quantity_default() {
        let element = Element::from_stream_payload(&json!({"elementId": "e-3"})).unwrap();
        assert_eq!(element.project_id, ProjectId::unassigned());
        assert_eq!(element.quantity, 0.0);
        assert!(element.code.is_none());
    }

    #[test]
    fn enrich_multiplies_unit_cost_by_quantity() {
        let store = schedule(&[("C2.1", 10.0)]);
        let mut element = test_support::element("e-1", "P", "C2.1", 5.0);

        let matched = find_match(element.code.as_ref().unwrap(), &store).unwrap();
        element.enrich(&matched);

        assert_eq!(element.total_cost(), Some(50.0));
        let record = element.to_enriched_record();
        assert_eq!(record["unitCost"], 10.0);
        assert_eq!(record["matchMethod"], "direct");
    }

    #[test]
    fn element_document_roundtrips_through_json() {
        let element = test_support::element("e-9", "P", "C1", 1.0);
        let json = serde_json::to_value(&element).unwrap();
        let back: Element = serde_json::from_value(json).unwrap();
        assert_eq!(back, element);
    }
}
