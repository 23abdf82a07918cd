//! Project-level cost aggregation.
//!
//! Cost elements may be listed more than once for a project (the same element
//! re-delivered, or persisted by two code paths). Each element identifier is
//! counted exactly once, and totals are summed in identifier order so the
//! result does not depend on the order records were loaded in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::element::Element;
use crate::domain::foundation::{ElementId, ProjectId, Timestamp};

/// The cost-relevant projection of an element as persisted per project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostElementRecord {
    pub element_id: ElementId,
    pub total_cost: Option<f64>,
    pub currency: Option<String>,
}

impl CostElementRecord {
    pub fn from_element(element: &Element) -> Self {
        Self {
            element_id: element.id.clone(),
            total_cost: element.total_cost(),
            currency: element.cost.as_ref().map(|c| c.currency.clone()),
        }
    }
}

/// Deduplicated cost totals for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAggregate {
    pub project_id: ProjectId,
    pub elements_count: usize,
    pub matched_count: usize,
    /// Sum over distinct elements. This is the authoritative total.
    pub total_from_elements: f64,
    /// Sum over the raw cost-entry collection, kept for reference only.
    pub total_from_cost_data: f64,
    pub currency: String,
    pub updated_at: Timestamp,
}

/// Computes [`ProjectAggregate`]s.
#[derive(Debug, Clone)]
pub struct CostAggregator {
    default_currency: String,
}

impl CostAggregator {
    pub fn new(default_currency: impl Into<String>) -> Self {
        Self {
            default_currency: default_currency.into(),
        }
    }

    pub fn aggregate(
        &self,
        project_id: &ProjectId,
        records: &[CostElementRecord],
        total_from_cost_data: f64,
    ) -> ProjectAggregate {
        let mut distinct: BTreeMap<&ElementId, &CostElementRecord> = BTreeMap::new();
        for record in records {
            distinct.entry(&record.element_id).or_insert(record);
        }

        let total_from_elements = distinct
            .values()
            .map(|record| record.total_cost.unwrap_or(0.0))
            .sum();
        let matched_count = distinct
            .values()
            .filter(|record| record.total_cost.is_some())
            .count();
        let currency = distinct
            .values()
            .find_map(|record| record.currency.clone())
            .unwrap_or_else(|| self.default_currency.clone());

        ProjectAggregate {
            project_id: project_id.clone(),
            elements_count: distinct.len(),
            matched_count,
            total_from_elements,
            total_from_cost_data,
            currency,
            updated_at: Timestamp::now(),
        }
    }
}

impl Default for CostAggregator {
    fn default() -> Self {
        Self::new("CHF")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(id: &str, total: Option<f64>) -> CostElementRecord {
        CostElementRecord {
            element_id: ElementId::new(id).unwrap(),
            total_cost: total,
            currency: total.map(|_| "CHF".to_string()),
        }
    }

    fn project() -> ProjectId {
        ProjectId::new("P").unwrap()
    }

    #[test]
    fn element_listed_twice_is_counted_once() {
        let records = vec![record("E", Some(50.0)), record("E", Some(50.0))];

        let aggregate = CostAggregator::default().aggregate(&project(), &records, 100.0);

        assert_eq!(aggregate.total_from_elements, 50.0);
        assert_eq!(aggregate.elements_count, 1);
        assert_eq!(aggregate.matched_count, 1);
        assert_eq!(aggregate.total_from_cost_data, 100.0);
    }

    #[test]
    fn records_without_cost_count_as_zero() {
        let records = vec![record("a", Some(10.0)), record("b", None)];

        let aggregate = CostAggregator::default().aggregate(&project(), &records, 0.0);

        assert_eq!(aggregate.total_from_elements, 10.0);
        assert_eq!(aggregate.elements_count, 2);
        assert_eq!(aggregate.matched_count, 1);
    }

    #[test]
    fn empty_project_uses_default_currency() {
        let aggregate = CostAggregator::new("EUR").aggregate(&project(), &[], 0.0);

        assert_eq!(aggregate.total_from_elements, 0.0);
        assert_eq!(aggregate.currency, "EUR");
    }

    #[test]
    fn aggregation_is_idempotent() {
        let aggregator = CostAggregator::default();
        let records = vec![record("a", Some(1.5)), record("b", Some(2.25))];

        let first = aggregator.aggregate(&project(), &records, 0.0);
        let second = aggregator.aggregate(&project(), &records, 0.0);

        assert_eq!(first.total_from_elements, second.total_from_elements);
        assert_eq!(first.elements_count, second.elements_count);
    }

    proptest! {
        #[test]
        fn total_is_independent_of_record_order(
            costs in proptest::collection::vec(0.0f64..10_000.0, 1..20),
            seed in any::<u64>(),
        ) {
            let records: Vec<CostElementRecord> = costs
                .iter()
                .enumerate()
                .map(|(i, cost)| record(&format!("e-{i}"), Some(*cost)))
                .collect();
            let mut shuffled = records.clone();
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();

            let aggregator = CostAggregator::default();
            let a = aggregator.aggregate(&project(), &records, 0.0);
            let b = aggregator.aggregate(&project(), &shuffled, 0.0);

            prop_assert_eq!(a.total_from_elements.to_bits(), b.total_from_elements.to_bits());
        }
    }
}
