//! Read models produced by the coordinator and sent to subscribers.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::classification::MatchMethod;
use crate::domain::cost::BatchMatch;
use crate::domain::element::ElementStore;
use crate::domain::foundation::Timestamp;

/// Outcome of a single stream record.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Identifier seen before; forwarded raw only.
    Duplicate,
    /// New element whose code found a schedule entry.
    Matched { method: MatchMethod, total_cost: f64 },
    /// New element without a schedule match.
    Unmatched,
    /// Payload could not be read as an element.
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Warning,
    Error,
}

/// Counts reported after costs were applied to the stored elements.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplySummary {
    pub schedule_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_rows: Option<usize>,
    pub matched_codes: usize,
    pub enriched_elements: usize,
    pub persisted: usize,
    pub persist_failed: usize,
}

/// Answer to an upload or reapply request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub status: ResponseStatus,
    pub message: String,
    #[serde(flatten)]
    pub summary: Option<ApplySummary>,
    pub timestamp: String,
}

impl OperationResponse {
    pub fn from_summary(message: impl Into<String>, summary: ApplySummary) -> Self {
        let clean = summary.rejected_rows.unwrap_or(0) == 0
            && summary.persist_failed == 0
            && summary.matched_codes > 0;
        Self {
            status: if clean {
                ResponseStatus::Success
            } else {
                ResponseStatus::Warning
            },
            message: message.into(),
            summary: Some(summary),
            timestamp: Timestamp::now().to_rfc3339(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            summary: None,
            timestamp: Timestamp::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeCount {
    pub code: String,
    pub count: usize,
}

/// Snapshot of the element inventory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementInventory {
    pub element_count: usize,
    pub enriched_count: usize,
    pub code_count: usize,
    pub codes: Vec<CodeCount>,
    pub projects: Vec<String>,
    pub schedule_size: usize,
    pub timestamp: String,
}

impl ElementInventory {
    pub fn capture(elements: &ElementStore, schedule_size: usize) -> Self {
        let codes: Vec<CodeCount> = elements
            .code_counts()
            .into_iter()
            .map(|(code, count)| CodeCount {
                code: code.as_str().to_string(),
                count,
            })
            .collect();
        Self {
            element_count: elements.len(),
            enriched_count: elements.enriched_count(),
            code_count: codes.len(),
            codes,
            projects: elements
                .projects()
                .into_iter()
                .map(|p| p.as_str().to_string())
                .collect(),
            schedule_size,
            timestamp: Timestamp::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostMatchEntry {
    pub element_count: usize,
    pub cost_unit: f64,
    pub currency: String,
    pub match_method: MatchMethod,
    pub matched_code: String,
}

/// Matched codes with their unit costs, keyed by element code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostMatchInfo {
    pub matches: BTreeMap<String, CostMatchEntry>,
    pub match_count: usize,
    pub timestamp: String,
}

impl CostMatchInfo {
    pub fn from_batch(batch: &BatchMatch) -> Self {
        let matches: BTreeMap<String, CostMatchEntry> = batch
            .matches
            .values()
            .map(|m| {
                let entry = m.result.entry();
                (
                    m.code.as_str().to_string(),
                    CostMatchEntry {
                        element_count: m.element_count,
                        cost_unit: entry.unit_cost,
                        currency: entry.currency.clone(),
                        match_method: m.result.method(),
                        matched_code: entry.code.as_str().to_string(),
                    },
                )
            })
            .collect();
        Self {
            match_count: matches.len(),
            matches,
            timestamp: Timestamp::now().to_rfc3339(),
        }
    }

    pub fn single(code: &str, entry: CostMatchEntry) -> Self {
        let mut matches = BTreeMap::new();
        matches.insert(code.to_string(), entry);
        Self {
            matches,
            match_count: 1,
            timestamp: Timestamp::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeMatchingEntry {
    pub code: String,
    pub normalized_code: String,
    pub element_count: usize,
    pub match_method: MatchMethod,
}

/// Requested codes that match at least one element code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeMatchingReport {
    pub matching_codes: Vec<CodeMatchingEntry>,
    pub match_count: usize,
}

/// Counters behind `/health`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub element_count: usize,
    pub enriched_count: usize,
    pub code_count: usize,
    pub schedule_size: usize,
    pub cache_computations: u64,
}
