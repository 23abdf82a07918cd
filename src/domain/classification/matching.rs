//! Tiered matching of element codes against the cost schedule.

use serde::{Deserialize, Serialize};

use crate::domain::schedule::{CostScheduleEntry, CostScheduleStore};

use super::code::{simplify, NormalizedCode};

/// Which tier produced a match. Ordered strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMethod {
    Direct,
    Simplified,
    MajorSegment,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Direct => "direct",
            MatchMethod::Simplified => "simplified",
            MatchMethod::MajorSegment => "major-segment",
        }
    }
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schedule entry chosen for a code, tagged with the tier that found it.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Direct(CostScheduleEntry),
    Simplified(CostScheduleEntry),
    MajorSegment(CostScheduleEntry),
}

impl MatchResult {
    pub fn method(&self) -> MatchMethod {
        match self {
            MatchResult::Direct(_) => MatchMethod::Direct,
            MatchResult::Simplified(_) => MatchMethod::Simplified,
            MatchResult::MajorSegment(_) => MatchMethod::MajorSegment,
        }
    }

    pub fn entry(&self) -> &CostScheduleEntry {
        match self {
            MatchResult::Direct(entry)
            | MatchResult::Simplified(entry)
            | MatchResult::MajorSegment(entry) => entry,
        }
    }

    pub fn unit_cost(&self) -> f64 {
        self.entry().unit_cost
    }
}

/// Finds the schedule entry for `code`.
///
/// Tiers are tried in order and the first hit wins:
///
/// 1. **direct** - exact key lookup
/// 2. **simplified** - keys and query compared with all non-alphanumerics
///    removed, first entry in insertion order
/// 3. **major-segment** - the query's leading `<letter><digits>` run equals a
///    key, or prefixes a key followed by `.`, first entry in insertion order
///
/// `None` is the ordinary outcome for codes the schedule does not cover.
pub fn find_match(code: &NormalizedCode, schedule: &CostScheduleStore) -> Option<MatchResult> {
    if schedule.is_empty() {
        return None;
    }

    if let Some(entry) = schedule.get(code) {
        return Some(MatchResult::Direct(entry.clone()));
    }

    let query = simplify(code.as_str());
    if !query.is_empty() {
        if let Some((_, entry)) = schedule
            .simplified_entries()
            .find(|(simplified, _)| *simplified == query)
        {
            return Some(MatchResult::Simplified(entry.clone()));
        }
    }

    let major = code.major_segment()?;
    schedule
        .entries()
        .iter()
        .find(|entry| {
            let key = entry.code.as_str();
            key == major
                || key
                    .strip_prefix(major)
                    .is_some_and(|rest| rest.starts_with('.'))
        })
        .map(|entry| MatchResult::MajorSegment(entry.clone()))
}
