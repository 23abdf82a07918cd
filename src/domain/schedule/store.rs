//! In-memory cost schedule keyed by normalized code.

use std::collections::HashMap;

use crate::domain::classification::{simplify, NormalizedCode};

use super::entry::CostScheduleEntry;

/// The current cost schedule.
///
/// Entries keep their insertion order, which is the tie-breaker for the
/// simplified and major-segment match tiers. The schedule is only ever
/// replaced as a whole: a replacement builds the new index completely
/// before swapping it in, so readers never see a mix of two uploads.
#[derive(Debug, Default, Clone)]
pub struct CostScheduleStore {
    entries: Vec<CostScheduleEntry>,
    simplified: Vec<String>,
    index: HashMap<NormalizedCode, usize>,
}

impl CostScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically clears the schedule and inserts `entries`.
    ///
    /// A code that appears more than once keeps the position of its first
    /// occurrence and the values of its last. Returns the resulting size.
    pub fn replace_all(&mut self, entries: impl IntoIterator<Item = CostScheduleEntry>) -> usize {
        let mut next = CostScheduleStore::new();
        for entry in entries {
            next.insert(entry);
        }
        *self = next;
        self.entries.len()
    }

    /// Replaces the schedule with the union of the current entries and
    /// `entries`, later entries replacing earlier ones with the same code.
    pub fn merge(&mut self, entries: impl IntoIterator<Item = CostScheduleEntry>) -> usize {
        let current = std::mem::take(&mut self.entries);
        self.replace_all(current.into_iter().chain(entries))
    }

    fn insert(&mut self, entry: CostScheduleEntry) {
        match self.index.get(&entry.code) {
            Some(&position) => {
                self.entries[position] = entry;
            }
            None => {
                self.index.insert(entry.code.clone(), self.entries.len());
                self.simplified.push(simplify(entry.code.as_str()));
                self.entries.push(entry);
            }
        }
    }

    pub fn get(&self, code: &NormalizedCode) -> Option<&CostScheduleEntry> {
        self.index.get(code).map(|&position| &self.entries[position])
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> &[CostScheduleEntry] {
        &self.entries
    }

    /// Entries paired with their pre-computed simplified key.
    pub(crate) fn simplified_entries(&self) -> impl Iterator<Item = (&str, &CostScheduleEntry)> {
        self.simplified
            .iter()
            .map(String::as_str)
            .zip(self.entries.iter())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{entry, schedule};
    use super::*;

    fn code(raw: &str) -> NormalizedCode {
        NormalizedCode::parse(raw).unwrap()
    }

    #[test]
    fn replace_all_discards_previous_schedule() {
        let mut store = schedule(&[("C1", 10.0), ("C2", 20.0)]);

        let size = store.replace_all(vec![entry("E1", 5.0)]);

        assert_eq!(size, 1);
        assert!(store.get(&code("C1")).is_none());
        assert_eq!(store.get(&code("E1")).unwrap().unit_cost, 5.0);
    }

    #[test]
    fn entries_keep_insertion_order() {
        let store = schedule(&[("C3", 1.0), ("C1", 2.0), ("C2", 3.0)]);
        let codes: Vec<&str> = store.entries().iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec!["C3", "C1", "C2"]);
    }

    #[test]
    fn duplicate_code_in_one_upload_keeps_first_position_last_value() {
        let store = schedule(&[("C1", 1.0), ("C2", 2.0), ("C01", 9.0)]);

        assert_eq!(store.len(), 2);
        assert_eq!(store.entries()[0].code.as_str(), "C1");
        assert_eq!(store.get(&code("C1")).unwrap().unit_cost, 9.0);
    }

    #[test]
    fn merge_keeps_existing_codes_and_overrides_repeated_ones() {
        let mut store = schedule(&[("C1", 1.0), ("C2", 2.0)]);

        store.merge(vec![entry("C2", 20.0), entry("C3", 30.0)]);

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(&code("C1")).unwrap().unit_cost, 1.0);
        assert_eq!(store.get(&code("C2")).unwrap().unit_cost, 20.0);
    }

    #[test]
    fn lookup_is_by_normalized_code() {
        let store = schedule(&[("c 02.1", 100.0)]);
        assert!(store.get(&code("C2.1")).is_some());
    }
}
