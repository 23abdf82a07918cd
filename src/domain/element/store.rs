//! In-memory element index.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::classification::{MatchResult, NormalizedCode};
use crate::domain::foundation::{ElementId, ProjectId};

use super::element::Element;

/// Elements indexed by id, normalized code and project.
///
/// Keep-first: the first observation of an identifier wins and later
/// deliveries of the same identifier are rejected by [`insert_if_new`].
/// Elements are never removed.
///
/// [`insert_if_new`]: ElementStore::insert_if_new
#[derive(Debug, Default)]
pub struct ElementStore {
    elements: HashMap<ElementId, Element>,
    by_code: HashMap<NormalizedCode, Vec<ElementId>>,
    by_project: HashMap<ProjectId, Vec<ElementId>>,
    processed: HashSet<ElementId>,
}

impl ElementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an element with this id was already observed.
    pub fn is_processed(&self, id: &ElementId) -> bool {
        self.processed.contains(id)
    }

    /// Inserts the element unless its id was seen before.
    ///
    /// Returns `false` for duplicates, leaving the stored element untouched.
    pub fn insert_if_new(&mut self, element: Element) -> bool {
        if !self.processed.insert(element.id.clone()) {
            return false;
        }

        if let Some(code) = &element.code {
            self.by_code
                .entry(code.clone())
                .or_default()
                .push(element.id.clone());
        }
        self.by_project
            .entry(element.project_id.clone())
            .or_default()
            .push(element.id.clone());
        self.elements.insert(element.id.clone(), element);
        true
    }

    pub fn get(&self, id: &ElementId) -> Option<&Element> {
        self.elements.get(id)
    }

    /// Applies a match to a stored element.
    pub fn enrich(&mut self, id: &ElementId, matched: &MatchResult) -> Option<&Element> {
        let element = self.elements.get_mut(id)?;
        element.enrich(matched);
        Some(element)
    }

    pub fn by_code(&self, code: &NormalizedCode) -> Vec<&Element> {
        self.ids_with_code(code)
            .iter()
            .filter_map(|id| self.elements.get(id))
            .collect()
    }

    pub fn ids_with_code(&self, code: &NormalizedCode) -> &[ElementId] {
        self.by_code.get(code).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_project(&self, project: &ProjectId) -> Vec<&Element> {
        self.by_project
            .get(project)
            .map(|ids| ids.iter().filter_map(|id| self.elements.get(id)).collect())
            .unwrap_or_default()
    }

    /// Every distinct normalized code, sorted.
    pub fn all_codes(&self) -> Vec<NormalizedCode> {
        let mut codes: Vec<NormalizedCode> = self.by_code.keys().cloned().collect();
        codes.sort();
        codes
    }

    /// Number of elements per normalized code.
    pub fn code_counts(&self) -> BTreeMap<NormalizedCode, usize> {
        self.by_code
            .iter()
            .map(|(code, ids)| (code.clone(), ids.len()))
            .collect()
    }

    pub fn projects(&self) -> Vec<ProjectId> {
        let mut projects: Vec<ProjectId> = self.by_project.keys().cloned().collect();
        projects.sort();
        projects
    }

    pub fn enriched_count(&self) -> usize {
        self.elements.values().filter(|e| e.is_enriched()).count()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classification::find_match;
    use crate::domain::element::test_support::element;
    use crate::domain::schedule::test_support::schedule;

    fn code(raw: &str) -> NormalizedCode {
        NormalizedCode::parse(raw).unwrap()
    }

    #[test]
    fn first_observation_wins() {
        let mut store = ElementStore::new();

        assert!(store.insert_if_new(element("e-1", "P", "C1", 1.0)));
        assert!(!store.insert_if_new(element("e-1", "P", "C2", 9.0)));

        let stored = store.get(&ElementId::new("e-1").unwrap()).unwrap();
        assert_eq!(stored.quantity, 1.0);
        assert_eq!(store.len(), 1);
        assert!(store.by_code(&code("C2")).is_empty());
    }

    #[test]
    fn indexes_by_code_and_project() {
        let mut store = ElementStore::new();
        store.insert_if_new(element("e-1", "P1", "C01", 1.0));
        store.insert_if_new(element("e-2", "P1", "C1", 1.0));
        store.insert_if_new(element("e-3", "P2", "E2", 1.0));

        assert_eq!(store.by_code(&code("C1")).len(), 2);
        assert_eq!(store.by_project(&ProjectId::new("P1").unwrap()).len(), 2);
        assert_eq!(store.all_codes(), vec![code("C1"), code("E2")]);
        assert_eq!(store.code_counts()[&code("C1")], 2);
        assert_eq!(store.projects().len(), 2);
    }

    #[test]
    fn elements_without_code_are_tracked_but_not_indexed_by_code() {
        let mut store = ElementStore::new();
        store.insert_if_new(element("e-1", "P", "", 1.0));

        assert_eq!(store.len(), 1);
        assert!(store.all_codes().is_empty());
    }

    #[test]
    fn enrich_updates_in_place() {
        let mut store = ElementStore::new();
        store.insert_if_new(element("e-1", "P", "C2.1", 4.0));
        let matched = find_match(&code("C2.1"), &schedule(&[("C2.1", 2.5)])).unwrap();

        let id = ElementId::new("e-1").unwrap();
        let enriched = store.enrich(&id, &matched).unwrap();

        assert_eq!(enriched.total_cost(), Some(10.0));
        assert_eq!(store.enriched_count(), 1);
    }

    #[test]
    fn unknown_projects_and_codes_are_empty() {
        let store = ElementStore::new();
        assert!(store.by_project(&ProjectId::new("none").unwrap()).is_empty());
        assert!(store.ids_with_code(&code("C1")).is_empty());
    }
}
