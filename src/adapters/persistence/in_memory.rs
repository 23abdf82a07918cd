//! In-memory persistence gateway for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::domain::cost::{CostElementRecord, ProjectAggregate};
use crate::domain::element::Element;
use crate::domain::foundation::{ElementId, ProjectId};
use crate::ports::{PersistenceError, PersistenceGateway};

#[derive(Debug, Clone)]
struct CostEntry {
    project_id: ProjectId,
    total_cost: f64,
}

/// In-memory document store.
///
/// Features:
/// - Element documents keyed by id (upsert semantics)
/// - Append-only cost entries
/// - Failure injection per element or for the whole store
#[derive(Default)]
pub struct InMemoryPersistence {
    elements: RwLock<BTreeMap<ElementId, Element>>,
    cost_entries: RwLock<Vec<CostEntry>>,
    aggregates: RwLock<HashMap<ProjectId, ProjectAggregate>>,
    failing: RwLock<HashSet<ElementId>>,
    unavailable: AtomicBool,
    project_loads: AtomicUsize,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates element documents, as if persisted by an earlier run.
    pub async fn with_elements(elements: Vec<Element>) -> Self {
        let store = Self::new();
        {
            let mut docs = store.elements.write().await;
            for element in elements {
                docs.insert(element.id.clone(), element);
            }
        }
        store
    }

    // === Test Helpers ===

    /// Makes every write for this element fail.
    pub async fn fail_writes_for(&self, id: &ElementId) {
        self.failing.write().await.insert(id.clone());
    }

    /// Makes every operation fail while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn element(&self, id: &ElementId) -> Option<Element> {
        self.elements.read().await.get(id).cloned()
    }

    pub async fn element_count(&self) -> usize {
        self.elements.read().await.len()
    }

    pub async fn cost_entry_count(&self) -> usize {
        self.cost_entries.read().await.len()
    }

    pub async fn aggregate(&self, project: &ProjectId) -> Option<ProjectAggregate> {
        self.aggregates.read().await.get(project).cloned()
    }

    /// How often a project's cost elements were loaded.
    pub fn project_loads(&self) -> usize {
        self.project_loads.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Database("store unavailable".to_string()));
        }
        Ok(())
    }

    async fn check_writable(&self, id: &ElementId) -> Result<(), PersistenceError> {
        self.check_available()?;
        if self.failing.read().await.contains(id) {
            return Err(PersistenceError::Database(format!("write rejected for {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryPersistence {
    async fn upsert_element(&self, element: &Element) -> Result<(), PersistenceError> {
        self.check_writable(&element.id).await?;
        self.elements
            .write()
            .await
            .insert(element.id.clone(), element.clone());
        Ok(())
    }

    async fn insert_cost_entry(&self, element: &Element) -> Result<(), PersistenceError> {
        self.check_writable(&element.id).await?;
        let total_cost = element.total_cost().ok_or_else(|| PersistenceError::Corrupt {
            id: element.id.to_string(),
            reason: "element has no cost".to_string(),
        })?;
        self.cost_entries.write().await.push(CostEntry {
            project_id: element.project_id.clone(),
            total_cost,
        });
        Ok(())
    }

    async fn upsert_project_aggregate(
        &self,
        aggregate: &ProjectAggregate,
    ) -> Result<(), PersistenceError> {
        self.check_available()?;
        self.aggregates
            .write()
            .await
            .insert(aggregate.project_id.clone(), aggregate.clone());
        Ok(())
    }

    async fn load_elements(&self) -> Result<Vec<Element>, PersistenceError> {
        self.check_available()?;
        Ok(self.elements.read().await.values().cloned().collect())
    }

    async fn cost_elements_for_project(
        &self,
        project: &ProjectId,
    ) -> Result<Vec<CostElementRecord>, PersistenceError> {
        self.check_available()?;
        self.project_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .elements
            .read()
            .await
            .values()
            .filter(|element| &element.project_id == project)
            .map(CostElementRecord::from_element)
            .collect())
    }

    async fn sum_cost_entries(&self, project: &ProjectId) -> Result<f64, PersistenceError> {
        self.check_available()?;
        Ok(self
            .cost_entries
            .read()
            .await
            .iter()
            .filter(|entry| &entry.project_id == project)
            .map(|entry| entry.total_cost)
            .sum())
    }
}
