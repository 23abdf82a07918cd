//! PersistenceGateway port - Interface to the document store.
//!
//! Elements, cost entries and project aggregates are stored as documents.
//! The store is the durable record. In-process maps are rebuilt from it on
//! start and are never treated as authoritative.

use async_trait::async_trait;

use crate::domain::cost::{CostElementRecord, ProjectAggregate};
use crate::domain::element::Element;
use crate::domain::foundation::{ElementId, ProjectId};

/// Per-item result of a batch write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
    /// Identifiers whose write failed.
    pub failed_ids: Vec<ElementId>,
}

impl BatchOutcome {
    pub fn record(&mut self, id: &ElementId, result: &Result<(), PersistenceError>) {
        match result {
            Ok(()) => self.succeeded += 1,
            Err(_) => {
                self.failed += 1;
                self.failed_ids.push(id.clone());
            }
        }
    }
}

/// Port for durable storage of elements, cost entries and aggregates.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Inserts or replaces the element document.
    async fn upsert_element(&self, element: &Element) -> Result<(), PersistenceError>;

    /// Upserts each element independently. A failing item is logged and
    /// counted, and never stops the rest of the batch.
    async fn upsert_elements(&self, elements: &[Element]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for element in elements {
            let result = self.upsert_element(element).await;
            if let Err(e) = &result {
                tracing::warn!(element_id = %element.id, error = %e, "Element upsert failed");
            }
            outcome.record(&element.id, &result);
        }
        outcome
    }

    /// Appends a cost entry for an enriched element.
    async fn insert_cost_entry(&self, element: &Element) -> Result<(), PersistenceError>;

    async fn upsert_project_aggregate(
        &self,
        aggregate: &ProjectAggregate,
    ) -> Result<(), PersistenceError>;

    /// Every stored element, used to rebuild in-process state on start.
    async fn load_elements(&self) -> Result<Vec<Element>, PersistenceError>;

    /// Cost-relevant projections of the project's elements. May contain
    /// the same element more than once.
    async fn cost_elements_for_project(
        &self,
        project: &ProjectId,
    ) -> Result<Vec<CostElementRecord>, PersistenceError>;

    /// Raw sum over the project's cost-entry collection.
    async fn sum_cost_entries(&self, project: &ProjectId) -> Result<f64, PersistenceError>;
}

/// Errors raised by persistence adapters.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(String),

    #[error("cannot encode document: {0}")]
    Encoding(String),

    #[error("corrupt document for {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        PersistenceError::Database(err.to_string())
    }
}
