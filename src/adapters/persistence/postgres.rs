//! PostgreSQL implementation of PersistenceGateway.
//!
//! Elements, cost entries and aggregates are stored as JSONB documents
//! alongside the few columns needed for filtering.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::domain::cost::{CostElementRecord, ProjectAggregate};
use crate::domain::element::Element;
use crate::domain::foundation::{ElementId, ProjectId};
use crate::ports::{PersistenceError, PersistenceGateway};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS elements (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        code TEXT,
        document JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS elements_project_idx ON elements (project_id)",
    r#"
    CREATE TABLE IF NOT EXISTS cost_entries (
        id BIGSERIAL PRIMARY KEY,
        element_id TEXT NOT NULL,
        project_id TEXT NOT NULL,
        total_cost DOUBLE PRECISION NOT NULL,
        document JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS cost_entries_project_idx ON cost_entries (project_id)",
    r#"
    CREATE TABLE IF NOT EXISTS project_aggregates (
        project_id TEXT PRIMARY KEY,
        document JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// PostgreSQL document store.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn to_document<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, PersistenceError> {
    serde_json::to_value(value).map_err(|e| PersistenceError::Encoding(e.to_string()))
}

#[async_trait]
impl PersistenceGateway for PostgresPersistence {
    async fn upsert_element(&self, element: &Element) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO elements (id, project_id, code, document, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (id) DO UPDATE SET
                project_id = EXCLUDED.project_id,
                code = EXCLUDED.code,
                document = EXCLUDED.document,
                updated_at = now()
            "#,
        )
        .bind(element.id.as_str())
        .bind(element.project_id.as_str())
        .bind(element.code.as_ref().map(|c| c.as_str()))
        .bind(to_document(element)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_cost_entry(&self, element: &Element) -> Result<(), PersistenceError> {
        let cost = element.cost.as_ref().ok_or_else(|| PersistenceError::Corrupt {
            id: element.id.to_string(),
            reason: "element has no cost".to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO cost_entries (element_id, project_id, total_cost, document)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(element.id.as_str())
        .bind(element.project_id.as_str())
        .bind(cost.total_cost)
        .bind(to_document(cost)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_project_aggregate(
        &self,
        aggregate: &ProjectAggregate,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO project_aggregates (project_id, document, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (project_id) DO UPDATE SET
                document = EXCLUDED.document,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(aggregate.project_id.as_str())
        .bind(to_document(aggregate)?)
        .bind(aggregate.updated_at.as_datetime())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_elements(&self) -> Result<Vec<Element>, PersistenceError> {
        let rows = sqlx::query("SELECT id, document FROM elements ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut elements = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let document: serde_json::Value = row.try_get("document")?;
            match serde_json::from_value::<Element>(document) {
                Ok(element) => elements.push(element),
                Err(e) => {
                    tracing::warn!(element_id = %id, error = %e, "Skipping unreadable element document");
                }
            }
        }
        Ok(elements)
    }

    async fn cost_elements_for_project(
        &self,
        project: &ProjectId,
    ) -> Result<Vec<CostElementRecord>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT id,
                   (document->'cost'->>'totalCost')::DOUBLE PRECISION AS total_cost,
                   document->'cost'->>'currency' AS currency
            FROM elements
            WHERE project_id = $1
            ORDER BY id
            "#,
        )
        .bind(project.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<CostElementRecord, PersistenceError> {
                let id: String = row.try_get("id")?;
                let element_id = ElementId::new(id.clone()).map_err(|e| PersistenceError::Corrupt {
                    id,
                    reason: e.to_string(),
                })?;
                Ok(CostElementRecord {
                    element_id,
                    total_cost: row.try_get("total_cost")?,
                    currency: row.try_get("currency")?,
                })
            })
            .collect()
    }

    async fn sum_cost_entries(&self, project: &ProjectId) -> Result<f64, PersistenceError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(total_cost), 0)::DOUBLE PRECISION AS total FROM cost_entries WHERE project_id = $1",
        )
        .bind(project.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("total")?)
    }
}

impl std::fmt::Debug for PostgresPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresPersistence").finish_non_exhaustive()
    }
}
