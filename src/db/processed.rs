//! Processed-unit database operations

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;

/// Processed unit record
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProcessedUnit {
    pub id: Uuid,
    pub source_bucket: String,
    pub unit_id: String,
    pub outcome: String,
    pub image_count: i32,
    pub processed_at: DateTime<Utc>,
}

/// Processed unit repository
pub struct ProcessedUnitRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> ProcessedUnitRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn contains(&self, source_bucket: &str, unit_id: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM processed_units
                WHERE source_bucket = $1 AND unit_id = $2
            )
            "#,
        )
        .bind(source_bucket)
        .bind(unit_id)
        .fetch_one(self.pool)
        .await?;

        Ok(exists)
    }

    /// Record a unit, replacing any earlier outcome
    pub async fn upsert(
        &self,
        source_bucket: &str,
        unit_id: &str,
        outcome: &str,
        image_count: i32,
    ) -> Result<ProcessedUnit> {
        let unit = sqlx::query_as::<_, ProcessedUnit>(
            r#"
            INSERT INTO processed_units (source_bucket, unit_id, outcome, image_count)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (source_bucket, unit_id)
            DO UPDATE SET outcome = EXCLUDED.outcome,
                          image_count = EXCLUDED.image_count,
                          processed_at = NOW()
            RETURNING id, source_bucket, unit_id, outcome, image_count, processed_at
            "#,
        )
        .bind(source_bucket)
        .bind(unit_id)
        .bind(outcome)
        .bind(image_count)
        .fetch_one(self.pool)
        .await?;

        Ok(unit)
    }
}
