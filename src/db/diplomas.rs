//! Parsed diploma persistence
//!
//! A diploma is stored as four linked rows: the qualification (`directions`),
//! the institution (`universities`), the specialty offered by that institution
//! for that qualification (`specializations`) and the holder (`students`).
//! Every insert is an upsert so re-parsing the same result is harmless.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::Result;

/// Fields of one diploma, all required
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiplomaRecord {
    pub full_name: String,
    pub direction: String,
    pub university: String,
    pub specialization: String,
}

/// Row ids touched by a save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiplomaIds {
    pub direction_id: i32,
    pub university_id: i32,
    pub specialization_id: i32,
    pub student_id: i32,
}

pub struct DiplomaRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> DiplomaRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Store a diploma in one transaction
    pub async fn save(&self, record: &DiplomaRecord) -> Result<DiplomaIds> {
        let mut tx = self.pool.begin().await?;

        let direction_id = upsert_named(&mut tx, UPSERT_DIRECTION, &record.direction).await?;
        let university_id = upsert_named(&mut tx, UPSERT_UNIVERSITY, &record.university).await?;

        let specialization_id = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO specializations (name, direction_id, university_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (name, direction_id, university_id)
            DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(&record.specialization)
        .bind(direction_id)
        .bind(university_id)
        .fetch_one(&mut *tx)
        .await?;

        let student_id = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO students (full_name, specialization_id)
            VALUES ($1, $2)
            ON CONFLICT (full_name, specialization_id)
            DO UPDATE SET full_name = EXCLUDED.full_name
            RETURNING id
            "#,
        )
        .bind(&record.full_name)
        .bind(specialization_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(DiplomaIds {
            direction_id,
            university_id,
            specialization_id,
            student_id,
        })
    }
}

const UPSERT_DIRECTION: &str = r#"
    INSERT INTO directions (name) VALUES ($1)
    ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
    RETURNING id
"#;

const UPSERT_UNIVERSITY: &str = r#"
    INSERT INTO universities (name) VALUES ($1)
    ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
    RETURNING id
"#;

async fn upsert_named(tx: &mut Transaction<'_, Postgres>, sql: &str, name: &str) -> Result<i32> {
    let id = sqlx::query_scalar::<_, i32>(sql)
        .bind(name)
        .fetch_one(&mut **tx)
        .await?;
    Ok(id)
}
