//! Database schema initialization

use sqlx::PgPool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &PgPool) -> Result<()> {
    // One statement per round trip; the extended protocol rejects batches
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"CREATE EXTENSION IF NOT EXISTS "uuid-ossp""#,
    r#"
    CREATE TABLE IF NOT EXISTS processed_units (
        id UUID PRIMARY KEY DEFAULT uuid_generate_v4(),
        source_bucket TEXT NOT NULL,
        unit_id TEXT NOT NULL,
        outcome TEXT NOT NULL,
        image_count INTEGER NOT NULL DEFAULT 0,
        processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (source_bucket, unit_id)
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_processed_units_processed_at ON processed_units(processed_at)"#,
    r#"
    CREATE TABLE IF NOT EXISTS directions (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS universities (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS specializations (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        direction_id INTEGER NOT NULL REFERENCES directions(id),
        university_id INTEGER NOT NULL REFERENCES universities(id),
        UNIQUE (name, direction_id, university_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS students (
        id SERIAL PRIMARY KEY,
        full_name TEXT NOT NULL,
        specialization_id INTEGER NOT NULL REFERENCES specializations(id),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (full_name, specialization_id)
    )
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        for statement in SCHEMA_STATEMENTS {
            assert!(statement.contains("IF NOT EXISTS"), "{}", statement);
        }
    }

    #[test]
    fn test_diploma_tables_follow_their_references() {
        let position = |table: &str| {
            SCHEMA_STATEMENTS
                .iter()
                .position(|s| s.contains(&format!("CREATE TABLE IF NOT EXISTS {} ", table)))
                .unwrap()
        };
        assert!(position("directions") < position("specializations"));
        assert!(position("universities") < position("specializations"));
        assert!(position("specializations") < position("students"));
    }
}
