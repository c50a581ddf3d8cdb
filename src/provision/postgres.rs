//! Postgres bootstrap: application databases with dedicated owners

use std::str::FromStr;

use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::config::ProvisionConfig;
use crate::error::Result;

use super::ProvisionError;

/// A database and the user that owns it
#[derive(Debug, Clone)]
pub struct DatabaseSpec {
    pub name: String,
    pub owner: String,
    pub password: String,
}

/// One row of the provisioning summary
#[derive(Debug, Clone, Serialize, PartialEq, Eq, sqlx::FromRow)]
pub struct ProvisionSummary {
    pub database: String,
    pub owner: String,
    /// Installed `uuid-ossp` version, if any
    pub uuid_ossp: Option<String>,
}

pub struct PostgresBootstrap {
    admin_url: String,
    databases: Vec<DatabaseSpec>,
}

impl PostgresBootstrap {
    pub fn new(admin_url: impl Into<String>, databases: Vec<DatabaseSpec>) -> Self {
        Self {
            admin_url: admin_url.into(),
            databases,
        }
    }

    /// `ocr_db` owned by `ocr_user` and `norma_db` owned by `norma_user`
    pub fn from_config(admin_url: &str, config: &ProvisionConfig) -> Self {
        Self::new(
            admin_url,
            vec![
                DatabaseSpec {
                    name: "ocr_db".to_string(),
                    owner: "ocr_user".to_string(),
                    password: config.ocr_db_password.clone(),
                },
                DatabaseSpec {
                    name: "norma_db".to_string(),
                    owner: "norma_user".to_string(),
                    password: config.norma_db_password.clone(),
                },
            ],
        )
    }

    /// SQL run against the maintenance database for one spec
    fn admin_statements(spec: &DatabaseSpec, role_exists: bool, db_exists: bool) -> std::result::Result<Vec<String>, ProvisionError> {
        let db = quote_ident(&spec.name)?;
        let owner = quote_ident(&spec.owner)?;
        let password = quote_literal(&spec.password);

        let mut statements = Vec::new();
        if role_exists {
            statements.push(format!("ALTER USER {} WITH PASSWORD {}", owner, password));
        } else {
            statements.push(format!("CREATE USER {} WITH PASSWORD {}", owner, password));
        }
        if !db_exists {
            statements.push(format!("CREATE DATABASE {}", db));
        }
        statements.push(format!("GRANT ALL PRIVILEGES ON DATABASE {} TO {}", db, owner));
        statements.push(format!("ALTER DATABASE {} OWNER TO {}", db, owner));
        Ok(statements)
    }

    /// SQL run inside the new database
    fn database_statements(spec: &DatabaseSpec) -> std::result::Result<Vec<String>, ProvisionError> {
        let owner = quote_ident(&spec.owner)?;
        Ok(vec![
            r#"CREATE EXTENSION IF NOT EXISTS "uuid-ossp""#.to_string(),
            format!("GRANT ALL ON SCHEMA public TO {}", owner),
        ])
    }

    async fn connect(&self, database: Option<&str>) -> Result<PgPool> {
        let mut options = PgConnectOptions::from_str(&self.admin_url)?;
        if let Some(database) = database {
            options = options.database(database);
        }
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(pool)
    }

    pub async fn run(&self) -> Result<Vec<ProvisionSummary>> {
        let admin = self.connect(None).await?;
        let mut summaries = Vec::with_capacity(self.databases.len());

        for spec in &self.databases {
            let role_exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_roles WHERE rolname = $1)")
                    .bind(&spec.owner)
                    .fetch_one(&admin)
                    .await?;
            let db_exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
                    .bind(&spec.name)
                    .fetch_one(&admin)
                    .await?;

            for statement in Self::admin_statements(spec, role_exists, db_exists)? {
                sqlx::query(&statement).execute(&admin).await?;
            }

            let pool = self.connect(Some(&spec.name)).await?;
            for statement in Self::database_statements(spec)? {
                sqlx::query(&statement).execute(&pool).await?;
            }
            let summary = sqlx::query_as::<_, ProvisionSummary>(
                r#"
                SELECT d.datname AS database,
                       r.rolname AS owner,
                       (SELECT extversion FROM pg_extension WHERE extname = 'uuid-ossp') AS uuid_ossp
                FROM pg_database d
                JOIN pg_roles r ON r.oid = d.datdba
                WHERE d.datname = current_database()
                "#,
            )
            .fetch_one(&pool)
            .await?;
            pool.close().await;

            tracing::info!(
                database = %summary.database,
                owner = %summary.owner,
                uuid_ossp = ?summary.uuid_ossp,
                "Database ready"
            );
            summaries.push(summary);
        }

        admin.close().await;
        Ok(summaries)
    }
}

/// Double-quote an identifier after checking it is a plain name
pub fn quote_ident(name: &str) -> std::result::Result<String, ProvisionError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    };
    if !valid || name.len() > 63 {
        return Err(ProvisionError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name))
}

/// Single-quote a string literal, doubling embedded quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn spec() -> DatabaseSpec {
        DatabaseSpec {
            name: "ocr_db".into(),
            owner: "ocr_user".into(),
            password: "it's secret".into(),
        }
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("ocr_db").unwrap(), "\"ocr_db\"");
        assert!(quote_ident("_x1").is_ok());
        assert!(quote_ident("1db").is_err());
        assert!(quote_ident("db; DROP TABLE x").is_err());
        assert!(quote_ident("").is_err());
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_fresh_cluster_statements() {
        let statements = PostgresBootstrap::admin_statements(&spec(), false, false).unwrap();
        assert_eq!(
            statements,
            vec![
                "CREATE USER \"ocr_user\" WITH PASSWORD 'it''s secret'".to_string(),
                "CREATE DATABASE \"ocr_db\"".to_string(),
                "GRANT ALL PRIVILEGES ON DATABASE \"ocr_db\" TO \"ocr_user\"".to_string(),
                "ALTER DATABASE \"ocr_db\" OWNER TO \"ocr_user\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_rerun_skips_creation() {
        let statements = PostgresBootstrap::admin_statements(&spec(), true, true).unwrap();
        assert!(statements[0].starts_with("ALTER USER"));
        assert!(statements.iter().all(|s| !s.starts_with("CREATE")));
    }

    #[test]
    fn test_database_statements_enable_extension() {
        let statements = PostgresBootstrap::database_statements(&spec()).unwrap();
        assert!(statements[0].contains("IF NOT EXISTS \"uuid-ossp\""));
    }

    #[test]
    fn test_from_config_covers_both_databases() {
        let bootstrap = PostgresBootstrap::from_config("postgres://localhost/postgres", &Config::default().provision);
        let names: Vec<_> = bootstrap.databases.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["ocr_db", "norma_db"]);
    }
}
