//! Processed-unit ledger
//!
//! Remembers which units were already handled so a unit whose source could
//! not be removed is not processed twice.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::PgPool;
use tokio::io::AsyncWriteExt;

use crate::config::LedgerKind;
use crate::db::{self, ProcessedUnitRepository};
use crate::error::Result;

use super::types::UnitOutcome;

#[async_trait]
pub trait ProcessedLedger: Send + Sync {
    async fn contains(&self, unit_id: &str) -> Result<bool>;

    async fn record(&self, unit_id: &str, outcome: UnitOutcome, image_count: usize) -> Result<()>;
}

/// Ledger that remembers nothing
pub struct NoLedger;

#[async_trait]
impl ProcessedLedger for NoLedger {
    async fn contains(&self, _unit_id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn record(&self, _unit_id: &str, _outcome: UnitOutcome, _image_count: usize) -> Result<()> {
        Ok(())
    }
}

/// One unit id per line in a local file
pub struct FileLedger {
    path: PathBuf,
    ids: Mutex<HashSet<String>>,
}

impl FileLedger {
    /// Load the ledger, starting empty when the file does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let ids = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!("Loaded {} processed units from {}", ids.len(), path.display());
        Ok(Self {
            path,
            ids: Mutex::new(ids),
        })
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}

#[async_trait]
impl ProcessedLedger for FileLedger {
    async fn contains(&self, unit_id: &str) -> Result<bool> {
        Ok(self.ids.lock().contains(unit_id))
    }

    async fn record(&self, unit_id: &str, _outcome: UnitOutcome, _image_count: usize) -> Result<()> {
        if self.ids.lock().contains(unit_id) {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\n", unit_id).as_bytes()).await?;
        file.flush().await?;

        self.ids.lock().insert(unit_id.to_string());
        Ok(())
    }
}

/// `processed_units` table in the OCR database
pub struct PgLedger {
    pool: PgPool,
    source_bucket: String,
}

impl PgLedger {
    pub fn new(pool: PgPool, source_bucket: impl Into<String>) -> Self {
        Self {
            pool,
            source_bucket: source_bucket.into(),
        }
    }
}

#[async_trait]
impl ProcessedLedger for PgLedger {
    async fn contains(&self, unit_id: &str) -> Result<bool> {
        ProcessedUnitRepository::new(&self.pool)
            .contains(&self.source_bucket, unit_id)
            .await
    }

    async fn record(&self, unit_id: &str, outcome: UnitOutcome, image_count: usize) -> Result<()> {
        ProcessedUnitRepository::new(&self.pool)
            .upsert(
                &self.source_bucket,
                unit_id,
                outcome.as_str(),
                i32::try_from(image_count).unwrap_or(i32::MAX),
            )
            .await?;
        Ok(())
    }
}

/// Build the ledger selected by configuration
pub async fn open_ledger(
    kind: &LedgerKind,
    database_url: &str,
    source_bucket: &str,
) -> Result<Arc<dyn ProcessedLedger>> {
    match kind {
        LedgerKind::None => Ok(Arc::new(NoLedger)),
        LedgerKind::File(path) => Ok(Arc::new(FileLedger::open(path).await?)),
        LedgerKind::Postgres => {
            let pool = db::create_pool(database_url).await?;
            tracing::info!("Using PostgreSQL ledger for bucket {}", source_bucket);
            Ok(Arc::new(PgLedger::new(pool, source_bucket)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_ledger_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/processed_folders.txt");

        let ledger = FileLedger::open(&path).await.unwrap();
        assert!(ledger.is_empty());
        ledger.record("0001", UnitOutcome::Success, 3).await.unwrap();
        ledger.record("0002", UnitOutcome::Failed, 1).await.unwrap();
        ledger.record("0001", UnitOutcome::Success, 3).await.unwrap();

        let reopened = FileLedger::open(&path).await.unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.contains("0001").await.unwrap());
        assert!(!reopened.contains("0003").await.unwrap());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "0001\n0002\n");
    }

    #[tokio::test]
    async fn test_failed_append_is_not_remembered() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FileLedger::open(dir.path().join("state/ledger.txt")).await.unwrap();

        // A plain file where the ledger directory should be
        std::fs::write(dir.path().join("state"), b"").unwrap();

        assert!(ledger.record("0001", UnitOutcome::Success, 1).await.is_err());
        assert!(!ledger.contains("0001").await.unwrap());
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_no_ledger_never_remembers() {
        let ledger = NoLedger;
        ledger.record("0001", UnitOutcome::Success, 1).await.unwrap();
        assert!(!ledger.contains("0001").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_ledger_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let kind = LedgerKind::File(dir.path().join("ledger.txt"));
        let ledger = open_ledger(&kind, "postgres://unused", "documents").await.unwrap();
        ledger.record("a", UnitOutcome::Empty, 0).await.unwrap();
        assert!(ledger.contains("a").await.unwrap());
    }
}
