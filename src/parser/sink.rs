//! Where parsed diplomas are written

use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::{DiplomaIds, DiplomaRecord, DiplomaRepository};
use crate::error::Result;

#[async_trait]
pub trait DiplomaSink: Send + Sync {
    async fn save(&self, record: &DiplomaRecord) -> Result<DiplomaIds>;
}

/// Writes diplomas to `ocr_db`
pub struct PgDiplomaSink {
    pool: PgPool,
}

impl PgDiplomaSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DiplomaSink for PgDiplomaSink {
    async fn save(&self, record: &DiplomaRecord) -> Result<DiplomaIds> {
        DiplomaRepository::new(&self.pool).save(record).await
    }
}
