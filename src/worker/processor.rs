//! OCR worker
//!
//! Drains the source bucket unit by unit. Every image of a unit goes
//! through the OCR provider; a unit whose images all finished cleanly is
//! reported to the results bucket, anything else lands in the errors bucket
//! together with a copy of its sources. Sources are only removed after the
//! report has been stored.
//!
//! With `PROCESS_LIMIT` set, a folder may take several passes. Per-image
//! results are kept in `{unit}/ocr_progress.json` next to the sources until
//! the last image is done, and only then is the unit reported and disposed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::{SourceDisposition, WorkerConfig};
use crate::error::{AppError, Result, StorageError};
use crate::ocr::{OcrProviderTrait, PromptType};
use crate::storage::{ObjectMetadata, ObjectStore};

use super::discovery::{discover_units, natural_cmp, unit_images, unit_objects};
use super::ledger::ProcessedLedger;
use super::report::{
    errors_json_key, progress_key, render_markdown, result_json_key, result_markdown_key,
};
use super::types::{
    FolderAnalysis, ImageResult, RunSummary, UnitKind, UnitOutcome, UnitReport, WorkUnit,
};

pub struct Worker {
    store: Arc<dyn ObjectStore>,
    provider: Arc<dyn OcrProviderTrait>,
    ledger: Arc<dyn ProcessedLedger>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        provider: Arc<dyn OcrProviderTrait>,
        ledger: Arc<dyn ProcessedLedger>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            provider,
            ledger,
            config,
        }
    }

    /// Check storage and the model server, then make sure all buckets exist
    pub async fn prepare(&self) -> Result<()> {
        let buckets = self.store.check_connection().await?;
        tracing::info!("Storage reachable ({} buckets)", buckets.len());

        self.provider.prepare().await?;
        tracing::info!("OCR provider ready");

        for bucket in [
            &self.config.source_bucket,
            &self.config.results_bucket,
            &self.config.errors_bucket,
        ] {
            let status = self.store.ensure_bucket(bucket).await?;
            tracing::debug!("Bucket {}: {:?}", bucket, status);
        }
        Ok(())
    }

    /// One pass over the source bucket
    pub async fn run_once(&self) -> Result<RunSummary> {
        self.prepare().await?;

        let units = discover_units(
            self.store.as_ref(),
            &self.config.source_bucket,
            &self.config.processed_prefix,
            self.ledger.as_ref(),
        )
        .await?;

        let mut summary = RunSummary::default();
        if units.is_empty() {
            tracing::info!("No pending units in {}", self.config.source_bucket);
            return Ok(summary);
        }

        tracing::info!("Found {} pending units", units.len());
        for unit in &units {
            match self.process_unit(unit).await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    tracing::error!("Unit {} failed: {}", unit.id, e);
                    self.report_unit_error(unit, &e).await;
                    summary.record(UnitOutcome::Failed);
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            empty = summary.empty,
            pending = summary.pending,
            "Pass completed"
        );
        Ok(summary)
    }

    /// Repeat `run_once` until `shutdown` flips to true
    pub async fn run_continuous(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.config.poll_interval_secs,
            bucket = %self.config.source_bucket,
            "Starting OCR worker loop"
        );

        let mut tick = interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!("Worker pass failed: {}. Retrying next tick", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutting down OCR worker");
                        break;
                    }
                }
            }
        }
    }

    pub async fn process_unit(&self, unit: &WorkUnit) -> Result<UnitOutcome> {
        let bucket = &self.config.source_bucket;
        tracing::info!("=== Processing unit: {} ===", unit.id);

        let images = unit_images(self.store.as_ref(), bucket, unit).await?;
        if images.is_empty() {
            tracing::warn!("No images found in unit: {}", unit.id);
            let removed = self.store.delete_prefix(bucket, &format!("{}/", unit.id)).await?;
            if removed > 0 {
                tracing::info!("Removed {} leftover objects from {}", removed, unit.id);
            }
            self.ledger.record(&unit.id, UnitOutcome::Empty, 0).await?;
            return Ok(UnitOutcome::Empty);
        }

        let progress = match unit.kind {
            UnitKind::Folder => Some(progress_key(&unit.id)),
            UnitKind::Loose { .. } => None,
        };
        let mut results = match &progress {
            Some(key) => self.load_progress(key).await?,
            None => Vec::new(),
        };
        if !results.is_empty() {
            tracing::info!("Resuming {}: {} of {} images already done", unit.id, results.len(), images.len());
        }

        let pending: Vec<&ObjectMetadata> = images
            .iter()
            .filter(|image| !results.iter().any(|r| r.image == image.key))
            .collect();
        let batch = match self.config.process_limit {
            0 => pending.len(),
            limit => limit.min(pending.len()),
        };

        for (idx, image) in pending[..batch].iter().enumerate() {
            tracing::info!("[{}/{}] Processing: {}", idx + 1, batch, image.key);
            results.push(self.process_image(image).await);

            if idx + 1 < batch && self.config.image_pause_millis > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.image_pause_millis)).await;
            }
        }

        let remaining = pending.len() - batch;
        if remaining > 0 {
            if let Some(key) = &progress {
                self.store
                    .put_object(bucket, key, serde_json::to_vec_pretty(&results)?, "application/json")
                    .await?;
            }
            tracing::warn!(
                "Processed {} of {} images in {} (PROCESS_LIMIT), {} left for the next pass",
                results.len(),
                images.len(),
                unit.id,
                remaining
            );
            return Ok(UnitOutcome::Pending);
        }

        results.sort_by(|a, b| natural_cmp(a.file_name(), b.file_name()).then_with(|| a.image.cmp(&b.image)));
        let analysis = FolderAnalysis::from_results(&results);
        tracing::info!(
            total = analysis.total,
            success = analysis.success,
            partial = analysis.partial,
            errors = analysis.errors,
            "Analysis for {}",
            unit.id
        );

        let outcome = if analysis.all_success {
            UnitOutcome::Success
        } else {
            UnitOutcome::Failed
        };
        let report = UnitReport {
            folder: unit.id.clone(),
            source_bucket: bucket.clone(),
            processed_at: Utc::now(),
            prompt_type: self.config.prompt,
            analysis,
            reason: (outcome == UnitOutcome::Failed).then(|| analysis.failure_reason()),
            results,
        };

        let saved = match outcome {
            UnitOutcome::Success => self.save_results(&report).await,
            _ => self.save_errors(unit, &report).await,
        };
        if let Err(e) = saved {
            tracing::error!("Failed to store report for {}: {}. Source kept", unit.id, e);
            return Err(e);
        }

        let keys = unit_objects(self.store.as_ref(), bucket, unit).await?;
        if let Err((removed, e)) = self.dispose_source(&keys).await {
            if removed == 0 {
                // Sources are intact, so the unit is redone from scratch next pass
                if outcome == UnitOutcome::Success {
                    self.withdraw_results(&report.folder).await;
                }
            } else {
                tracing::error!(
                    "{} of {} sources of {} already removed, keeping its report",
                    removed,
                    keys.len(),
                    unit.id
                );
                if let Err(e) = self.ledger.record(&unit.id, outcome, images.len()).await {
                    tracing::warn!("Could not record {} in ledger: {}", unit.id, e);
                }
            }
            return Err(e);
        }
        if let Some(key) = &progress {
            self.store.delete_object(bucket, key).await?;
        }

        self.ledger.record(&unit.id, outcome, images.len()).await?;
        Ok(outcome)
    }

    /// Results stored by earlier passes over a unit
    async fn load_progress(&self, key: &str) -> Result<Vec<ImageResult>> {
        match self.store.get_object(&self.config.source_bucket, key).await {
            Ok(object) => Ok(serde_json::from_slice(&object.data)?),
            Err(AppError::Storage(StorageError::ObjectNotFound(_))) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn process_image(&self, image: &ObjectMetadata) -> ImageResult {
        let object = match self.store.get_object(&self.config.source_bucket, &image.key).await {
            Ok(object) => object,
            Err(e) => {
                tracing::error!("Failed to download {}: {}", image.key, e);
                return ImageResult::failed(&image.key, image.size, format!("Download failed: {}", e));
            }
        };

        match self.provider.recognize(&object.data, self.config.prompt).await {
            Ok(result) => {
                let result = ImageResult::from_ocr(&image.key, object.data.len() as i64, result);
                tracing::info!("{}: {:?}", image.key, result.status);
                result
            }
            Err(e) => {
                tracing::error!("OCR failed for {}: {}", image.key, e);
                ImageResult::failed(&image.key, object.data.len() as i64, e.to_string())
            }
        }
    }

    async fn save_results(&self, report: &UnitReport) -> Result<()> {
        let bucket = &self.config.results_bucket;
        let json_key = result_json_key(&report.folder);
        self.store
            .put_object(bucket, &json_key, serde_json::to_vec_pretty(report)?, "application/json")
            .await?;
        tracing::info!("Saved to {}/{}", bucket, json_key);

        if self.config.prompt == PromptType::Markdown {
            let md_key = result_markdown_key(&report.folder);
            self.store
                .put_object(
                    bucket,
                    &md_key,
                    render_markdown(report).into_bytes(),
                    "text/markdown; charset=utf-8",
                )
                .await?;
            tracing::info!("Saved to {}/{}", bucket, md_key);
        }
        Ok(())
    }

    async fn save_errors(&self, unit: &WorkUnit, report: &UnitReport) -> Result<()> {
        let bucket = &self.config.errors_bucket;
        let key = errors_json_key(&report.folder);
        self.store
            .put_object(bucket, &key, serde_json::to_vec_pretty(report)?, "application/json")
            .await?;
        tracing::warn!("Unit {} has issues, report saved to {}/{}", unit.id, bucket, key);

        for source_key in unit_objects(self.store.as_ref(), &self.config.source_bucket, unit).await? {
            self.store
                .copy_object(&self.config.source_bucket, &source_key, bucket, &source_key)
                .await?;
        }
        Ok(())
    }

    /// Delete or archive the unit's sources. On failure, returns how many
    /// sources were already gone along with the error
    async fn dispose_source(&self, keys: &[String]) -> std::result::Result<(), (usize, AppError)> {
        let bucket = &self.config.source_bucket;
        for (removed, key) in keys.iter().enumerate() {
            if self.config.disposition == SourceDisposition::Archive {
                let target = format!("{}/{}", self.config.processed_prefix.trim_matches('/'), key);
                self.store
                    .copy_object(bucket, key, bucket, &target)
                    .await
                    .map_err(|e| (removed, e))?;
            }
            self.store
                .delete_object(bucket, key)
                .await
                .map_err(|e| (removed, e))?;
        }

        let verb = match self.config.disposition {
            SourceDisposition::Delete => "Deleted",
            SourceDisposition::Archive => "Archived",
        };
        tracing::info!("{} {} source objects", verb, keys.len());
        Ok(())
    }

    /// Take a stored report back out of the results bucket
    async fn withdraw_results(&self, unit_id: &str) {
        let bucket = &self.config.results_bucket;
        for key in [result_json_key(unit_id), result_markdown_key(unit_id)] {
            if let Err(e) = self.store.delete_object(bucket, &key).await {
                tracing::warn!("Could not withdraw {}/{}: {}", bucket, key, e);
            }
        }
    }

    /// Best-effort error report for a unit that failed outside OCR
    async fn report_unit_error(&self, unit: &WorkUnit, error: &AppError) {
        let body = serde_json::json!({
            "folder": unit.id,
            "source_bucket": self.config.source_bucket,
            "processed_at": Utc::now(),
            "reason": error.to_string(),
        });
        let Ok(data) = serde_json::to_vec_pretty(&body) else {
            return;
        };
        if let Err(e) = self
            .store
            .put_object(&self.config.errors_bucket, &errors_json_key(&unit.id), data, "application/json")
            .await
        {
            tracing::warn!("Could not store error report for {}: {}", unit.id, e);
        }
    }
}
