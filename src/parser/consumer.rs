//! Results bucket consumer
//!
//! Every `.json` report in the results bucket is parsed once. A report whose
//! first page yields all four fields is written to Postgres and its folder is
//! removed from the results bucket. Anything else is moved to the errors
//! bucket with a `parse_error.json` explaining what is missing.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::ParserConfig;
use crate::error::Result;
use crate::storage::ObjectStore;
use crate::worker::UnitReport;

use super::first_page::{parse_first_page, ParsedDiploma};
use super::sink::DiplomaSink;

/// How a report was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    Saved,
    /// Moved to the errors bucket
    NeedsReview,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseSummary {
    pub found: usize,
    pub saved: usize,
    pub review: usize,
    pub failed: usize,
}

/// Body of `{folder}/parse_error.json`
#[derive(Serialize)]
struct ParseErrorReport<'a> {
    original_file: &'a str,
    folder: &'a str,
    reason: &'a str,
    requires_manual_review: bool,
    parsed_data: &'a ParsedDiploma,
    missing_fields: Vec<&'static str>,
    parse_errors: &'a [String],
    moved_at: DateTime<Utc>,
    original_data: &'a Value,
}

pub fn parse_error_key(folder: &str) -> String {
    format!("{}/parse_error.json", folder)
}

pub struct ResultParser {
    store: Arc<dyn ObjectStore>,
    sink: Arc<dyn DiplomaSink>,
    config: ParserConfig,
}

impl ResultParser {
    pub fn new(store: Arc<dyn ObjectStore>, sink: Arc<dyn DiplomaSink>, config: ParserConfig) -> Self {
        Self {
            store,
            sink,
            config,
        }
    }

    pub async fn prepare(&self) -> Result<()> {
        let buckets = self.store.check_connection().await?;
        tracing::info!("Storage reachable ({} buckets)", buckets.len());

        for bucket in [&self.config.results_bucket, &self.config.errors_bucket] {
            let status = self.store.ensure_bucket(bucket).await?;
            tracing::debug!("Bucket {}: {:?}", bucket, status);
        }
        Ok(())
    }

    /// One pass over the results bucket
    pub async fn run_once(&self) -> Result<ParseSummary> {
        self.prepare().await?;

        let keys: Vec<String> = self
            .store
            .list_all_objects(&self.config.results_bucket, None)
            .await?
            .into_iter()
            .map(|object| object.key)
            .filter(|key| key.ends_with(".json"))
            .collect();

        let mut summary = ParseSummary {
            found: keys.len(),
            ..Default::default()
        };
        if keys.is_empty() {
            tracing::debug!("No reports in {}", self.config.results_bucket);
            return Ok(summary);
        }

        tracing::info!("Found {} result files", keys.len());
        for key in &keys {
            match self.process_file(key).await {
                Ok(ParseOutcome::Saved) => summary.saved += 1,
                Ok(ParseOutcome::NeedsReview) => summary.review += 1,
                Err(e) => {
                    tracing::error!("Failed to handle {}: {}", key, e);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            found = summary.found,
            saved = summary.saved,
            review = summary.review,
            failed = summary.failed,
            "Parse pass completed"
        );
        Ok(summary)
    }

    /// Repeat `run_once` until `shutdown` flips to true
    pub async fn run_continuous(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.config.poll_interval_secs,
            bucket = %self.config.results_bucket,
            "Starting diploma parser loop"
        );

        let mut tick = interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!("Parse pass failed: {}. Retrying next tick", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutting down diploma parser");
                        break;
                    }
                }
            }
        }
    }

    pub async fn process_file(&self, key: &str) -> Result<ParseOutcome> {
        tracing::info!("=== Parsing: {} ===", key);
        let object = self.store.get_object(&self.config.results_bucket, key).await?;
        let folder = folder_of(key);

        let data: Value = match serde_json::from_slice(&object.data) {
            Ok(data) => data,
            Err(e) => {
                let raw = Value::String(String::from_utf8_lossy(&object.data).into_owned());
                let reason = format!("Invalid JSON: {}", e);
                self.move_to_errors(key, &folder, &raw, &unparsed(&reason), &reason)
                    .await?;
                return Ok(ParseOutcome::NeedsReview);
            }
        };

        let report: UnitReport = match serde_json::from_value(data.clone()) {
            Ok(report) => report,
            Err(e) => {
                let reason = format!("Not an OCR report: {}", e);
                self.move_to_errors(key, &folder, &data, &unparsed(&reason), &reason)
                    .await?;
                return Ok(ParseOutcome::NeedsReview);
            }
        };

        let Some(text) = first_page_text(&report) else {
            let reason = "First page OCR text not found";
            self.move_to_errors(key, &folder, &data, &unparsed(reason), reason)
                .await?;
            return Ok(ParseOutcome::NeedsReview);
        };

        let mut parsed = parse_first_page(text);
        let Some(record) = parsed.to_record() else {
            let reason = format!(
                "Manual review required. Missing: {}",
                parsed.missing_fields().join(", ")
            );
            self.move_to_errors(key, &folder, &data, &parsed, &reason)
                .await?;
            return Ok(ParseOutcome::NeedsReview);
        };

        match self.sink.save(&record).await {
            Ok(ids) => {
                tracing::info!(
                    student_id = ids.student_id,
                    specialization_id = ids.specialization_id,
                    "Saved diploma for {}",
                    folder
                );
                self.remove_from_results(key, &folder).await?;
                Ok(ParseOutcome::Saved)
            }
            Err(e) => {
                tracing::error!("Database error for {}: {}", folder, e);
                let reason = format!("Database write failed: {}", e);
                parsed.errors.push(reason.clone());
                self.move_to_errors(key, &folder, &data, &parsed, &reason)
                    .await?;
                Ok(ParseOutcome::NeedsReview)
            }
        }
    }

    async fn move_to_errors(
        &self,
        key: &str,
        folder: &str,
        original: &Value,
        parsed: &ParsedDiploma,
        reason: &str,
    ) -> Result<()> {
        let errors = &self.config.errors_bucket;
        let body = ParseErrorReport {
            original_file: key,
            folder,
            reason,
            requires_manual_review: true,
            parsed_data: parsed,
            missing_fields: parsed.missing_fields(),
            parse_errors: &parsed.errors,
            moved_at: Utc::now(),
            original_data: original,
        };
        let error_key = parse_error_key(folder);
        self.store
            .put_object(errors, &error_key, serde_json::to_vec_pretty(&body)?, "application/json")
            .await?;
        self.store
            .copy_object(&self.config.results_bucket, key, errors, key)
            .await?;
        tracing::warn!("{} needs manual review ({}), moved to {}/{}", key, reason, errors, error_key);

        self.remove_from_results(key, folder).await
    }

    async fn remove_from_results(&self, key: &str, folder: &str) -> Result<()> {
        let bucket = &self.config.results_bucket;
        if key.contains('/') {
            let removed = self.store.delete_prefix(bucket, &format!("{}/", folder)).await?;
            tracing::info!("Deleted {} objects of {} from {}", removed, folder, bucket);
        } else {
            self.store.delete_object(bucket, key).await?;
        }
        Ok(())
    }
}

/// Top-level folder of a results key, or the stem of a root file
fn folder_of(key: &str) -> String {
    match key.split_once('/') {
        Some((folder, _)) => folder.to_string(),
        None => Path::new(key)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("unknown")
            .to_string(),
    }
}

fn unparsed(reason: &str) -> ParsedDiploma {
    ParsedDiploma {
        errors: vec![reason.to_string()],
        ..Default::default()
    }
}

/// Text of the image named `1.*`, else of the first image by key
fn first_page_text(report: &UnitReport) -> Option<&str> {
    let first = report
        .results
        .iter()
        .find(|r| Path::new(r.file_name()).file_stem().and_then(|s| s.to_str()) == Some("1"))
        .or_else(|| {
            let fallback = report.results.iter().min_by(|a, b| a.image.cmp(&b.image))?;
            tracing::warn!("Page 1 not found in {}, using {}", report.folder, fallback.image);
            Some(fallback)
        })?;

    let text = first.text.trim();
    (!text.is_empty()).then_some(text)
}
