//! Worker types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ocr::{OcrMetrics, OcrResult, PromptType};

/// Outcome of OCR on a single image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    /// Generation finished with `done_reason == "stop"`
    Success,
    /// Text came back but generation was cut off
    Partial,
    Error,
}

impl ImageStatus {
    pub fn classify(result: &OcrResult) -> Self {
        if result.is_complete() {
            ImageStatus::Success
        } else if !result.text.trim().is_empty() {
            ImageStatus::Partial
        } else {
            ImageStatus::Error
        }
    }
}

/// Per-image entry of a unit report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    /// Object key of the source image
    pub image: String,
    pub size: i64,
    pub status: ImageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<OcrMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl ImageResult {
    pub fn from_ocr(image: &str, size: i64, result: OcrResult) -> Self {
        let status = ImageStatus::classify(&result);
        let error = match status {
            ImageStatus::Error => Some(format!(
                "Empty response (done_reason: {})",
                if result.done_reason.is_empty() { "none" } else { &result.done_reason }
            )),
            _ => None,
        };
        Self {
            image: image.to_string(),
            size,
            status,
            done_reason: Some(result.done_reason),
            text: result.text,
            metrics: Some(result.metrics),
            error,
            processed_at: Utc::now(),
        }
    }

    pub fn failed(image: &str, size: i64, error: impl Into<String>) -> Self {
        Self {
            image: image.to_string(),
            size,
            status: ImageStatus::Error,
            done_reason: None,
            text: String::new(),
            metrics: None,
            error: Some(error.into()),
            processed_at: Utc::now(),
        }
    }

    /// File name without the unit prefix
    pub fn file_name(&self) -> &str {
        self.image.rsplit('/').next().unwrap_or(&self.image)
    }
}

/// Aggregate of a unit's image results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderAnalysis {
    pub total: usize,
    pub success: usize,
    pub partial: usize,
    pub errors: usize,
    pub all_success: bool,
    pub has_partial: bool,
    pub has_errors: bool,
}

impl FolderAnalysis {
    pub fn from_results(results: &[ImageResult]) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        let total = results.len();
        let success = count(ImageStatus::Success);
        let partial = count(ImageStatus::Partial);
        let errors = count(ImageStatus::Error);

        Self {
            total,
            success,
            partial,
            errors,
            all_success: total > 0 && success == total,
            has_partial: partial > 0,
            has_errors: errors > 0,
        }
    }

    /// Human-readable reason a unit went to the errors bucket
    pub fn failure_reason(&self) -> String {
        match (self.has_partial, self.has_errors) {
            (true, true) => format!(
                "{} partial and {} failed of {} images",
                self.partial, self.errors, self.total
            ),
            (true, false) => format!("{} of {} images were truncated", self.partial, self.total),
            (false, true) => format!("{} of {} images failed", self.errors, self.total),
            (false, false) => "No images were processed".to_string(),
        }
    }
}

/// JSON document written to the results or errors bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReport {
    pub folder: String,
    pub source_bucket: String,
    pub processed_at: DateTime<Utc>,
    pub prompt_type: PromptType,
    pub analysis: FolderAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub results: Vec<ImageResult>,
}

/// A batch of images processed together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Folder name, or the file stem of a loose root image
    pub id: String,
    pub kind: UnitKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKind {
    /// Everything under `{id}/`
    Folder,
    /// A single image at the bucket root
    Loose { key: String },
}

impl WorkUnit {
    pub fn folder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: UnitKind::Folder,
        }
    }

    pub fn loose(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: UnitKind::Loose { key: key.into() },
        }
    }
}

/// How a unit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitOutcome {
    Success,
    Failed,
    Empty,
    /// `PROCESS_LIMIT` stopped the pass before the last image
    Pending,
}

impl UnitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitOutcome::Success => "success",
            UnitOutcome::Failed => "failed",
            UnitOutcome::Empty => "empty",
            UnitOutcome::Pending => "pending",
        }
    }
}

/// Counters for one pass over the source bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub empty: usize,
    pub pending: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: UnitOutcome) {
        self.processed += 1;
        match outcome {
            UnitOutcome::Success => self.succeeded += 1,
            UnitOutcome::Failed => self.failed += 1,
            UnitOutcome::Empty => self.empty += 1,
            UnitOutcome::Pending => self.pending += 1,
        }
    }
}
