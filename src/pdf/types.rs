//! PDF processing types

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::ObjectMetadata;

/// A rendered page ready for upload
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Page number (1-indexed)
    pub number: usize,
    /// JPEG bytes
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Result of rasterizing a document
#[derive(Debug, Clone)]
pub struct RenderOutput {
    /// Pages in the document, rendered or not
    pub page_count: usize,
    pub pages: Vec<RenderedPage>,
}

/// Summary returned for each processed PDF
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    /// Generated UUID, or the numeric file prefix in first-page mode
    pub pdf_id: String,
    pub pdf_name: String,
    pub pages_count: usize,
    pub images_extracted: usize,
    pub bucket: String,
    pub minio_objects: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Images stored for one PDF
#[derive(Debug, Clone, Serialize)]
pub struct ImageListing {
    pub pdf_id: String,
    pub images_count: usize,
    pub images: Vec<ObjectMetadata>,
}

/// Every image in the PDF bucket
#[derive(Debug, Clone, Serialize)]
pub struct BucketListing {
    pub bucket: String,
    pub images_count: usize,
    pub images: Vec<ObjectMetadata>,
}

/// Per-file failure in a batch upload
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub filename: String,
    pub error: String,
}

/// Result of a batch upload
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub processed: usize,
    pub failed: usize,
    pub results: Vec<ProcessingResult>,
    pub errors: Vec<FileFailure>,
}

/// PDF error types
#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("File must be a PDF: {0}")]
    NotPdf(String),

    #[error("PDF file is empty: {0}")]
    Empty(String),

    #[error("Could not extract a numeric prefix from '{0}', expected a name like '0001_description.pdf'")]
    InvalidFileName(String),

    #[error("Failed to open PDF: {0}")]
    Parse(String),

    #[error("Failed to render page: {0}")]
    Render(String),

    #[error("Rendering timed out after {0} seconds")]
    Timeout(u64),
}

impl PdfError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotPdf(_) | Self::Empty(_) | Self::InvalidFileName(_) => StatusCode::BAD_REQUEST,
            Self::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Render(_) | Self::Timeout(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<mupdf::Error> for PdfError {
    fn from(err: mupdf::Error) -> Self {
        PdfError::Render(err.to_string())
    }
}
