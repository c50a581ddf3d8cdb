//! PDF processing endpoints
//!
//! - `POST /api/process-pdf`: one PDF in the `file` field
//! - `POST /api/process-multiple-pdfs`: any number of PDFs in `files` fields
//! - `GET /api/list-images/{pdf_id}`: images stored for a PDF
//! - `GET /api/list-images`: every image in the bucket

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::error::{AppError, Result};
use crate::pdf::{BatchResult, BucketListing, FileFailure, ImageListing, ProcessingResult};
use crate::state::AppState;

/// Largest accepted request body
const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/process-pdf", post(process_pdf))
        .route("/process-multiple-pdfs", post(process_multiple_pdfs))
        .route("/list-images", get(list_all_images))
        .route("/list-images/:pdf_id", get(list_images))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

struct Upload {
    file_name: String,
    data: Vec<u8>,
}

/// Collect file fields whose name is in `accepted`
async fn read_uploads(multipart: &mut Multipart, accepted: &[&str]) -> Result<Vec<Upload>> {
    let mut uploads = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if !accepted.contains(&name.as_str()) {
            tracing::debug!("Ignoring multipart field '{}'", name);
            continue;
        }

        let file_name = field.file_name().unwrap_or("unknown.pdf").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read file data: {}", e)))?;

        tracing::debug!("Received '{}' ({} bytes)", file_name, data.len());
        uploads.push(Upload {
            file_name,
            data: data.to_vec(),
        });
    }

    Ok(uploads)
}

async fn process_pdf(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<ProcessingResult>> {
    let upload = read_uploads(&mut multipart, &["file", "pdf"])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;

    state.pdf().ensure_bucket().await?;
    let result = state.pdf().process(upload.data, &upload.file_name).await?;
    tracing::info!(
        "PDF '{}' processed: {} images ({})",
        result.pdf_name,
        result.images_extracted,
        result.pdf_id
    );
    Ok(Json(result))
}

async fn process_multiple_pdfs(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<BatchResult>> {
    let uploads = read_uploads(&mut multipart, &["files", "file"]).await?;
    if uploads.is_empty() {
        return Err(AppError::BadRequest("No files provided".to_string()));
    }

    state.pdf().ensure_bucket().await?;

    let mut results = Vec::new();
    let mut errors = Vec::new();
    for upload in uploads {
        match state.pdf().process(upload.data, &upload.file_name).await {
            Ok(result) => results.push(result),
            Err(e) => {
                tracing::warn!("Failed to process '{}': {}", upload.file_name, e);
                errors.push(FileFailure {
                    filename: upload.file_name,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(Json(BatchResult {
        processed: results.len(),
        failed: errors.len(),
        results,
        errors,
    }))
}

async fn list_images(State(state): State<AppState>, Path(pdf_id): Path<String>) -> Result<Json<ImageListing>> {
    Ok(Json(state.pdf().list_images(&pdf_id).await?))
}

async fn list_all_images(State(state): State<AppState>) -> Result<Json<BucketListing>> {
    state.pdf().ensure_bucket().await?;
    Ok(Json(state.pdf().list_all_images().await?))
}
