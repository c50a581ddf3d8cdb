//! OCR agent endpoint

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::ocr::{OcrError, OcrResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecogniseRequest {
    pub url: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/recognise", post(recognise))
}

fn parse_image_url(url: &str) -> Result<reqwest::Url> {
    let parsed = reqwest::Url::parse(url.trim())
        .map_err(|e| AppError::BadRequest(format!("Invalid URL '{}': {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(AppError::BadRequest(format!("Unsupported URL scheme: {}", other))),
    }
}

/// Download an image, refusing bodies larger than `limit` bytes
async fn fetch_image(
    client: &reqwest::Client,
    url: reqwest::Url,
    limit: usize,
) -> std::result::Result<Vec<u8>, OcrError> {
    let mut response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| OcrError::ImageFetch(format!("{}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(OcrError::ImageFetch(format!("{} returned HTTP {}", url, status.as_u16())));
    }

    let too_large = || OcrError::ImageFetch(format!("{} is larger than {} bytes", url, limit));
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(too_large());
    }

    let mut data = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| OcrError::ImageFetch(format!("{}: {}", url, e)))?
    {
        if data.len() + chunk.len() > limit {
            return Err(too_large());
        }
        data.extend_from_slice(&chunk);
    }

    if data.is_empty() {
        return Err(OcrError::ImageFetch(format!("{} returned an empty body", url)));
    }
    Ok(data)
}

/// Fetch an image by URL and run OCR on it
async fn recognise(
    State(state): State<AppState>,
    Json(request): Json<RecogniseRequest>,
) -> Result<Json<OcrResult>> {
    let url = parse_image_url(&request.url)?;
    tracing::info!("Recognising {}", url);

    let image = fetch_image(state.http(), url, state.config().server.max_image_bytes).await?;
    let result = state
        .ocr()
        .recognize(&image, state.config().worker.prompt)
        .await?;

    Ok(Json(result))
}
