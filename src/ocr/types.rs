//! OCR Types
//!
//! Defines prompts, results and errors for vision-model OCR.

use serde::{Deserialize, Serialize};

/// OCR provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrProvider {
    /// Ollama vision model (local LLM)
    Ollama,
}

/// What the model is asked to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptType {
    /// Plain text
    Text,
    /// Document converted to markdown
    #[default]
    Markdown,
    /// Tables only
    Table,
    /// Detailed description including text and structure
    Details,
}

impl PromptType {
    /// Parse a prompt name; unknown names fall back to `Text`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "markdown" | "md" => PromptType::Markdown,
            "table" | "tables" => PromptType::Table,
            "details" | "detail" => PromptType::Details,
            _ => PromptType::Text,
        }
    }

    /// Prompt understood by DeepSeek-OCR
    pub fn prompt(&self) -> &'static str {
        match self {
            PromptType::Text => "<image>\nFree OCR.",
            PromptType::Markdown => "<|grounding|>Convert the document to markdown.",
            PromptType::Table => "<|grounding|>Extract all tables from this image.",
            PromptType::Details => {
                "<|grounding|>Provide detailed description of this image including text and structure."
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptType::Text => "text",
            PromptType::Markdown => "markdown",
            PromptType::Table => "table",
            PromptType::Details => "details",
        }
    }
}

/// Generation timings and token counts reported by the model server
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OcrMetrics {
    pub total_duration_ns: u64,
    pub load_duration_ns: u64,
    pub prompt_eval_count: u64,
    pub eval_count: u64,
    pub eval_duration_ns: u64,
    /// Wall-clock time of the request as seen by the client
    pub response_time_ms: u64,
}

impl OcrMetrics {
    pub fn total_duration_secs(&self) -> f64 {
        self.total_duration_ns as f64 / 1e9
    }
}

/// OCR result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    /// Recognized text, trimmed
    pub text: String,
    /// Model that produced the text
    pub model: String,
    /// Provider used
    pub provider: OcrProvider,
    pub prompt_type: PromptType,
    pub done: bool,
    /// `stop` when generation finished, `length` when it hit the token limit
    pub done_reason: String,
    pub metrics: OcrMetrics,
}

impl OcrResult {
    /// Generation ended naturally rather than being cut off
    pub fn is_complete(&self) -> bool {
        self.done_reason == "stop"
    }
}

/// Availability of the model server and the configured model
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct OllamaHealth {
    pub reachable: bool,
    pub model_present: bool,
}

/// OCR error types
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR provider not available: {0}")]
    ProviderNotAvailable(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Could not connect to {0}")]
    Connection(String),

    #[error("API error: HTTP {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to fetch image: {0}")]
    ImageFetch(String),
}

impl OcrError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connection(_))
    }

    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::ProviderNotAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
