//! OCR Module
//!
//! Vision-model OCR through an Ollama server hosting DeepSeek-OCR.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ocr_pipeline::ocr::{OcrProviderTrait, OllamaProvider, PromptType};
//!
//! let provider = OllamaProvider::new("http://ollama:11434", "deepseek-ocr");
//! provider.ensure_model().await?;
//!
//! let result = provider.recognize(&jpeg_bytes, PromptType::Markdown).await?;
//! if result.is_complete() {
//!     println!("{}", result.text);
//! }
//! ```

mod provider;
mod types;

pub use provider::{OcrProviderTrait, OllamaProvider};
pub use types::{OcrError, OcrMetrics, OcrProvider, OcrResult, OllamaHealth, PromptType};

#[cfg(test)]
pub use provider::MockProvider;
