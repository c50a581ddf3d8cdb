//! OCR Providers
//!
//! Defines the provider trait and the Ollama vision-model implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

use super::types::{OcrError, OcrMetrics, OcrProvider, OcrResult, OllamaHealth, PromptType};
use crate::config::OllamaConfig;

/// OCR provider trait
#[async_trait]
pub trait OcrProviderTrait: Send + Sync {
    /// Get the provider type
    fn provider_type(&self) -> OcrProvider;

    /// Check if the provider is available
    async fn is_available(&self) -> bool;

    /// Get the provider ready for work (e.g. make sure the model is present)
    async fn prepare(&self) -> Result<(), OcrError> {
        if self.is_available().await {
            Ok(())
        } else {
            Err(OcrError::ProviderNotAvailable(format!("{:?}", self.provider_type())))
        }
    }

    /// Perform OCR on an image
    async fn recognize(&self, image_data: &[u8], prompt: PromptType) -> Result<OcrResult, OcrError>;
}

const TAGS_TIMEOUT: Duration = Duration::from_secs(10);
const PULL_TIMEOUT: Duration = Duration::from_secs(3600);

/// Ollama vision model provider
pub struct OllamaProvider {
    client: reqwest::Client,
    /// Ollama API URL
    base_url: String,
    /// Model name (e.g., "deepseek-ocr")
    model: String,
    timeout: Duration,
    max_attempts: u32,
    backoff_min: Duration,
    backoff_max: Duration,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    model: Option<String>,
    #[serde(default)]
    response: String,
    done: Option<bool>,
    done_reason: Option<String>,
    #[serde(default)]
    total_duration: u64,
    #[serde(default)]
    load_duration: u64,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
    #[serde(default)]
    eval_duration: u64,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default)]
    status: String,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout: Duration::from_secs(600),
            max_attempts: 3,
            backoff_min: Duration::from_secs(2),
            backoff_max: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &OllamaConfig) -> Self {
        let mut provider = Self::new(&config.base_url, &config.model);
        provider.timeout = Duration::from_secs(config.timeout_secs);
        provider.max_attempts = config.max_retries.max(1);
        provider
    }

    /// Override the retry policy
    pub fn with_retry(mut self, max_attempts: u32, backoff_min: Duration, backoff_max: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff_min = backoff_min;
        self.backoff_max = backoff_max;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Delay before retrying after the given failed attempt (1-based):
    /// doubles from one second, clamped to the configured bounds
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = Duration::from_secs(1u64 << attempt.saturating_sub(1).min(16));
        exp.clamp(self.backoff_min, self.backoff_max.max(self.backoff_min))
    }

    fn classify(&self, err: reqwest::Error, timeout: Duration) -> OcrError {
        if err.is_timeout() {
            OcrError::Timeout(timeout.as_secs())
        } else if err.is_connect() {
            OcrError::Connection(self.base_url.clone())
        } else {
            OcrError::InvalidResponse(err.to_string())
        }
    }

    /// Query `/api/tags` for reachability and model presence
    pub async fn health(&self) -> OllamaHealth {
        let url = format!("{}/api/tags", self.base_url);

        let response = match self.client.get(&url).timeout(TAGS_TIMEOUT).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::warn!("Ollama returned {} for {}", r.status(), url);
                return OllamaHealth { reachable: false, model_present: false };
            }
            Err(e) => {
                tracing::warn!("Could not reach Ollama at {}: {}", self.base_url, e);
                return OllamaHealth { reachable: false, model_present: false };
            }
        };

        let model_present = match response.json::<TagsResponse>().await {
            Ok(tags) => tags.models.iter().any(|m| model_matches(&m.name, &self.model)),
            Err(e) => {
                tracing::warn!("Unreadable /api/tags response: {}", e);
                false
            }
        };

        if model_present {
            tracing::info!("Ollama reachable, model {} found", self.model);
        } else {
            tracing::warn!("Ollama reachable, but model {} not found", self.model);
        }

        OllamaHealth { reachable: true, model_present }
    }

    /// Poll until the server answers, up to `attempts` times
    pub async fn wait_until_ready(&self, attempts: u32, delay: Duration) -> Result<(), OcrError> {
        for attempt in 1..=attempts.max(1) {
            if self.health().await.reachable {
                return Ok(());
            }
            tracing::info!("Waiting for Ollama ({}/{})...", attempt, attempts);
            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }
        Err(OcrError::Connection(self.base_url.clone()))
    }

    /// Download the model through `/api/pull`
    pub async fn pull_model(&self) -> Result<(), OcrError> {
        let url = format!("{}/api/pull", self.base_url);
        tracing::info!("Pulling model {} ...", self.model);

        let response = self
            .client
            .post(&url)
            .timeout(PULL_TIMEOUT)
            .json(&serde_json::json!({ "name": self.model, "stream": false }))
            .send()
            .await
            .map_err(|e| self.classify(e, PULL_TIMEOUT))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::ApiError { status, body });
        }

        let pull: PullResponse = response
            .json()
            .await
            .map_err(|e| OcrError::InvalidResponse(e.to_string()))?;

        if pull.status != "success" {
            return Err(OcrError::InvalidResponse(format!("pull finished with status '{}'", pull.status)));
        }

        tracing::info!("Model {} pulled", self.model);
        Ok(())
    }

    /// Make sure the configured model is present, pulling it if needed
    pub async fn ensure_model(&self) -> Result<(), OcrError> {
        let health = self.health().await;
        if !health.reachable {
            return Err(OcrError::ProviderNotAvailable(format!(
                "Ollama is not reachable at {}",
                self.base_url
            )));
        }
        if health.model_present {
            return Ok(());
        }

        self.pull_model().await?;

        if self.health().await.model_present {
            Ok(())
        } else {
            Err(OcrError::ModelNotFound(self.model.clone()))
        }
    }

    async fn generate_once(&self, image_base64: &str, prompt: PromptType) -> Result<OcrResult, OcrError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = serde_json::json!({
            "model": self.model,
            "prompt": prompt.prompt(),
            "images": [image_base64],
            "stream": false,
            "options": {
                "temperature": 0.1,
                "num_predict": 8192,
                "top_p": 0.9,
                "top_k": 40
            }
        });

        tracing::debug!("Sending request to Ollama (prompt: {})", prompt.as_str());
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(e, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::ApiError { status, body });
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| OcrError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let elapsed = started.elapsed();

        Ok(OcrResult {
            text: result.response.trim().to_string(),
            model: result.model.unwrap_or_else(|| self.model.clone()),
            provider: OcrProvider::Ollama,
            prompt_type: prompt,
            done: result.done.unwrap_or(true),
            done_reason: result.done_reason.unwrap_or_else(|| "unknown".to_string()),
            metrics: OcrMetrics {
                total_duration_ns: result.total_duration,
                load_duration_ns: result.load_duration,
                prompt_eval_count: result.prompt_eval_count,
                eval_count: result.eval_count,
                eval_duration_ns: result.eval_duration,
                response_time_ms: elapsed.as_millis() as u64,
            },
        })
    }
}

/// `deepseek-ocr` matches the tag `deepseek-ocr:latest`
fn model_matches(tag: &str, model: &str) -> bool {
    tag == model || (!model.contains(':') && tag.strip_suffix(":latest") == Some(model))
}

#[async_trait]
impl OcrProviderTrait for OllamaProvider {
    fn provider_type(&self) -> OcrProvider {
        OcrProvider::Ollama
    }

    async fn is_available(&self) -> bool {
        self.health().await.reachable
    }

    async fn prepare(&self) -> Result<(), OcrError> {
        self.ensure_model().await
    }

    async fn recognize(&self, image_data: &[u8], prompt: PromptType) -> Result<OcrResult, OcrError> {
        use base64::Engine;

        // Encode image as base64
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(image_data);

        let mut attempt = 1;
        loop {
            match self.generate_once(&image_base64, prompt).await {
                Ok(result) => {
                    tracing::info!(
                        "OCR finished in {:.2}s ({} tokens, {} chars, reason: {})",
                        result.metrics.response_time_ms as f64 / 1000.0,
                        result.metrics.eval_count,
                        result.text.chars().count(),
                        result.done_reason
                    );
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        "OCR attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        self.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Mock provider for testing
#[cfg(test)]
pub struct MockProvider {
    pub responses: parking_lot::Mutex<std::collections::VecDeque<Result<OcrResult, OcrError>>>,
    pub available: bool,
    pub calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockProvider {
    pub fn new(responses: Vec<Result<OcrResult, OcrError>>) -> Self {
        Self {
            responses: parking_lot::Mutex::new(responses.into()),
            available: true,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn result(text: &str, done_reason: &str) -> OcrResult {
        OcrResult {
            text: text.to_string(),
            model: "deepseek-ocr".to_string(),
            provider: OcrProvider::Ollama,
            prompt_type: PromptType::Markdown,
            done: true,
            done_reason: done_reason.to_string(),
            metrics: OcrMetrics {
                total_duration_ns: 1_500_000_000,
                eval_count: 42,
                ..Default::default()
            },
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl OcrProviderTrait for MockProvider {
    fn provider_type(&self) -> OcrProvider {
        OcrProvider::Ollama
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn recognize(&self, _image_data: &[u8], _prompt: PromptType) -> Result<OcrResult, OcrError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Self::result("text", "stop")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, routing::{get, post}, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Minimal stand-in for the Ollama HTTP API
    async fn spawn_fake_ollama(models: Vec<&'static str>, done_reason: &'static str) -> (String, Arc<AtomicUsize>) {
        let pulls = Arc::new(AtomicUsize::new(0));
        let models = Arc::new(parking_lot::Mutex::new(models));

        let tags_models = models.clone();
        let pull_models = models.clone();
        let pull_counter = pulls.clone();

        let app = Router::new()
            .route(
                "/api/tags",
                get(move || {
                    let models = tags_models.clone();
                    async move {
                        let list: Vec<_> = models
                            .lock()
                            .iter()
                            .map(|m| serde_json::json!({ "name": m }))
                            .collect();
                        Json(serde_json::json!({ "models": list }))
                    }
                }),
            )
            .route(
                "/api/pull",
                post(move |Json(body): Json<serde_json::Value>| {
                    let models = pull_models.clone();
                    let counter = pull_counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        if body["name"] == "deepseek-ocr" {
                            models.lock().push("deepseek-ocr:latest");
                        }
                        Json(serde_json::json!({ "status": "success" }))
                    }
                }),
            )
            .route(
                "/api/generate",
                post(|State(reason): State<&'static str>, Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(body["stream"], false);
                    assert_eq!(body["images"].as_array().map(|a| a.len()), Some(1));
                    Json(serde_json::json!({
                        "model": body["model"],
                        "response": "  # Title\n\nBody text \n",
                        "done": true,
                        "done_reason": reason,
                        "total_duration": 2_000_000_000u64,
                        "eval_count": 17
                    }))
                }),
            )
            .with_state(done_reason);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), pulls)
    }

    #[test]
    fn test_model_matches() {
        assert!(model_matches("deepseek-ocr", "deepseek-ocr"));
        assert!(model_matches("deepseek-ocr:latest", "deepseek-ocr"));
        assert!(!model_matches("deepseek-ocr:3b", "deepseek-ocr"));
        assert!(!model_matches("llava:latest", "deepseek-ocr"));
    }

    #[test]
    fn test_backoff_delay_is_clamped() {
        let provider = OllamaProvider::new("http://localhost:11434", "deepseek-ocr");
        assert_eq!(provider.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(provider.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(provider.backoff_delay(3), Duration::from_secs(4));
        assert_eq!(provider.backoff_delay(5), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_recognize_parses_generate_response() {
        let (url, _) = spawn_fake_ollama(vec!["deepseek-ocr:latest"], "stop").await;
        let provider = OllamaProvider::new(&url, "deepseek-ocr");

        let result = provider.recognize(b"jpeg-bytes", PromptType::Markdown).await.unwrap();
        assert_eq!(result.text, "# Title\n\nBody text");
        assert_eq!(result.model, "deepseek-ocr");
        assert_eq!(result.done_reason, "stop");
        assert!(result.is_complete());
        assert_eq!(result.metrics.eval_count, 17);
        assert_eq!(result.metrics.total_duration_secs(), 2.0);
    }

    #[tokio::test]
    async fn test_truncated_generation_is_not_complete() {
        let (url, _) = spawn_fake_ollama(vec!["deepseek-ocr"], "length").await;
        let provider = OllamaProvider::new(&url, "deepseek-ocr");

        let result = provider.recognize(b"jpeg-bytes", PromptType::Text).await.unwrap();
        assert_eq!(result.done_reason, "length");
        assert!(!result.is_complete());
    }

    #[tokio::test]
    async fn test_ensure_model_pulls_missing_model() {
        let (url, pulls) = spawn_fake_ollama(vec!["llava:latest"], "stop").await;
        let provider = OllamaProvider::new(&url, "deepseek-ocr");

        let before = provider.health().await;
        assert!(before.reachable);
        assert!(!before.model_present);

        provider.ensure_model().await.unwrap();
        assert_eq!(pulls.load(Ordering::SeqCst), 1);

        // Second call finds the model and does not pull again
        provider.ensure_model().await.unwrap();
        assert_eq!(pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retried_then_fails() {
        // Bind and drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = OllamaProvider::new(&format!("http://{}", addr), "deepseek-ocr").with_retry(
            3,
            Duration::from_millis(1),
            Duration::from_millis(5),
        );

        let err = provider.recognize(b"x", PromptType::Text).await.unwrap_err();
        assert!(matches!(err, OcrError::Connection(_)));
        assert!(!provider.is_available().await);
    }
}
