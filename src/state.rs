//! Application state management

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::ocr::OcrProviderTrait;
use crate::pdf::PdfProcessor;
use crate::storage::ObjectStore;

/// Timeout for fetching images handed to `/recognise`
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    store: Arc<dyn ObjectStore>,
    pdf: PdfProcessor,
    ocr: Arc<dyn OcrProviderTrait>,
    http: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn ObjectStore>,
        pdf: PdfProcessor,
        ocr: Arc<dyn OcrProviderTrait>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                pdf,
                ocr,
                http,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the object store
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.inner.store
    }

    /// Get the PDF processor
    pub fn pdf(&self) -> &PdfProcessor {
        &self.inner.pdf
    }

    /// Get the OCR provider
    pub fn ocr(&self) -> &Arc<dyn OcrProviderTrait> {
        &self.inner.ocr
    }

    /// Client for fetching remote images
    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }
}
