//! HTTP routes for the PDF processor and the OCR agent

pub mod health;
pub mod pdf;
pub mod recognise;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full application router
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::router())
        .nest("/api", pdf::router())
        .merge(recognise::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::config::{Config, PdfMode};
    use crate::ocr::MockProvider;
    use crate::pdf::{FakeRasterizer, PdfProcessor};
    use crate::state::AppState;
    use crate::storage::memory::MemoryStore;
    use crate::storage::ObjectStore;

    pub fn state(store: Arc<MemoryStore>, provider: MockProvider, mode: PdfMode) -> AppState {
        let mut config = Config::default();
        config.pdf.mode = mode;
        let pdf = PdfProcessor::new(store.clone(), Arc::new(FakeRasterizer { page_count: 2 }), &config.pdf);
        let store: Arc<dyn ObjectStore> = store;
        AppState::new(config, store, pdf, Arc::new(provider))
    }
}
