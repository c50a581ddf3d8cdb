//! PDF to page-image extraction
//!
//! Renders uploaded PDFs and stores the pages in object storage where the
//! OCR worker picks them up.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::{PdfConfig, PdfMode};
use crate::error::{AppError, Result};
use crate::storage::{BucketStatus, ObjectMetadata, ObjectStore};

use super::rasterizer::PageRasterizer;
use super::types::{BucketListing, ImageListing, PdfError, ProcessingResult};

/// Extracts page images from PDFs into a bucket
#[derive(Clone)]
pub struct PdfProcessor {
    store: Arc<dyn ObjectStore>,
    rasterizer: Arc<dyn PageRasterizer>,
    bucket: String,
    scale: f32,
    mode: PdfMode,
}

impl PdfProcessor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        rasterizer: Arc<dyn PageRasterizer>,
        config: &PdfConfig,
    ) -> Self {
        Self {
            store,
            rasterizer,
            bucket: config.bucket.clone(),
            scale: config.scale,
            mode: config.mode,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub async fn ensure_bucket(&self) -> Result<BucketStatus> {
        self.store.ensure_bucket(&self.bucket).await
    }

    /// Reject non-PDF names and empty bodies
    pub fn validate(file_name: &str, data: &[u8]) -> std::result::Result<(), PdfError> {
        if !file_name.to_lowercase().ends_with(".pdf") {
            return Err(PdfError::NotPdf(file_name.to_string()));
        }
        if data.is_empty() {
            return Err(PdfError::Empty(file_name.to_string()));
        }
        Ok(())
    }

    /// Render a PDF and upload its pages
    pub async fn process(&self, data: Vec<u8>, file_name: &str) -> Result<ProcessingResult> {
        Self::validate(file_name, &data)?;

        match self.mode {
            PdfMode::Pages => self.process_pages(data, file_name).await,
            PdfMode::FirstPage => self.process_first_page(data, file_name).await,
        }
    }

    async fn process_pages(&self, data: Vec<u8>, file_name: &str) -> Result<ProcessingResult> {
        let pdf_id = Uuid::new_v4().to_string();
        let output = self.rasterizer.render_jpeg(data, self.scale, None).await?;

        tracing::info!("Processing PDF '{}': {} pages", file_name, output.page_count);

        if output.page_count == 0 {
            return Ok(self.empty_result(pdf_id, file_name));
        }

        let mut minio_objects = Vec::with_capacity(output.pages.len());
        for page in output.pages {
            let key = format!("{}/{}.jpg", pdf_id, page.number);
            match self.store.put_object(&self.bucket, &key, page.data, "image/jpeg").await {
                Ok(()) => {
                    tracing::info!("Image stored: {} ({}x{})", key, page.width, page.height);
                    minio_objects.push(key);
                }
                Err(e) => tracing::error!("Failed to upload {}: {}", key, e),
            }
        }

        let extracted = minio_objects.len();
        Ok(ProcessingResult {
            pdf_id,
            pdf_name: file_name.to_string(),
            pages_count: output.page_count,
            images_extracted: extracted,
            bucket: self.bucket.clone(),
            minio_objects,
            timestamp: Utc::now(),
            message: format!("Extracted {} images from {} pages", extracted, output.page_count),
        })
    }

    async fn process_first_page(&self, data: Vec<u8>, file_name: &str) -> Result<ProcessingResult> {
        let prefix = numeric_prefix(file_name)
            .ok_or_else(|| PdfError::InvalidFileName(file_name.to_string()))?;
        let output = self.rasterizer.render_jpeg(data, self.scale, Some(1)).await?;

        tracing::info!(
            "Processing PDF '{}': {} pages, prefix='{}'",
            file_name,
            output.page_count,
            prefix
        );

        let Some(page) = output.pages.into_iter().next() else {
            return Ok(self.empty_result(prefix, file_name));
        };

        let key = format!("{}.jpg", prefix);
        self.store.put_object(&self.bucket, &key, page.data, "image/jpeg").await?;
        tracing::info!("First page stored: {}", key);

        Ok(ProcessingResult {
            pdf_id: prefix,
            pdf_name: file_name.to_string(),
            pages_count: output.page_count,
            images_extracted: 1,
            bucket: self.bucket.clone(),
            minio_objects: vec![key.clone()],
            timestamp: Utc::now(),
            message: format!("First page stored as {}", key),
        })
    }

    fn empty_result(&self, pdf_id: String, file_name: &str) -> ProcessingResult {
        ProcessingResult {
            pdf_id,
            pdf_name: file_name.to_string(),
            pages_count: 0,
            images_extracted: 0,
            bucket: self.bucket.clone(),
            minio_objects: Vec::new(),
            timestamp: Utc::now(),
            message: "PDF contains no pages".to_string(),
        }
    }

    /// Images stored for a PDF id
    ///
    /// In first-page mode the id is the numeric prefix and the single image
    /// sits at the bucket root.
    pub async fn list_images(&self, pdf_id: &str) -> Result<ImageListing> {
        let images = match self.mode {
            PdfMode::Pages => {
                self.store
                    .list_all_objects(&self.bucket, Some(&format!("{}/", pdf_id)))
                    .await?
            }
            PdfMode::FirstPage => {
                let key = format!("{}.jpg", pdf_id);
                if self.store.object_exists(&self.bucket, &key).await? {
                    vec![self.store.head_object(&self.bucket, &key).await?]
                } else {
                    Vec::new()
                }
            }
        };

        if images.is_empty() {
            return Err(AppError::NotFound(format!("PDF with id {} not found", pdf_id)));
        }

        Ok(ImageListing {
            pdf_id: pdf_id.to_string(),
            images_count: images.len(),
            images,
        })
    }

    /// Every JPEG in the bucket
    pub async fn list_all_images(&self) -> Result<BucketListing> {
        let images: Vec<ObjectMetadata> = self
            .store
            .list_all_objects(&self.bucket, None)
            .await?
            .into_iter()
            .filter(|o| o.key.to_lowercase().ends_with(".jpg"))
            .collect();

        Ok(BucketListing {
            bucket: self.bucket.clone(),
            images_count: images.len(),
            images,
        })
    }
}

/// Leading digits of the file stem: `0001_Scan.pdf` -> `0001`
pub fn numeric_prefix(file_name: &str) -> Option<String> {
    let name = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pdf::types::{RenderOutput, RenderedPage};
    use crate::storage::memory::MemoryStore;
    use async_trait::async_trait;

    /// Rasterizer that fabricates `page_count` tiny pages
    pub struct FakeRasterizer {
        pub page_count: usize,
    }

    #[async_trait]
    impl PageRasterizer for FakeRasterizer {
        async fn render_jpeg(
            &self,
            _pdf: Vec<u8>,
            _scale: f32,
            max_pages: Option<usize>,
        ) -> std::result::Result<RenderOutput, PdfError> {
            let limit = max_pages.map_or(self.page_count, |m| m.min(self.page_count));
            Ok(RenderOutput {
                page_count: self.page_count,
                pages: (1..=limit)
                    .map(|number| RenderedPage {
                        number,
                        data: format!("page-{}", number).into_bytes(),
                        width: 10,
                        height: 10,
                    })
                    .collect(),
            })
        }
    }

    fn processor(store: Arc<MemoryStore>, pages: usize, mode: PdfMode) -> PdfProcessor {
        let config = PdfConfig {
            bucket: "pdf-images".to_string(),
            scale: 2.0,
            mode,
        };
        PdfProcessor::new(store, Arc::new(FakeRasterizer { page_count: pages }), &config)
    }

    #[test]
    fn test_numeric_prefix() {
        assert_eq!(numeric_prefix("0001_Scan.pdf"), Some("0001".to_string()));
        assert_eq!(numeric_prefix("42_document.pdf"), Some("42".to_string()));
        assert_eq!(numeric_prefix("uploads/0102_x.pdf"), Some("0102".to_string()));
        assert_eq!(numeric_prefix("scan_0001.pdf"), None);
    }

    #[test]
    fn test_validate() {
        assert!(PdfProcessor::validate("a.PDF", b"%PDF").is_ok());
        assert!(matches!(PdfProcessor::validate("a.txt", b"x"), Err(PdfError::NotPdf(_))));
        assert!(matches!(PdfProcessor::validate("a.pdf", b""), Err(PdfError::Empty(_))));
    }

    #[tokio::test]
    async fn test_pages_mode_uploads_every_page() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone(), 3, PdfMode::Pages);
        processor.ensure_bucket().await.unwrap();

        let result = processor.process(b"%PDF-1.4".to_vec(), "report.pdf").await.unwrap();
        assert_eq!(result.pages_count, 3);
        assert_eq!(result.images_extracted, 3);
        assert_eq!(result.minio_objects[0], format!("{}/1.jpg", result.pdf_id));

        let keys = store.keys("pdf-images");
        assert_eq!(keys.len(), 3);
        assert_eq!(
            store.content_type("pdf-images", &result.minio_objects[2]).as_deref(),
            Some("image/jpeg")
        );

        let listing = processor.list_images(&result.pdf_id).await.unwrap();
        assert_eq!(listing.images_count, 3);
    }

    #[tokio::test]
    async fn test_zero_page_pdf_yields_empty_result() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone(), 0, PdfMode::Pages);
        processor.ensure_bucket().await.unwrap();

        let result = processor.process(b"%PDF-1.4".to_vec(), "empty.pdf").await.unwrap();
        assert_eq!(result.pages_count, 0);
        assert!(result.minio_objects.is_empty());
        assert!(store.keys("pdf-images").is_empty());
    }

    #[tokio::test]
    async fn test_first_page_mode_uses_numeric_prefix() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone(), 5, PdfMode::FirstPage);
        processor.ensure_bucket().await.unwrap();

        let result = processor
            .process(b"%PDF-1.4".to_vec(), "0001_Scan_appendix.pdf")
            .await
            .unwrap();
        assert_eq!(result.pdf_id, "0001");
        assert_eq!(result.pages_count, 5);
        assert_eq!(store.keys("pdf-images"), vec!["0001.jpg".to_string()]);
        assert_eq!(store.read("pdf-images", "0001.jpg").unwrap(), b"page-1");

        let err = processor.process(b"%PDF".to_vec(), "scan.pdf").await.unwrap_err();
        assert!(matches!(err, AppError::Pdf(PdfError::InvalidFileName(_))));

        let listing = processor.list_images("0001").await.unwrap();
        assert_eq!(listing.images_count, 1);
        assert_eq!(listing.images[0].key, "0001.jpg");
        assert!(matches!(processor.list_images("0002").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_all_images_covers_both_layouts() {
        let store = Arc::new(MemoryStore::new());
        store.insert("pdf-images", "0001.jpg", b"a");
        store.insert("pdf-images", "abc/1.jpg", b"b");
        store.insert("pdf-images", "abc/notes.txt", b"c");
        let processor = processor(store, 1, PdfMode::FirstPage);

        let listing = processor.list_all_images().await.unwrap();
        assert_eq!(listing.bucket, "pdf-images");
        assert_eq!(listing.images_count, 2);
        let keys: Vec<_> = listing.images.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["0001.jpg", "abc/1.jpg"]);
    }

    #[tokio::test]
    async fn test_list_images_unknown_id_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store, 1, PdfMode::Pages);
        processor.ensure_bucket().await.unwrap();

        let err = processor.list_images("missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
