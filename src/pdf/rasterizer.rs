//! Page rasterization
//!
//! MuPDF renders on a blocking thread; documents are opened fresh for each
//! call since `fz_context` is not thread-safe.

use std::io::Cursor;

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use mupdf::{Colorspace, Document, Matrix};
use tokio::time::{timeout, Duration};

use super::types::{PdfError, RenderOutput, RenderedPage};

/// Timeout for rasterizing one document
const RENDER_TIMEOUT_SECS: u64 = 300;

/// Renders PDF pages to JPEG images
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Render up to `max_pages` pages (all when `None`) at `scale`
    async fn render_jpeg(
        &self,
        pdf: Vec<u8>,
        scale: f32,
        max_pages: Option<usize>,
    ) -> Result<RenderOutput, PdfError>;
}

/// MuPDF-backed rasterizer
#[derive(Debug, Clone, Copy, Default)]
pub struct MupdfRasterizer;

impl MupdfRasterizer {
    pub fn new() -> Self {
        Self
    }

    fn render_blocking(pdf: &[u8], scale: f32, max_pages: Option<usize>) -> Result<RenderOutput, PdfError> {
        let doc = Document::from_bytes(pdf, "application/pdf")
            .map_err(|e| PdfError::Parse(e.to_string()))?;
        let page_count = doc.page_count().map_err(|e| PdfError::Parse(e.to_string()))?.max(0) as usize;

        let limit = max_pages.map_or(page_count, |m| m.min(page_count));
        let scale = scale.clamp(0.1, 4.0);
        let matrix = Matrix::new_scale(scale, scale);
        let colorspace = Colorspace::device_rgb();

        let mut pages = Vec::with_capacity(limit);
        for index in 0..limit {
            let page = doc.load_page(index as i32)?;
            let pixmap = page.to_pixmap(&matrix, &colorspace, false, true)?;
            let (data, width, height) = encode_pixmap_jpeg(&pixmap)?;
            pages.push(RenderedPage {
                number: index + 1,
                data,
                width,
                height,
            });
        }

        Ok(RenderOutput { page_count, pages })
    }
}

#[async_trait]
impl PageRasterizer for MupdfRasterizer {
    async fn render_jpeg(
        &self,
        pdf: Vec<u8>,
        scale: f32,
        max_pages: Option<usize>,
    ) -> Result<RenderOutput, PdfError> {
        let render_result = timeout(
            Duration::from_secs(RENDER_TIMEOUT_SECS),
            tokio::task::spawn_blocking(move || Self::render_blocking(&pdf, scale, max_pages)),
        )
        .await;

        match render_result {
            Ok(join_result) => {
                join_result.map_err(|e| PdfError::Render(format!("Task join error: {}", e)))?
            }
            Err(_) => Err(PdfError::Timeout(RENDER_TIMEOUT_SECS)),
        }
    }
}

fn encode_pixmap_jpeg(pixmap: &mupdf::Pixmap) -> Result<(Vec<u8>, u32, u32), PdfError> {
    let width = pixmap.width() as u32;
    let height = pixmap.height() as u32;
    let samples = pixmap.samples();
    let n = pixmap.n() as usize;

    let rgb = samples_to_rgb(samples, width as usize, height as usize, n);

    // JPEG has no alpha channel, so build an RGB image
    let img = RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| PdfError::Render("Failed to create image buffer".to_string()))?;

    let mut output = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut output), image::ImageFormat::Jpeg)
        .map_err(|e| PdfError::Render(e.to_string()))?;

    Ok((output, width, height))
}

/// Pack `n`-component samples into tight RGB triplets
fn samples_to_rgb(samples: &[u8], width: usize, height: usize, n: usize) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(width * height * 3);
    for pixel in 0..width * height {
        let offset = pixel * n;
        if n >= 3 {
            for c in 0..3 {
                rgb.push(samples.get(offset + c).copied().unwrap_or(0));
            }
        } else {
            // Gray (optionally with alpha)
            let v = samples.get(offset).copied().unwrap_or(0);
            rgb.extend_from_slice(&[v, v, v]);
        }
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_to_rgb_drops_alpha() {
        let rgba = [1, 2, 3, 255, 4, 5, 6, 128];
        assert_eq!(samples_to_rgb(&rgba, 2, 1, 4), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_samples_to_rgb_expands_gray() {
        let gray = [10, 20];
        assert_eq!(samples_to_rgb(&gray, 2, 1, 1), vec![10, 10, 10, 20, 20, 20]);
    }

    #[tokio::test]
    async fn test_garbage_input_is_a_parse_error() {
        let rasterizer = MupdfRasterizer::new();
        let result = rasterizer
            .render_jpeg(b"definitely not a pdf".to_vec(), 2.0, None)
            .await;
        assert!(matches!(result, Err(PdfError::Parse(_))));
    }
}
