//! PDF processing module
//!
//! Renders PDF pages with MuPDF and stores them as JPEG objects for the
//! OCR worker.

mod processor;
mod rasterizer;
mod types;

pub use processor::{numeric_prefix, PdfProcessor};
pub use rasterizer::{MupdfRasterizer, PageRasterizer};
pub use types::{
    BatchResult, BucketListing, FileFailure, ImageListing, PdfError, ProcessingResult, RenderOutput,
    RenderedPage,
};

#[cfg(test)]
pub(crate) use processor::tests::FakeRasterizer;
