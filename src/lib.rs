//! OCR Pipeline
//!
//! Turns scanned documents into text: PDFs are rendered to page images in
//! object storage, a worker feeds those images to a DeepSeek-OCR model served
//! by Ollama, and results are filed into result or error buckets. A parser
//! then reads the first page of each result and stores the diploma fields in
//! Postgres. Also provisions the MinIO and Postgres resources the pipeline
//! expects.
//!
//! # Modules
//!
//! - `storage`: S3-compatible object storage (MinIO)
//! - `ocr`: Ollama vision-model OCR provider
//! - `pdf`: PDF page extraction via MuPDF
//! - `worker`: bucket-polling OCR worker
//! - `parser`: diploma field extraction from OCR results
//! - `provision`: MinIO and Postgres bootstrap
//! - `routes`: HTTP API for the PDF processor and the OCR agent

pub mod config;
pub mod db;
pub mod error;
pub mod ocr;
pub mod parser;
pub mod pdf;
pub mod provision;
pub mod routes;
pub mod state;
pub mod storage;
pub mod worker;
