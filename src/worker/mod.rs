//! OCR worker module
//!
//! Polls the source bucket for work units (top-level folders or loose root
//! images), runs every image through the OCR provider and files the outcome
//! under the results or errors bucket.

mod discovery;
mod ledger;
mod processor;
mod report;
mod types;

pub use discovery::{discover_units, natural_cmp, unit_images, unit_objects};
pub use ledger::{open_ledger, FileLedger, NoLedger, PgLedger, ProcessedLedger};
pub use processor::Worker;
pub use report::{
    errors_json_key, progress_key, render_markdown, result_json_key, result_markdown_key,
};
pub use types::{
    FolderAnalysis, ImageResult, ImageStatus, RunSummary, UnitKind, UnitOutcome, UnitReport, WorkUnit,
};
