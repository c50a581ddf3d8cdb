//! Report rendering and object keys

use std::fmt::Write;

use super::types::{ImageStatus, UnitReport};

pub fn result_json_key(unit: &str) -> String {
    format!("{}/ocr_result.json", unit)
}

pub fn result_markdown_key(unit: &str) -> String {
    format!("{}/ocr_result.md", unit)
}

pub fn errors_json_key(unit: &str) -> String {
    format!("{}/ocr_errors.json", unit)
}

/// Per-image results of a unit that is not finished yet, kept next to its
/// sources in the source bucket
pub fn progress_key(unit: &str) -> String {
    format!("{}/ocr_progress.json", unit)
}

/// Markdown document with the text of every successful image
pub fn render_markdown(report: &UnitReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# OCR Results: {}\n", report.folder);
    let _ = writeln!(out, "**Processed:** {}", report.processed_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "**Prompt Type:** {}\n", report.prompt_type.as_str());

    let successful = report
        .results
        .iter()
        .filter(|r| r.status == ImageStatus::Success && !r.text.is_empty());

    for (i, result) in successful.enumerate() {
        let metrics = result.metrics.clone().unwrap_or_default();
        let _ = writeln!(out, "## Image {}: {}\n", i + 1, result.file_name());
        let _ = writeln!(out, "**Size:** {} bytes", result.size);
        let _ = writeln!(out, "**Processing Time:** {:.2}s", metrics.total_duration_secs());
        let _ = writeln!(out, "**Tokens:** {}\n", metrics.eval_count);
        let _ = writeln!(out, "### Extracted Text:\n");
        let _ = writeln!(out, "{}\n", result.text);
        let _ = writeln!(out, "---\n");
    }

    out
}
