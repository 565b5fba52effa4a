use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One cell value as read from the input sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Excel serial date; rendered with the cell's number format.
    DateTime(f64),
    /// Error literal such as `#DIV/0!`, kept as text.
    Error(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Text handed to the QR encoder. `None` for blank cells.
    pub fn as_source_text(&self) -> Option<String> {
        let text = match self {
            CellValue::Empty => return None,
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) | CellValue::DateTime(n) => format_number(*n),
            CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CellValue::Error(e) => e.clone(),
        };
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Plain display text (headers, diagnostics).
    pub fn display_text(&self) -> String {
        self.as_source_text().unwrap_or_default()
    }
}

/// Integers without decimals, everything else in shortest form.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Counts produced at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_records: usize,
    pub qr_codes_created: usize,
}

/// What the console program reports after a successful conversion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionReport {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub sheet_name: String,
    pub output_file: PathBuf,
}
