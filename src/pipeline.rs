//! Row pipeline: read the sheet, encode every URL cell, place the images, save.

use chrono::{Local, NaiveDateTime};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{next_free_output_path, timestamped_output_path, Settings};
use crate::error::{Result, SheetQrError};
use crate::excel::{read_input_table, InputTable};
use crate::output_sheet::OutputSheet;
use crate::qr::{self, QR_IMAGE_SIZE};
use crate::services::style_scanner::{active_sheet_name, scan_sheet_layout};
use crate::types::{ConversionReport, RunSummary};

/// Encode the `source_column_name` cell of every row into `sheet` and save it to `output_path`.
///
/// The first failing row aborts the run; its error names the spreadsheet row.
pub fn run(
    table: &InputTable,
    source_column_name: &str,
    sheet: &mut OutputSheet,
    output_path: &Path,
) -> Result<RunSummary> {
    let source = table
        .column_index(source_column_name)
        .ok_or_else(|| SheetQrError::ColumnNotFound(source_column_name.to_string()))?;
    let dest = sheet.prepare_output_column(source_column_name)?;

    for row_index in 0..table.len() {
        let sheet_row = row_index + 2;
        let text = table
            .cell(row_index, source)
            .as_source_text()
            .ok_or_else(|| {
                SheetQrError::EmptySourceText {
                    column: source_column_name.to_string(),
                }
                .at_row(sheet_row)
            })?;
        let image = qr::encode(&text, (QR_IMAGE_SIZE, QR_IMAGE_SIZE)).map_err(|e| e.at_row(sheet_row))?;
        if image.pixels_per_module() < qr::MIN_PIXELS_PER_MODULE {
            warn!(
                row = sheet_row,
                version = image.version(),
                len = text.len(),
                "QR image is too dense to scan reliably"
            );
        }
        let anchor = sheet
            .place_image(dest, row_index, &image)
            .map_err(|e| e.at_row(sheet_row))?;
        debug!(row = sheet_row, anchor = %anchor, len = text.len(), "encoded row");
    }

    sheet.save(output_path)?;
    let summary = RunSummary {
        total_records: table.len(),
        qr_codes_created: sheet.image_count(),
    };
    info!(
        total_records = summary.total_records,
        qr_codes_created = summary.qr_codes_created,
        "conversion finished"
    );
    Ok(summary)
}

/// Read `settings.input_file`, convert it and write the result to `output_path`.
pub fn convert(settings: &Settings, output_path: &Path) -> Result<ConversionReport> {
    settings.validate_input()?;
    if output_path == settings.input_file {
        return Err(SheetQrError::Config(format!(
            "Output file '{}' would overwrite the input file.",
            output_path.display()
        )));
    }

    let sheet_name = match &settings.sheet_name {
        Some(name) => Some(name.clone()),
        None => active_sheet_name(&settings.input_file)?,
    };
    let table = read_input_table(&settings.input_file, sheet_name.as_deref())?;
    if table.column_index(&settings.url_column_name).is_none() {
        return Err(SheetQrError::ColumnNotFound(settings.url_column_name.clone()));
    }
    let layout = scan_sheet_layout(&settings.input_file, &table.sheet_name)?;
    let mut sheet = OutputSheet::from_input(&table, &settings.input_file, &layout);

    let summary = run(&table, &settings.url_column_name, &mut sheet, output_path)?;
    Ok(ConversionReport {
        summary,
        sheet_name: table.sheet_name,
        output_file: output_path.to_path_buf(),
    })
}

/// Convert with an output name stamped at `now`, never reusing an existing file.
pub fn process_at(settings: &Settings, now: NaiveDateTime) -> Result<ConversionReport> {
    let stamped = timestamped_output_path(&settings.output_file, now, settings.output_extension());
    let output_path = next_free_output_path(&stamped);
    info!(
        input = %settings.input_file.display(),
        output = %output_path.display(),
        column = %settings.url_column_name,
        "starting conversion"
    );
    convert(settings, &output_path)
}

/// [`process_at`] with the current local time.
pub fn process(settings: &Settings) -> Result<ConversionReport> {
    process_at(settings, Local::now().naive_local())
}
