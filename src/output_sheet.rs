use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, SheetQrError};
use crate::excel::{cell_ref, col_index_to_letter, InputTable};
use crate::models::SheetLayout;
use crate::qr::{QrImage, QR_IMAGE_SIZE};
use crate::services::xlsx_patch::{write_augmented_copy, PlacedImage, SheetEdits};

/// Header text of the appended column.
pub const QR_HEADER_LABEL: &str = "QrCode";

/// Excel column count limit (A..XFD).
const MAX_COLUMNS: u32 = 16_384;

/// Column width in character units for an image `px` pixels wide.
pub fn qr_column_width(px: u32) -> f64 {
    px as f64 / 7.0
}

/// Row height in points for an image `px` pixels tall.
pub fn qr_row_height(px: u32) -> f64 {
    px as f64 / 0.75
}

/// Handle to the appended column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnId(u32);

impl ColumnId {
    /// 0-based column index.
    pub fn index(self) -> u32 {
        self.0
    }

    pub fn letter(self) -> String {
        col_index_to_letter(self.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct PreparedColumn {
    source: u32,
    dest: ColumnId,
}

/// Destination sheet: the input workbook plus one appended image column.
///
/// Edits are collected in memory and applied by [`OutputSheet::save`], which
/// writes a patched copy of the input package. Coordinates are 0-based, row 0
/// is the header row.
#[derive(Debug, Clone)]
pub struct OutputSheet {
    source_path: PathBuf,
    sheet_name: String,
    headers: Vec<String>,
    data_rows: usize,
    /// Right of both the value range and any formatted or blank `<c>`.
    first_free_column: u32,
    column: Option<PreparedColumn>,
    images: Vec<PlacedImage>,
}

impl OutputSheet {
    /// Output for `table`, read from the workbook at `source_path`, whose raw
    /// cells are described by `layout`.
    pub fn from_input(table: &InputTable, source_path: &Path, layout: &SheetLayout) -> Self {
        let after_cells = layout.last_column.map_or(0, |col| col + 1);
        OutputSheet {
            source_path: source_path.to_path_buf(),
            sheet_name: table.sheet_name.clone(),
            headers: table.headers.clone(),
            data_rows: table.len(),
            first_free_column: (table.width() as u32).max(after_cells),
            column: None,
            images: Vec::new(),
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Append the `QrCode` column after the last used column.
    ///
    /// On save the new header takes the font and alignment of `source_name`'s
    /// header, every cell of the source column gets text wrap and the data rows
    /// are sized for the images. Existing values are not touched.
    pub fn prepare_output_column(&mut self, source_name: &str) -> Result<ColumnId> {
        let source = self
            .headers
            .iter()
            .position(|h| h == source_name)
            .ok_or_else(|| SheetQrError::ColumnNotFound(source_name.to_string()))?
            as u32;
        let dest = self.first_free_column;
        if dest >= MAX_COLUMNS {
            return Err(SheetQrError::NoFreeColumn {
                sheet: self.sheet_name.clone(),
            });
        }

        let dest = ColumnId(dest);
        self.headers.resize(dest.index() as usize, String::new());
        self.headers.push(QR_HEADER_LABEL.to_string());
        self.first_free_column = dest.index() + 1;
        self.column = Some(PreparedColumn { source, dest });
        info!(
            source = source_name,
            column = %dest.letter(),
            rows = self.data_rows,
            "prepared QR column"
        );
        Ok(dest)
    }

    /// Anchor `image` at data row `row_index` (0-based) of `dest`; the cell is
    /// centered on save. Returns the A1 reference of the anchor cell.
    pub fn place_image(&mut self, dest: ColumnId, row_index: usize, image: &QrImage) -> Result<String> {
        if row_index >= self.data_rows {
            return Err(SheetQrError::RowOutOfRange { row: row_index + 2 });
        }
        let row = row_index as u32 + 1;
        let col = dest.index();

        self.images.push(PlacedImage {
            row,
            col,
            width: image.width(),
            height: image.height(),
            png: image.to_png()?,
            alt_text: image.text().to_string(),
        });

        let anchor = cell_ref(row, col);
        debug!(anchor = %anchor, version = image.version(), "placed QR image");
        Ok(anchor)
    }

    fn edits(&self, column: PreparedColumn) -> SheetEdits {
        SheetEdits {
            sheet_name: self.sheet_name.clone(),
            source_col: column.source,
            dest_col: column.dest.index(),
            header_label: QR_HEADER_LABEL.to_string(),
            column_width: qr_column_width(QR_IMAGE_SIZE),
            row_height: qr_row_height(QR_IMAGE_SIZE),
            data_rows: self.data_rows as u32,
            images: self.images.clone(),
        }
    }

    /// Write the augmented copy to `path` through a sibling temp file. The temp
    /// file is removed again when either step fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let column = self.column.ok_or_else(|| {
            SheetQrError::Config("The QR column must be prepared before saving.".to_string())
        })?;
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "xlsx".to_string());
        let temp_path = path.with_extension(format!("tmp.{extension}"));

        if let Err(e) = write_augmented_copy(&self.source_path, &temp_path, &self.edits(column)) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        if let Err(e) = fs::rename(&temp_path, path) {
            warn!(path = %path.display(), error = %e, "could not move temp workbook into place");
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        info!(path = %path.display(), images = self.images.len(), "saved workbook");
        Ok(())
    }
}
