use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification used by the console program (exit codes) and by tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing/blank setting, missing input file, unusable output path.
    Config,
    /// The configured URL column is not a header of the sheet.
    ColumnNotFound,
    /// Source text that no QR version can hold, or nothing to encode at all.
    EncodingOverflow,
    /// Reading or writing a workbook failed.
    Io,
}

/// Main error type of the converter.
#[derive(Error, Debug)]
pub enum SheetQrError {
    #[error("{0}")]
    Config(String),

    #[error("Column '{0}' not found in the Excel file.")]
    ColumnNotFound(String),

    #[error("text of {len} bytes does not fit in any QR code version")]
    EncodingOverflow { len: usize },

    #[error("cell in column '{column}' is empty, nothing to encode")]
    EmptySourceText { column: String },

    #[error("QR image size must be at least 1x1 pixels, got {width}x{height}")]
    InvalidImageSize { width: u32, height: u32 },

    #[error("sheet '{sheet}' already uses the last Excel column, no room for a new one")]
    NoFreeColumn { sheet: String },

    #[error("row {row} is outside the sheet")]
    RowOutOfRange { row: usize },

    #[error("Row {row}: {source}")]
    AtRow {
        row: usize,
        #[source]
        source: Box<SheetQrError>,
    },

    #[error("Could not open Excel file '{path}': {source}")]
    OpenWorkbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    #[error("Sheet not found: {0}")]
    SheetNotFound(String),

    #[error("workbook has no '{0}' part")]
    MissingPart(String),

    // Standard library errors
    #[error("{0}")]
    Io(#[from] std::io::Error),

    // Third-party library errors
    #[error("{0}")]
    Workbook(#[from] calamine::Error),

    #[error("{0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{0}")]
    Xml(#[from] quick_xml::Error),

    #[error("{0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("{0}")]
    Image(#[from] image::ImageError),

    #[error("QR encode error: {0}")]
    Qr(#[from] qrcode::types::QrError),
}

impl SheetQrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SheetQrError::Config(_)
            | SheetQrError::InvalidImageSize { .. }
            | SheetQrError::SheetNotFound(_) => ErrorKind::Config,
            SheetQrError::ColumnNotFound(_) => ErrorKind::ColumnNotFound,
            SheetQrError::EncodingOverflow { .. }
            | SheetQrError::EmptySourceText { .. }
            | SheetQrError::Qr(_) => ErrorKind::EncodingOverflow,
            SheetQrError::AtRow { source, .. } => source.kind(),
            SheetQrError::NoFreeColumn { .. }
            | SheetQrError::RowOutOfRange { .. }
            | SheetQrError::OpenWorkbook { .. }
            | SheetQrError::Io(_)
            | SheetQrError::Workbook(_)
            | SheetQrError::MissingPart(_)
            | SheetQrError::Zip(_)
            | SheetQrError::Xml(_)
            | SheetQrError::XmlAttribute(_)
            | SheetQrError::Image(_) => ErrorKind::Io,
        }
    }

    /// Attach the 1-based spreadsheet row the failure belongs to.
    pub fn at_row(self, row: usize) -> SheetQrError {
        SheetQrError::AtRow {
            row,
            source: Box::new(self),
        }
    }
}

pub type Result<T, E = SheetQrError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_context_keeps_kind_and_names_row() {
        let err = SheetQrError::EmptySourceText {
            column: "URL".to_string(),
        }
        .at_row(7);
        assert_eq!(err.kind(), ErrorKind::EncodingOverflow);
        assert_eq!(
            err.to_string(),
            "Row 7: cell in column 'URL' is empty, nothing to encode"
        );
    }

    #[test]
    fn io_errors_classify_as_io() {
        let err: SheetQrError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn column_not_found_message() {
        let err = SheetQrError::ColumnNotFound("Link".to_string());
        assert_eq!(err.kind(), ErrorKind::ColumnNotFound);
        assert_eq!(err.to_string(), "Column 'Link' not found in the Excel file.");
    }
}
