pub mod config;
pub mod error;
pub mod excel;
pub mod models;
pub mod output_sheet;
pub mod pipeline;
pub mod qr;
pub mod services;
pub mod types;

pub use config::Settings;
pub use error::{ErrorKind, Result, SheetQrError};
pub use excel::{col_index_to_letter, read_input_table, InputTable};
pub use output_sheet::{ColumnId, OutputSheet, QR_HEADER_LABEL};
pub use pipeline::{convert, process, process_at, run};
pub use qr::{encode, QrImage, QR_IMAGE_SIZE};
pub use types::{CellValue, ConversionReport, RunSummary};
