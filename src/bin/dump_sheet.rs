//! Print headers, row count, image count and header styles of a workbook as JSON.

use anyhow::Context;
use serde::Serialize;
use std::path::PathBuf;

use sheet_qrcode_lib::excel::{get_sheet_names, read_input_table};
use sheet_qrcode_lib::models::CellStyle;
use sheet_qrcode_lib::services::style_scanner::{count_embedded_images, scan_sheet_layout};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SheetDump {
    sheets: Vec<String>,
    sheet_name: String,
    headers: Vec<String>,
    data_rows: usize,
    embedded_images: usize,
    header_styles: Vec<CellStyle>,
    column_widths: Vec<(u32, f64)>,
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let path = PathBuf::from(args.next().context("usage: dump_sheet WORKBOOK [SHEET]")?);
    let sheet = args.next();

    let table = read_input_table(&path, sheet.as_deref())
        .with_context(|| format!("reading '{}'", path.display()))?;
    let layout = scan_sheet_layout(&path, &table.sheet_name)?;
    let dump = SheetDump {
        sheets: get_sheet_names(&path)?,
        header_styles: (0..table.width() as u32).map(|col| layout.style_at(0, col)).collect(),
        column_widths: layout.column_widths.iter().map(|(&c, &w)| (c, w)).collect(),
        embedded_images: count_embedded_images(&path)?,
        data_rows: table.len(),
        headers: table.headers,
        sheet_name: table.sheet_name,
    };
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}
