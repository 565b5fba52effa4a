use calamine::{open_workbook_auto, Data, Reader};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::error::{Result, SheetQrError};
use crate::types::CellValue;

/// Column index to Excel letter (0→A, 1→B, 25→Z, 26→AA).
pub fn col_index_to_letter(index: u32) -> String {
    let mut n = index;
    let mut s = String::new();
    loop {
        let r = (n % 26) as u8;
        s.insert(0, (b'A' + r) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    s
}

/// Excel letter to column index (A→0, Z→25, AA→26). Case-insensitive.
pub fn letter_to_col_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    let mut n: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as u32 + 1;
        n = n.checked_mul(26)?.checked_add(digit)?;
    }
    Some(n - 1)
}

/// A1-style reference for 0-based row/column.
pub fn cell_ref(row: u32, col: u32) -> String {
    format!("{}{}", col_index_to_letter(col), row + 1)
}

fn cell_ref_regex() -> &'static Regex {
    static CELL_REF: OnceLock<Regex> = OnceLock::new();
    CELL_REF.get_or_init(|| Regex::new(r"^\$?([A-Za-z]{1,3})\$?([0-9]{1,7})$").expect("cell ref regex"))
}

/// Parse `B12` / `$B$12` into 0-based (row, col).
pub fn parse_cell_ref(reference: &str) -> Option<(u32, u32)> {
    let caps = cell_ref_regex().captures(reference.trim())?;
    let col = letter_to_col_index(&caps[1])?;
    let row: u32 = caps[2].parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, col))
}

/// Sheet contents: row 1 as headers, every later row as data.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputTable {
    pub sheet_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl InputTable {
    pub fn new(sheet_name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(headers.len());
        let mut headers = headers;
        headers.resize(width, String::new());
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, CellValue::Empty);
                row
            })
            .collect();
        InputTable {
            sheet_name: sheet_name.into(),
            headers,
            rows,
        }
    }

    /// Number of data rows (header excluded).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of columns, header included.
    pub fn width(&self) -> usize {
        self.headers.len()
    }

    /// 0-based index of the column whose header text equals `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.rows.get(row).and_then(|r| r.get(col)).unwrap_or(&EMPTY)
    }
}

fn to_cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(n) => CellValue::Number(*n),
        Data::Int(n) => CellValue::Number(*n as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => CellValue::DateTime(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Error(e.to_string()),
    }
}

/// Get list of sheet names from workbook.
pub fn get_sheet_names(path: &Path) -> Result<Vec<String>> {
    let workbook = open_workbook_auto(path).map_err(|source| SheetQrError::OpenWorkbook {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(workbook.sheet_names().to_vec())
}

/// Read one sheet into an [`InputTable`]. `sheet_name` of `None` picks the first sheet.
///
/// Coordinates are absolute: row 1 of the sheet is the header row even when the
/// used range starts further down or to the right.
pub fn read_input_table(path: &Path, sheet_name: Option<&str>) -> Result<InputTable> {
    let mut workbook = open_workbook_auto(path).map_err(|source| SheetQrError::OpenWorkbook {
        path: path.to_path_buf(),
        source,
    })?;
    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = match sheet_name {
        Some(name) => {
            if !sheet_names.iter().any(|s| s == name) {
                return Err(SheetQrError::SheetNotFound(name.to_string()));
            }
            name.to_string()
        }
        None => sheet_names
            .first()
            .cloned()
            .ok_or_else(|| SheetQrError::SheetNotFound("(workbook has no sheets)".to_string()))?,
    };
    debug!(sheet = %sheet_name, sheets = sheet_names.len(), "selected sheet");

    let range = workbook.worksheet_range(&sheet_name)?;
    let (row_offset, col_offset) = range.start().unwrap_or((0, 0));
    let (height, width) = range.get_size();
    let last_row = if height == 0 { 0 } else { row_offset as usize + height - 1 };
    let total_cols = if width == 0 { 0 } else { col_offset as usize + width };

    let mut grid = vec![vec![CellValue::Empty; total_cols]; if height == 0 { 0 } else { last_row + 1 }];
    for (r, c, cell) in range.used_cells() {
        let row = row_offset as usize + r;
        let col = col_offset as usize + c;
        grid[row][col] = to_cell_value(cell);
    }

    let mut rows = grid.into_iter();
    let headers = rows
        .next()
        .map(|row| row.iter().map(CellValue::display_text).collect())
        .unwrap_or_default();
    let table = InputTable::new(sheet_name, headers, rows.collect());
    info!(
        sheet = %table.sheet_name,
        rows = table.len(),
        columns = table.width(),
        "read input sheet"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters() {
        assert_eq!(col_index_to_letter(0), "A");
        assert_eq!(col_index_to_letter(25), "Z");
        assert_eq!(col_index_to_letter(26), "AA");
        assert_eq!(col_index_to_letter(51), "AZ");
        assert_eq!(col_index_to_letter(52), "BA");
        assert_eq!(col_index_to_letter(701), "ZZ");
        assert_eq!(col_index_to_letter(702), "AAA");
        assert_eq!(col_index_to_letter(16_383), "XFD");
    }

    #[test]
    fn letters_invert_column_mapping() {
        for index in [0u32, 1, 25, 26, 27, 700, 701, 702, 16_383] {
            assert_eq!(letter_to_col_index(&col_index_to_letter(index)), Some(index));
        }
        assert_eq!(letter_to_col_index("aa"), Some(26));
        assert_eq!(letter_to_col_index(""), None);
        assert_eq!(letter_to_col_index("A1"), None);
    }

    #[test]
    fn parses_cell_references() {
        assert_eq!(parse_cell_ref("A1"), Some((0, 0)));
        assert_eq!(parse_cell_ref("$C$12"), Some((11, 2)));
        assert_eq!(parse_cell_ref("AB3"), Some((2, 27)));
        assert_eq!(parse_cell_ref("A0"), None);
        assert_eq!(parse_cell_ref("12"), None);
        assert_eq!(cell_ref(1, 2), "C2");
    }

    #[test]
    fn table_pads_ragged_rows() {
        let table = InputTable::new(
            "Sheet1",
            vec!["URL".to_string()],
            vec![vec![CellValue::Text("a".into()), CellValue::Number(1.0)], vec![]],
        );
        assert_eq!(table.width(), 2);
        assert_eq!(table.headers, vec!["URL".to_string(), String::new()]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(1, 0), &CellValue::Empty);
        assert_eq!(table.cell(9, 9), &CellValue::Empty);
        assert_eq!(table.column_index("URL"), Some(0));
        assert_eq!(table.column_index("url"), None);
    }
}
