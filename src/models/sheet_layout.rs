use std::collections::{BTreeMap, HashMap};

use super::cell_style::CellStyle;

/// Formatting recovered from an existing sheet: per-cell styles plus column
/// widths and custom row heights. All coordinates are 0-based.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetLayout {
    pub cell_styles: HashMap<(u32, u32), CellStyle>,
    pub column_widths: BTreeMap<u32, f64>,
    pub row_heights: BTreeMap<u32, f64>,
    /// Rightmost column holding a `<c>` element, styled or not.
    pub last_column: Option<u32>,
}

impl SheetLayout {
    pub fn style_at(&self, row: u32, col: u32) -> CellStyle {
        self.cell_styles.get(&(row, col)).cloned().unwrap_or_default()
    }

}
