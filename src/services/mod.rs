pub mod style_scanner;
pub mod xlsx_patch;
