pub mod cell_style;
pub mod sheet_layout;

pub use cell_style::{
    AlignmentStyle, CellStyle, FontStyle, HeaderStyle, HorizontalAlign, NumberFormat, StyleColor,
    VerticalAlign,
};
pub use sheet_layout::SheetLayout;
