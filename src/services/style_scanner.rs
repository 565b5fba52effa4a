//! Raw xlsx scanning with zip + quick-xml: cell styles, column widths, row
//! heights and the active sheet. calamine reads values but not formatting.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

use crate::error::Result;
use crate::excel::parse_cell_ref;
use crate::models::{
    AlignmentStyle, CellStyle, FontStyle, HorizontalAlign, NumberFormat, SheetLayout, StyleColor,
    VerticalAlign,
};

/// First id Excel uses for custom number formats; lower ids are built in.
const FIRST_CUSTOM_NUM_FMT_ID: u32 = 164;

/// Only the zip-based OOXML formats carry a styles.xml we can read.
pub fn is_ooxml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("xlsx") || e.eq_ignore_ascii_case("xlsm"))
        .unwrap_or(false)
}

pub(crate) fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path)?;
    Ok(ZipArchive::new(file)?)
}

/// Stored name of a part, matched case-insensitively.
pub(crate) fn find_part(archive: &ZipArchive<File>, name: &str) -> Option<String> {
    let wanted = name.replace('\\', "/");
    archive
        .file_names()
        .find(|n| n.eq_ignore_ascii_case(&wanted))
        .map(str::to_owned)
}

/// Read a part by name, matching case-insensitively. `None` if the part is absent.
pub(crate) fn read_zip_text(archive: &mut ZipArchive<File>, name: &str) -> Result<Option<String>> {
    let Some(found) = find_part(archive, name) else {
        return Ok(None);
    };
    let mut entry = archive.by_name(&found)?;
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok(Some(content))
}

fn xml_reader(xml: &str) -> XmlReader<&[u8]> {
    let mut reader = XmlReader::from_str(xml);
    let config = reader.config_mut();
    config.trim_text(true);
    config.expand_empty_elements = true;
    reader
}

pub(crate) fn attr_value(event: &BytesStart, name: &str) -> Result<Option<String>> {
    match event.try_get_attribute(name)? {
        Some(attribute) => Ok(Some(attribute.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

fn attr_flag(event: &BytesStart, name: &str) -> Result<Option<bool>> {
    Ok(attr_value(event, name)?.map(|v| v == "1" || v.eq_ignore_ascii_case("true")))
}

pub(crate) fn attr_parse<T: std::str::FromStr>(event: &BytesStart, name: &str) -> Result<Option<T>> {
    Ok(attr_value(event, name)?.and_then(|v| v.trim().parse().ok()))
}

/// Excel's built-in `indexed` palette, used when styles.xml has no `<indexedColors>`.
const DEFAULT_INDEXED_COLORS: [u32; 64] = [
    0x000000, 0xFFFFFF, 0xFF0000, 0x00FF00, 0x0000FF, 0xFFFF00, 0xFF00FF, 0x00FFFF,
    0x000000, 0xFFFFFF, 0xFF0000, 0x00FF00, 0x0000FF, 0xFFFF00, 0xFF00FF, 0x00FFFF,
    0x800000, 0x008000, 0x000080, 0x808000, 0x800080, 0x008080, 0xC0C0C0, 0x808080,
    0x9999FF, 0x993366, 0xFFFFCC, 0xCCFFFF, 0x660066, 0xFF8080, 0x0066CC, 0xCCCCFF,
    0x000080, 0xFF00FF, 0xFFFF00, 0x00FFFF, 0x800080, 0x800000, 0x008080, 0x0000FF,
    0x00CCFF, 0xCCFFFF, 0xCCFFCC, 0xFFFF99, 0x99CCFF, 0xFF99CC, 0xCC99FF, 0xFFCC99,
    0x3366FF, 0x33CCCC, 0x99CC00, 0xFFCC00, 0xFF9900, 0xFF6600, 0x666699, 0x969696,
    0x003366, 0x339966, 0x003300, 0x333300, 0x993300, 0x993366, 0x333399, 0x333333,
];

/// A `<color>` element as written. The indexed palette may be overridden
/// further down in styles.xml, so resolution waits until the whole part is read.
#[derive(Debug, Clone, Copy, Default)]
struct RawColor {
    rgb: Option<u32>,
    theme: Option<u8>,
    indexed: Option<usize>,
    tint: f64,
}

impl RawColor {
    fn parse(event: &BytesStart) -> Result<RawColor> {
        let rgb = match attr_value(event, "rgb")? {
            Some(hex) => match StyleColor::from_hex(&hex) {
                Some(StyleColor::Rgb(rgb)) => Some(rgb),
                _ => None,
            },
            None => None,
        };
        Ok(RawColor {
            rgb,
            theme: attr_parse(event, "theme")?,
            indexed: attr_parse(event, "indexed")?,
            tint: attr_parse(event, "tint")?.unwrap_or(0.0),
        })
    }

    /// Indexes 64 and up are system colors (window text, background) with no fixed value.
    fn resolve(self, palette: &[u32]) -> Option<StyleColor> {
        let base = if let Some(rgb) = self.rgb {
            StyleColor::Rgb(rgb)
        } else if let Some(index) = self.theme {
            StyleColor::Theme { index, tint: 0.0 }
        } else {
            StyleColor::Rgb(*palette.get(self.indexed?)?)
        };
        Some(base.with_tint(self.tint))
    }
}

/// Normalize a relationship target to a path inside the archive. Relative
/// targets are taken from `base_dir`, the folder of the part owning the rels.
pub(crate) fn resolve_part(base_dir: &str, target: &str) -> String {
    if let Some(stripped) = target.strip_prefix('/') {
        return stripped.to_string();
    }
    if target.starts_with(&format!("{base_dir}/")) {
        return target.to_string();
    }
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Worksheet entries of workbook.xml resolved to part paths, plus the active tab.
pub(crate) struct WorkbookParts {
    pub sheets: Vec<(String, String)>,
    pub active_tab: usize,
}

fn load_relationships(archive: &mut ZipArchive<File>) -> Result<HashMap<String, String>> {
    let mut relationships = HashMap::new();
    let Some(xml) = read_zip_text(archive, "xl/_rels/workbook.xml.rels")? else {
        return Ok(relationships);
    };
    let mut reader = xml_reader(&xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"Relationship" => {
                let id = attr_value(&e, "Id")?;
                let target = attr_value(&e, "Target")?;
                if let Some((id, target)) = id.zip(target) {
                    relationships.insert(id, resolve_part("xl", &target));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(relationships)
}

pub(crate) fn load_workbook_parts(archive: &mut ZipArchive<File>) -> Result<WorkbookParts> {
    let relationships = load_relationships(archive)?;
    let mut parts = WorkbookParts {
        sheets: Vec::new(),
        active_tab: 0,
    };
    let Some(xml) = read_zip_text(archive, "xl/workbook.xml")? else {
        return Ok(parts);
    };
    let mut reader = xml_reader(&xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut id = None;
                for attribute in e.attributes() {
                    let attribute = attribute?;
                    match attribute.key.local_name().as_ref() {
                        b"name" => name = Some(attribute.unescape_value()?.into_owned()),
                        b"id" => id = Some(attribute.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                if let Some((name, id)) = name.zip(id) {
                    if let Some(path) = relationships.get(&id) {
                        parts.sheets.push((name, path.clone()));
                    }
                }
            }
            Event::Start(e) if e.local_name().as_ref() == b"workbookView" => {
                parts.active_tab = attr_parse(&e, "activeTab")?.unwrap_or(0);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(parts)
}

/// Name of the sheet Excel opens on (`workbookView activeTab`). `None` for
/// non-OOXML inputs or workbooks without sheets.
pub fn active_sheet_name(path: &Path) -> Result<Option<String>> {
    if !is_ooxml(path) {
        return Ok(None);
    }
    let mut archive = open_archive(path)?;
    let parts = load_workbook_parts(&mut archive)?;
    let active = parts
        .sheets
        .get(parts.active_tab)
        .or_else(|| parts.sheets.first())
        .map(|(name, _)| name.clone());
    Ok(active)
}

#[derive(Default)]
struct RawXf {
    font_id: usize,
    fill_id: usize,
    num_fmt_id: u32,
    alignment: AlignmentStyle,
}

/// Parse styles.xml into the resolved style of every `cellXfs` entry.
pub fn parse_cell_styles(xml: &str) -> Result<Vec<CellStyle>> {
    let mut custom_formats: HashMap<u32, String> = HashMap::new();
    let mut fonts: Vec<(FontStyle, Option<RawColor>)> = Vec::new();
    let mut fills: Vec<Option<RawColor>> = Vec::new();
    let mut xfs: Vec<RawXf> = Vec::new();
    let mut indexed_colors: Vec<u32> = Vec::new();

    let mut in_num_fmts = false;
    let mut in_fonts = false;
    let mut in_fills = false;
    let mut in_cell_xfs = false;
    let mut in_indexed_colors = false;
    let mut font: Option<(FontStyle, Option<RawColor>)> = None;
    let mut fill: Option<(bool, Option<RawColor>)> = None;
    let mut xf: Option<RawXf> = None;

    let mut reader = xml_reader(xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"numFmts" => in_num_fmts = true,
                b"numFmt" if in_num_fmts => {
                    let id = attr_parse::<u32>(&e, "numFmtId")?;
                    let code = attr_value(&e, "formatCode")?;
                    if let Some((id, code)) = id.zip(code) {
                        custom_formats.insert(id, code);
                    }
                }
                b"fonts" => in_fonts = true,
                b"font" if in_fonts => font = Some((FontStyle::default(), None)),
                b"b" if font.is_some() => {
                    if let Some(f) = font.as_mut() {
                        f.0.bold = attr_flag(&e, "val")?.unwrap_or(true);
                    }
                }
                b"i" if font.is_some() => {
                    if let Some(f) = font.as_mut() {
                        f.0.italic = attr_flag(&e, "val")?.unwrap_or(true);
                    }
                }
                b"sz" if font.is_some() => {
                    let size = attr_parse::<f64>(&e, "val")?;
                    if let Some(f) = font.as_mut() {
                        f.0.size = size;
                    }
                }
                b"name" if font.is_some() => {
                    let name = attr_value(&e, "val")?;
                    if let Some(f) = font.as_mut() {
                        f.0.name = name;
                    }
                }
                b"color" if font.is_some() => {
                    let color = RawColor::parse(&e)?;
                    if let Some(f) = font.as_mut() {
                        f.1 = Some(color);
                    }
                }
                b"fills" => in_fills = true,
                b"fill" if in_fills => fill = Some((false, None)),
                b"patternFill" if fill.is_some() => {
                    let solid = attr_value(&e, "patternType")?.as_deref() == Some("solid");
                    if let Some(f) = fill.as_mut() {
                        f.0 = solid;
                    }
                }
                b"fgColor" if fill.is_some() => {
                    let color = RawColor::parse(&e)?;
                    if let Some(f) = fill.as_mut() {
                        f.1 = Some(color);
                    }
                }
                b"indexedColors" => in_indexed_colors = true,
                b"rgbColor" if in_indexed_colors => {
                    let rgb = attr_value(&e, "rgb")?.and_then(|v| StyleColor::from_hex(&v));
                    if let Some(StyleColor::Rgb(rgb)) = rgb {
                        indexed_colors.push(rgb);
                    }
                }
                b"cellXfs" => in_cell_xfs = true,
                b"xf" if in_cell_xfs => {
                    xf = Some(RawXf {
                        font_id: attr_parse(&e, "fontId")?.unwrap_or(0),
                        fill_id: attr_parse(&e, "fillId")?.unwrap_or(0),
                        num_fmt_id: attr_parse(&e, "numFmtId")?.unwrap_or(0),
                        alignment: AlignmentStyle::default(),
                    });
                }
                b"alignment" if xf.is_some() => {
                    let horizontal = attr_value(&e, "horizontal")?.and_then(|v| HorizontalAlign::parse(&v));
                    let vertical = attr_value(&e, "vertical")?.and_then(|v| VerticalAlign::parse(&v));
                    let wrap_text = attr_flag(&e, "wrapText")?.unwrap_or(false);
                    if let Some(x) = xf.as_mut() {
                        x.alignment = AlignmentStyle {
                            horizontal,
                            vertical,
                            wrap_text,
                        };
                    }
                }
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"numFmts" => in_num_fmts = false,
                b"fonts" => in_fonts = false,
                b"font" => {
                    if let Some(f) = font.take() {
                        fonts.push(f);
                    }
                }
                b"fills" => in_fills = false,
                b"fill" => {
                    if let Some((solid, color)) = fill.take() {
                        fills.push(if solid { color } else { None });
                    }
                }
                b"cellXfs" => in_cell_xfs = false,
                b"indexedColors" => in_indexed_colors = false,
                b"xf" => {
                    if let Some(x) = xf.take() {
                        xfs.push(x);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let palette: &[u32] = if indexed_colors.is_empty() {
        &DEFAULT_INDEXED_COLORS
    } else {
        &indexed_colors
    };
    let fonts: Vec<FontStyle> = fonts
        .into_iter()
        .map(|(mut font, color)| {
            font.color = color.and_then(|c| c.resolve(palette));
            font
        })
        .collect();

    let styles = xfs
        .into_iter()
        .map(|x| CellStyle {
            font: fonts.get(x.font_id).cloned().unwrap_or_default(),
            alignment: x.alignment,
            fill: fills.get(x.fill_id).copied().flatten().and_then(|c| c.resolve(palette)),
            number_format: resolve_number_format(x.num_fmt_id, &custom_formats),
        })
        .collect();
    Ok(styles)
}

fn resolve_number_format(id: u32, custom_formats: &HashMap<u32, String>) -> Option<NumberFormat> {
    if let Some(code) = custom_formats.get(&id) {
        return Some(NumberFormat::Custom(code.clone()));
    }
    match id {
        0 => None,
        id if id < FIRST_CUSTOM_NUM_FMT_ID => u8::try_from(id).ok().map(NumberFormat::Builtin),
        _ => None,
    }
}

/// Parse a worksheet part: cell style indexes, column widths, custom row heights.
pub fn parse_sheet_layout(xml: &str, styles: &[CellStyle]) -> Result<SheetLayout> {
    let mut layout = SheetLayout::default();
    let mut column_ranges: Vec<(u32, u32, f64)> = Vec::new();
    let mut max_col: Option<u32> = None;
    let mut current_row: u32 = 0;
    let mut next_col: u32 = 0;
    let mut seen_row = false;

    let mut reader = xml_reader(xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"col" => {
                    let min = attr_parse::<u32>(&e, "min")?;
                    let max = attr_parse::<u32>(&e, "max")?;
                    let width = attr_parse::<f64>(&e, "width")?;
                    if let (Some(min), Some(max), Some(width)) = (min, max, width) {
                        if min >= 1 && max >= min {
                            column_ranges.push((min - 1, max - 1, width));
                        }
                    }
                }
                b"row" => {
                    current_row = match attr_parse::<u32>(&e, "r")? {
                        Some(r) if r >= 1 => r - 1,
                        _ if seen_row => current_row + 1,
                        _ => 0,
                    };
                    seen_row = true;
                    next_col = 0;
                    let custom = attr_flag(&e, "customHeight")?.unwrap_or(false);
                    if let (true, Some(height)) = (custom, attr_parse::<f64>(&e, "ht")?) {
                        layout.row_heights.insert(current_row, height);
                    }
                }
                b"c" => {
                    let (row, col) = attr_value(&e, "r")?
                        .and_then(|r| parse_cell_ref(&r))
                        .unwrap_or((current_row, next_col));
                    next_col = col + 1;
                    max_col = Some(max_col.map_or(col, |m| m.max(col)));
                    if let Some(index) = attr_parse::<usize>(&e, "s")? {
                        if let Some(style) = styles.get(index) {
                            if !style.is_default() {
                                layout.cell_styles.insert((row, col), style.clone());
                            }
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    layout.last_column = max_col;
    // `<col>` ranges may run to XFD; only columns up to one past the last cell matter.
    let limit = max_col.map_or(0, |m| m + 1);
    for (first, last, width) in column_ranges {
        for col in first..=last.min(limit) {
            layout.column_widths.insert(col, width);
        }
    }
    Ok(layout)
}

/// Formatting of `sheet_name` in the workbook at `path`. Non-OOXML inputs
/// (xls, ods, xlsb) yield an empty layout.
pub fn scan_sheet_layout(path: &Path, sheet_name: &str) -> Result<SheetLayout> {
    if !is_ooxml(path) {
        debug!(path = %path.display(), "no OOXML styles to scan");
        return Ok(SheetLayout::default());
    }
    let mut archive = open_archive(path)?;
    let parts = load_workbook_parts(&mut archive)?;
    let Some((_, sheet_path)) = parts.sheets.iter().find(|(name, _)| name == sheet_name) else {
        return Ok(SheetLayout::default());
    };
    let sheet_path = sheet_path.clone();

    let styles = match read_zip_text(&mut archive, "xl/styles.xml")? {
        Some(xml) => parse_cell_styles(&xml)?,
        None => Vec::new(),
    };
    let Some(sheet_xml) = read_zip_text(&mut archive, &sheet_path)? else {
        return Ok(SheetLayout::default());
    };
    let layout = parse_sheet_layout(&sheet_xml, &styles)?;
    debug!(
        sheet = sheet_name,
        styled_cells = layout.cell_styles.len(),
        widths = layout.column_widths.len(),
        heights = layout.row_heights.len(),
        "scanned sheet layout"
    );
    Ok(layout)
}

/// Number of embedded media parts (`xl/media/*`) in an OOXML workbook.
pub fn count_embedded_images(path: &Path) -> Result<usize> {
    if !is_ooxml(path) {
        return Ok(0);
    }
    let archive = open_archive(path)?;
    let count = archive
        .file_names()
        .filter(|name| name.starts_with("xl/media/"))
        .count();
    Ok(count)
}
