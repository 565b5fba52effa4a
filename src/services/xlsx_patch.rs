//! Augmented copy of an xlsx package.
//!
//! Every part of the input is carried over as stored. Only the processed
//! worksheet, styles.xml, the sheet's rels and `[Content_Types].xml` are
//! patched, and a drawing holding the QR pictures is added (or extended when
//! the sheet already has one). Hyperlinks, formulas, merged ranges, borders,
//! macros and the other sheets survive untouched.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader as XmlReader, Writer as XmlWriter};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::style_scanner::{
    attr_parse, attr_value, find_part, load_workbook_parts, open_archive, read_zip_text,
    resolve_part,
};
use crate::error::{Result, SheetQrError};
use crate::excel::{cell_ref, parse_cell_ref};

const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PACKAGE_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const DRAWING_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing";
const IMAGE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const XDR_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing";
const A_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const DRAWING_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.drawing+xml";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const STYLES_PART: &str = "xl/styles.xml";
const EMU_PER_PIXEL: u64 = 9525;

/// Worksheet children that must come after `<drawing>`.
const AFTER_DRAWING: [&[u8]; 9] = [
    b"legacyDrawing",
    b"legacyDrawingHF",
    b"drawingHF",
    b"picture",
    b"oleObjects",
    b"controls",
    b"webPublishItems",
    b"tableParts",
    b"extLst",
];

/// Font children carried onto the QR header font.
const HEADER_FONT_PARTS: [&[u8]; 4] = [b"b", b"sz", b"color", b"name"];

/// A PNG anchored at the top-left corner of a cell (0-based).
#[derive(Debug, Clone)]
pub struct PlacedImage {
    pub row: u32,
    pub col: u32,
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
    pub alt_text: String,
}

/// Everything that differs between the input sheet and its augmented copy.
#[derive(Debug, Clone)]
pub struct SheetEdits {
    pub sheet_name: String,
    /// Column whose cells get text wrap.
    pub source_col: u32,
    /// Appended column; must lie right of every existing cell.
    pub dest_col: u32,
    pub header_label: String,
    /// Width of `dest_col` in character units.
    pub column_width: f64,
    /// Height in points of every data row.
    pub row_height: f64,
    /// Data rows below the header row.
    pub data_rows: u32,
    pub images: Vec<PlacedImage>,
}

fn drawing_ref_regex() -> &'static Regex {
    static DRAWING_REF: OnceLock<Regex> = OnceLock::new();
    DRAWING_REF.get_or_init(|| {
        Regex::new(r#"<(?:\w+:)?drawing\b[^>]*?\b\w+:id="([^"]+)""#).expect("drawing ref regex")
    })
}

fn relationship_regex() -> &'static Regex {
    static RELATIONSHIP: OnceLock<Regex> = OnceLock::new();
    RELATIONSHIP.get_or_init(|| Regex::new(r"<(?:\w+:)?Relationship\b[^>]*>").expect("relationship regex"))
}

fn rel_id_regex() -> &'static Regex {
    static REL_ID: OnceLock<Regex> = OnceLock::new();
    REL_ID.get_or_init(|| Regex::new(r#"\bId="([^"]+)""#).expect("rel id regex"))
}

fn rel_target_regex() -> &'static Regex {
    static REL_TARGET: OnceLock<Regex> = OnceLock::new();
    REL_TARGET.get_or_init(|| Regex::new(r#"\bTarget="([^"]+)""#).expect("rel target regex"))
}

fn picture_id_regex() -> &'static Regex {
    static PICTURE_ID: OnceLock<Regex> = OnceLock::new();
    PICTURE_ID.get_or_init(|| Regex::new(r#"<(?:\w+:)?cNvPr\b[^>]*?\bid="(\d+)""#).expect("cNvPr id regex"))
}

fn count_attr_regex() -> &'static Regex {
    static COUNT: OnceLock<Regex> = OnceLock::new();
    COUNT.get_or_init(|| Regex::new(r#"\bcount="[^"]*""#).expect("count regex"))
}

/// Write `input` to `output` with the edits applied to its `edits.sheet_name` sheet.
pub fn write_augmented_copy(input: &Path, output: &Path, edits: &SheetEdits) -> Result<()> {
    let mut archive = open_archive(input)?;
    let mut parts = PartSet::new(&archive);

    let workbook = load_workbook_parts(&mut archive)?;
    let sheet_part = workbook
        .sheets
        .iter()
        .find(|(name, _)| *name == edits.sheet_name)
        .map(|(_, path)| path.clone())
        .ok_or_else(|| SheetQrError::SheetNotFound(edits.sheet_name.clone()))?;
    let sheet_xml = read_required(&mut archive, &sheet_part)?;
    let styles_xml = read_required(&mut archive, STYLES_PART)?;
    let content_types = read_required(&mut archive, CONTENT_TYPES_PART)?;

    let sheet_dir = parent_dir(&sheet_part);
    let sheet_rels_part = rels_part_for(&sheet_part);
    let sheet_rels = read_zip_text(&mut archive, &sheet_rels_part)?;

    // An existing drawing gets the new pictures appended; otherwise a fresh one is linked.
    let existing_drawing = drawing_ref_regex()
        .captures(&sheet_xml)
        .map(|c| c[1].to_string())
        .and_then(|rid| sheet_rels.as_deref().and_then(|rels| relationship_target(rels, &rid)))
        .map(|target| resolve_part(sheet_dir, &target))
        .and_then(|part| find_part(&archive, &part));

    let mut styles = XfAllocator::parse(&styles_xml)?;
    let (drawing_part, new_drawing_rid) = match &existing_drawing {
        Some(part) => (part.clone(), None),
        None => {
            let part = parts.free_name("xl/drawings/drawing", ".xml");
            let rid = next_rel_ids(sheet_rels.as_deref().unwrap_or(""), 1)
                .into_iter()
                .next()
                .unwrap_or_default();
            (part, Some(rid))
        }
    };
    // a header-only sheet gets no drawing at all
    let new_drawing_rid = new_drawing_rid.filter(|_| !edits.images.is_empty());

    let patched_sheet = patch_sheet(&sheet_xml, edits, &mut styles, new_drawing_rid.as_deref())?;
    parts.put(&sheet_part, patched_sheet.into_bytes());
    parts.put(STYLES_PART, styles.render()?.into_bytes());

    if edits.images.is_empty() {
        return parts.write(&mut archive, output);
    }

    // pictures, their rels and the drawing part
    let drawing_rels_part = rels_part_for(&drawing_part);
    let drawing_rels = read_zip_text(&mut archive, &drawing_rels_part)?;
    let image_rids = next_rel_ids(drawing_rels.as_deref().unwrap_or(""), edits.images.len());
    let mut image_rels = String::new();
    let mut pictures = Vec::with_capacity(edits.images.len());
    for (image, rid) in edits.images.iter().zip(&image_rids) {
        let media = parts.free_name("xl/media/image", ".png");
        image_rels.push_str(&relationship_xml(rid, IMAGE_REL_TYPE, &format!("/{media}")));
        parts.put(&media, image.png.clone());
        pictures.push((image, rid.as_str()));
    }
    parts.put(&drawing_rels_part, append_relationships(drawing_rels.as_deref(), &image_rels).into_bytes());

    let drawing_xml = match &existing_drawing {
        Some(part) => {
            let xml = read_required(&mut archive, part)?;
            let first_id = max_picture_id(&xml) + 1;
            append_anchors(&xml, &anchors_xml(&pictures, first_id, true))
                .ok_or_else(|| SheetQrError::MissingPart(format!("wsDr root in {part}")))?
        }
        None => new_drawing_xml(&anchors_xml(&pictures, 1, false)),
    };
    parts.put(&drawing_part, drawing_xml.into_bytes());

    if let Some(rid) = &new_drawing_rid {
        let rel = relationship_xml(rid, DRAWING_REL_TYPE, &format!("/{drawing_part}"));
        parts.put(&sheet_rels_part, append_relationships(sheet_rels.as_deref(), &rel).into_bytes());
    }
    let new_drawing = new_drawing_rid.as_ref().map(|_| drawing_part.as_str());
    parts.put(CONTENT_TYPES_PART, add_content_types(&content_types, new_drawing).into_bytes());

    debug!(
        sheet = %sheet_part,
        drawing = %drawing_part,
        images = edits.images.len(),
        "patched workbook parts"
    );
    parts.write(&mut archive, output)
}

fn read_required(archive: &mut ZipArchive<File>, part: &str) -> Result<String> {
    read_zip_text(archive, part)?.ok_or_else(|| SheetQrError::MissingPart(part.to_string()))
}

fn parent_dir(part: &str) -> &str {
    part.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// `xl/worksheets/sheet1.xml` -> `xl/worksheets/_rels/sheet1.xml.rels`
fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Parts of the output package: the input's entries, some replaced, plus new ones.
struct PartSet {
    stored: Vec<String>,
    replaced: HashMap<String, Vec<u8>>,
    added: BTreeMap<String, Vec<u8>>,
}

impl PartSet {
    fn new(archive: &ZipArchive<File>) -> Self {
        PartSet {
            stored: archive.file_names().map(str::to_owned).collect(),
            replaced: HashMap::new(),
            added: BTreeMap::new(),
        }
    }

    fn stored_name(&self, name: &str) -> Option<&String> {
        self.stored.iter().find(|n| n.eq_ignore_ascii_case(name))
    }

    fn is_taken(&self, name: &str) -> bool {
        self.stored_name(name).is_some() || self.added.keys().any(|n| n.eq_ignore_ascii_case(name))
    }

    /// First `{stem}{n}{ext}` not used by any part, counting from 1.
    fn free_name(&self, stem: &str, ext: &str) -> String {
        (1..)
            .map(|n| format!("{stem}{n}{ext}"))
            .find(|name| !self.is_taken(name))
            .unwrap_or_default()
    }

    fn put(&mut self, name: &str, data: Vec<u8>) {
        match self.stored_name(name).cloned() {
            Some(stored) => {
                self.replaced.insert(stored, data);
            }
            None => {
                self.added.insert(name.to_string(), data);
            }
        }
    }

    /// Copy every entry in its original order, then append the new parts.
    fn write(&self, archive: &mut ZipArchive<File>, output: &Path) -> Result<()> {
        let out_file = File::create(output)?;
        let mut zip_writer = ZipWriter::new(out_file);
        let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            if entry.is_dir() {
                zip_writer.add_directory(name.as_str(), opts)?;
                continue;
            }
            zip_writer.start_file(name.as_str(), opts)?;
            match self.replaced.get(&name) {
                Some(data) => zip_writer.write_all(data)?,
                None => {
                    let mut data = Vec::new();
                    entry.read_to_end(&mut data)?;
                    zip_writer.write_all(&data)?;
                }
            }
        }
        for (name, data) in &self.added {
            zip_writer.start_file(name.as_str(), opts)?;
            zip_writer.write_all(data)?;
        }
        zip_writer.finish()?;
        Ok(())
    }
}

fn relationship_target(rels: &str, id: &str) -> Option<String> {
    relationship_regex().find_iter(rels).find_map(|m| {
        let tag = m.as_str();
        let matches = rel_id_regex().captures(tag).is_some_and(|c| &c[1] == id);
        matches
            .then(|| rel_target_regex().captures(tag).map(|c| c[1].to_string()))
            .flatten()
    })
}

/// `count` relationship ids (`rIdN`) not present in `rels`.
fn next_rel_ids(rels: &str, count: usize) -> Vec<String> {
    let taken: HashSet<&str> = rel_id_regex()
        .captures_iter(rels)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    (1..)
        .map(|n| format!("rId{n}"))
        .filter(|id| !taken.contains(id.as_str()))
        .take(count)
        .collect()
}

fn relationship_xml(id: &str, rel_type: &str, target: &str) -> String {
    format!(
        r#"<Relationship Id="{id}" Type="{rel_type}" Target="{}"/>"#,
        quick_xml::escape::escape(target)
    )
}

fn append_relationships(rels: Option<&str>, additions: &str) -> String {
    if let Some(rels) = rels {
        if let Some(end) = rels.rfind("</Relationships>") {
            return format!("{}{additions}{}", &rels[..end], &rels[end..]);
        }
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<Relationships xmlns=\"{PACKAGE_REL_NS}\">{additions}</Relationships>"
    )
}

fn add_content_types(xml: &str, new_drawing: Option<&str>) -> String {
    static PNG_DEFAULT: OnceLock<Regex> = OnceLock::new();
    let png_default = PNG_DEFAULT
        .get_or_init(|| Regex::new(r#"(?i)<Default\b[^>]*\bExtension="png""#).expect("png default regex"));

    let mut additions = String::new();
    if !png_default.is_match(xml) {
        additions.push_str(r#"<Default Extension="png" ContentType="image/png"/>"#);
    }
    if let Some(part) = new_drawing {
        additions.push_str(&format!(
            r#"<Override PartName="/{part}" ContentType="{DRAWING_CONTENT_TYPE}"/>"#
        ));
    }
    match xml.rfind("</Types>") {
        Some(end) => format!("{}{additions}{}", &xml[..end], &xml[end..]),
        None => xml.to_string(),
    }
}

fn max_picture_id(drawing: &str) -> u32 {
    picture_id_regex()
        .captures_iter(drawing)
        .filter_map(|c| c[1].parse().ok())
        .max()
        .unwrap_or(0)
}

/// One `oneCellAnchor` per picture. `local_ns` declares the prefixes on each
/// anchor, for drawings whose root may bind them differently.
fn anchors_xml(pictures: &[(&PlacedImage, &str)], first_id: u32, local_ns: bool) -> String {
    let ns = if local_ns {
        format!(r#" xmlns:xdr="{XDR_NS}" xmlns:a="{A_NS}" xmlns:r="{REL_NS}""#)
    } else {
        String::new()
    };
    let mut xml = String::new();
    for (i, (image, rid)) in pictures.iter().enumerate() {
        let id = first_id + i as u32;
        let cx = image.width as u64 * EMU_PER_PIXEL;
        let cy = image.height as u64 * EMU_PER_PIXEL;
        let descr = quick_xml::escape::escape(image.alt_text.as_str());
        xml.push_str(&format!(
            concat!(
                "<xdr:oneCellAnchor{ns}>",
                "<xdr:from><xdr:col>{col}</xdr:col><xdr:colOff>0</xdr:colOff>",
                "<xdr:row>{row}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>",
                "<xdr:ext cx=\"{cx}\" cy=\"{cy}\"/>",
                "<xdr:pic><xdr:nvPicPr><xdr:cNvPr id=\"{id}\" name=\"Picture {id}\" descr=\"{descr}\"/>",
                "<xdr:cNvPicPr><a:picLocks noChangeAspect=\"1\"/></xdr:cNvPicPr></xdr:nvPicPr>",
                "<xdr:blipFill><a:blip r:embed=\"{rid}\"/><a:stretch><a:fillRect/></a:stretch></xdr:blipFill>",
                "<xdr:spPr><a:xfrm><a:off x=\"0\" y=\"0\"/><a:ext cx=\"{cx}\" cy=\"{cy}\"/></a:xfrm>",
                "<a:prstGeom prst=\"rect\"><a:avLst/></a:prstGeom></xdr:spPr></xdr:pic>",
                "<xdr:clientData/></xdr:oneCellAnchor>"
            ),
            ns = ns,
            col = image.col,
            row = image.row,
            cx = cx,
            cy = cy,
            id = id,
            descr = descr,
            rid = rid,
        ));
    }
    xml
}

fn new_drawing_xml(anchors: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<xdr:wsDr xmlns:xdr=\"{XDR_NS}\" xmlns:a=\"{A_NS}\" xmlns:r=\"{REL_NS}\">{anchors}</xdr:wsDr>"
    )
}

fn append_anchors(drawing: &str, anchors: &str) -> Option<String> {
    static ROOT_END: OnceLock<Regex> = OnceLock::new();
    let root_end = ROOT_END.get_or_init(|| Regex::new(r"</(?:\w+:)?wsDr>\s*$").expect("wsDr end regex"));
    let end = root_end.find(drawing)?.start();
    Some(format!("{}{anchors}{}", &drawing[..end], &drawing[end..]))
}

// ---------------------------------------------------------------------------
// XML helpers

fn qualified_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn name_prefix(e: &BytesStart) -> String {
    qualified_name(e)
        .split_once(':')
        .map(|(prefix, _)| format!("{prefix}:"))
        .unwrap_or_default()
}

fn element(name: &str, attrs: &[(&str, &str)]) -> BytesStart<'static> {
    let mut e = BytesStart::new(name.to_string());
    for &(key, value) in attrs {
        e.push_attribute((key, value));
    }
    e
}

/// Copy of `e` with `set` attributes replaced (`Some`) or removed (`None`).
/// Untouched attributes keep their raw text.
fn with_attrs(e: &BytesStart, set: &[(&str, Option<&str>)]) -> Result<BytesStart<'static>> {
    let mut out = BytesStart::new(qualified_name(e));
    for attribute in e.attributes() {
        let attribute = attribute?;
        if set.iter().any(|(key, _)| attribute.key.as_ref() == key.as_bytes()) {
            continue;
        }
        out.push_attribute(attribute);
    }
    for &(key, value) in set {
        if let Some(value) = value {
            out.push_attribute((key, value));
        }
    }
    Ok(out)
}

fn xml_string(writer: XmlWriter<Vec<u8>>) -> String {
    String::from_utf8_lossy(&writer.into_inner()).into_owned()
}

/// Shortest decimal form: `200` rather than `200.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// ---------------------------------------------------------------------------
// styles.xml

/// Styles a patched cell can ask for. Each distinct request becomes one new xf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum XfRequest {
    /// Existing xf `base` with text wrap added.
    Wrap(u32),
    /// QR header: font of xf `base` (name, bold, size, color) and its alignment.
    Header(u32),
    /// Centered both ways, for cells holding a picture.
    Centered,
}

/// A `<fonts>` or `<cellXfs>` list: span of its start tag, offset of its end
/// tag (`None` for the empty form) and the spans of its children.
#[derive(Debug, Default)]
struct XmlList {
    name: String,
    open: Range<usize>,
    close: Option<usize>,
    items: Vec<Range<usize>>,
}

#[derive(Debug, Default)]
struct XfRecord {
    font_id: usize,
    horizontal: Option<String>,
    vertical: Option<String>,
}

/// Hands out `cellXfs` indexes for [`XfRequest`]s, appending new xfs (and
/// the header font) to styles.xml on [`XfAllocator::render`].
struct XfAllocator<'x> {
    xml: &'x str,
    prefix: String,
    fonts: Option<XmlList>,
    cell_xfs: XmlList,
    records: Vec<XfRecord>,
    added_xfs: Vec<(XfRequest, String)>,
    added_fonts: Vec<String>,
}

impl<'x> XfAllocator<'x> {
    fn parse(xml: &'x str) -> Result<Self> {
        let mut prefix = String::new();
        let mut fonts = None;
        let mut cell_xfs = None;
        let mut current: Option<XmlList> = None;
        let mut item_start = None;
        let mut depth = 0usize;

        let mut reader = XmlReader::from_str(xml);
        loop {
            let before = reader.buffer_position() as usize;
            let event = reader.read_event()?;
            let after = reader.buffer_position() as usize;
            match event {
                Event::Start(e) => {
                    let local = e.local_name();
                    if depth == 0 {
                        prefix = name_prefix(&e);
                    } else if depth == 1 && matches!(local.as_ref(), b"fonts" | b"cellXfs") {
                        current = Some(XmlList {
                            name: qualified_name(&e),
                            open: before..after,
                            ..Default::default()
                        });
                    } else if depth == 2 && current.is_some() {
                        item_start = Some(before);
                    }
                    depth += 1;
                }
                Event::Empty(e) => {
                    if depth == 1 && matches!(e.local_name().as_ref(), b"fonts" | b"cellXfs") {
                        let list = XmlList {
                            name: qualified_name(&e),
                            open: before..after,
                            ..Default::default()
                        };
                        if e.local_name().as_ref() == b"fonts" {
                            fonts = Some(list);
                        } else {
                            cell_xfs = Some(list);
                        }
                    } else if depth == 2 {
                        if let Some(list) = current.as_mut() {
                            list.items.push(before..after);
                        }
                    }
                }
                Event::End(e) => {
                    depth = depth.saturating_sub(1);
                    if depth == 2 {
                        if let (Some(list), Some(start)) = (current.as_mut(), item_start.take()) {
                            list.items.push(start..after);
                        }
                    } else if depth == 1 {
                        if let Some(mut list) = current.take() {
                            list.close = Some(before);
                            if e.local_name().as_ref() == b"fonts" {
                                fonts = Some(list);
                            } else {
                                cell_xfs = Some(list);
                            }
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let cell_xfs =
            cell_xfs.ok_or_else(|| SheetQrError::MissingPart(format!("cellXfs in {STYLES_PART}")))?;
        let records = cell_xfs
            .items
            .iter()
            .map(|span| parse_xf(&xml[span.clone()]))
            .collect::<Result<Vec<_>>>()?;
        Ok(XfAllocator {
            xml,
            prefix,
            fonts,
            cell_xfs,
            records,
            added_xfs: Vec::new(),
            added_fonts: Vec::new(),
        })
    }

    fn index(&mut self, request: XfRequest) -> Result<u32> {
        let existing = self.cell_xfs.items.len();
        if let Some(pos) = self.added_xfs.iter().position(|(r, _)| *r == request) {
            return Ok((existing + pos) as u32);
        }
        let xf = match request {
            XfRequest::Wrap(base) => self.wrap_xf(base)?,
            XfRequest::Header(base) => self.header_xf(base)?,
            XfRequest::Centered => self.plain_xf(0, Some("center"), Some("center"))?,
        };
        self.added_xfs.push((request, xf));
        Ok((existing + self.added_xfs.len() - 1) as u32)
    }

    fn wrap_xf(&self, base: u32) -> Result<String> {
        match self.cell_xfs.items.get(base as usize) {
            Some(span) => wrapped_xf(&self.xml[span.clone()], &self.prefix),
            None => {
                let mut writer = XmlWriter::new(Vec::new());
                let xf = element(
                    &format!("{}xf", self.prefix),
                    &[("numFmtId", "0"), ("fontId", "0"), ("fillId", "0"), ("borderId", "0"), ("xfId", "0"), ("applyAlignment", "1")],
                );
                writer.write_event(Event::Start(xf.borrow()))?;
                writer.write_event(Event::Empty(element(&format!("{}alignment", self.prefix), &[("wrapText", "1")])))?;
                writer.write_event(Event::End(xf.to_end()))?;
                Ok(xml_string(writer))
            }
        }
    }

    fn header_xf(&mut self, base: u32) -> Result<String> {
        let record = self.records.get(base as usize);
        let horizontal = record.and_then(|r| r.horizontal.clone());
        let vertical = record.and_then(|r| r.vertical.clone());
        let font_id = record.map_or(0, |r| r.font_id);

        let source_font = self
            .fonts
            .as_ref()
            .and_then(|fonts| fonts.items.get(font_id))
            .map(|span| &self.xml[span.clone()]);
        let font_id = match (source_font, self.fonts.as_ref()) {
            (Some(raw), Some(fonts)) => {
                self.added_fonts.push(header_font(raw)?);
                fonts.items.len() + self.added_fonts.len() - 1
            }
            _ => 0,
        };
        self.plain_xf(font_id, horizontal.as_deref(), vertical.as_deref())
    }

    /// An xf with no number format, fill or border.
    fn plain_xf(&self, font_id: usize, horizontal: Option<&str>, vertical: Option<&str>) -> Result<String> {
        let font_id = font_id.to_string();
        let mut attrs = vec![
            ("numFmtId", "0"),
            ("fontId", font_id.as_str()),
            ("fillId", "0"),
            ("borderId", "0"),
            ("xfId", "0"),
        ];
        if font_id != "0" {
            attrs.push(("applyFont", "1"));
        }
        let alignment: Vec<(&str, &str)> = [("horizontal", horizontal), ("vertical", vertical)]
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect();

        let mut writer = XmlWriter::new(Vec::new());
        if alignment.is_empty() {
            writer.write_event(Event::Empty(element(&format!("{}xf", self.prefix), &attrs)))?;
        } else {
            attrs.push(("applyAlignment", "1"));
            let xf = element(&format!("{}xf", self.prefix), &attrs);
            writer.write_event(Event::Start(xf.borrow()))?;
            writer.write_event(Event::Empty(element(&format!("{}alignment", self.prefix), &alignment)))?;
            writer.write_event(Event::End(xf.to_end()))?;
        }
        Ok(xml_string(writer))
    }

    /// styles.xml with the new fonts and xfs appended and both counts updated.
    fn render(&self) -> Result<String> {
        let mut splices: Vec<(Range<usize>, String)> = Vec::new();
        if let Some(fonts) = self.fonts.as_ref().filter(|_| !self.added_fonts.is_empty()) {
            splice_list(self.xml, fonts, &self.added_fonts, &mut splices);
        }
        if !self.added_xfs.is_empty() {
            let xfs: Vec<String> = self.added_xfs.iter().map(|(_, xf)| xf.clone()).collect();
            splice_list(self.xml, &self.cell_xfs, &xfs, &mut splices);
        }
        splices.sort_by_key(|(range, _)| range.start);

        let mut out = String::with_capacity(self.xml.len() + 512);
        let mut pos = 0;
        for (range, text) in splices {
            out.push_str(&self.xml[pos..range.start]);
            out.push_str(&text);
            pos = range.end;
        }
        out.push_str(&self.xml[pos..]);
        Ok(out)
    }
}

fn splice_list(xml: &str, list: &XmlList, additions: &[String], splices: &mut Vec<(Range<usize>, String)>) {
    let count = list.items.len() + additions.len();
    let tag = &xml[list.open.clone()];
    let joined = additions.concat();
    match list.close {
        Some(close) => {
            splices.push((list.open.clone(), set_count(tag, count)));
            splices.push((close..close, joined));
        }
        None => {
            let open = set_count(&format!("{}>", tag.trim_end_matches('>').trim_end_matches('/')), count);
            splices.push((list.open.clone(), format!("{open}{joined}</{}>", list.name)));
        }
    }
}

fn set_count(tag: &str, count: usize) -> String {
    let replacement = format!(r#"count="{count}""#);
    if count_attr_regex().is_match(tag) {
        return count_attr_regex().replace(tag, replacement.as_str()).into_owned();
    }
    let (body, close) = match tag.strip_suffix("/>") {
        Some(body) => (body, "/>"),
        None => (tag.strip_suffix('>').unwrap_or(tag), ">"),
    };
    format!("{body} {replacement}{close}")
}

fn parse_xf(raw: &str) -> Result<XfRecord> {
    let mut record = XfRecord::default();
    let mut reader = XmlReader::from_str(raw);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"xf" => record.font_id = attr_parse(&e, "fontId")?.unwrap_or(0),
                b"alignment" => {
                    record.horizontal = attr_value(&e, "horizontal")?;
                    record.vertical = attr_value(&e, "vertical")?;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(record)
}

/// Clone of a raw `<xf>` with `wrapText="1"` added to its alignment.
fn wrapped_xf(raw: &str, prefix: &str) -> Result<String> {
    let wrap_only = || element(&format!("{prefix}alignment"), &[("wrapText", "1")]);
    let mut reader = XmlReader::from_str(raw);
    let mut writer = XmlWriter::new(Vec::new());
    let mut depth = 0usize;
    let mut needs_alignment = false;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Empty(e) if depth == 0 => {
                writer.write_event(Event::Start(with_attrs(&e, &[("applyAlignment", Some("1"))])?))?;
                writer.write_event(Event::Empty(wrap_only()))?;
                writer.write_event(Event::End(BytesEnd::new(qualified_name(&e))))?;
            }
            Event::Start(e) if depth == 0 => {
                writer.write_event(Event::Start(with_attrs(&e, &[("applyAlignment", Some("1"))])?))?;
                needs_alignment = true;
                depth += 1;
            }
            Event::Empty(e) if depth == 1 && e.local_name().as_ref() == b"alignment" => {
                writer.write_event(Event::Empty(with_attrs(&e, &[("wrapText", Some("1"))])?))?;
                needs_alignment = false;
            }
            Event::Start(e) if depth == 1 && e.local_name().as_ref() == b"alignment" => {
                writer.write_event(Event::Start(with_attrs(&e, &[("wrapText", Some("1"))])?))?;
                needs_alignment = false;
                depth += 1;
            }
            // alignment is the first child of xf
            Event::Empty(e) if depth == 1 && needs_alignment => {
                writer.write_event(Event::Empty(wrap_only()))?;
                needs_alignment = false;
                writer.write_event(Event::Empty(e))?;
            }
            Event::Start(e) if depth == 1 && needs_alignment => {
                writer.write_event(Event::Empty(wrap_only()))?;
                needs_alignment = false;
                writer.write_event(Event::Start(e))?;
                depth += 1;
            }
            Event::Start(e) => {
                writer.write_event(Event::Start(e))?;
                depth += 1;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == 0 && needs_alignment {
                    writer.write_event(Event::Empty(wrap_only()))?;
                    needs_alignment = false;
                }
                writer.write_event(Event::End(e))?;
            }
            other => writer.write_event(other)?,
        }
    }
    Ok(xml_string(writer))
}

/// A raw `<font>` reduced to name, bold, size and color.
fn header_font(raw: &str) -> Result<String> {
    let mut reader = XmlReader::from_str(raw);
    let mut writer = XmlWriter::new(Vec::new());
    let mut depth = 0usize;
    let mut skip_until: Option<usize> = None;

    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Eof => break,
            Event::Start(e) => {
                if skip_until.is_none() && depth == 1 && !HEADER_FONT_PARTS.contains(&e.local_name().as_ref()) {
                    skip_until = Some(depth);
                }
                depth += 1;
                if skip_until.is_some() {
                    continue;
                }
            }
            Event::Empty(e) => {
                if skip_until.is_some() || (depth == 1 && !HEADER_FONT_PARTS.contains(&e.local_name().as_ref())) {
                    continue;
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if let Some(level) = skip_until {
                    if depth == level {
                        skip_until = None;
                    }
                    continue;
                }
            }
            _ => {
                if skip_until.is_some() {
                    continue;
                }
            }
        }
        writer.write_event(event)?;
    }
    Ok(xml_string(writer))
}

// ---------------------------------------------------------------------------
// worksheet

struct RowState {
    index: u32,
    next_col: u32,
    source_done: bool,
}

/// Streams a worksheet part, rewriting only what the appended column touches.
struct SheetPatcher<'a, 'x> {
    edits: &'a SheetEdits,
    styles: &'a mut XfAllocator<'x>,
    drawing_rid: Option<&'a str>,
    writer: XmlWriter<Vec<u8>>,
    prefix: String,
    depth: usize,
    /// `<col>` elements held back until `</cols>`.
    cols: Option<Vec<BytesStart<'static>>>,
    saw_cols: bool,
    drawing_done: bool,
    /// Next row index that has not been written yet.
    next_row: u32,
    row: Option<RowState>,
    header_base: u32,
}

fn patch_sheet(xml: &str, edits: &SheetEdits, styles: &mut XfAllocator, drawing_rid: Option<&str>) -> Result<String> {
    let mut patcher = SheetPatcher {
        edits,
        styles,
        drawing_rid,
        writer: XmlWriter::new(Vec::new()),
        prefix: String::new(),
        depth: 0,
        cols: None,
        saw_cols: false,
        drawing_done: drawing_rid.is_none(),
        next_row: 0,
        row: None,
        header_base: 0,
    };

    let mut reader = XmlReader::from_str(xml);
    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) => patcher.on_start(e, false)?,
            Event::Empty(e) => patcher.on_start(e, true)?,
            Event::End(e) => patcher.on_end(e)?,
            // whitespace between buffered `<col>`s is dropped with them
            _ if patcher.cols.is_some() => {}
            other => patcher.writer.write_event(other)?,
        }
    }
    Ok(xml_string(patcher.writer))
}

impl SheetPatcher<'_, '_> {
    fn write_element(&mut self, e: BytesStart, empty: bool) -> Result<()> {
        if empty {
            self.writer.write_event(Event::Empty(e))?;
        } else {
            self.writer.write_event(Event::Start(e))?;
        }
        Ok(())
    }

    fn tag(&self, local: &str) -> String {
        format!("{}{local}", self.prefix)
    }

    fn on_start(&mut self, e: BytesStart, empty: bool) -> Result<()> {
        let local = e.local_name().as_ref().to_vec();
        match (self.depth, local.as_slice()) {
            (0, _) => {
                self.prefix = name_prefix(&e);
                self.write_element(e, empty)?;
            }
            (1, b"dimension") => {
                let dimension = self.extended_dimension(&e)?;
                self.write_element(dimension, empty)?;
            }
            (1, b"cols") => {
                self.saw_cols = true;
                if empty {
                    self.write_cols(Vec::new())?;
                } else {
                    self.cols = Some(Vec::new());
                }
            }
            (2, b"col") if self.cols.is_some() => {
                if let Some(cols) = self.cols.as_mut() {
                    cols.push(e.into_owned());
                }
            }
            (1, b"sheetData") => {
                if !self.saw_cols {
                    self.saw_cols = true;
                    self.write_cols(Vec::new())?;
                }
                if empty {
                    let end = BytesEnd::new(qualified_name(&e));
                    self.writer.write_event(Event::Start(e))?;
                    self.write_missing_rows(self.edits.data_rows + 1)?;
                    self.writer.write_event(Event::End(end))?;
                } else {
                    self.writer.write_event(Event::Start(e))?;
                }
            }
            (1, b"drawing") => {
                self.drawing_done = true;
                self.write_element(e, empty)?;
            }
            (1, name) if !self.drawing_done && AFTER_DRAWING.contains(&name) => {
                self.write_drawing()?;
                self.write_element(e, empty)?;
            }
            (2, b"row") => self.start_row(e, empty)?,
            (3, b"c") if self.row.is_some() => self.cell(e, empty)?,
            _ => self.write_element(e, empty)?,
        }
        if !empty {
            self.depth += 1;
        }
        Ok(())
    }

    fn on_end(&mut self, e: BytesEnd) -> Result<()> {
        self.depth = self.depth.saturating_sub(1);
        match (self.depth, e.local_name().as_ref()) {
            (1, b"cols") => {
                let cols = self.cols.take().unwrap_or_default();
                return self.write_cols(cols);
            }
            (2, b"col") if self.cols.is_some() => return Ok(()),
            (2, b"row") => {
                if let Some(row) = self.row.take() {
                    self.finish_row(row)?;
                }
            }
            (1, b"sheetData") => self.write_missing_rows(self.edits.data_rows + 1)?,
            (0, _) if !self.drawing_done => self.write_drawing()?,
            _ => {}
        }
        self.writer.write_event(Event::End(e))?;
        Ok(())
    }

    fn extended_dimension(&self, e: &BytesStart) -> Result<BytesStart<'static>> {
        let Some(range) = attr_value(e, "ref")? else {
            return Ok(e.clone().into_owned());
        };
        let (start, end) = range.split_once(':').unwrap_or((range.as_str(), range.as_str()));
        let (end_row, end_col) = parse_cell_ref(end).unwrap_or((0, 0));
        let end = cell_ref(end_row.max(self.edits.data_rows), end_col.max(self.edits.dest_col));
        let range = format!("{start}:{end}");
        with_attrs(e, &[("ref", Some(range.as_str()))])
    }

    /// Existing `<col>` ranges with the destination column cut out, plus its own entry.
    fn write_cols(&mut self, existing: Vec<BytesStart<'static>>) -> Result<()> {
        let dest = self.edits.dest_col + 1;
        let mut cols: Vec<(u32, BytesStart<'static>)> = Vec::new();
        for col in existing {
            let min = attr_parse::<u32>(&col, "min")?;
            let max = attr_parse::<u32>(&col, "max")?;
            match (min, max) {
                (Some(min), Some(max)) if min <= dest && dest <= max => {
                    if min < dest {
                        let (lo, hi) = (min.to_string(), (dest - 1).to_string());
                        cols.push((min, with_attrs(&col, &[("min", Some(lo.as_str())), ("max", Some(hi.as_str()))])?));
                    }
                    if dest < max {
                        let (lo, hi) = ((dest + 1).to_string(), max.to_string());
                        cols.push((dest + 1, with_attrs(&col, &[("min", Some(lo.as_str())), ("max", Some(hi.as_str()))])?));
                    }
                }
                _ => cols.push((min.unwrap_or(0), col)),
            }
        }
        let number = dest.to_string();
        let width = format_number(self.edits.column_width);
        cols.push((
            dest,
            element(
                &self.tag("col"),
                &[
                    ("min", number.as_str()),
                    ("max", number.as_str()),
                    ("width", width.as_str()),
                    ("customWidth", "1"),
                ],
            ),
        ));
        cols.sort_by_key(|(min, _)| *min);

        let open = element(&self.tag("cols"), &[]);
        self.writer.write_event(Event::Start(open.borrow()))?;
        for (_, col) in cols {
            self.writer.write_event(Event::Empty(col))?;
        }
        self.writer.write_event(Event::End(open.to_end()))?;
        Ok(())
    }

    fn write_drawing(&mut self) -> Result<()> {
        self.drawing_done = true;
        let Some(rid) = self.drawing_rid else {
            return Ok(());
        };
        let drawing = element(&self.tag("drawing"), &[("xmlns:r", REL_NS), ("r:id", rid)]);
        self.writer.write_event(Event::Empty(drawing))?;
        Ok(())
    }

    fn row_start(&self, e: &BytesStart, index: u32) -> Result<BytesStart<'static>> {
        if index == 0 {
            return with_attrs(e, &[("spans", None)]);
        }
        let height = format_number(self.edits.row_height);
        with_attrs(e, &[("spans", None), ("ht", Some(height.as_str())), ("customHeight", Some("1"))])
    }

    fn start_row(&mut self, e: BytesStart, empty: bool) -> Result<()> {
        let index = match attr_parse::<u32>(&e, "r")? {
            Some(r) if r >= 1 => r - 1,
            _ => self.next_row,
        };
        self.write_missing_rows(index)?;
        self.next_row = self.next_row.max(index + 1);

        if index > self.edits.data_rows {
            return self.write_element(e, empty);
        }
        let start = self.row_start(&e, index)?;
        let row = RowState {
            index,
            next_col: 0,
            source_done: false,
        };
        if empty {
            let end = start.to_end().into_owned();
            self.writer.write_event(Event::Start(start))?;
            self.finish_row(row)?;
            self.writer.write_event(Event::End(end))?;
        } else {
            self.writer.write_event(Event::Start(start))?;
            self.row = Some(row);
        }
        Ok(())
    }

    /// Rows up to (not including) `until` that the sheet does not have yet.
    fn write_missing_rows(&mut self, until: u32) -> Result<()> {
        let until = until.min(self.edits.data_rows + 1);
        while self.next_row < until {
            let index = self.next_row;
            let number = (index + 1).to_string();
            let row = self.row_start(&element(&self.tag("row"), &[("r", number.as_str())]), index)?;
            let end = row.to_end().into_owned();
            self.writer.write_event(Event::Start(row))?;
            self.finish_row(RowState {
                index,
                next_col: 0,
                source_done: false,
            })?;
            self.writer.write_event(Event::End(end))?;
            self.next_row += 1;
        }
        Ok(())
    }

    fn cell(&mut self, e: BytesStart, empty: bool) -> Result<()> {
        let Some(mut row) = self.row.take() else {
            return self.write_element(e, empty);
        };
        let col = attr_value(&e, "r")?
            .and_then(|r| parse_cell_ref(&r))
            .map_or(row.next_col, |(_, col)| col);
        row.next_col = col + 1;

        if !row.source_done && col > self.edits.source_col {
            self.write_source_cell(&row, 0)?;
            row.source_done = true;
        }
        if col == self.edits.source_col {
            let base = attr_parse::<u32>(&e, "s")?.unwrap_or(0);
            if row.index == 0 {
                self.header_base = base;
            }
            let style = self.styles.index(XfRequest::Wrap(base))?.to_string();
            let cell = with_attrs(&e, &[("s", Some(style.as_str()))])?;
            self.write_element(cell, empty)?;
            row.source_done = true;
        } else {
            self.write_element(e, empty)?;
        }
        self.row = Some(row);
        Ok(())
    }

    fn write_source_cell(&mut self, row: &RowState, base: u32) -> Result<()> {
        let reference = cell_ref(row.index, self.edits.source_col);
        let style = self.styles.index(XfRequest::Wrap(base))?.to_string();
        let cell = element(&self.tag("c"), &[("r", reference.as_str()), ("s", style.as_str())]);
        self.writer.write_event(Event::Empty(cell))?;
        Ok(())
    }

    /// Close a row: a wrapped blank where the source cell was missing, then the QR cell.
    fn finish_row(&mut self, row: RowState) -> Result<()> {
        if !row.source_done {
            self.write_source_cell(&row, 0)?;
        }
        let reference = cell_ref(row.index, self.edits.dest_col);
        if row.index == 0 {
            let style = self.styles.index(XfRequest::Header(self.header_base))?.to_string();
            let cell = element(
                &self.tag("c"),
                &[("r", reference.as_str()), ("s", style.as_str()), ("t", "inlineStr")],
            );
            let inline = element(&self.tag("is"), &[]);
            let text = element(&self.tag("t"), &[]);
            self.writer.write_event(Event::Start(cell.borrow()))?;
            self.writer.write_event(Event::Start(inline.borrow()))?;
            self.writer.write_event(Event::Start(text.borrow()))?;
            self.writer.write_event(Event::Text(BytesText::new(&self.edits.header_label)))?;
            self.writer.write_event(Event::End(text.to_end()))?;
            self.writer.write_event(Event::End(inline.to_end()))?;
            self.writer.write_event(Event::End(cell.to_end()))?;
        } else {
            let style = self.styles.index(XfRequest::Centered)?.to_string();
            let cell = element(&self.tag("c"), &[("r", reference.as_str()), ("s", style.as_str())]);
            self.writer.write_event(Event::Empty(cell))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><i/><u/><sz val="14"/><color indexed="10"/><name val="Arial"/><family val="2"/></font></fonts>
<cellXfs count="3"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="2" xfId="0" applyFont="1" applyAlignment="1"><alignment horizontal="right" vertical="top"/></xf><xf numFmtId="14" fontId="0" fillId="0" borderId="1" xfId="0"><protection locked="0"/></xf></cellXfs>
<dxfs count="1"><dxf><font><b/></font></dxf></dxfs>
</styleSheet>"#;

    fn edits(data_rows: u32) -> SheetEdits {
        SheetEdits {
            sheet_name: "Links".to_string(),
            source_col: 1,
            dest_col: 3,
            header_label: "QrCode".to_string(),
            column_width: 150.0 / 7.0,
            row_height: 200.0,
            data_rows,
            images: Vec::new(),
        }
    }

    fn patch(sheet: &str, data_rows: u32) -> (String, String) {
        let mut styles = XfAllocator::parse(STYLES_XML).unwrap();
        let sheet = patch_sheet(sheet, &edits(data_rows), &mut styles, Some("rId9")).unwrap();
        (sheet, styles.render().unwrap())
    }

    fn cell_xfs(styles: &str) -> Vec<String> {
        let list = Regex::new(r"(?s)<cellXfs[^>]*>(.*)</cellXfs>").unwrap();
        let xf = Regex::new(r"(?s)<xf\b[^>]*?(?:/>|>.*?</xf>)").unwrap();
        let body = list.captures(styles).unwrap()[1].to_string();
        xf.find_iter(&body).map(|m| m.as_str().to_string()).collect()
    }

    #[test]
    fn untouched_markup_survives_and_qr_cells_are_appended() {
        let sheet = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><dimension ref="A1:C2"/><sheetData><row r="1" spans="1:3"><c r="A1" t="s"><v>0</v></c><c r="B1" s="1" t="s"><v>1</v></c><c r="C1" s="2"><f>LEN(B1)</f><v>3</v></c></row><row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2" t="s"><v>3</v></c></row></sheetData><mergeCells count="1"><mergeCell ref="A5:B5"/></mergeCells><hyperlinks><hyperlink ref="B2" r:id="rId1"/></hyperlinks><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/><tableParts count="0"/></worksheet>"#;
        let (patched, _) = patch(sheet, 1);

        assert!(patched.contains(r#"<dimension ref="A1:D2"/>"#), "{patched}");
        assert!(patched.contains("<f>LEN(B1)</f>"));
        assert!(patched.contains(r#"<mergeCell ref="A5:B5"/>"#));
        assert!(patched.contains(r#"<hyperlink ref="B2" r:id="rId1"/>"#));
        assert!(patched.contains(r#"<c r="D1" s="4" t="inlineStr"><is><t>QrCode</t></is></c></row>"#), "{patched}");
        assert!(patched.contains(r#"<row r="2" ht="200" customHeight="1">"#), "{patched}");
        // B2 has no style of its own: wrap clone of xf 0 is 5, the centered xf is 6
        assert!(patched.contains(r#"<c r="B2" t="s" s="5"><v>3</v></c><c r="D2" s="6"/></row>"#), "{patched}");
        assert!(!patched.contains("spans="));
        // drawing lands between pageMargins and tableParts
        let drawing = patched.find("<drawing ").unwrap();
        assert!(patched.find("<pageMargins").unwrap() < drawing);
        assert!(drawing < patched.find("<tableParts").unwrap());
        assert!(patched.contains(r#"r:id="rId9""#));
        // cols are created ahead of sheetData
        let cols = format!(
            r#"<cols><col min="4" max="4" width="{}" customWidth="1"/></cols><sheetData>"#,
            format_number(150.0 / 7.0)
        );
        assert!(patched.contains(&cols), "{patched}");
    }

    #[test]
    fn source_cells_get_wrap_clones_and_missing_ones_are_filled_in() {
        let sheet = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" s="1" t="s"><v>1</v></c></row><row r="2"><c r="A2" s="2"><v>5</v></c><c r="C2"><v>1</v></c></row></sheetData></worksheet>"#;
        let (patched, styles) = patch(sheet, 2);

        // B1 keeps its look plus wrap, B2 and B3 are blank wrapped cells
        assert!(patched.contains(r#"<c r="B1" t="s" s="3"><v>1</v></c>"#), "{patched}");
        assert!(patched.contains(r#"<c r="A2" s="2"><v>5</v></c><c r="B2" s="5"/><c r="C2"><v>1</v></c>"#), "{patched}");
        assert!(patched.contains(r#"<row r="3" ht="200" customHeight="1"><c r="B3" s="5"/><c r="D3" s="6"/></row>"#), "{patched}");

        let xfs = cell_xfs(&styles);
        assert_eq!(xfs.len(), 7);
        assert!(styles.contains(r#"<cellXfs count="7">"#));
        assert_eq!(
            xfs[3],
            r#"<xf numFmtId="0" fontId="1" fillId="0" borderId="2" xfId="0" applyFont="1" applyAlignment="1"><alignment horizontal="right" vertical="top" wrapText="1"/></xf>"#
        );
        assert_eq!(
            xfs[5],
            r#"<xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0" applyAlignment="1"><alignment wrapText="1"/></xf>"#
        );
        assert_eq!(
            xfs[6],
            r#"<xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0" applyAlignment="1"><alignment horizontal="center" vertical="center"/></xf>"#
        );
    }

    #[test]
    fn header_gets_a_trimmed_copy_of_the_source_font() {
        let sheet = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="B1" s="1" t="s"><v>1</v></c></row></sheetData></worksheet>"#;
        let (patched, styles) = patch(sheet, 0);

        assert!(patched.contains(r#"<c r="D1" s="4" t="inlineStr">"#), "{patched}");
        assert!(styles.contains(r#"<fonts count="3">"#));
        // bold, size, the indexed color and the name are kept as written; italic, underline, family are not
        assert!(styles.contains(r#"<font><b/><sz val="14"/><color indexed="10"/><name val="Arial"/></font></fonts>"#), "{styles}");
        assert_eq!(
            cell_xfs(&styles)[4],
            r#"<xf numFmtId="0" fontId="2" fillId="0" borderId="0" xfId="0" applyFont="1" applyAlignment="1"><alignment horizontal="right" vertical="top"/></xf>"#
        );
        // dxf fonts are not part of the font list
        assert!(styles.contains(r#"<dxfs count="1"><dxf><font><b/></font></dxf></dxfs>"#));
    }

    #[test]
    fn xf_children_other_than_alignment_are_kept() {
        let wrapped = wrapped_xf(r#"<xf numFmtId="14" fontId="0" borderId="1"><protection locked="0"/></xf>"#, "").unwrap();
        assert_eq!(
            wrapped,
            r#"<xf numFmtId="14" fontId="0" borderId="1" applyAlignment="1"><alignment wrapText="1"/><protection locked="0"/></xf>"#
        );
    }

    #[test]
    fn column_range_covering_the_new_column_is_split() {
        let sheet = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><cols>
<col min="1" max="1" width="30" customWidth="1"/>
<col min="2" max="16384" width="12" style="1"/>
</cols><sheetData/></worksheet>"#;
        let (patched, _) = patch(sheet, 1);

        let cols = format!(
            concat!(
                r#"<cols><col min="1" max="1" width="30" customWidth="1"/>"#,
                r#"<col width="12" style="1" min="2" max="3"/>"#,
                r#"<col min="4" max="4" width="{}" customWidth="1"/>"#,
                r#"<col width="12" style="1" min="5" max="16384"/></cols>"#
            ),
            format_number(150.0 / 7.0)
        );
        assert!(patched.contains(&cols), "{patched}");
        // an empty sheetData gets the header and data rows
        assert!(patched.contains(r#"<sheetData><row r="1"><c r="B1" s="3"/><c r="D1" s="4" t="inlineStr">"#), "{patched}");
        assert!(patched.contains(r#"<row r="2" ht="200" customHeight="1"><c r="B2" s="3"/><c r="D2" s="5"/></row></sheetData>"#), "{patched}");
    }

    #[test]
    fn rows_below_the_table_are_left_alone() {
        let sheet = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="B1"/></row><row r="4" spans="1:2" ht="30" customHeight="1"><c r="A4"><v>9</v></c></row></sheetData></worksheet>"#;
        let (patched, _) = patch(sheet, 1);
        assert!(patched.contains(r#"<row r="4" spans="1:2" ht="30" customHeight="1"><c r="A4"><v>9</v></c></row>"#));
        assert!(patched.find(r#"<row r="2""#).unwrap() < patched.find(r#"<row r="4""#).unwrap());
    }

    #[test]
    fn existing_drawing_reference_is_not_duplicated() {
        let sheet = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheetData/><drawing r:id="rId2"/></worksheet>"#;
        let mut styles = XfAllocator::parse(STYLES_XML).unwrap();
        let patched = patch_sheet(sheet, &edits(0), &mut styles, None).unwrap();
        assert_eq!(patched.matches("<drawing ").count(), 1);
        assert_eq!(drawing_ref_regex().captures(sheet).unwrap()[1].to_string(), "rId2");
    }

    #[test]
    fn relationship_helpers() {
        let rels = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="t/hyperlink" Target="https://example.com/?a=1&amp;b=2" TargetMode="External"/><Relationship Id="rId3" Type="t/drawing" Target="../drawings/drawing4.xml"/></Relationships>"#;
        assert_eq!(relationship_target(rels, "rId3").as_deref(), Some("../drawings/drawing4.xml"));
        assert_eq!(relationship_target(rels, "rId2"), None);
        assert_eq!(next_rel_ids(rels, 3), vec!["rId2", "rId4", "rId5"]);

        let appended = append_relationships(Some(rels), &relationship_xml("rId2", IMAGE_REL_TYPE, "/xl/media/image1.png"));
        assert!(appended.ends_with(r#"Target="/xl/media/image1.png"/></Relationships>"#));
        assert!(append_relationships(None, "<Relationship/>").contains("<Relationships xmlns="));
        assert_eq!(rels_part_for("xl/worksheets/sheet2.xml"), "xl/worksheets/_rels/sheet2.xml.rels");
    }

    #[test]
    fn content_types_gain_png_and_drawing_once() {
        let types = r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/></Types>"#;
        let updated = add_content_types(types, Some("xl/drawings/drawing1.xml"));
        assert!(updated.contains(r#"<Default Extension="png" ContentType="image/png"/>"#));
        assert!(updated.contains(r#"<Override PartName="/xl/drawings/drawing1.xml""#));
        assert_eq!(add_content_types(&updated, None).matches("Extension=\"png\"").count(), 1);
    }

    #[test]
    fn anchors_describe_position_size_and_alt_text() {
        let image = PlacedImage {
            row: 2,
            col: 3,
            width: 150,
            height: 150,
            png: Vec::new(),
            alt_text: "https://example.com/?a=1&b=<2>".to_string(),
        };
        let xml = anchors_xml(&[(&image, "rId7")], 4, false);
        assert!(xml.contains("<xdr:col>3</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>2</xdr:row>"));
        assert!(xml.contains(r#"<xdr:ext cx="1428750" cy="1428750"/>"#));
        assert!(xml.contains(r#"<xdr:cNvPr id="4" name="Picture 4" descr="https://example.com/?a=1&amp;b=&lt;2&gt;"/>"#));
        assert!(xml.contains(r#"<a:blip r:embed="rId7"/>"#));

        let existing = r#"<xdr:wsDr xmlns:xdr="x"><xdr:twoCellAnchor><xdr:pic><xdr:nvPicPr><xdr:cNvPr id="6" name="Logo"/></xdr:nvPicPr></xdr:pic></xdr:twoCellAnchor></xdr:wsDr>"#;
        assert_eq!(max_picture_id(existing), 6);
        let appended = append_anchors(existing, "<anchor/>").unwrap();
        assert!(appended.ends_with("</xdr:twoCellAnchor><anchor/></xdr:wsDr>"));
    }

    #[test]
    fn count_attribute_is_replaced_or_added() {
        assert_eq!(set_count(r#"<cellXfs count="3">"#, 5), r#"<cellXfs count="5">"#);
        assert_eq!(set_count("<fonts>", 2), r#"<fonts count="2">"#);
        assert_eq!(format_number(200.0), "200");
        assert_eq!(format_number(21.5), "21.5");
    }
}
