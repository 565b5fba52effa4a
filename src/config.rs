use chrono::NaiveDateTime;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, SheetQrError};
use crate::services::style_scanner::is_ooxml;

/// Settings file read when no path is given on the command line.
pub const DEFAULT_SETTINGS_FILE: &str = "settings.txt";

const INPUT_FILE: &str = "input_file";
const URL_COLUMN_NAME: &str = "url_column_name";
const OUTPUT_FILE: &str = "output_file";
const SHEET_NAME: &str = "sheet_name";

/// Run configuration, read once and passed explicitly into the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub input_file: PathBuf,
    pub url_column_name: String,
    /// Base name of the output; a timestamp is appended before the extension.
    pub output_file: PathBuf,
    /// Sheet to process; `None` means the active (or first) sheet.
    pub sheet_name: Option<String>,
}

impl Settings {
    /// Load `key=value` settings. The process environment is not modified.
    pub fn from_file(path: &Path) -> Result<Self> {
        let iter = dotenvy::from_path_iter(path).map_err(|e| {
            if e.not_found() {
                SheetQrError::Config(format!("The settings file '{}' does not exist.", path.display()))
            } else {
                SheetQrError::Config(format!("Error reading settings '{}': {}", path.display(), e))
            }
        })?;

        let mut pairs = Vec::new();
        for item in iter {
            let pair = item.map_err(|e| {
                SheetQrError::Config(format!("Error reading settings '{}': {}", path.display(), e))
            })?;
            pairs.push(pair);
        }
        debug!(path = %path.display(), entries = pairs.len(), "read settings file");
        Self::from_pairs(pairs)
    }

    /// Build settings from key/value pairs. Blank values count as missing.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut input_file = None;
        let mut url_column_name = None;
        let mut output_file = None;
        let mut sheet_name = None;

        for (key, value) in pairs {
            let value = value.as_ref().trim();
            let slot = match key.as_ref().trim() {
                INPUT_FILE => &mut input_file,
                URL_COLUMN_NAME => &mut url_column_name,
                OUTPUT_FILE => &mut output_file,
                SHEET_NAME => &mut sheet_name,
                other => {
                    debug!(key = other, "ignoring unknown setting");
                    continue;
                }
            };
            *slot = (!value.is_empty()).then(|| value.to_string());
        }

        let missing: Vec<&str> = [
            (INPUT_FILE, input_file.is_none()),
            (URL_COLUMN_NAME, url_column_name.is_none()),
            (OUTPUT_FILE, output_file.is_none()),
        ]
        .into_iter()
        .filter_map(|(key, absent)| absent.then_some(key))
        .collect();

        match (input_file, url_column_name, output_file) {
            (Some(input_file), Some(url_column_name), Some(output_file)) => Ok(Settings {
                input_file: PathBuf::from(input_file),
                url_column_name,
                output_file: PathBuf::from(output_file),
                sheet_name,
            }),
            _ => Err(SheetQrError::Config(format!(
                "Missing required settings: {}. Please check your settings file.",
                missing.join(", ")
            ))),
        }
    }

    /// The input must be an existing xlsx or xlsm workbook.
    pub fn validate_input(&self) -> Result<()> {
        if !self.input_file.is_file() {
            return Err(SheetQrError::Config(format!(
                "The file '{}' does not exist.",
                self.input_file.display()
            )));
        }
        if !is_ooxml(&self.input_file) {
            return Err(SheetQrError::Config(format!(
                "The file '{}' is not an .xlsx or .xlsm workbook.",
                self.input_file.display()
            )));
        }
        Ok(())
    }

    /// Extension of the output: macro-enabled inputs stay macro-enabled.
    pub fn output_extension(&self) -> &'static str {
        let is_xlsm = self
            .input_file
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsm"));
        if is_xlsm {
            "xlsm"
        } else {
            "xlsx"
        }
    }
}

/// `base` with a real `.xlsx`/`.xlsm` extension removed and
/// `_YYYYMMDD_HHMMSS.<extension>` appended.
pub fn timestamped_output_path(base: &Path, now: NaiveDateTime, extension: &str) -> PathBuf {
    let has_workbook_ext = base
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx") || ext.eq_ignore_ascii_case("xlsm"));
    let stem = if has_workbook_ext { base.file_stem() } else { base.file_name() };

    let mut name = stem.map(|s| s.to_os_string()).unwrap_or_else(|| OsString::from("output"));
    name.push(format!("_{}.{extension}", now.format("%Y%m%d_%H%M%S")));
    base.with_file_name(name)
}

/// `candidate` if free, else the first free `<stem>_2.<ext>`, `<stem>_3.<ext>`, ...
pub fn next_free_output_path(candidate: &Path) -> PathBuf {
    if !candidate.exists() {
        return candidate.to_path_buf();
    }
    let stem = candidate
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    let extension = candidate
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "xlsx".to_string());
    (2u32..)
        .map(|n| {
            let mut name = stem.clone();
            name.push(format!("_{n}.{extension}"));
            candidate.with_file_name(name)
        })
        .find(|path| !path.exists())
        .unwrap_or_else(|| candidate.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn parses_required_and_optional_keys() {
        let settings = Settings::from_pairs([
            ("input_file", "in/links.xlsx"),
            ("url_column_name", "URL"),
            ("output_file", "out/links.xlsx"),
            ("sheet_name", "Data"),
            ("color", "blue"),
        ])
        .unwrap();
        assert_eq!(settings.input_file, PathBuf::from("in/links.xlsx"));
        assert_eq!(settings.url_column_name, "URL");
        assert_eq!(settings.output_file, PathBuf::from("out/links.xlsx"));
        assert_eq!(settings.sheet_name.as_deref(), Some("Data"));
    }

    #[test]
    fn missing_and_blank_keys_are_named() {
        let err = Settings::from_pairs([("input_file", "a.xlsx"), ("url_column_name", "  ")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let message = err.to_string();
        assert!(message.contains("url_column_name, output_file"), "{message}");
        assert!(!message.contains("input_file"));
    }

    #[test]
    fn settings_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.txt");
        std::fs::write(
            &path,
            "# converter settings\n\ninput_file='My Links.xlsx'\nurl_column_name=URL\noutput_file=result.xlsx\n",
        )
        .unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.input_file, PathBuf::from("My Links.xlsx"));
        assert_eq!(settings.url_column_name, "URL");
        assert_eq!(settings.sheet_name, None);
    }

    #[test]
    fn missing_settings_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::from_file(&dir.path().join("nope.txt")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn missing_input_file_fails_validation() {
        let settings = Settings::from_pairs([
            ("input_file", "/definitely/not/here.xlsx"),
            ("url_column_name", "URL"),
            ("output_file", "out.xlsx"),
        ])
        .unwrap();
        assert_eq!(settings.validate_input().unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn only_xlsx_and_xlsm_inputs_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join("links.xls");
        std::fs::write(&legacy, b"x").unwrap();
        let settings = Settings::from_pairs([
            ("input_file", legacy.to_str().unwrap()),
            ("url_column_name", "URL"),
            ("output_file", "out.xlsx"),
        ])
        .unwrap();
        let err = settings.validate_input().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("not an .xlsx or .xlsm"), "{err}");
    }

    #[test]
    fn macro_enabled_input_keeps_its_extension() {
        let settings = |input: &str| {
            Settings::from_pairs([("input_file", input), ("url_column_name", "URL"), ("output_file", "out")]).unwrap()
        };
        assert_eq!(settings("book.XLSM").output_extension(), "xlsm");
        assert_eq!(settings("book.xlsx").output_extension(), "xlsx");
    }

    #[test]
    fn timestamp_replaces_real_extension_only() {
        let now = at(14, 5, 9);
        assert_eq!(
            timestamped_output_path(Path::new("out/report.xlsx"), now, "xlsx"),
            PathBuf::from("out/report_20240309_140509.xlsx")
        );
        assert_eq!(
            timestamped_output_path(Path::new("report.XLSX"), now, "xlsx"),
            PathBuf::from("report_20240309_140509.xlsx")
        );
        assert_eq!(
            timestamped_output_path(Path::new("report.xlsx"), now, "xlsm"),
            PathBuf::from("report_20240309_140509.xlsm")
        );
        // names merely ending in the letters keep them
        assert_eq!(
            timestamped_output_path(Path::new("sales_xlsx"), now, "xlsx"),
            PathBuf::from("sales_xlsx_20240309_140509.xlsx")
        );
        assert_eq!(
            timestamped_output_path(Path::new("links.v2"), now, "xlsx"),
            PathBuf::from("links.v2_20240309_140509.xlsx")
        );
    }

    #[test]
    fn existing_output_gets_counter_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("links_20240309_140509.xlsx");
        assert_eq!(next_free_output_path(&first), first);

        std::fs::write(&first, b"x").unwrap();
        std::fs::write(dir.path().join("links_20240309_140509_2.xlsx"), b"x").unwrap();
        assert_eq!(
            next_free_output_path(&first),
            dir.path().join("links_20240309_140509_3.xlsx")
        );

        let macro_book = dir.path().join("links_20240309_140509.xlsm");
        std::fs::write(&macro_book, b"x").unwrap();
        assert_eq!(
            next_free_output_path(&macro_book),
            dir.path().join("links_20240309_140509_2.xlsm")
        );
    }
}
