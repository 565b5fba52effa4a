//! QR code rasterization for sheet cells.

use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgb, RgbImage};
use qrcode::types::QrError;
use qrcode::{Color, EcLevel, QrCode, Version};
use std::io::Cursor;

use crate::error::{Result, SheetQrError};

/// Edge length, in pixels, of every image placed in the sheet.
pub const QR_IMAGE_SIZE: u32 = 150;
/// Smallest symbol version tried; version 5 at level H holds typical URLs.
pub const MIN_VERSION: i16 = 5;
const MAX_VERSION: i16 = 40;
/// Quiet zone width in modules.
pub const BORDER_MODULES: u32 = 4;
/// Pixels per module before the final resample.
pub const BOX_SIZE: u32 = 10;
pub const ERROR_CORRECTION: EcLevel = EcLevel::H;
/// Below this many image pixels per module a printed or on-screen symbol
/// stops scanning reliably.
pub const MIN_PIXELS_PER_MODULE: f64 = 2.0;

const DARK: Rgb<u8> = Rgb([0, 0, 0]);
const LIGHT: Rgb<u8> = Rgb([255, 255, 255]);

/// A rendered QR symbol together with the text it encodes.
#[derive(Debug, Clone)]
pub struct QrImage {
    text: String,
    version: i16,
    raster: RgbImage,
}

impl QrImage {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Symbol version actually used (grows past [`MIN_VERSION`] for long text).
    pub fn version(&self) -> i16 {
        self.version
    }

    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    pub fn raster(&self) -> &RgbImage {
        &self.raster
    }

    /// Image pixels per module edge, quiet zone included.
    pub fn pixels_per_module(&self) -> f64 {
        let modules = 17 + 4 * self.version as u32 + 2 * BORDER_MODULES;
        self.width().min(self.height()) as f64 / modules as f64
    }

    /// PNG bytes for embedding.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.raster.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        Ok(buf)
    }
}

/// Build the symbol at the smallest version >= [`MIN_VERSION`] that holds `text`.
pub fn build_code(text: &str) -> Result<QrCode> {
    for version in MIN_VERSION..=MAX_VERSION {
        match QrCode::with_version(text.as_bytes(), Version::Normal(version), ERROR_CORRECTION) {
            Ok(code) => return Ok(code),
            Err(QrError::DataTooLong) => continue,
            Err(other) => return Err(other.into()),
        }
    }
    Err(SheetQrError::EncodingOverflow { len: text.len() })
}

/// Draw the symbol at [`BOX_SIZE`] pixels per module inside a quiet zone.
fn render_modules(code: &QrCode) -> RgbImage {
    let modules = code.to_colors();
    let module_count = code.width() as u32;
    let img_size = (module_count + 2 * BORDER_MODULES) * BOX_SIZE;

    let mut img = RgbImage::from_pixel(img_size, img_size, LIGHT);
    for (i, color) in modules.iter().enumerate() {
        if *color != Color::Dark {
            continue;
        }
        let x = (i as u32) % module_count + BORDER_MODULES;
        let y = (i as u32) / module_count + BORDER_MODULES;
        for dy in 0..BOX_SIZE {
            for dx in 0..BOX_SIZE {
                img.put_pixel(x * BOX_SIZE + dx, y * BOX_SIZE + dy, DARK);
            }
        }
    }
    img
}

/// Encode `text` as a QR image resampled to exactly `size` (width, height).
///
/// Nearest-neighbour resampling keeps every pixel pure black or white.
pub fn encode(text: &str, size: (u32, u32)) -> Result<QrImage> {
    let (width, height) = size;
    if width == 0 || height == 0 {
        return Err(SheetQrError::InvalidImageSize { width, height });
    }
    if text.trim().is_empty() {
        return Err(SheetQrError::EncodingOverflow { len: 0 });
    }

    let code = build_code(text)?;
    let version = match code.version() {
        Version::Normal(v) | Version::Micro(v) => v,
    };
    let native = render_modules(&code);
    let raster = if native.dimensions() == size {
        native
    } else {
        imageops::resize(&native, width, height, FilterType::Nearest)
    };

    Ok(QrImage {
        text: text.to_string(),
        version,
        raster,
    })
}
