use serde::{Deserialize, Serialize};

/// Font or fill color as stored in styles.xml.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StyleColor {
    /// 0xRRGGBB (alpha dropped), with any tint already applied.
    Rgb(u32),
    /// Theme palette slot plus its lightness tint (-1.0..=1.0).
    Theme { index: u8, tint: f64 },
}

impl StyleColor {
    /// Parse an ARGB or RGB hex string (`FFFF0000`, `FF0000`).
    pub fn from_hex(hex: &str) -> Option<StyleColor> {
        let s = hex.trim().trim_start_matches('#');
        let rgb = match s.len() {
            8 => u32::from_str_radix(&s[2..], 16).ok()?,
            6 => u32::from_str_radix(s, 16).ok()?,
            _ => return None,
        };
        Some(StyleColor::Rgb(rgb))
    }

    /// Apply a SpreadsheetML tint: negative darkens, positive lightens.
    pub fn with_tint(self, tint: f64) -> StyleColor {
        if tint == 0.0 {
            return self;
        }
        match self {
            StyleColor::Rgb(rgb) => StyleColor::Rgb(tint_rgb(rgb, tint)),
            StyleColor::Theme { index, .. } => StyleColor::Theme { index, tint },
        }
    }
}

/// Tint works on HLS lightness; hue and saturation are kept.
fn tint_rgb(rgb: u32, tint: f64) -> u32 {
    let channel = |shift: u32| ((rgb >> shift) & 0xFF) as f64 / 255.0;
    let (r, g, b) = (channel(16), channel(8), channel(0));

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let lightness = (max + min) / 2.0;
    let (hue, saturation) = if max == min {
        (0.0, 0.0)
    } else {
        let d = max - min;
        let s = if lightness > 0.5 { d / (2.0 - max - min) } else { d / (max + min) };
        let h = if max == r {
            (g - b) / d + if g < b { 6.0 } else { 0.0 }
        } else if max == g {
            (b - r) / d + 2.0
        } else {
            (r - g) / d + 4.0
        };
        (h / 6.0, s)
    };

    let lightness = if tint < 0.0 {
        lightness * (1.0 + tint)
    } else {
        lightness * (1.0 - tint) + tint
    }
    .clamp(0.0, 1.0);

    let (r, g, b) = if saturation == 0.0 {
        (lightness, lightness, lightness)
    } else {
        let q = if lightness < 0.5 {
            lightness * (1.0 + saturation)
        } else {
            lightness + saturation - lightness * saturation
        };
        let p = 2.0 * lightness - q;
        (
            hue_to_rgb(p, q, hue + 1.0 / 3.0),
            hue_to_rgb(p, q, hue),
            hue_to_rgb(p, q, hue - 1.0 / 3.0),
        )
    };
    let to_byte = |v: f64| (v * 255.0).round().clamp(0.0, 255.0) as u32;
    (to_byte(r) << 16) | (to_byte(g) << 8) | to_byte(b)
}

fn hue_to_rgb(p: f64, q: f64, t: f64) -> f64 {
    let t = t.rem_euclid(1.0);
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HorizontalAlign {
    Left,
    Center,
    Right,
    Fill,
    Justify,
    CenterAcross,
    Distributed,
}

impl HorizontalAlign {
    pub fn parse(value: &str) -> Option<HorizontalAlign> {
        match value {
            "left" => Some(HorizontalAlign::Left),
            "center" => Some(HorizontalAlign::Center),
            "right" => Some(HorizontalAlign::Right),
            "fill" => Some(HorizontalAlign::Fill),
            "justify" => Some(HorizontalAlign::Justify),
            "centerContinuous" => Some(HorizontalAlign::CenterAcross),
            "distributed" => Some(HorizontalAlign::Distributed),
            _ => None,
        }
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VerticalAlign {
    Top,
    Center,
    Bottom,
    Justify,
    Distributed,
}

impl VerticalAlign {
    pub fn parse(value: &str) -> Option<VerticalAlign> {
        match value {
            "top" => Some(VerticalAlign::Top),
            "center" => Some(VerticalAlign::Center),
            "bottom" => Some(VerticalAlign::Bottom),
            "justify" => Some(VerticalAlign::Justify),
            "distributed" => Some(VerticalAlign::Distributed),
            _ => None,
        }
    }

}

/// Number format of a cell: a built-in Excel index or a custom format code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NumberFormat {
    Builtin(u8),
    Custom(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FontStyle {
    pub name: Option<String>,
    pub size: Option<f64>,
    pub bold: bool,
    pub italic: bool,
    pub color: Option<StyleColor>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignmentStyle {
    pub horizontal: Option<HorizontalAlign>,
    pub vertical: Option<VerticalAlign>,
    pub wrap_text: bool,
}

/// The part of a header cell's look that is cloned onto the QR header.
///
/// Copied field by field, by value: font family, bold, size, color and the
/// two alignments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderStyle {
    pub font_name: Option<String>,
    pub bold: bool,
    pub font_size: Option<f64>,
    pub font_color: Option<StyleColor>,
    pub horizontal: Option<HorizontalAlign>,
    pub vertical: Option<VerticalAlign>,
}

/// Resolved style of a single cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellStyle {
    pub font: FontStyle,
    pub alignment: AlignmentStyle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<StyleColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_format: Option<NumberFormat>,
}

impl CellStyle {
    pub fn is_default(&self) -> bool {
        *self == CellStyle::default()
    }

    pub fn header_style(&self) -> HeaderStyle {
        HeaderStyle {
            font_name: self.font.name.clone(),
            bold: self.font.bold,
            font_size: self.font.size,
            font_color: self.font.color,
            horizontal: self.alignment.horizontal,
            vertical: self.alignment.vertical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_argb_and_rgb_hex() {
        assert_eq!(StyleColor::from_hex("FFFF0000"), Some(StyleColor::Rgb(0xFF0000)));
        assert_eq!(StyleColor::from_hex("#00FF00"), Some(StyleColor::Rgb(0x00FF00)));
        assert_eq!(StyleColor::from_hex("xyz"), None);
    }

    #[test]
    fn negative_tint_darkens_and_positive_lightens() {
        let blue = StyleColor::Rgb(0x4472C4);
        assert_eq!(blue.with_tint(0.0), blue);
        assert_eq!(StyleColor::Rgb(0xFFFFFF).with_tint(-0.5), StyleColor::Rgb(0x808080));
        assert_eq!(StyleColor::Rgb(0x000000).with_tint(0.5), StyleColor::Rgb(0x808080));

        let StyleColor::Rgb(darker) = blue.with_tint(-0.25) else { panic!() };
        let StyleColor::Rgb(lighter) = blue.with_tint(0.4) else { panic!() };
        assert!(darker & 0xFF < 0xC4 && lighter & 0xFF > 0xC4);
    }

    #[test]
    fn theme_color_keeps_its_tint() {
        let theme = StyleColor::Theme { index: 4, tint: 0.0 };
        assert_eq!(theme.with_tint(-0.25), StyleColor::Theme { index: 4, tint: -0.25 });
    }

    #[test]
    fn alignment_names_follow_spreadsheetml() {
        assert_eq!(HorizontalAlign::parse("centerContinuous"), Some(HorizontalAlign::CenterAcross));
        assert_eq!(VerticalAlign::parse("center"), Some(VerticalAlign::Center));
        assert_eq!(VerticalAlign::parse("middle"), None);
    }

    #[test]
    fn default_style_is_default() {
        assert!(CellStyle::default().is_default());
        let wrapped = CellStyle {
            alignment: AlignmentStyle {
                wrap_text: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(!wrapped.is_default());
    }
}
