use image::{DynamicImage, GenericImageView, Rgb};

use crate::error::ConfigError;

/// Colors sampled by the seek bar on every explicit refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub played: Rgb<u8>,
    pub unplayed: Rgb<u8>,
    pub focus: Rgb<u8>,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            played: Rgb([0x4f, 0x9d, 0xe8]),
            unplayed: Rgb([0xd0, 0xd0, 0xd0]),
            focus: Rgb([0x8a, 0xb4, 0xf8]),
        }
    }
}

impl Palette {
    pub fn from_hex(played: &str, unplayed: &str, focus: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            played: parse_hex(played)?,
            unplayed: parse_hex(unplayed)?,
            focus: parse_hex(focus)?,
        })
    }
}

/// Source of the seek bar colors, e.g. the application theme.
pub trait ThemeProvider {
    fn palette(&self) -> Palette;
}

/// Fixed palette, usually read from the config file.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticTheme(pub Palette);

impl ThemeProvider for StaticTheme {
    fn palette(&self) -> Palette {
        self.0
    }
}

/// Palette whose played color follows the now-playing album art.
#[derive(Debug, Clone, Default)]
pub struct AccentTheme {
    base: Palette,
    accent: Option<Rgb<u8>>,
}

impl AccentTheme {
    pub fn new(base: Palette) -> Self {
        Self { base, accent: None }
    }

    /// Re-derive the accent from new cover art. Returns true if it changed.
    pub fn set_art(&mut self, art: &DynamicImage) -> bool {
        let accent = dominant_color(art).map(vivid);
        let changed = accent != self.accent;
        self.accent = accent;
        changed
    }

    pub fn clear_art(&mut self) {
        self.accent = None;
    }
}

impl ThemeProvider for AccentTheme {
    fn palette(&self) -> Palette {
        Palette {
            played: self.accent.unwrap_or(self.base.played),
            ..self.base
        }
    }
}

/// Parse a `#rrggbb` color.
pub fn parse_hex(s: &str) -> Result<Rgb<u8>, ConfigError> {
    let invalid = || ConfigError::InvalidColor(s.to_string());
    let hex = s.trim().strip_prefix('#').ok_or_else(invalid)?;
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

pub fn to_hex(c: Rgb<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
}

/// Average color of the image, ignoring near-black and near-white pixels.
pub fn dominant_color(img: &DynamicImage) -> Option<Rgb<u8>> {
    // Resize for performance
    let img = img.resize(64, 64, image::imageops::FilterType::Nearest);

    let mut r_total = 0u64;
    let mut g_total = 0u64;
    let mut b_total = 0u64;
    let mut count = 0u64;

    for (_, _, rgba) in img.pixels() {
        let (r, g, b) = (rgba[0] as u64, rgba[1] as u64, rgba[2] as u64);
        let sum = r + g + b;
        if sum < 50 || sum > 700 || rgba[3] == 0 {
            continue;
        }
        r_total += r;
        g_total += g;
        b_total += b;
        count += 1;
    }

    if count == 0 {
        return None;
    }
    Some(Rgb([
        (r_total / count) as u8,
        (g_total / count) as u8,
        (b_total / count) as u8,
    ]))
}

/// Push a color towards something readable as an accent on a dark or light
/// background: enough saturation, mid-to-high brightness.
fn vivid(c: Rgb<u8>) -> Rgb<u8> {
    let (h, s, v) = rgb_to_hsv(c[0] as f64 / 255.0, c[1] as f64 / 255.0, c[2] as f64 / 255.0);
    let (r, g, b) = hsv_to_rgb(h, s.max(0.45), v.clamp(0.55, 0.9));
    Rgb([
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    ])
}

fn rgb_to_hsv(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * (((b - r) / delta) + 2.0)
    } else {
        60.0 * (((r - g) / delta) + 4.0)
    };

    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (f64, f64, f64) {
    let h = h.rem_euclid(360.0);
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h as i32 / 60 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (r + m, g + m, b + m)
}
