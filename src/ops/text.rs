use ab_glyph::{Font, FontArc, GlyphId, ScaleFont, point};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::canvas::{Color, Point, blend_coverage};

/// Family used by the text tool (headings pick their own).
pub const DEFAULT_TEXT_FAMILY: &str = "Arial";
/// Text font size is this multiple of the current stroke width.
pub const TEXT_SIZE_PER_STROKE: f32 = 8.0;

pub const WEIGHT_REGULAR: u16 = 400;
pub const WEIGHT_BOLD: u16 = 700;

/// Rasterized glyph pixels for ONE font. Key: (GlyphId, font_size_bits).
/// Value: (pixels as (x, y, coverage), bounds_min_x, bounds_min_y) at origin zero.
/// Glyph ids are font-local, so never share one of these between fonts.
pub type GlyphPixelCache = HashMap<(GlyphId, u32), (Vec<(u32, u32, f32)>, f32, f32)>;

// ============================================================================
// STYLE
// ============================================================================

/// Heading levels and their pixel sizes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeadingLevel {
    #[default]
    H1,
    H2,
    H3,
    H4,
}

impl HeadingLevel {
    pub fn font_size(self) -> f32 {
        match self {
            HeadingLevel::H1 => 40.0,
            HeadingLevel::H2 => 32.0,
            HeadingLevel::H3 => 26.0,
            HeadingLevel::H4 => 22.0,
        }
    }

    /// 1..=4; anything else clamps to the nearest level.
    pub fn from_number(n: i64) -> HeadingLevel {
        match n {
            i64::MIN..=1 => HeadingLevel::H1,
            2 => HeadingLevel::H2,
            3 => HeadingLevel::H3,
            _ => HeadingLevel::H4,
        }
    }
}

/// Resolved font request for one text run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    pub family: String,
    pub size: f32,
    pub weight: u16,
}

impl TextStyle {
    pub fn body(size: f32) -> Self {
        Self {
            family: DEFAULT_TEXT_FAMILY.to_string(),
            size,
            weight: WEIGHT_REGULAR,
        }
    }

    pub fn heading(level: HeadingLevel, family: &str) -> Self {
        Self {
            family: family.to_string(),
            size: level.font_size(),
            weight: WEIGHT_BOLD,
        }
    }

    /// CSS shorthand, e.g. `"700 40px Arial"`.
    pub fn css_font(&self) -> String {
        format!("{} {}px {}", self.weight, self.size, self.family)
    }
}

// ============================================================================
// FONT LOOKUP
// ============================================================================

const FALLBACK_FAMILIES: &[&str] = &[
    "Arial",
    "Liberation Sans",
    "DejaVu Sans",
    "Helvetica",
    "Noto Sans",
];

/// System fonts loaded so far, keyed by (family, weight). Misses are cached
/// too so a missing family is only searched once. Each resolved font owns its
/// glyph cache under the same key.
#[derive(Default)]
pub struct FontCache {
    fonts: HashMap<(String, u16), Option<FontArc>>,
    glyphs: HashMap<(String, u16), GlyphPixelCache>,
}

impl FontCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a font for a family, bypassing the system lookup.
    pub fn insert(&mut self, family: &str, weight: u16, font: FontArc) {
        let key = (family.to_string(), weight);
        self.glyphs.remove(&key);
        self.fonts.insert(key, Some(font));
    }

    /// The requested family, else the first available fallback family,
    /// else the system's default sans-serif.
    pub fn resolve(&mut self, family: &str, weight: u16) -> Option<FontArc> {
        let key = (family.to_string(), weight);
        if let Some(hit) = self.fonts.get(&key) {
            return hit.clone();
        }
        let found = load_system_font(family, weight)
            .or_else(|| {
                FALLBACK_FAMILIES
                    .iter()
                    .filter(|f| !f.eq_ignore_ascii_case(family))
                    .find_map(|f| load_system_font(f, weight))
            })
            .or_else(|| load_default_sans(weight));
        if found.is_none() {
            tracing::warn!("No usable font for '{}' (weight {})", family, weight);
        }
        self.fonts.insert(key, found.clone());
        found
    }

    /// Like [`resolve`](Self::resolve), paired with that font's glyph cache.
    pub fn resolve_with_glyphs(&mut self, family: &str, weight: u16) -> Option<(FontArc, &mut GlyphPixelCache)> {
        let font = self.resolve(family, weight)?;
        let glyphs = self.glyphs.entry((family.to_string(), weight)).or_default();
        Some((font, glyphs))
    }
}

/// Load a font by family name and CSS weight from the system.
pub fn load_system_font(family: &str, weight: u16) -> Option<FontArc> {
    use font_kit::family_name::FamilyName;
    select_font(&[FamilyName::Title(family.to_string())], weight)
}

fn load_default_sans(weight: u16) -> Option<FontArc> {
    use font_kit::family_name::FamilyName;
    select_font(&[FamilyName::SansSerif], weight)
}

fn select_font(families: &[font_kit::family_name::FamilyName], weight: u16) -> Option<FontArc> {
    use font_kit::properties::{Properties, Weight};
    use font_kit::source::SystemSource;

    let mut props = Properties::new();
    props.weight = Weight(weight as f32);

    let handle = SystemSource::new().select_best_match(families, &props).ok()?;
    let font_data = handle.load().ok()?;
    let bytes: Vec<u8> = (*font_data.copy_font_data()?).clone();
    FontArc::try_from_vec(bytes).ok()
}

// ============================================================================
// LAYOUT + RASTERIZATION
// ============================================================================

/// Lay out one line left-aligned at x=0 with the baseline at `ascent`.
/// Returns `(glyphs, total_width)`.
pub fn layout_line(font: &FontArc, text: &str, font_size: f32) -> (Vec<(GlyphId, f32, f32)>, f32) {
    let scaled = font.as_scaled(font_size);
    let ascent = scaled.ascent();
    let mut glyphs = Vec::new();
    let mut cursor_x = 0.0f32;
    let mut last: Option<GlyphId> = None;
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev) = last {
            cursor_x += scaled.kern(prev, id);
        }
        glyphs.push((id, cursor_x, ascent));
        cursor_x += scaled.h_advance(id);
        last = Some(id);
    }
    (glyphs, cursor_x)
}

/// Draw `text` with its top edge at `origin` (top baseline), left aligned.
/// Lines split on `'\n'`.
pub fn draw_text(
    img: &mut RgbaImage,
    font: &FontArc,
    text: &str,
    font_size: f32,
    origin: Point,
    color: Color,
    glyph_cache: &mut GlyphPixelCache,
) {
    if font_size <= 0.0 || !font_size.is_finite() {
        return;
    }
    let line_height = font.as_scaled(font_size).height();
    let glyphs: Vec<(GlyphId, f32, f32)> = text
        .split('\n')
        .enumerate()
        .flat_map(|(i, line)| {
            let (mut g, _) = layout_line(font, line, font_size);
            for glyph in &mut g {
                glyph.2 += i as f32 * line_height;
            }
            g
        })
        .collect();
    if glyphs.is_empty() {
        return;
    }

    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;
    for &(id, gx, gy) in &glyphs {
        let b = font.glyph_bounds(&id.with_scale_and_position(font_size, point(gx, gy)));
        min_x = min_x.min(b.min.x);
        min_y = min_y.min(b.min.y);
        max_x = max_x.max(b.max.x);
        max_y = max_y.max(b.max.y);
    }
    if min_x >= max_x || min_y >= max_y {
        return;
    }

    let pad = 2.0;
    let x0 = ((origin.x + min_x - pad).floor() as i64).max(0);
    let y0 = ((origin.y + min_y - pad).floor() as i64).max(0);
    let x1 = ((origin.x + max_x + pad).ceil() as i64).min(img.width() as i64);
    let y1 = ((origin.y + max_y + pad).ceil() as i64).min(img.height() as i64);
    if x1 <= x0 || y1 <= y0 {
        return;
    }
    let (buf_w, buf_h) = ((x1 - x0) as usize, (y1 - y0) as usize);
    let mut coverage = vec![0.0f32; buf_w * buf_h];

    let size_key = font_size.to_bits();
    for &(id, gx, gy) in &glyphs {
        let entry = glyph_cache.entry((id, size_key)).or_insert_with(|| {
            let base = id.with_scale_and_position(font_size, point(0.0, 0.0));
            let mut px_list = Vec::new();
            match font.outline_glyph(base) {
                Some(outlined) => {
                    let b = outlined.px_bounds();
                    outlined.draw(|px, py, cov| px_list.push((px, py, cov)));
                    (px_list, b.min.x, b.min.y)
                }
                None => (px_list, 0.0, 0.0),
            }
        });
        let (pixels, bx, by) = entry;
        let ox = origin.x + *bx + gx.round();
        let oy = origin.y + *by + gy.round();
        for &(px, py, cov) in pixels.iter() {
            let ix = (px as f32 + ox).round() as i64 - x0;
            let iy = (py as f32 + oy).round() as i64 - y0;
            if ix >= 0 && iy >= 0 && (ix as usize) < buf_w && (iy as usize) < buf_h {
                let idx = iy as usize * buf_w + ix as usize;
                coverage[idx] = coverage[idx].max(cov);
            }
        }
    }

    blend_coverage(img, &coverage, x0 as u32, y0 as u32, buf_w as u32, color);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[test]
    fn heading_sizes() {
        assert_eq!(HeadingLevel::H1.font_size(), 40.0);
        assert_eq!(HeadingLevel::H2.font_size(), 32.0);
        assert_eq!(HeadingLevel::H3.font_size(), 26.0);
        assert_eq!(HeadingLevel::H4.font_size(), 22.0);
        assert_eq!(HeadingLevel::from_number(9), HeadingLevel::H4);
        assert_eq!(HeadingLevel::from_number(0), HeadingLevel::H1);
    }

    #[test]
    fn seeding_a_font_drops_its_stale_glyphs() {
        let Some(font) = system_fonts(1).into_iter().find_map(load_font_file) else {
            return;
        };
        let mut cache = FontCache::new();
        cache.insert("Seeded", WEIGHT_REGULAR, font.clone());
        let (_, glyphs) = cache.resolve_with_glyphs("Seeded", WEIGHT_REGULAR).unwrap();
        glyphs.insert((GlyphId(1), 12.0f32.to_bits()), (vec![(0, 0, 1.0)], 0.0, 0.0));

        cache.insert("Seeded", WEIGHT_REGULAR, font);
        let (_, glyphs) = cache.resolve_with_glyphs("Seeded", WEIGHT_REGULAR).unwrap();
        assert!(glyphs.is_empty());
    }

    pub(crate) fn load_font_file(path: std::path::PathBuf) -> Option<FontArc> {
        FontArc::try_from_vec(std::fs::read(path).ok()?).ok()
    }

    /// Up to `n` distinct TrueType files, DejaVu first when installed.
    pub(crate) fn system_fonts(n: usize) -> Vec<std::path::PathBuf> {
        let mut found: Vec<std::path::PathBuf> = [
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/truetype/dejavu/DejaVuSerif-Bold.ttf",
        ]
        .iter()
        .map(std::path::PathBuf::from)
        .filter(|p| p.exists())
        .collect();
        for pattern in ["/usr/share/fonts/**/*.ttf", "/usr/local/share/fonts/**/*.ttf"] {
            if let Ok(entries) = glob::glob(pattern) {
                for entry in entries.flatten() {
                    if !found.contains(&entry) {
                        found.push(entry);
                    }
                }
            }
        }
        found.truncate(n);
        found
    }

    #[test]
    fn css_font_string() {
        assert_eq!(TextStyle::heading(HeadingLevel::H2, "Georgia").css_font(), "700 32px Georgia");
        assert_eq!(TextStyle::body(24.0).css_font(), "400 24px Arial");
    }
}
