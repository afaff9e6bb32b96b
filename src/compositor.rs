// ============================================================================
// COMPOSITOR: deterministic replay of the operation list over a base image
// ============================================================================

use image::{RgbaImage, imageops};

use crate::canvas::{Color, Point, RegionRect, read_region, write_region};
use crate::components::history::{Annotation, ImageResource, PastedImageOp};
use crate::ops::adjustments::apply_color_filter;
use crate::ops::effects::pixelate_region;
use crate::ops::shapes;
use crate::ops::text::{FontCache, TextStyle, draw_text};

/// Opacity multiplier for highlight fills.
pub const HIGHLIGHT_ALPHA: f32 = 0.3;
/// Opacity multiplier for freehand marker strokes.
pub const MARKER_ALPHA: f32 = 0.85;

fn with_alpha(color: Color, factor: f32) -> Color {
    let a = (color[3] as f32 * factor).round().clamp(0.0, 255.0) as u8;
    [color[0], color[1], color[2], a]
}

/// Paints operations onto rasters. Holds only caches, so rendering the same
/// inputs twice yields the same pixels.
#[derive(Default)]
pub struct Compositor {
    fonts: FontCache,
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fonts_mut(&mut self) -> &mut FontCache {
        &mut self.fonts
    }

    /// Copy `base`, then draw each op in list order.
    pub fn render(&mut self, base: &RgbaImage, ops: &[Annotation]) -> RgbaImage {
        let mut out = base.clone();
        for op in ops {
            self.draw(&mut out, op);
        }
        out
    }

    /// Draw a single op onto `img`.
    pub fn draw(&mut self, img: &mut RgbaImage, op: &Annotation) {
        match op {
            Annotation::Arrow(s) => {
                let segs = shapes::arrow_segments(s.start, s.end);
                shapes::stroke_segments(img, &segs, s.stroke_width, s.color);
            }
            Annotation::Line(s) => {
                shapes::stroke_segments(img, &[(s.start, s.end)], s.stroke_width, s.color);
            }
            Annotation::Rectangle(s) => {
                shapes::stroke_rect(img, s.start, s.end, s.stroke_width, s.color);
            }
            Annotation::Ellipse(s) => {
                shapes::stroke_ellipse(img, s.start, s.end, s.stroke_width, s.color);
            }
            Annotation::Highlight(s) => {
                shapes::fill_rect(img, s.start, s.end, with_alpha(s.color, HIGHLIGHT_ALPHA));
            }
            Annotation::Marker(m) => {
                let color = with_alpha(m.color, MARKER_ALPHA);
                if let [p] = m.points.as_slice() {
                    shapes::fill_circle(img, *p, m.stroke_width * 0.5, color);
                } else {
                    let path = shapes::smooth_marker_path(&m.points);
                    shapes::stroke_polyline(img, &path, m.stroke_width, color);
                }
            }
            Annotation::Text(t) => self.draw_text_run(img, &t.style, &t.content, t.anchor, t.color),
            Annotation::Heading(h) => self.draw_text_run(img, &h.style, &h.content, h.anchor, h.color),
            Annotation::PixelBlur(b) => {
                apply_to_region(img, b.rect, |region| pixelate_region(region, b.block_size));
            }
            Annotation::ColorFilter(f) => {
                apply_to_region(img, f.rect, |region| apply_color_filter(region, f.mode));
            }
            Annotation::PastedImage(p) => draw_pasted(img, p),
        }
    }

    fn draw_text_run(&mut self, img: &mut RgbaImage, style: &TextStyle, content: &str, anchor: Point, color: Color) {
        let Some((font, glyphs)) = self.fonts.resolve_with_glyphs(&style.family, style.weight) else {
            return;
        };
        draw_text(img, &font, content, style.size, anchor, color, glyphs);
    }
}

/// Copy out the clipped rect, transform it, copy it back.
fn apply_to_region(img: &mut RgbaImage, rect: RegionRect, transform: impl FnOnce(&mut RgbaImage)) {
    let Some((x, y, w, h)) = rect.pixel_bounds(img.width(), img.height()) else {
        return;
    };
    let mut region = read_region(img, x, y, w, h);
    transform(&mut region);
    write_region(img, &region, x, y);
}

/// Scale a decoded pasted image into its placement. Still-pending resources
/// are skipped.
fn draw_pasted(img: &mut RgbaImage, op: &PastedImageOp) {
    let ImageResource::Ready(src) = &op.resource else {
        return;
    };
    let r = op.placement.normalized();
    let w = r.width.round();
    let h = r.height.round();
    if w < 1.0 || h < 1.0 || src.width() == 0 || src.height() == 0 {
        return;
    }
    let (w, h) = (w as u32, h as u32);
    let scaled;
    let layer: &RgbaImage = if src.dimensions() == (w, h) {
        src.as_ref()
    } else {
        scaled = imageops::resize(src.as_ref(), w, h, imageops::FilterType::Triangle);
        &scaled
    };
    imageops::overlay(img, layer, r.x.round() as i64, r.y.round() as i64);
}
