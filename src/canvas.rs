use image::{Rgba, RgbaImage, imageops};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::components::history::{Annotation, AnnotationHistory};
use crate::components::selection::{RegionSelector, SelectionPurpose};
use crate::compositor::Compositor;
use crate::error::{EditorError, Result};
use crate::io::ExportFormat;

/// Straight (non-premultiplied) RGBA color.
pub type Color = [u8; 4];

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` (leading `#` optional).
pub fn parse_hex_color(s: &str) -> Option<Color> {
    let hex = s.trim().trim_start_matches('#');
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        3 => {
            let mut out = [0, 0, 0, 255];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16)? as u8;
                out[i] = v * 17;
            }
            Some(out)
        }
        6 => Some([byte(0)?, byte(2)?, byte(4)?, 255]),
        8 => Some([byte(0)?, byte(2)?, byte(4)?, byte(6)?]),
        _ => None,
    }
}

/// `#rrggbb`, with an alpha byte appended only when not opaque.
pub fn color_to_hex(c: Color) -> String {
    if c[3] == 255 {
        format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
    } else {
        format!("#{:02x}{:02x}{:02x}{:02x}", c[0], c[1], c[2], c[3])
    }
}

// ============================================================================
// GEOMETRY
// ============================================================================

/// A point in canvas pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn midpoint(self, other: Point) -> Point {
        Point::new((self.x + other.x) * 0.5, (self.y + other.y) * 0.5)
    }

    pub fn distance(self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned rectangle. Width/height may be negative while a drag is in
/// progress; [`RegionRect::normalized`] flips them back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RegionRect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle spanned by two corners, in any order.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self::new(a.x, a.y, b.x - a.x, b.y - a.y).normalized()
    }

    /// Flip negative extents: the origin moves to the other side and the
    /// extent becomes its absolute value.
    pub fn normalized(mut self) -> Self {
        if self.width < 0.0 {
            self.x += self.width;
            self.width = -self.width;
        }
        if self.height < 0.0 {
            self.y += self.height;
            self.height = -self.height;
        }
        self
    }

    /// Clamp into `[0, bound_w] × [0, bound_h]`: origin first, then the
    /// extents to the space remaining after the origin.
    pub fn clamped(mut self, bound_w: f32, bound_h: f32) -> Self {
        self.x = self.x.clamp(0.0, bound_w);
        self.y = self.y.clamp(0.0, bound_h);
        self.width = self.width.clamp(0.0, bound_w - self.x);
        self.height = self.height.clamp(0.0, bound_h - self.y);
        self
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width.abs() < 1.0 || self.height.abs() < 1.0
    }

    /// Inclusive containment test on the normalized rectangle.
    pub fn contains(&self, p: Point) -> bool {
        let r = self.normalized();
        p.x >= r.x && p.x <= r.right() && p.y >= r.y && p.y <= r.bottom()
    }

    /// Integer pixel bounds `(x, y, w, h)` clipped to an image of the given
    /// size. `None` when less than one pixel remains in either axis.
    pub fn pixel_bounds(&self, img_w: u32, img_h: u32) -> Option<(u32, u32, u32, u32)> {
        let r = self.normalized();
        if !r.x.is_finite() || !r.y.is_finite() || !r.width.is_finite() || !r.height.is_finite() {
            return None;
        }
        let x0 = r.x.round().clamp(0.0, img_w as f32) as u32;
        let y0 = r.y.round().clamp(0.0, img_h as f32) as u32;
        let x1 = r.right().round().clamp(0.0, img_w as f32) as u32;
        let y1 = r.bottom().round().clamp(0.0, img_h as f32) as u32;
        let w = x1.saturating_sub(x0);
        let h = y1.saturating_sub(y0);
        if w == 0 || h == 0 {
            None
        } else {
            Some((x0, y0, w, h))
        }
    }
}

// ============================================================================
// BLENDING
// ============================================================================

/// Source-over blend of `color` at `coverage` (0..1) onto one RGBA pixel slice.
#[inline]
pub fn blend_over(dst: &mut [u8], color: Color, coverage: f32) {
    let sa = (color[3] as f32 / 255.0) * coverage.clamp(0.0, 1.0);
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return;
    }
    for c in 0..3 {
        let v = (color[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a;
        dst[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Blend a single-channel coverage buffer covering `(x0, y0, w, h)` onto `img`.
pub fn blend_coverage(img: &mut RgbaImage, coverage: &[f32], x0: u32, y0: u32, w: u32, color: Color) {
    if w == 0 {
        return;
    }
    let stride = img.width() as usize * 4;
    let x0 = x0 as usize;
    let w = w as usize;
    let raw: &mut [u8] = img;
    raw.par_chunks_mut(stride)
        .skip(y0 as usize)
        .zip(coverage.par_chunks(w))
        .for_each(|(row, cov_row)| {
            for (i, &cov) in cov_row.iter().enumerate() {
                if cov > 0.001 {
                    let pi = (x0 + i) * 4;
                    blend_over(&mut row[pi..pi + 4], color, cov);
                }
            }
        });
}

// ============================================================================
// RASTER SURFACE: base image + working pixels
// ============================================================================

/// Owns the immutable base image (capture or last crop) and the working
/// buffer the compositor paints into.
#[derive(Clone, Debug)]
pub struct RasterSurface {
    base: RgbaImage,
    pixels: RgbaImage,
}

impl RasterSurface {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            pixels: image.clone(),
            base: image,
        }
    }

    /// Replace the base and reset the working buffer to its natural size.
    pub fn load(&mut self, image: RgbaImage) {
        self.pixels = image.clone();
        self.base = image;
    }

    pub fn width(&self) -> u32 {
        self.base.width()
    }

    pub fn height(&self) -> u32 {
        self.base.height()
    }

    pub fn base(&self) -> &RgbaImage {
        &self.base
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub(crate) fn set_pixels(&mut self, pixels: RgbaImage) {
        debug_assert_eq!(pixels.dimensions(), self.base.dimensions());
        self.pixels = pixels;
    }

    /// Copy out a region of the working buffer, clipped to the surface.
    /// Out-of-range requests shrink rather than fail; a fully outside
    /// request yields an empty image.
    pub fn read_region(&self, x: u32, y: u32, w: u32, h: u32) -> RgbaImage {
        read_region(&self.pixels, x, y, w, h)
    }

    /// Copy `region` back into the working buffer at `(x, y)`, clipped.
    pub fn write_region(&mut self, region: &RgbaImage, x: u32, y: u32) {
        write_region(&mut self.pixels, region, x, y);
    }

    /// Encode the working buffer.
    pub fn export_bytes(&self, format: ExportFormat) -> Result<Vec<u8>> {
        crate::io::encode_image(&self.pixels, format)
    }
}

/// Clipped copy of `(x, y, w, h)` out of `img`.
pub fn read_region(img: &RgbaImage, x: u32, y: u32, w: u32, h: u32) -> RgbaImage {
    let x = x.min(img.width());
    let y = y.min(img.height());
    let w = w.min(img.width() - x);
    let h = h.min(img.height() - y);
    imageops::crop_imm(img, x, y, w, h).to_image()
}

/// Clipped copy of `region` into `img` at `(x, y)`.
pub fn write_region(img: &mut RgbaImage, region: &RgbaImage, x: u32, y: u32) {
    if x >= img.width() || y >= img.height() {
        return;
    }
    let w = region.width().min(img.width() - x) as usize;
    let h = region.height().min(img.height() - y);
    let dst_stride = img.width() as usize * 4;
    let src_stride = region.width() as usize * 4;
    let src = region.as_raw();
    let dst: &mut [u8] = img;
    for row in 0..h as usize {
        let d = (y as usize + row) * dst_stride + x as usize * 4;
        let s = row * src_stride;
        dst[d..d + w * 4].copy_from_slice(&src[s..s + w * 4]);
    }
}

// ============================================================================
// CANVAS DOCUMENT: base raster + ordered annotations
// ============================================================================

/// Minimum crop size in pixels (both axes).
pub const CROP_MIN_SIZE: f32 = 10.0;
/// Minimum filter-region size in pixels (both axes).
pub const FILTER_MIN_SIZE: f32 = 1.0;

/// The working document: what is on screen is always
/// `compositor.render(surface.base(), history.list())`.
pub struct CanvasDocument {
    pub surface: RasterSurface,
    pub history: AnnotationHistory,
    pub crop: RegionSelector,
    pub filter: RegionSelector,
    compositor: Compositor,
    /// Bumped whenever the base raster is replaced; asynchronous work
    /// started against an older epoch is discarded.
    epoch: u64,
}

impl CanvasDocument {
    pub fn new(image: RgbaImage, max_history: usize, epoch: u64) -> Self {
        let (w, h) = (image.width() as f32, image.height() as f32);
        let mut doc = Self {
            surface: RasterSurface::new(image),
            history: AnnotationHistory::new(max_history),
            crop: RegionSelector::new(SelectionPurpose::Crop, CROP_MIN_SIZE, w, h),
            filter: RegionSelector::new(SelectionPurpose::Filter, FILTER_MIN_SIZE, w, h),
            compositor: Compositor::new(),
            epoch,
        };
        doc.recomposite();
        doc
    }

    pub fn width(&self) -> u32 {
        self.surface.width()
    }

    pub fn height(&self) -> u32 {
        self.surface.height()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Render arbitrary operations over this document's base.
    pub fn render(&mut self, ops: &[Annotation]) -> RgbaImage {
        self.compositor.render(self.surface.base(), ops)
    }

    /// Rebuild the working buffer from the base and the committed operations.
    pub fn recomposite(&mut self) {
        let out = self.compositor.render(self.surface.base(), self.history.list());
        self.surface.set_pixels(out);
    }

    /// Rebuild from committed state, then draw `preview` on top. The history
    /// is never touched.
    pub fn recomposite_with_preview(&mut self, preview: &Annotation) {
        let mut out = self.compositor.render(self.surface.base(), self.history.list());
        self.compositor.draw(&mut out, preview);
        self.surface.set_pixels(out);
    }

    /// The composite plus a selection guide (dimmed outside, white border).
    /// Guides live only in this copy, never in the working buffer.
    pub fn display_image(&self, guide: Option<RegionRect>) -> RgbaImage {
        let mut out = self.surface.pixels().clone();
        if let Some(rect) = guide {
            draw_selection_guide(&mut out, rect);
        }
        out
    }

    /// Replace the base with `rect` cut out of the current composite and drop
    /// every operation. Pixels come from the working buffer, which never
    /// contains guide graphics.
    pub fn commit_crop(&mut self, rect: RegionRect) -> Result<()> {
        let (x, y, w, h) = rect
            .clamped(self.width() as f32, self.height() as f32)
            .pixel_bounds(self.width(), self.height())
            .ok_or(EditorError::NoSelection)?;
        let cropped = self.surface.read_region(x, y, w, h);
        self.replace_base(cropped);
        tracing::info!("Cropped to {}x{} at ({}, {})", w, h, x, y);
        Ok(())
    }

    /// Bake the current committed composite into a new base and clear the
    /// operation list.
    pub fn flatten(&mut self) {
        self.recomposite();
        let flat = self.surface.pixels().clone();
        self.replace_base(flat);
    }

    fn replace_base(&mut self, image: RgbaImage) {
        let (w, h) = (image.width() as f32, image.height() as f32);
        self.surface.load(image);
        self.history.clear();
        self.crop.reset_bounds(w, h);
        self.filter.reset_bounds(w, h);
        self.epoch += 1;
    }
}

/// Dim everything outside `rect` and outline it in white.
fn draw_selection_guide(img: &mut RgbaImage, rect: RegionRect) {
    let r = rect.normalized();
    let w = img.width();
    let stride = w as usize * 4;
    let raw: &mut [u8] = img;
    raw.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        let py = y as f32 + 0.5;
        for x in 0..w as usize {
            let px = x as f32 + 0.5;
            let inside = px >= r.x && px <= r.right() && py >= r.y && py <= r.bottom();
            let pi = x * 4;
            if !inside {
                blend_over(&mut row[pi..pi + 4], [0, 0, 0, 255], 0.5);
                continue;
            }
            let on_border = (px - r.x) < 1.0
                || (r.right() - px) < 1.0
                || (py - r.y) < 1.0
                || (r.bottom() - py) < 1.0;
            if on_border {
                row[pi..pi + 4].copy_from_slice(&Rgba([255, 255, 255, 255]).0);
            }
        }
    });
}
