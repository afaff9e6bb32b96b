use image::RgbaImage;
use rayon::prelude::*;

use crate::canvas::{Color, Point, blend_coverage};

/// Arrow head stroke length in pixels.
pub const ARROW_HEAD_LENGTH: f32 = 15.0;
/// Angle between the shaft and each head stroke.
pub const ARROW_HEAD_ANGLE: f32 = std::f32::consts::PI / 6.0;

// ============================================================================
// SDF functions: return signed distance (negative = inside)
// ============================================================================

/// SDF for a box centred at origin with half-extents (hx, hy).
#[inline]
fn sdf_box(px: f32, py: f32, hx: f32, hy: f32) -> f32 {
    let dx = px.abs() - hx;
    let dy = py.abs() - hy;
    let outside = (dx.max(0.0) * dx.max(0.0) + dy.max(0.0) * dy.max(0.0)).sqrt();
    let inside = dx.max(dy).min(0.0);
    outside + inside
}

/// SDF for an ellipse (approximation).
#[inline]
fn sdf_ellipse(px: f32, py: f32, rx: f32, ry: f32) -> f32 {
    let nx = px / rx;
    let ny = py / ry;
    let len = (nx * nx + ny * ny).sqrt();
    if len < 1e-8 {
        return -rx.min(ry);
    }
    let scale = (rx * rx * ny * ny + ry * ry * nx * nx).sqrt() / (rx * ry * len);
    (len - 1.0) / scale
}

/// Distance to a line segment. Zero-length segments degrade to a point.
#[inline]
fn sdf_line_segment(px: f32, py: f32, a: Point, b: Point) -> f32 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    let t = if len2 < 1e-12 {
        0.0
    } else {
        (((px - a.x) * dx + (py - a.y) * dy) / len2).clamp(0.0, 1.0)
    };
    let cx = a.x + t * dx;
    let cy = a.y + t * dy;
    ((px - cx) * (px - cx) + (py - cy) * (py - cy)).sqrt()
}

/// Smoothstep between edge0 and edge1.
#[inline]
fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

// ============================================================================
// RASTERIZATION
// ============================================================================

/// Clip a float bounding box (padded) to the canvas.
/// Returns `(x0, y0, w, h)` or `None` when nothing is visible.
fn clip_bounds(
    min: Point,
    max: Point,
    pad: f32,
    canvas_w: u32,
    canvas_h: u32,
) -> Option<(u32, u32, u32, u32)> {
    if !(min.x.is_finite() && min.y.is_finite() && max.x.is_finite() && max.y.is_finite()) {
        return None;
    }
    let x0 = ((min.x - pad).floor() as i64).max(0);
    let y0 = ((min.y - pad).floor() as i64).max(0);
    let x1 = ((max.x + pad).ceil() as i64).min(canvas_w as i64);
    let y1 = ((max.y + pad).ceil() as i64).min(canvas_h as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Evaluate `dist` at every pixel centre of the clipped box, turn the signed
/// distance into anti-aliased coverage, and blend `color` onto `img`.
fn rasterize_sdf<F>(img: &mut RgbaImage, bounds: (u32, u32, u32, u32), color: Color, dist: F)
where
    F: Fn(f32, f32) -> f32 + Sync,
{
    let (x0, y0, w, h) = bounds;
    let mut coverage = vec![0.0f32; w as usize * h as usize];
    coverage
        .par_chunks_mut(w as usize)
        .enumerate()
        .for_each(|(row, cov_row)| {
            let py = (y0 + row as u32) as f32 + 0.5;
            for (col, cov) in cov_row.iter_mut().enumerate() {
                let px = (x0 + col as u32) as f32 + 0.5;
                *cov = smoothstep(0.5, -0.5, dist(px, py));
            }
        });
    blend_coverage(img, &coverage, x0, y0, w, color);
}

fn extent(points: &[Point]) -> (Point, Point) {
    let mut min = Point::new(f32::MAX, f32::MAX);
    let mut max = Point::new(f32::MIN, f32::MIN);
    for p in points {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    (min, max)
}

/// Stroke a set of segments as one shape with round caps and joins.
/// Overlapping segments are unioned, so translucent strokes never
/// double-blend where they meet.
///
/// Each segment only touches its own padded box; the union takes the max
/// coverage per pixel, which equals the coverage of the nearest segment.
pub fn stroke_segments(img: &mut RgbaImage, segments: &[(Point, Point)], width: f32, color: Color) {
    if segments.is_empty() {
        return;
    }
    let half = (width * 0.5).max(0.5);
    let ends: Vec<Point> = segments.iter().flat_map(|&(a, b)| [a, b]).collect();
    let (min, max) = extent(&ends);
    let Some((x0, y0, w, h)) = clip_bounds(min, max, half + 2.0, img.width(), img.height()) else {
        return;
    };

    // (col0, row0, col1, row1) relative to the union box, plus the endpoints.
    let spans: Vec<(usize, usize, usize, usize, Point, Point)> = segments
        .iter()
        .filter_map(|&(a, b)| {
            let (smin, smax) = extent(&[a, b]);
            let (sx, sy, sw, sh) = clip_bounds(smin, smax, half + 1.0, img.width(), img.height())?;
            let (cx, cy) = ((sx - x0) as usize, (sy - y0) as usize);
            Some((cx, cy, cx + sw as usize, cy + sh as usize, a, b))
        })
        .collect();

    let mut coverage = vec![0.0f32; w as usize * h as usize];
    coverage
        .par_chunks_mut(w as usize)
        .enumerate()
        .for_each(|(row, cov_row)| {
            let py = (y0 as usize + row) as f32 + 0.5;
            for &(c0, r0, c1, r1, a, b) in &spans {
                if row < r0 || row >= r1 {
                    continue;
                }
                for (col, cov) in cov_row[c0..c1].iter_mut().enumerate() {
                    let px = (x0 as usize + c0 + col) as f32 + 0.5;
                    let c = smoothstep(0.5, -0.5, sdf_line_segment(px, py, a, b) - half);
                    if c > *cov {
                        *cov = c;
                    }
                }
            }
        });
    blend_coverage(img, &coverage, x0, y0, w, color);
}

/// Stroke an open polyline. A single point becomes a dot.
pub fn stroke_polyline(img: &mut RgbaImage, points: &[Point], width: f32, color: Color) {
    match points {
        [] => {}
        [p] => fill_circle(img, *p, width * 0.5, color),
        _ => {
            let segments: Vec<(Point, Point)> = points.windows(2).map(|w| (w[0], w[1])).collect();
            stroke_segments(img, &segments, width, color);
        }
    }
}

/// Filled disc.
pub fn fill_circle(img: &mut RgbaImage, center: Point, radius: f32, color: Color) {
    let r = radius.max(0.5);
    let Some(bounds) = clip_bounds(center, center, r + 2.0, img.width(), img.height()) else {
        return;
    };
    rasterize_sdf(img, bounds, color, |px, py| {
        Point::new(px, py).distance(center) - r
    });
}

/// Outline of the rectangle spanned by two corners.
pub fn stroke_rect(img: &mut RgbaImage, a: Point, b: Point, width: f32, color: Color) {
    let half = (width * 0.5).max(0.5);
    let (min, max) = extent(&[a, b]);
    let c = min.midpoint(max);
    let (hx, hy) = ((max.x - min.x) * 0.5, (max.y - min.y) * 0.5);
    let Some(bounds) = clip_bounds(min, max, half + 2.0, img.width(), img.height()) else {
        return;
    };
    rasterize_sdf(img, bounds, color, |px, py| {
        sdf_box(px - c.x, py - c.y, hx, hy).abs() - half
    });
}

/// Filled rectangle spanned by two corners.
pub fn fill_rect(img: &mut RgbaImage, a: Point, b: Point, color: Color) {
    let (min, max) = extent(&[a, b]);
    let c = min.midpoint(max);
    let (hx, hy) = ((max.x - min.x) * 0.5, (max.y - min.y) * 0.5);
    let Some(bounds) = clip_bounds(min, max, 2.0, img.width(), img.height()) else {
        return;
    };
    rasterize_sdf(img, bounds, color, |px, py| sdf_box(px - c.x, py - c.y, hx, hy));
}

/// Outline of the ellipse inscribed in the box spanned by two corners.
/// A flat box degrades to a line between the corners.
pub fn stroke_ellipse(img: &mut RgbaImage, a: Point, b: Point, width: f32, color: Color) {
    let (min, max) = extent(&[a, b]);
    let (rx, ry) = ((max.x - min.x) * 0.5, (max.y - min.y) * 0.5);
    if rx < 0.5 || ry < 0.5 {
        stroke_segments(img, &[(a, b)], width, color);
        return;
    }
    let half = (width * 0.5).max(0.5);
    let c = min.midpoint(max);
    let Some(bounds) = clip_bounds(min, max, half + 2.0, img.width(), img.height()) else {
        return;
    };
    rasterize_sdf(img, bounds, color, |px, py| {
        sdf_ellipse(px - c.x, py - c.y, rx, ry).abs() - half
    });
}

// ============================================================================
// GEOMETRY BUILDERS
// ============================================================================

/// Shaft plus two head strokes. Each head stroke starts at `to` and points
/// back along the shaft, rotated ±30° from it.
pub fn arrow_segments(from: Point, to: Point) -> [(Point, Point); 3] {
    let angle = (to.y - from.y).atan2(to.x - from.x);
    let head = |offset: f32| {
        Point::new(
            to.x - ARROW_HEAD_LENGTH * (angle + offset).cos(),
            to.y - ARROW_HEAD_LENGTH * (angle + offset).sin(),
        )
    };
    [
        (from, to),
        (to, head(-ARROW_HEAD_ANGLE)),
        (to, head(ARROW_HEAD_ANGLE)),
    ]
}

/// Smooth freehand input: quadratic curves through successive midpoints,
/// using each raw point as the control point, flattened to a polyline.
pub fn smooth_marker_path(points: &[Point]) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let mut out = vec![points[0]];
    let mut cursor = points[0];
    for i in 1..points.len() - 1 {
        let ctrl = points[i];
        let end = points[i].midpoint(points[i + 1]);
        let steps = ((cursor.distance(ctrl) + ctrl.distance(end)) / 2.0).ceil().clamp(2.0, 32.0) as usize;
        for s in 1..=steps {
            let t = s as f32 / steps as f32;
            let mt = 1.0 - t;
            out.push(Point::new(
                mt * mt * cursor.x + 2.0 * mt * t * ctrl.x + t * t * end.x,
                mt * mt * cursor.y + 2.0 * mt * t * ctrl.y + t * t * end.y,
            ));
        }
        cursor = end;
    }
    if let Some(&last) = points.last() {
        out.push(last);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const RED: Color = [255, 0, 0, 255];

    fn blank(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]))
    }

    #[test]
    fn arrow_heads_are_fifteen_pixels_at_thirty_degrees() {
        let segs = arrow_segments(Point::new(0.0, 0.0), Point::new(100.0, 0.0));
        for (a, b) in &segs[1..] {
            assert_eq!(*a, Point::new(100.0, 0.0));
            assert!((a.distance(*b) - 15.0).abs() < 1e-3);
            assert!((b.x - (100.0 - 15.0 * (std::f32::consts::PI / 6.0).cos())).abs() < 1e-3);
            assert!((b.y.abs() - 7.5).abs() < 1e-3);
        }
    }

    #[test]
    fn arrow_paints_shaft_and_heads() {
        let mut img = blank(120, 40);
        let segs = arrow_segments(Point::new(0.0, 20.0), Point::new(100.0, 20.0));
        stroke_segments(&mut img, &segs, 3.0, RED);
        assert_eq!(img.get_pixel(50, 20).0, RED);
        assert_eq!(img.get_pixel(93, 23).0, RED);
        assert_eq!(img.get_pixel(93, 16).0, RED);
        assert_eq!(img.get_pixel(50, 30).0, [255, 255, 255, 255]);
    }

    #[test]
    fn long_marker_matches_nearest_segment_coverage() {
        let raw: Vec<Point> = (0..40)
            .map(|i| Point::new(4.0 + i as f32 * 2.5, 30.0 + 18.0 * (i as f32 * 0.4).sin()))
            .collect();
        let path = smooth_marker_path(&raw);
        let segments: Vec<(Point, Point)> = path.windows(2).map(|w| (w[0], w[1])).collect();
        let color = [20, 90, 200, 180];

        let mut fast = blank(110, 60);
        stroke_segments(&mut fast, &segments, 6.0, color);

        // Every segment evaluated at every pixel of the whole box.
        let mut reference = blank(110, 60);
        let ends: Vec<Point> = segments.iter().flat_map(|&(a, b)| [a, b]).collect();
        let (min, max) = extent(&ends);
        let bounds = clip_bounds(min, max, 5.0, 110, 60).unwrap();
        rasterize_sdf(&mut reference, bounds, color, |px, py| {
            segments
                .iter()
                .map(|&(a, b)| sdf_line_segment(px, py, a, b))
                .fold(f32::MAX, f32::min)
                - 3.0
        });

        assert_eq!(fast, reference);
        assert_ne!(fast, blank(110, 60));
    }

    #[test]
    fn rect_outline_leaves_interior() {
        let mut img = blank(50, 50);
        stroke_rect(&mut img, Point::new(10.0, 10.0), Point::new(40.0, 40.0), 2.0, RED);
        assert_eq!(img.get_pixel(25, 10).0, RED);
        assert_eq!(img.get_pixel(25, 25).0, [255, 255, 255, 255]);
    }

    #[test]
    fn single_point_marker_is_a_dot() {
        let mut img = blank(20, 20);
        stroke_polyline(&mut img, &[Point::new(10.0, 10.0)], 6.0, RED);
        assert_eq!(img.get_pixel(10, 10).0, RED);
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn smoothing_keeps_endpoints() {
        let pts = [Point::new(0.0, 0.0), Point::new(10.0, 10.0), Point::new(20.0, 0.0), Point::new(30.0, 10.0)];
        let path = smooth_marker_path(&pts);
        assert_eq!(path.first(), Some(&pts[0]));
        assert_eq!(path.last(), Some(&pts[3]));
        assert!(path.len() > pts.len());
    }

    #[test]
    fn shapes_outside_canvas_are_clipped() {
        let mut img = blank(10, 10);
        stroke_ellipse(&mut img, Point::new(100.0, 100.0), Point::new(140.0, 130.0), 3.0, RED);
        assert!(img.pixels().all(|p| p.0 == [255, 255, 255, 255]));
    }
}
