use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// ============================================================================
// COLOR FILTER MODES
// ============================================================================

/// Named per-pixel color grade applied by the filter tool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterMode {
    #[default]
    Grayscale,
    Sepia,
    Invert,
    Brightness,
    Contrast,
    Saturation,
    Vintage,
    Romantic,
    LrWarm,
    LrCool,
    LrMatte,
    Clarendon,
    NeutralEnhancement,
    VibrantContrast,
    MoodyShadows,
    DramaticTones,
    WarmVintage,
    DreamyGlow,
    Mono,
}

impl FilterMode {
    pub fn all() -> &'static [FilterMode] {
        use FilterMode::*;
        &[
            Grayscale,
            Sepia,
            Invert,
            Brightness,
            Contrast,
            Saturation,
            Vintage,
            Romantic,
            LrWarm,
            LrCool,
            LrMatte,
            Clarendon,
            NeutralEnhancement,
            VibrantContrast,
            MoodyShadows,
            DramaticTones,
            WarmVintage,
            DreamyGlow,
            Mono,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterMode::Grayscale => "grayscale",
            FilterMode::Sepia => "sepia",
            FilterMode::Invert => "invert",
            FilterMode::Brightness => "brightness",
            FilterMode::Contrast => "contrast",
            FilterMode::Saturation => "saturation",
            FilterMode::Vintage => "vintage",
            FilterMode::Romantic => "romantic",
            FilterMode::LrWarm => "lrWarm",
            FilterMode::LrCool => "lrCool",
            FilterMode::LrMatte => "lrMatte",
            FilterMode::Clarendon => "clarendon",
            FilterMode::NeutralEnhancement => "neutralEnhancement",
            FilterMode::VibrantContrast => "vibrantContrast",
            FilterMode::MoodyShadows => "moodyShadows",
            FilterMode::DramaticTones => "dramaticTones",
            FilterMode::WarmVintage => "warmVintage",
            FilterMode::DreamyGlow => "dreamyGlow",
            FilterMode::Mono => "mono",
        }
    }

    /// Look a mode up by name. Unknown names fall back to grayscale.
    pub fn from_name(name: &str) -> FilterMode {
        FilterMode::all()
            .iter()
            .copied()
            .find(|m| m.name().eq_ignore_ascii_case(name.trim()))
            .unwrap_or_else(|| {
                tracing::debug!("Unknown filter mode '{}', using grayscale", name);
                FilterMode::Grayscale
            })
    }
}

impl std::fmt::Display for FilterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// HSL HELPERS (all channels 0..1)
// ============================================================================

/// RGB (0..1) → HSL (H: 0..1, S: 0..1, L: 0..1)
pub fn rgb_to_hsl(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    let d = max - min;
    if d.abs() < 1e-6 {
        return (0.0, 0.0, l);
    }

    let s = if l > 0.5 {
        d / (2.0 - max - min)
    } else {
        d / (max + min)
    };

    // Sixth-of-a-turn wedges keyed on the dominant channel.
    let wedge = if max == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };

    (wedge / 6.0, s, l)
}

/// HSL (0..1) → RGB (0..1)
pub fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s.abs() < 1e-6 {
        return (l, l, l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    (
        hue_channel(p, q, h + 1.0 / 3.0),
        hue_channel(p, q, h),
        hue_channel(p, q, h - 1.0 / 3.0),
    )
}

fn hue_channel(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
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

// ============================================================================
// PER-PIXEL GRADING
// ============================================================================

/// Final channel conversion: non-finite becomes 0, then round and clamp.
#[inline]
pub fn to_channel(v: f32) -> u8 {
    if !v.is_finite() {
        return 0;
    }
    v.round().clamp(0.0, 255.0) as u8
}

#[inline]
fn luminance(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

/// Contrast factor for a level in -255..255.
#[inline]
fn contrast_factor(level: f32) -> f32 {
    (259.0 * (level + 255.0)) / (255.0 * (259.0 - level))
}

#[inline]
fn contrast(c: f32, factor: f32) -> f32 {
    factor * (c - 128.0) + 128.0
}

/// Orange, in turns.
const WARM_HUE: f32 = 30.0 / 360.0;
/// Sky blue, in turns.
const COOL_HUE: f32 = 215.0 / 360.0;
/// Rose red, in turns.
const ROSE_HUE: f32 = 350.0 / 360.0;

/// Rotate hue `h` toward `target` along the shorter arc, by at most `step` turns.
fn shift_hue_toward(h: f32, target: f32, step: f32) -> f32 {
    let mut delta = target - h;
    delta -= delta.round();
    (h + delta.clamp(-step, step)).rem_euclid(1.0)
}

/// Round-trip through HSL, letting `adjust` edit (h, s, l).
fn via_hsl(rgb: [f32; 3], adjust: impl Fn(f32, f32, f32) -> (f32, f32, f32)) -> [f32; 3] {
    let (h, s, l) = rgb_to_hsl(rgb[0] / 255.0, rgb[1] / 255.0, rgb[2] / 255.0);
    let (h, s, l) = adjust(h, s, l);
    let (r, g, b) = hsl_to_rgb(h, s.clamp(0.0, 1.0), l.clamp(0.0, 1.0));
    [r * 255.0, g * 255.0, b * 255.0]
}

fn sepia(r: f32, g: f32, b: f32) -> [f32; 3] {
    [
        0.393 * r + 0.769 * g + 0.189 * b,
        0.349 * r + 0.686 * g + 0.168 * b,
        0.272 * r + 0.534 * g + 0.131 * b,
    ]
}

/// Grade a single RGB triple. Pure; alpha is the caller's business.
pub fn grade_pixel(mode: FilterMode, rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(|c| c as f32);
    let out: [f32; 3] = match mode {
        FilterMode::Grayscale => {
            let y = luminance(r, g, b);
            [y, y, y]
        }
        FilterMode::Sepia => sepia(r, g, b),
        FilterMode::Invert => [255.0 - r, 255.0 - g, 255.0 - b],
        FilterMode::Brightness => [r + 35.0, g + 35.0, b + 35.0],
        FilterMode::Contrast => {
            let f = contrast_factor(40.0);
            [contrast(r, f), contrast(g, f), contrast(b, f)]
        }
        FilterMode::Saturation => via_hsl([r, g, b], |h, s, l| (h, (s * 1.35).min(1.0), l)),
        FilterMode::Vintage => {
            let s = sepia(r, g, b);
            let mix = |sep: f32, orig: f32| (sep * 0.6 + orig * 0.4) * 0.9 + 20.0;
            [mix(s[0], r), mix(s[1], g), mix(s[2], b)]
        }
        FilterMode::Romantic => {
            let [r, g, b] = via_hsl([r, g, b], |h, s, l| {
                (shift_hue_toward(h, ROSE_HUE, 0.03), s * 1.05, l + (1.0 - l) * 0.06)
            });
            [r + 15.0, g, b + 8.0]
        }
        FilterMode::LrWarm => {
            let [r, g, b] = via_hsl([r, g, b], |h, s, l| (shift_hue_toward(h, WARM_HUE, 0.04), s * 1.12, l));
            [r + 10.0, g, b - 10.0]
        }
        FilterMode::LrCool => {
            let [r, g, b] = via_hsl([r, g, b], |h, s, l| {
                (shift_hue_toward(h, COOL_HUE, 0.04), s * 1.05, l * 0.98)
            });
            [r - 10.0, g, b + 12.0]
        }
        FilterMode::LrMatte => via_hsl([r, g, b], |h, s, l| (h, s * 0.85, 0.1 + 0.8 * l)),
        FilterMode::Clarendon => {
            let f = 1.2;
            let [r, g, b] = [contrast(r, f), contrast(g, f), contrast(b, f)];
            via_hsl([r.clamp(0.0, 255.0), g.clamp(0.0, 255.0), b.clamp(0.0, 255.0)], |h, s, l| {
                (h, s * 1.2, l)
            })
        }
        FilterMode::NeutralEnhancement => via_hsl([r, g, b], |h, s, l| (h, s * 1.08, l + (l - 0.5) * 0.1)),
        FilterMode::VibrantContrast => {
            let [r, g, b] = via_hsl([r, g, b], |h, s, l| (h, s * 1.45, l));
            let f = 1.25;
            [contrast(r, f), contrast(g, f), contrast(b, f)]
        }
        FilterMode::MoodyShadows => {
            let [r, g, b] = via_hsl([r, g, b], |h, s, l| (h, s * 0.8, l.powf(1.2)));
            [r, g, b + 10.0]
        }
        FilterMode::DramaticTones => {
            let f = 1.5;
            let [r, g, b] = [contrast(r, f), contrast(g, f), contrast(b, f)];
            via_hsl([r.clamp(0.0, 255.0), g.clamp(0.0, 255.0), b.clamp(0.0, 255.0)], |h, s, l| {
                (h, s * 0.9, l)
            })
        }
        FilterMode::WarmVintage => {
            let [r, g, b] = via_hsl([r, g, b], |h, s, l| {
                (shift_hue_toward(h, WARM_HUE, 0.05), s * 0.8, 0.06 + 0.88 * l)
            });
            [r + 18.0, g + 6.0, b - 14.0]
        }
        FilterMode::DreamyGlow => {
            let [r, g, b] = via_hsl([r, g, b], |h, s, l| (h, s * 0.85, l + (1.0 - l) * 0.15));
            [r + 10.0, g, b + 6.0]
        }
        FilterMode::Mono => {
            let y = contrast(luminance(r, g, b), 1.15);
            [y, y, y]
        }
    };
    out.map(to_channel)
}

/// Grade every pixel of a copied-out region in place. Alpha is preserved.
pub fn apply_color_filter(region: &mut RgbaImage, mode: FilterMode) {
    if region.width() == 0 || region.height() == 0 {
        return;
    }
    let stride = region.width() as usize * 4;
    let raw: &mut [u8] = region;
    raw.par_chunks_mut(stride).for_each(|row| {
        for px in row.chunks_exact_mut(4) {
            let [r, g, b] = grade_pixel(mode, [px[0], px[1], px[2]]);
            px[0] = r;
            px[1] = g;
            px[2] = b;
        }
    });
}
