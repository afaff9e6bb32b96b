use image::RgbaImage;
use rayon::prelude::*;

/// Default pixelation block for the blur tool.
pub const DEFAULT_BLOCK_SIZE: u32 = 10;

// --- Pixelate (block average) ---

/// Replace the RGB of every `block_size × block_size` block with the
/// integer-floor mean of its members. Blocks at the right/bottom edges are
/// clipped to the region. Alpha is left untouched.
///
/// Works in place on a copied-out region; each band of `block_size` rows is
/// independent, so bands run in parallel.
pub fn pixelate_region(region: &mut RgbaImage, block_size: u32) {
    let (w, h) = region.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let bs = block_size.max(1) as usize;
    if bs == 1 {
        return;
    }
    let w = w as usize;
    let stride = w * 4;
    let raw: &mut [u8] = region;

    raw.par_chunks_mut(stride * bs).for_each(|band| {
        let rows = band.len() / stride;
        let mut bx = 0;
        while bx < w {
            let bw = bs.min(w - bx);
            let mut sum = [0u64; 3];
            for row in 0..rows {
                let start = row * stride + bx * 4;
                for px in band[start..start + bw * 4].chunks_exact(4) {
                    sum[0] += px[0] as u64;
                    sum[1] += px[1] as u64;
                    sum[2] += px[2] as u64;
                }
            }
            let n = (bw * rows) as u64;
            let avg = sum.map(|s| (s / n) as u8);
            for row in 0..rows {
                let start = row * stride + bx * 4;
                for px in band[start..start + bw * 4].chunks_exact_mut(4) {
                    px[..3].copy_from_slice(&avg);
                }
            }
            bx += bs;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn block_takes_floor_mean() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([10, 20, 30, 255]));
        img.put_pixel(1, 0, Rgba([21, 40, 61, 100]));
        pixelate_region(&mut img, 2);
        assert_eq!(img.get_pixel(0, 0).0, [15, 30, 45, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [15, 30, 45, 100]);
    }

    #[test]
    fn edge_blocks_are_clipped() {
        // 3 wide with block 2: columns {0,1} and {2} average separately.
        let mut img = RgbaImage::new(3, 1);
        img.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        img.put_pixel(1, 0, Rgba([100, 100, 100, 255]));
        img.put_pixel(2, 0, Rgba([200, 200, 200, 255]));
        pixelate_region(&mut img, 2);
        assert_eq!(img.get_pixel(0, 0).0, [50, 50, 50, 255]);
        assert_eq!(img.get_pixel(2, 0).0, [200, 200, 200, 255]);
    }

    #[test]
    fn uniform_region_is_unchanged() {
        let mut img = RgbaImage::from_pixel(17, 9, Rgba([7, 8, 9, 255]));
        let before = img.clone();
        pixelate_region(&mut img, 4);
        assert_eq!(img, before);
    }

    #[test]
    fn degenerate_inputs_are_no_ops() {
        let mut empty = RgbaImage::new(0, 5);
        pixelate_region(&mut empty, 4);
        let mut img = RgbaImage::from_fn(3, 3, |x, y| Rgba([(x * 40) as u8, (y * 40) as u8, 0, 255]));
        let before = img.clone();
        pixelate_region(&mut img, 0);
        assert_eq!(img, before);
    }
}
