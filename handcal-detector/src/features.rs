//! Per-pixel feature vectors fed to the skin classifier.
//!
//! Layout of one feature vector (16 values, then the same 16 values again
//! for the surround-averaged pixel when the model is 32-dimensional):
//!
//! | index | feature                          |
//! |-------|----------------------------------|
//! | 0-2   | R, G, B                          |
//! | 3-4   | normalized r, g (scaled to 255)  |
//! | 5-6   | opponent R-G, (2B - R + G) / 4   |
//! | 7-9   | Y, Cr, Cb                        |
//! | 10-12 | H, S, V                          |
//! | 13-15 | L, a, b                          |

use crate::color::Rgb;
use crate::mask::StructuringElement;
use image::RgbImage;
use rayon::prelude::*;

/// Features computed from a single pixel
pub const RAW_FEATURES: usize = 16;

/// Raw features plus surround-averaged features
pub const FEATURE_DIM: usize = 2 * RAW_FEATURES;

/// Write the 16 color features of `p` into `out[..16]`
pub fn color_features(p: Rgb, out: &mut [f64]) {
    let (r, g, b) = (p.r as f64, p.g as f64, p.b as f64);
    let sum = r + g + b;
    let (nr, ng) = if sum > 0.0 {
        (r / sum * 255.0, g / sum * 255.0)
    } else {
        (0.0, 0.0)
    };
    let rg = p.r as i32 - p.g as i32;
    let yb = (2 * p.b as i32 - p.r as i32 + p.g as i32) / 4;

    let [y, cr, cb] = p.to_ycrcb();
    let hsv = p.to_hsv();
    let [l, la, lb] = p.to_lab();

    let values = [
        r,
        g,
        b,
        nr,
        ng,
        rg as f64,
        yb as f64,
        y as f64,
        cr as f64,
        cb as f64,
        hsv.h as f64,
        hsv.s as f64,
        hsv.v as f64,
        l as f64,
        la as f64,
        lb as f64,
    ];
    out[..RAW_FEATURES].copy_from_slice(&values);
}

/// Reflect-101 border index, as used by the smoothing filter
pub(crate) fn reflect(i: isize, len: usize) -> usize {
    let len = len as isize;
    if len == 1 {
        return 0;
    }
    let mut i = i;
    while i < 0 || i >= len {
        i = if i < 0 { -i } else { 2 * len - 2 - i };
    }
    i as usize
}

/// 5x5 binomial smoothing (separable 1-4-6-4-1 kernel)
pub fn gaussian_5x5(image: &RgbImage) -> RgbImage {
    const TAPS: [u32; 5] = [1, 4, 6, 4, 1];
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 {
        return image.clone();
    }
    let src = image.as_raw();

    let mut horizontal = vec![0u32; w * h * 3];
    horizontal
        .par_chunks_mut(w * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..w {
                for c in 0..3 {
                    let mut acc = 0;
                    for (k, tap) in TAPS.iter().enumerate() {
                        let xx = reflect(x as isize + k as isize - 2, w);
                        acc += tap * src[(y * w + xx) * 3 + c] as u32;
                    }
                    row[x * 3 + c] = acc;
                }
            }
        });

    let mut out = vec![0u8; w * h * 3];
    out.par_chunks_mut(w * 3).enumerate().for_each(|(y, row)| {
        for x in 0..w {
            for c in 0..3 {
                let mut acc = 0;
                for (k, tap) in TAPS.iter().enumerate() {
                    let yy = reflect(y as isize + k as isize - 2, h);
                    acc += tap * horizontal[(yy * w + x) * 3 + c];
                }
                // 256 = 16 * 16, rounded
                row[x * 3 + c] = ((acc + 128) / 256) as u8;
            }
        }
    });

    RgbImage::from_raw(w as u32, h as u32, out).unwrap_or_else(|| image.clone())
}

/// Mean color of the elliptical neighbourhood around each pixel, center excluded.
///
/// Near the borders only in-bounds neighbours are averaged.
pub fn surround_average(image: &RgbImage, kernel_size: usize) -> RgbImage {
    let element = StructuringElement::ellipse(kernel_size);
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 || element.radius() == 0 {
        return image.clone();
    }
    let src = image.as_raw();
    let stride = w + 1;

    // Per channel row prefix sums
    let mut prefix = vec![[0u32; 3]; stride * h];
    prefix.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        for x in 0..w {
            for c in 0..3 {
                row[x + 1][c] = row[x][c] + src[(y * w + x) * 3 + c] as u32;
            }
        }
    });

    let radius = element.radius() as isize;
    let mut out = vec![0u8; w * h * 3];
    out.par_chunks_mut(w * 3).enumerate().for_each(|(y, row)| {
        for x in 0..w {
            let mut sums = [0u32; 3];
            let mut count = 0u32;
            for (i, span) in element.spans().iter().enumerate() {
                let yy = y as isize + i as isize - radius;
                if yy < 0 || yy >= h as isize {
                    continue;
                }
                let span = *span as isize;
                let x0 = (x as isize - span).max(0) as usize;
                let x1 = (x as isize + span).min(w as isize - 1) as usize;
                let base = yy as usize * stride;
                for (c, sum) in sums.iter_mut().enumerate() {
                    *sum += prefix[base + x1 + 1][c] - prefix[base + x0][c];
                }
                count += (x1 - x0 + 1) as u32;
            }
            for (c, sum) in sums.iter_mut().enumerate() {
                *sum -= src[(y * w + x) * 3 + c] as u32;
            }
            let count = count.saturating_sub(1).max(1);
            for c in 0..3 {
                row[x * 3 + c] = ((sums[c] as f64) / count as f64).round() as u8;
            }
        }
    });

    RgbImage::from_raw(w as u32, h as u32, out).unwrap_or_else(|| image.clone())
}

/// Smoothed source and its surround average, ready for per-pixel lookup
pub struct FeaturePlanes {
    smoothed: RgbImage,
    surround: Option<RgbImage>,
}

impl FeaturePlanes {
    /// Precompute the images needed for `dimension`-sized features
    pub fn new(image: &RgbImage, dimension: usize, surround_kernel_size: usize) -> Self {
        let smoothed = gaussian_5x5(image);
        let surround = (dimension > RAW_FEATURES)
            .then(|| surround_average(&smoothed, surround_kernel_size));
        Self { smoothed, surround }
    }

    pub fn width(&self) -> usize {
        self.smoothed.width() as usize
    }

    pub fn height(&self) -> usize {
        self.smoothed.height() as usize
    }

    /// Fill `out` with the feature vector of pixel `(x, y)`.
    ///
    /// `out` must hold 16 values, or 32 when surround features were prepared.
    pub fn write(&self, x: usize, y: usize, out: &mut [f64]) {
        let p = self.smoothed.get_pixel(x as u32, y as u32);
        color_features(Rgb::new(p[0], p[1], p[2]), &mut out[..RAW_FEATURES]);
        if let Some(surround) = &self.surround {
            let s = surround.get_pixel(x as u32, y as u32);
            color_features(Rgb::new(s[0], s[1], s[2]), &mut out[RAW_FEATURES..FEATURE_DIM]);
        }
    }
}
