//! Per-pixel color space conversions.
//!
//! All conversions produce 8-bit channel values using the common imaging
//! convention (hue halved into 0..180, Lab lightness scaled to 0..255 and
//! chroma offset by 128) so that features match the trained model.

/// RGB color value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// HSV color value, 8-bit convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub h: u8, // 0-180
    pub s: u8, // 0-255
    pub v: u8, // 0-255
}

fn saturate(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

impl Rgb {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Convert RGB to HSV color space
    pub fn to_hsv(&self) -> Hsv {
        let r = self.r as f64;
        let g = self.g as f64;
        let b = self.b as f64;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        // Calculate hue in degrees
        let h = if delta == 0.0 {
            0.0
        } else if max == r {
            60.0 * (g - b) / delta
        } else if max == g {
            120.0 + 60.0 * (b - r) / delta
        } else {
            240.0 + 60.0 * (r - g) / delta
        };

        let h = if h < 0.0 { h + 360.0 } else { h };

        let s = if max == 0.0 { 0.0 } else { delta * 255.0 / max };

        Hsv {
            h: (h / 2.0).round().clamp(0.0, 179.0) as u8,
            s: saturate(s),
            v: saturate(max),
        }
    }

    /// Luma plus red and blue difference channels, returned as `[Y, Cr, Cb]`
    pub fn to_ycrcb(&self) -> [u8; 3] {
        let r = self.r as f64;
        let g = self.g as f64;
        let b = self.b as f64;

        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        let cr = (r - y) * 0.713 + 128.0;
        let cb = (b - y) * 0.564 + 128.0;
        [saturate(y), saturate(cr), saturate(cb)]
    }

    /// CIE L*a*b* under D65, returned as `[L, a, b]`
    pub fn to_lab(&self) -> [u8; 3] {
        fn linearize(c: u8) -> f64 {
            let c = c as f64 / 255.0;
            if c <= 0.04045 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        }

        fn f(t: f64) -> f64 {
            if t > 0.008856 {
                t.cbrt()
            } else {
                7.787 * t + 16.0 / 116.0
            }
        }

        let r = linearize(self.r);
        let g = linearize(self.g);
        let b = linearize(self.b);

        let x = (0.412453 * r + 0.357580 * g + 0.180423 * b) / 0.950456;
        let y = 0.212671 * r + 0.715160 * g + 0.072169 * b;
        let z = (0.019334 * r + 0.119193 * g + 0.950227 * b) / 1.088754;

        let l = if y > 0.008856 {
            116.0 * y.cbrt() - 16.0
        } else {
            903.3 * y
        };
        let a = 500.0 * (f(x) - f(y)) + 128.0;
        let bb = 200.0 * (f(y) - f(z)) + 128.0;

        [saturate(l * 255.0 / 100.0), saturate(a), saturate(bb)]
    }
}
