//! Clean-up of the raw classifier mask down to two solid hand silhouettes.

use crate::mask::{IntegralImage, Mask, StructuringElement, FOREGROUND};
use handcal_shared::HANDS_PER_CAPTURE;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Whether the classifier mask is refined before fingertip extraction
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefineMode {
    #[default]
    Full,
    /// Use the classifier output as-is
    Raw,
}

/// Kernel sizes and thresholds of the refinement stages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefinerParams {
    /// Offset of the four corners probed by the consistency filter
    pub corner_offset: usize,
    /// Hand fraction above which an inconsistent pixel becomes hand
    pub area_ratio: f64,
    pub close_kernel: usize,
    pub blur_kernel: usize,
    /// Blurred intensity threshold as a fraction of 255
    pub blur_threshold: f64,
    pub dilate_kernel: usize,
}

impl Default for RefinerParams {
    fn default() -> Self {
        Self {
            corner_offset: 4,
            area_ratio: 0.6,
            close_kernel: 11,
            blur_kernel: 11,
            blur_threshold: 0.6,
            dilate_kernel: 9,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MaskRefiner {
    mode: RefineMode,
    params: RefinerParams,
}

impl MaskRefiner {
    pub fn new(mode: RefineMode, params: RefinerParams) -> Self {
        Self { mode, params }
    }

    /// Run every refinement stage in order
    pub fn refine(&self, mask: &Mask) -> Mask {
        if self.mode == RefineMode::Raw {
            return mask.clone();
        }
        let started = Instant::now();
        let p = &self.params;

        let filtered = self.consistency_filter(mask);
        let closed = filtered.close(&StructuringElement::rect(p.close_kernel), 1);
        let hands = keep_largest_components(&closed, HANDS_PER_CAPTURE);
        let result = hands
            .fill_holes()
            .blur_threshold(p.blur_kernel, p.blur_threshold)
            .dilate(&StructuringElement::rect(p.dilate_kernel));

        log::debug!(
            "Refined mask in {:?}: {} -> {} hand pixels",
            started.elapsed(),
            mask.count_foreground(),
            result.count_foreground()
        );
        result
    }

    /// Replace pixels that disagree with any of their four corner probes by
    /// the majority vote of the rectangle the corners span.
    pub fn consistency_filter(&self, mask: &Mask) -> Mask {
        let (w, h) = (mask.width(), mask.height());
        if w == 0 || h == 0 {
            return mask.clone();
        }
        let k = self.params.corner_offset;
        let ratio = self.params.area_ratio;
        let integral = IntegralImage::new(mask);

        let mut data = vec![0u8; w * h];
        data.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
            let y0 = y.saturating_sub(k);
            let y1 = (y + k).min(h - 1);
            for (x, cell) in row.iter_mut().enumerate() {
                let x0 = x.saturating_sub(k);
                let x1 = (x + k).min(w - 1);
                let center = mask.get(x, y);
                let consistent = [(x0, y0), (x1, y0), (x1, y1), (x0, y1)]
                    .iter()
                    .all(|(cx, cy)| mask.get(*cx, *cy) == center);

                let hand = if consistent {
                    center
                } else {
                    let area = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f64;
                    integral.count(x0, y0, x1, y1) as f64 / area > ratio
                };
                if hand {
                    *cell = FOREGROUND;
                }
            }
        });

        Mask::from_raw(w, h, data).unwrap_or_else(|| Mask::new(w, h))
    }
}

/// Clear every component except the `n` largest (8-connectivity)
pub fn keep_largest_components(mask: &Mask, n: usize) -> Mask {
    let components = mask.components();
    let keep = components.largest(n);
    log::trace!(
        "Keeping {} of {} components",
        keep.len(),
        components.count()
    );
    components.mask_of(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Mask {
        Mask::from_fn(60, 40, |x, y| {
            let big = (5..25).contains(&x) && (5..30).contains(&y);
            let medium = (35..50).contains(&x) && (5..20).contains(&y);
            let small = (40..44).contains(&x) && (30..34).contains(&y);
            big || medium || small
        })
    }

    #[test]
    fn test_keep_largest_two() {
        let mask = blobs();
        let kept = keep_largest_components(&mask, 2);
        assert_eq!(kept.components().count(), 2);
        assert!(kept.count_foreground() <= mask.count_foreground());
        assert!(!kept.get(41, 31));
        assert!(kept.get(10, 10));
        assert!(kept.get(40, 10));
    }

    #[test]
    fn test_keep_largest_on_single_component() {
        let mask = Mask::from_fn(10, 10, |x, y| x < 3 && y < 3);
        assert_eq!(keep_largest_components(&mask, 2), mask);
    }

    #[test]
    fn test_consistency_filter_removes_speckle() {
        let mut mask = Mask::new(30, 30);
        mask.set(15, 15, true);
        let refiner = MaskRefiner::default();
        assert_eq!(refiner.consistency_filter(&mask).count_foreground(), 0);
    }

    #[test]
    fn test_consistency_filter_fills_pinhole() {
        let mut mask = Mask::from_fn(30, 30, |_, _| true);
        mask.set(15, 15, false);
        let refiner = MaskRefiner::default();
        assert_eq!(refiner.consistency_filter(&mask).count_foreground(), 900);
    }

    #[test]
    fn test_raw_mode_passes_through() {
        let mask = blobs();
        let refiner = MaskRefiner::new(RefineMode::Raw, RefinerParams::default());
        assert_eq!(refiner.refine(&mask), mask);
    }

    #[test]
    fn test_full_refine_keeps_two_solid_regions() {
        let mut mask = blobs();
        // Hole inside the big blob
        for y in 14..18 {
            for x in 12..16 {
                mask.set(x, y, false);
            }
        }
        let params = RefinerParams {
            corner_offset: 1,
            close_kernel: 3,
            blur_kernel: 3,
            dilate_kernel: 1,
            ..RefinerParams::default()
        };
        let refined = MaskRefiner::new(RefineMode::Full, params).refine(&mask);

        assert_eq!(refined.components().count(), 2);
        assert!(refined.get(13, 15));
        assert!(!refined.get(41, 31));
        assert!(refined.data().iter().all(|v| *v == 0 || *v == 255));
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let params: RefinerParams = serde_json::from_str(r#"{ "close_kernel": 5 }"#).unwrap();
        assert_eq!(params.close_kernel, 5);
        assert_eq!(params.corner_offset, 4);
        assert_eq!(params.dilate_kernel, 9);
    }
}
