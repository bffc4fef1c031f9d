//! Fingertip localisation on refined hand silhouettes.
//!
//! The palm of each hand is what survives a large elliptical opening. The
//! fingers are the top-hat residual (hand minus palm), and each finger's tip
//! is its pixel farthest from the palm centroid.

use crate::mask::{Components, Mask, StructuringElement};
use handcal_shared::{CalibrationError, Point2, FINGERS_PER_HAND, HANDS_PER_CAPTURE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExtractorParams {
    /// Diameter of the elliptical element that erases the fingers
    pub palm_kernel: usize,
    pub palm_iterations: usize,
}

impl Default for ExtractorParams {
    fn default() -> Self {
        Self {
            palm_kernel: 81,
            palm_iterations: 2,
        }
    }
}

/// Palm centroid and fingertips of one hand, in image coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct HandTips {
    pub centroid: Point2,
    pub tips: Vec<Point2>,
}

#[derive(Debug, Clone, Default)]
pub struct FingertipExtractor {
    params: ExtractorParams,
}

impl FingertipExtractor {
    pub fn new(params: ExtractorParams) -> Self {
        Self { params }
    }

    /// Ten fingertips of the two hands in `mask`, sorted by ascending x
    pub fn extract(&self, mask: &Mask) -> Result<Vec<Point2>, CalibrationError> {
        let hands = self.extract_hands(mask)?;
        let mut tips: Vec<Point2> = hands.into_iter().flat_map(|h| h.tips).collect();
        tips.sort_by(|a, b| a.x.total_cmp(&b.x));
        Ok(tips)
    }

    /// Per-hand results for the first two labelled components
    pub fn extract_hands(&self, mask: &Mask) -> Result<Vec<HandTips>, CalibrationError> {
        let components = mask.components();
        if components.count() < HANDS_PER_CAPTURE {
            return Err(CalibrationError::ExtractionIncomplete(format!(
                "found {} hand regions, need {}",
                components.count(),
                HANDS_PER_CAPTURE
            )));
        }

        (1..=HANDS_PER_CAPTURE as u32)
            .map(|label| self.extract_hand(&components, label))
            .collect()
    }

    fn extract_hand(&self, components: &Components, label: u32) -> Result<HandTips, CalibrationError> {
        let stats = components.get(label).ok_or_else(|| {
            CalibrationError::ExtractionIncomplete(format!("hand region {} missing", label))
        })?;

        // Work on a window around the hand; the margin covers everything
        // the opening can touch so the result matches a full-frame pass.
        let element = StructuringElement::ellipse(self.params.palm_kernel);
        let margin = element.radius() * self.params.palm_iterations + 1;
        let (full_w, full_h) = components.dimensions();
        let x0 = stats.min_x.saturating_sub(margin);
        let y0 = stats.min_y.saturating_sub(margin);
        let x1 = (stats.max_x + margin).min(full_w - 1);
        let y1 = (stats.max_y + margin).min(full_h - 1);

        let hand = Mask::from_fn(x1 - x0 + 1, y1 - y0 + 1, |x, y| {
            components.label_at(x0 + x, y0 + y) == label
        });
        let palm = hand.open(&element, self.params.palm_iterations);
        let (cx, cy) = palm.centroid().unwrap_or_else(|| {
            let (sx, sy) = stats.centroid();
            (sx - x0 as f64, sy - y0 as f64)
        });

        let fingers = hand.subtract(&palm).components();
        let largest = fingers.largest(FINGERS_PER_HAND);
        if largest.len() < FINGERS_PER_HAND {
            return Err(CalibrationError::ExtractionIncomplete(format!(
                "hand {} shows {} fingers, need {}",
                label,
                largest.len(),
                FINGERS_PER_HAND
            )));
        }

        let tips = largest
            .iter()
            .filter_map(|finger| farthest_pixel(&fingers, *finger, cx, cy))
            .map(|(x, y)| Point2::new((x + x0) as f64, (y + y0) as f64))
            .collect::<Vec<_>>();
        log::debug!(
            "Hand {}: palm centroid ({:.1}, {:.1}), {} of {} residual regions used",
            label,
            cx + x0 as f64,
            cy + y0 as f64,
            tips.len(),
            fingers.count()
        );

        Ok(HandTips {
            centroid: Point2::new(cx + x0 as f64, cy + y0 as f64),
            tips,
        })
    }
}

/// Pixel of component `label` farthest from `(cx, cy)`; ties keep scan order
fn farthest_pixel(components: &Components, label: u32, cx: f64, cy: f64) -> Option<(usize, usize)> {
    let mut best = None;
    let mut best_distance = f64::NEG_INFINITY;
    for (x, y) in components.pixels(label) {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        let distance = dx * dx + dy * dy;
        if distance > best_distance {
            best_distance = distance;
            best = Some((x, y));
        }
    }
    best
}
