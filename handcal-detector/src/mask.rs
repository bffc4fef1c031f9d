//! Binary masks and the morphology used to clean them up.
//!
//! Pixels are stored as `0` (background) or `255` (hand) so a mask can be
//! dumped as a grayscale image without conversion.

use crate::features::reflect;
use image::GrayImage;
use rayon::prelude::*;
use std::collections::VecDeque;

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

/// Single-channel binary image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl Mask {
    /// All-background mask
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![BACKGROUND; width * height],
        }
    }

    pub fn from_fn<F>(width: usize, height: usize, f: F) -> Self
    where
        F: Fn(usize, usize) -> bool,
    {
        let mut mask = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if f(x, y) {
                    mask.data[y * width + x] = FOREGROUND;
                }
            }
        }
        mask
    }

    /// Wrap raw bytes; any non-zero byte counts as foreground
    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
        if data.len() != width * height {
            return None;
        }
        let data = data
            .into_iter()
            .map(|v| if v > 0 { FOREGROUND } else { BACKGROUND })
            .collect();
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_raw(self.width as u32, self.height as u32, self.data.clone())
            .unwrap_or_else(|| GrayImage::new(self.width as u32, self.height as u32))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x] != BACKGROUND
    }

    pub fn set(&mut self, x: usize, y: usize, foreground: bool) {
        self.data[y * self.width + x] = if foreground { FOREGROUND } else { BACKGROUND };
    }

    pub fn count_foreground(&self) -> usize {
        self.data.iter().filter(|v| **v != BACKGROUND).count()
    }

    /// Pixels set here but not in `other`
    pub fn subtract(&self, other: &Mask) -> Mask {
        debug_assert_eq!(self.data.len(), other.data.len());
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| if *a != BACKGROUND && *b == BACKGROUND { FOREGROUND } else { BACKGROUND })
            .collect();
        Mask {
            width: self.width,
            height: self.height,
            data,
        }
    }

    /// First-moment centroid `(x, y)` of the foreground
    pub fn centroid(&self) -> Option<(f64, f64)> {
        let mut count = 0usize;
        let mut sx = 0.0;
        let mut sy = 0.0;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.get(x, y) {
                    count += 1;
                    sx += x as f64;
                    sy += y as f64;
                }
            }
        }
        if count == 0 {
            return None;
        }
        Some((sx / count as f64, sy / count as f64))
    }

    fn row_prefix_sums(&self) -> Vec<u32> {
        let stride = self.width + 1;
        let mut prefix = vec![0u32; stride * self.height];
        prefix
            .par_chunks_mut(stride)
            .zip(self.data.par_chunks(self.width.max(1)))
            .for_each(|(out, row)| {
                for (x, v) in row.iter().enumerate() {
                    out[x + 1] = out[x] + u32::from(*v != BACKGROUND);
                }
            });
        prefix
    }

    /// Shared sliding-window pass for erosion and dilation.
    ///
    /// `keep(count, area)` decides the output pixel from the foreground count
    /// inside the in-bounds part of the element.
    fn morph<F>(&self, element: &StructuringElement, keep: F) -> Mask
    where
        F: Fn(u32, u32) -> bool + Sync,
    {
        if self.width == 0 || self.height == 0 {
            return self.clone();
        }
        let prefix = self.row_prefix_sums();
        let stride = self.width + 1;
        let radius = element.radius() as isize;
        let (w, h) = (self.width as isize, self.height as isize);

        let mut out = Mask::new(self.width, self.height);
        out.data
            .par_chunks_mut(self.width)
            .enumerate()
            .for_each(|(y, row)| {
                let y = y as isize;
                for (x, cell) in row.iter_mut().enumerate() {
                    let x = x as isize;
                    let mut count = 0u32;
                    let mut area = 0u32;
                    for (i, span) in element.spans.iter().enumerate() {
                        let yy = y + i as isize - radius;
                        if yy < 0 || yy >= h {
                            continue;
                        }
                        let span = *span as isize;
                        let x0 = (x - span).max(0) as usize;
                        let x1 = (x + span).min(w - 1) as usize;
                        let base = yy as usize * stride;
                        count += prefix[base + x1 + 1] - prefix[base + x0];
                        area += (x1 - x0 + 1) as u32;
                    }
                    if keep(count, area) {
                        *cell = FOREGROUND;
                    }
                }
            });
        out
    }

    /// Morphological erosion; out-of-bounds pixels are ignored
    pub fn erode(&self, element: &StructuringElement) -> Mask {
        self.morph(element, |count, area| area > 0 && count == area)
    }

    /// Morphological dilation; out-of-bounds pixels are ignored
    pub fn dilate(&self, element: &StructuringElement) -> Mask {
        self.morph(element, |count, _| count > 0)
    }

    /// `iterations` erosions followed by as many dilations
    pub fn open(&self, element: &StructuringElement, iterations: usize) -> Mask {
        let mut out = self.clone();
        for _ in 0..iterations {
            out = out.erode(element);
        }
        for _ in 0..iterations {
            out = out.dilate(element);
        }
        out
    }

    /// `iterations` dilations followed by as many erosions
    pub fn close(&self, element: &StructuringElement, iterations: usize) -> Mask {
        let mut out = self.clone();
        for _ in 0..iterations {
            out = out.dilate(element);
        }
        for _ in 0..iterations {
            out = out.erode(element);
        }
        out
    }

    /// Box blur with reflect-101 borders, then binary threshold.
    ///
    /// A pixel stays foreground when the blurred intensity (0..255) is
    /// strictly above `ratio * 255`.
    pub fn blur_threshold(&self, size: usize, ratio: f64) -> Mask {
        if self.width == 0 || self.height == 0 {
            return self.clone();
        }
        let radius = (size / 2) as isize;

        let mut horizontal = vec![0u32; self.data.len()];
        horizontal
            .par_chunks_mut(self.width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, cell) in row.iter_mut().enumerate() {
                    let mut count = 0;
                    for dx in -radius..=radius {
                        let xx = reflect(x as isize + dx, self.width);
                        count += u32::from(self.data[y * self.width + xx] != BACKGROUND);
                    }
                    *cell = count;
                }
            });

        let taps = ((2 * radius + 1) * (2 * radius + 1)) as f64;
        let threshold = ratio * 255.0;
        let mut out = Mask::new(self.width, self.height);
        out.data
            .par_chunks_mut(self.width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, cell) in row.iter_mut().enumerate() {
                    let mut count = 0;
                    for dy in -radius..=radius {
                        let yy = reflect(y as isize + dy, self.height);
                        count += horizontal[yy * self.width + x];
                    }
                    let intensity = (count as f64 * 255.0 / taps).round();
                    if intensity > threshold {
                        *cell = FOREGROUND;
                    }
                }
            });
        out
    }

    /// Fill every background region not connected to the image border.
    ///
    /// Equivalent to drawing the external contours of all components filled.
    pub fn fill_holes(&self) -> Mask {
        let (w, h) = (self.width, self.height);
        let mut outside = vec![false; w * h];
        let mut queue = VecDeque::new();

        let seed = |x: usize, y: usize, outside: &mut Vec<bool>, queue: &mut VecDeque<(usize, usize)>| {
            let idx = y * w + x;
            if !outside[idx] && self.data[idx] == BACKGROUND {
                outside[idx] = true;
                queue.push_back((x, y));
            }
        };
        for x in 0..w {
            seed(x, 0, &mut outside, &mut queue);
            if h > 0 {
                seed(x, h - 1, &mut outside, &mut queue);
            }
        }
        for y in 0..h {
            seed(0, y, &mut outside, &mut queue);
            if w > 0 {
                seed(w - 1, y, &mut outside, &mut queue);
            }
        }

        // Background is 4-connected so that it never leaks through a
        // diagonal step of an 8-connected outline.
        while let Some((x, y)) = queue.pop_front() {
            if x > 0 {
                seed(x - 1, y, &mut outside, &mut queue);
            }
            if x + 1 < w {
                seed(x + 1, y, &mut outside, &mut queue);
            }
            if y > 0 {
                seed(x, y - 1, &mut outside, &mut queue);
            }
            if y + 1 < h {
                seed(x, y + 1, &mut outside, &mut queue);
            }
        }

        let data = outside
            .iter()
            .map(|o| if *o { BACKGROUND } else { FOREGROUND })
            .collect();
        Mask {
            width: w,
            height: h,
            data,
        }
    }

    /// Label 8-connected foreground components in raster-scan order
    pub fn components(&self) -> Components {
        let (w, h) = (self.width, self.height);
        let mut labels = vec![0u32; w * h];
        let mut stats = Vec::new();
        let mut stack = Vec::new();

        for start in 0..w * h {
            if self.data[start] == BACKGROUND || labels[start] != 0 {
                continue;
            }
            let label = stats.len() as u32 + 1;
            let mut component = ComponentStats::new(label, start % w, start / w);
            labels[start] = label;
            stack.push(start);

            while let Some(idx) = stack.pop() {
                let (x, y) = (idx % w, idx / w);
                component.add(x, y);
                for dy in -1isize..=1 {
                    for dx in -1isize..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = x as isize + dx;
                        let ny = y as isize + dy;
                        if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                            continue;
                        }
                        let n = ny as usize * w + nx as usize;
                        if self.data[n] != BACKGROUND && labels[n] == 0 {
                            labels[n] = label;
                            stack.push(n);
                        }
                    }
                }
            }
            stats.push(component);
        }

        Components {
            width: w,
            height: h,
            labels,
            stats,
        }
    }
}

/// Area, centroid and bounding box of one labelled component
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentStats {
    pub label: u32,
    pub area: usize,
    pub min_x: usize,
    pub min_y: usize,
    pub max_x: usize,
    pub max_y: usize,
    sum_x: f64,
    sum_y: f64,
}

impl ComponentStats {
    fn new(label: u32, x: usize, y: usize) -> Self {
        Self {
            label,
            area: 0,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            sum_x: 0.0,
            sum_y: 0.0,
        }
    }

    fn add(&mut self, x: usize, y: usize) {
        self.area += 1;
        self.sum_x += x as f64;
        self.sum_y += y as f64;
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn centroid(&self) -> (f64, f64) {
        let n = self.area.max(1) as f64;
        (self.sum_x / n, self.sum_y / n)
    }
}

/// Result of connected-component labelling; label 0 is background
#[derive(Debug, Clone)]
pub struct Components {
    width: usize,
    height: usize,
    labels: Vec<u32>,
    stats: Vec<ComponentStats>,
}

impl Components {
    /// Width and height of the labelled image
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn count(&self) -> usize {
        self.stats.len()
    }

    pub fn label_at(&self, x: usize, y: usize) -> u32 {
        self.labels[y * self.width + x]
    }

    pub fn stats(&self) -> &[ComponentStats] {
        &self.stats
    }

    pub fn get(&self, label: u32) -> Option<&ComponentStats> {
        if label == 0 {
            return None;
        }
        self.stats.get(label as usize - 1)
    }

    /// Labels of the `n` largest components, largest first; ties keep scan order
    pub fn largest(&self, n: usize) -> Vec<u32> {
        let mut ordered: Vec<&ComponentStats> = self.stats.iter().collect();
        ordered.sort_by(|a, b| b.area.cmp(&a.area));
        ordered.iter().take(n).map(|s| s.label).collect()
    }

    /// Mask of the pixels carrying any of `labels`
    pub fn mask_of(&self, labels: &[u32]) -> Mask {
        let data = self
            .labels
            .iter()
            .map(|l| if *l != 0 && labels.contains(l) { FOREGROUND } else { BACKGROUND })
            .collect();
        Mask {
            width: self.width,
            height: self.height,
            data,
        }
    }

    /// Coordinates of every pixel carrying `label`
    pub fn pixels(&self, label: u32) -> impl Iterator<Item = (usize, usize)> + '_ {
        let w = self.width;
        let (y0, y1) = match self.get(label) {
            Some(s) => (s.min_y, s.max_y + 1),
            None => (0, 0),
        };
        (y0..y1)
            .flat_map(move |y| (0..w).map(move |x| (x, y)))
            .filter(move |(x, y)| self.labels[y * w + x] == label)
    }
}

/// Summed-area table of a mask for O(1) rectangle foreground counts
pub struct IntegralImage {
    width: usize,
    sums: Vec<u32>,
}

impl IntegralImage {
    pub fn new(mask: &Mask) -> Self {
        let stride = mask.width + 1;
        let mut sums = vec![0u32; stride * (mask.height + 1)];
        for y in 0..mask.height {
            let mut row = 0u32;
            for x in 0..mask.width {
                row += u32::from(mask.get(x, y));
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self {
            width: mask.width,
            sums,
        }
    }

    /// Foreground pixels in the inclusive rectangle `[x0, x1] x [y0, y1]`
    pub fn count(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u32 {
        let stride = self.width + 1;
        let a = self.sums[(y1 + 1) * stride + x1 + 1];
        let b = self.sums[y0 * stride + x1 + 1];
        let c = self.sums[(y1 + 1) * stride + x0];
        let d = self.sums[y0 * stride + x0];
        a + d - b - c
    }
}

/// Odd-sized structuring element described by its half-width per row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    spans: Vec<usize>,
}

impl StructuringElement {
    /// Full square of side `size` (rounded up to odd)
    pub fn rect(size: usize) -> Self {
        let radius = size.max(1) / 2;
        Self {
            spans: vec![radius; 2 * radius + 1],
        }
    }

    /// Filled ellipse inscribed in a `size` square (rounded up to odd)
    pub fn ellipse(size: usize) -> Self {
        let radius = size.max(1) / 2;
        let r = radius as f64;
        let spans = (0..=2 * radius)
            .map(|i| {
                let dy = i as f64 - r;
                (r * r - dy * dy).max(0.0).sqrt().round() as usize
            })
            .collect();
        Self { spans }
    }

    pub fn radius(&self) -> usize {
        self.spans.len() / 2
    }

    pub fn spans(&self) -> &[usize] {
        &self.spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: usize, x0: usize, y0: usize, side: usize) -> Mask {
        Mask::from_fn(size, size, |x, y| {
            x >= x0 && x < x0 + side && y >= y0 && y < y0 + side
        })
    }

    #[test]
    fn test_ellipse_element_matches_disc() {
        let e = StructuringElement::ellipse(5);
        assert_eq!(e.spans(), &[0, 2, 2, 2, 0]);
        assert_eq!(e.radius(), 2);
        assert_eq!(StructuringElement::rect(3).spans(), &[1, 1, 1]);
    }

    #[test]
    fn test_erode_then_dilate_square() {
        let mask = square(20, 5, 5, 6);
        let eroded = mask.erode(&StructuringElement::rect(3));
        assert_eq!(eroded.count_foreground(), 16);
        let restored = eroded.dilate(&StructuringElement::rect(3));
        assert_eq!(restored, mask);
    }

    #[test]
    fn test_open_removes_thin_lines() {
        let mut mask = square(30, 5, 5, 10);
        for y in 0..30 {
            mask.set(25, y, true);
        }
        let opened = mask.open(&StructuringElement::rect(3), 1);
        assert!(!opened.get(25, 10));
        assert!(opened.get(10, 10));
    }

    #[test]
    fn test_close_fills_gap() {
        let mut mask = square(20, 2, 2, 10);
        mask.set(6, 6, false);
        let closed = mask.close(&StructuringElement::rect(3), 1);
        assert!(closed.get(6, 6));
    }

    #[test]
    fn test_components_are_labelled_in_scan_order() {
        let mut mask = square(20, 10, 1, 3);
        for y in 12..18 {
            for x in 1..5 {
                mask.set(x, y, true);
            }
        }
        let components = mask.components();
        assert_eq!(components.count(), 2);
        assert_eq!(components.label_at(10, 1), 1);
        assert_eq!(components.label_at(1, 12), 2);
        assert_eq!(components.get(2).unwrap().area, 24);
        assert_eq!(components.largest(1), vec![2]);
        assert_eq!(components.pixels(1).count(), 9);
    }

    #[test]
    fn test_diagonal_pixels_are_connected() {
        let mask = Mask::from_fn(4, 4, |x, y| x == y);
        assert_eq!(mask.components().count(), 1);
    }

    #[test]
    fn test_fill_holes() {
        let mut mask = square(12, 2, 2, 8);
        for y in 4..8 {
            for x in 4..8 {
                mask.set(x, y, false);
            }
        }
        let filled = mask.fill_holes();
        assert_eq!(filled, square(12, 2, 2, 8));
    }

    #[test]
    fn test_integral_counts() {
        let mask = square(10, 2, 2, 4);
        let integral = IntegralImage::new(&mask);
        assert_eq!(integral.count(0, 0, 9, 9), 16);
        assert_eq!(integral.count(2, 2, 3, 3), 4);
        assert_eq!(integral.count(6, 6, 9, 9), 0);
    }

    #[test]
    fn test_blur_threshold_trims_corners() {
        let mask = square(20, 5, 5, 8);
        let smoothed = mask.blur_threshold(3, 0.6);
        assert!(smoothed.get(8, 8));
        assert!(!smoothed.get(5, 5));
        assert!(!smoothed.get(4, 8));
    }

    #[test]
    fn test_blur_threshold_reflects_borders() {
        // Replicated borders would count the edge pixel twice and keep it
        let mask = Mask::from_fn(5, 1, |x, _| x == 0);
        assert!(!mask.blur_threshold(3, 0.5).get(0, 0));
        let mask = Mask::from_fn(5, 1, |x, _| x <= 1);
        assert!(mask.blur_threshold(3, 0.5).get(0, 0));
    }

    #[test]
    fn test_centroid() {
        let mask = square(10, 2, 4, 3);
        assert_eq!(mask.centroid(), Some((3.0, 5.0)));
        assert_eq!(Mask::new(3, 3).centroid(), None);
    }
}
