//! Per-pixel skin classification against the trained cluster model.

use crate::features::{FeaturePlanes, FEATURE_DIM};
use crate::mask::{Mask, FOREGROUND};
use crate::model::ClassifierModel;
use image::RgbImage;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;

/// Size of the ring kernel used for surround features
pub const DEFAULT_SURROUND_KERNEL: usize = 15;

/// Classifies every pixel of an image as hand or background
#[derive(Debug, Clone)]
pub struct PixelClassifier {
    model: Arc<ClassifierModel>,
    surround_kernel: usize,
}

impl PixelClassifier {
    pub fn new(model: Arc<ClassifierModel>) -> Self {
        Self {
            model,
            surround_kernel: DEFAULT_SURROUND_KERNEL,
        }
    }

    pub fn with_surround_kernel(mut self, size: usize) -> Self {
        self.surround_kernel = size;
        self
    }

    /// Produce a binary mask the size of `image`
    pub fn classify(&self, image: &RgbImage) -> Mask {
        let started = Instant::now();
        let dimension = self.model.dimension();
        let planes = FeaturePlanes::new(image, dimension, self.surround_kernel);
        let (w, h) = (planes.width(), planes.height());

        let mut data = vec![0u8; w * h];
        if w > 0 {
            data.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
                let mut sample = [0.0; FEATURE_DIM];
                for (x, cell) in row.iter_mut().enumerate() {
                    planes.write(x, y, &mut sample);
                    if self.model.is_skin(&sample[..dimension]) {
                        *cell = FOREGROUND;
                    }
                }
            });
        }

        let mask = Mask::from_raw(w, h, data).unwrap_or_else(|| Mask::new(w, h));
        log::debug!(
            "Classified {}x{} image in {:?}: {} skin pixels",
            w,
            h,
            started.elapsed(),
            mask.count_foreground()
        );
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Cluster;
    use image::Rgb;
    use nalgebra::{DMatrix, DVector};

    /// 16-D model accepting colors within `radius` of `center` in RGB
    fn rgb_model(center: [f64; 3], radius: f64) -> ClassifierModel {
        let mut mean = DVector::zeros(16);
        let mut inv = DMatrix::zeros(16, 16);
        for i in 0..3 {
            mean[i] = center[i];
            inv[(i, i)] = 1.0;
        }
        ClassifierModel::new(16, vec![Cluster::new(mean, inv, radius, 0.0)]).unwrap()
    }

    #[test]
    fn test_mask_is_binary_and_same_size() {
        let mut image = RgbImage::from_pixel(20, 12, Rgb([20, 60, 200]));
        for y in 3..9 {
            for x in 5..15 {
                image.put_pixel(x, y, Rgb([210, 160, 130]));
            }
        }
        let classifier = PixelClassifier::new(Arc::new(rgb_model([210.0, 160.0, 130.0], 10.0)));
        let mask = classifier.classify(&image);

        assert_eq!((mask.width(), mask.height()), (20, 12));
        assert!(mask.data().iter().all(|v| *v == 0 || *v == 255));
        assert!(mask.get(10, 6));
        assert!(!mask.get(0, 0));
        assert!(mask.count_foreground() > 0);
    }

    #[test]
    fn test_no_skin_gives_empty_mask() {
        let image = RgbImage::from_pixel(8, 8, Rgb([0, 0, 255]));
        let classifier = PixelClassifier::new(Arc::new(rgb_model([210.0, 160.0, 130.0], 10.0)));
        assert_eq!(classifier.classify(&image).count_foreground(), 0);
    }

    #[test]
    fn test_surround_features_are_used_for_wide_models() {
        // Accept only pixels whose surround is skin colored too
        let mut mean = DVector::zeros(32);
        let mut inv = DMatrix::zeros(32, 32);
        for i in 0..3 {
            mean[i] = [210.0, 160.0, 130.0][i];
            mean[16 + i] = mean[i];
            inv[(i, i)] = 1.0;
            inv[(16 + i, 16 + i)] = 1.0;
        }
        let model = ClassifierModel::new(32, vec![Cluster::new(mean, inv, 15.0, 0.0)]).unwrap();

        let mut image = RgbImage::from_pixel(40, 40, Rgb([20, 60, 200]));
        for y in 5..35 {
            for x in 5..35 {
                image.put_pixel(x, y, Rgb([210, 160, 130]));
            }
        }
        let mask = PixelClassifier::new(Arc::new(model))
            .with_surround_kernel(5)
            .classify(&image);
        assert!(mask.get(20, 20));
        // Skin colored but with a mixed surround
        assert!(!mask.get(5, 5));
    }
}
