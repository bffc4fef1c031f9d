//! Hand detection for the calibration pipeline.
//!
//! Segments skin with a trained Mahalanobis cluster model, cleans the mask
//! down to two hand silhouettes and locates the ten fingertips.

pub mod classifier;
pub mod color;
pub mod features;
pub mod fingertips;
pub mod mask;
pub mod model;
pub mod refiner;

pub use classifier::PixelClassifier;
pub use fingertips::{ExtractorParams, FingertipExtractor, HandTips};
pub use mask::Mask;
pub use model::ClassifierModel;
pub use refiner::{MaskRefiner, RefineMode, RefinerParams};

use handcal_shared::{CalibrationError, Point2};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Tunables of the whole detection chain
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorParams {
    pub refine_mode: RefineMode,
    pub refiner: RefinerParams,
    pub extractor: ExtractorParams,
    /// Ring kernel size for surround features
    pub surround_kernel: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            refine_mode: RefineMode::Full,
            refiner: RefinerParams::default(),
            extractor: ExtractorParams::default(),
            surround_kernel: classifier::DEFAULT_SURROUND_KERNEL,
        }
    }
}

/// Classifier, refiner and extractor wired together
#[derive(Debug, Clone)]
pub struct HandDetector {
    classifier: PixelClassifier,
    refiner: MaskRefiner,
    extractor: FingertipExtractor,
}

impl HandDetector {
    pub fn new(model: Arc<ClassifierModel>) -> Self {
        Self::with_params(model, DetectorParams::default())
    }

    pub fn with_params(model: Arc<ClassifierModel>, params: DetectorParams) -> Self {
        Self {
            classifier: PixelClassifier::new(model).with_surround_kernel(params.surround_kernel),
            refiner: MaskRefiner::new(params.refine_mode, params.refiner),
            extractor: FingertipExtractor::new(params.extractor),
        }
    }

    /// Load the model file and build a detector around it
    pub fn load(model_path: impl AsRef<Path>, params: DetectorParams) -> Result<Self, CalibrationError> {
        let model = ClassifierModel::load(model_path)?;
        Ok(Self::with_params(Arc::new(model), params))
    }

    /// Classified and refined hand mask of `image`
    pub fn segment(&self, image: &RgbImage) -> Mask {
        let raw = self.classifier.classify(image);
        self.refiner.refine(&raw)
    }

    /// Fingertips of a refined mask, sorted by ascending x
    pub fn locate(&self, mask: &Mask) -> Result<Vec<Point2>, CalibrationError> {
        self.extractor.extract(mask)
    }

    /// Full chain: segment then locate
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<Point2>, CalibrationError> {
        let mask = self.segment(image);
        self.locate(&mask)
    }
}

/// Decode a tightly packed BGR frame into an RGB image.
///
/// Extra trailing bytes are ignored; `None` if `data` is too short.
pub fn rgb_from_bgr(width: usize, height: usize, data: &[u8]) -> Option<RgbImage> {
    let len = width * height * 3;
    if data.len() < len {
        return None;
    }
    let rgb = data[..len]
        .chunks_exact(3)
        .flat_map(|bgr| [bgr[2], bgr[1], bgr[0]])
        .collect();
    RgbImage::from_raw(width as u32, height as u32, rgb)
}
