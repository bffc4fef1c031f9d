use handcal_detector::model::Cluster;
use handcal_detector::{
    ClassifierModel, DetectorParams, ExtractorParams, HandDetector, RefineMode, RefinerParams,
};
use handcal_shared::CalibrationError;
use image::{Rgb, RgbImage};
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

const SKIN: Rgb<u8> = Rgb([200, 150, 120]);
const BACKGROUND: Rgb<u8> = Rgb([30, 60, 160]);

const FINGER_WIDTH: u32 = 4;
const FINGER_GAP: u32 = 4;
const FINGER_LENGTH: u32 = 16;
const PALM_HEIGHT: u32 = 20;

/// Paints an upward-pointing hand: five fingers above a rectangular palm.
/// Returns the top-center of each finger, left to right.
fn paint_hand(image: &mut RgbImage, left: u32, top: u32) -> Vec<(f64, f64)> {
    let palm_width = 5 * FINGER_WIDTH + 4 * FINGER_GAP;
    for y in top + FINGER_LENGTH..top + FINGER_LENGTH + PALM_HEIGHT {
        for x in left..left + palm_width {
            image.put_pixel(x, y, SKIN);
        }
    }

    let mut tips = Vec::new();
    for finger in 0..5 {
        let x0 = left + finger * (FINGER_WIDTH + FINGER_GAP);
        for y in top..top + FINGER_LENGTH {
            for x in x0..x0 + FINGER_WIDTH {
                image.put_pixel(x, y, SKIN);
            }
        }
        tips.push((x0 as f64 + (FINGER_WIDTH - 1) as f64 / 2.0, top as f64));
    }
    tips
}

/// 100x100 frame with two hands side by side
fn two_hand_scene() -> (RgbImage, Vec<(f64, f64)>) {
    let mut image = RgbImage::from_pixel(100, 100, BACKGROUND);
    let mut tips = paint_hand(&mut image, 8, 20);
    tips.extend(paint_hand(&mut image, 56, 24));
    (image, tips)
}

/// Single-cluster model that only looks at the RGB features
fn skin_model() -> ClassifierModel {
    let mut mean = DVector::zeros(32);
    let mut inv_covariance = DMatrix::zeros(32, 32);
    for (i, v) in SKIN.0.iter().enumerate() {
        mean[i] = *v as f64;
        inv_covariance[(i, i)] = 1.0;
    }
    ClassifierModel::new(32, vec![Cluster::new(mean, inv_covariance, 80.0, 0.0)]).unwrap()
}

fn small_params() -> DetectorParams {
    DetectorParams {
        refine_mode: RefineMode::Full,
        refiner: RefinerParams {
            corner_offset: 1,
            close_kernel: 3,
            blur_kernel: 3,
            dilate_kernel: 1,
            ..RefinerParams::default()
        },
        extractor: ExtractorParams {
            palm_kernel: 11,
            palm_iterations: 1,
        },
        surround_kernel: 5,
    }
}

#[test]
fn test_segment_is_binary_with_two_regions() {
    let (image, _) = two_hand_scene();
    let detector = HandDetector::with_params(Arc::new(skin_model()), small_params());
    let mask = detector.segment(&image);

    assert_eq!((mask.width(), mask.height()), (100, 100));
    assert!(mask.data().iter().all(|v| *v == 0 || *v == 255));
    assert_eq!(mask.components().count(), 2);
    assert!(!mask.get(0, 0));
    assert!(mask.get(25, 45));
}

#[test]
fn test_detect_finds_known_fingertips() {
    let (image, expected) = two_hand_scene();
    let detector = HandDetector::with_params(Arc::new(skin_model()), small_params());
    let tips = detector.detect(&image).unwrap();

    assert_eq!(tips.len(), 10);
    assert!(tips.windows(2).all(|w| w[0].x <= w[1].x));
    for (tip, (ex, ey)) in tips.iter().zip(&expected) {
        assert!(
            (tip.x - ex).abs() <= 2.5 && (tip.y - ey).abs() <= 3.5,
            "tip {:?} too far from expected ({}, {})",
            tip,
            ex,
            ey
        );
    }
}

#[test]
fn test_raw_mode_skips_refinement() {
    let (mut image, _) = two_hand_scene();
    // Isolated skin speck survives only without refinement
    for y in 80..83 {
        for x in 90..93 {
            image.put_pixel(x, y, SKIN);
        }
    }
    let model = Arc::new(skin_model());

    let raw = HandDetector::with_params(
        model.clone(),
        DetectorParams {
            refine_mode: RefineMode::Raw,
            ..small_params()
        },
    )
    .segment(&image);
    let refined = HandDetector::with_params(model, small_params()).segment(&image);

    assert!(raw.get(91, 81));
    assert!(!refined.get(91, 81));
    assert!(raw.components().count() > refined.components().count());
}

#[test]
fn test_blank_frame_is_incomplete() {
    let image = RgbImage::from_pixel(60, 60, BACKGROUND);
    let detector = HandDetector::with_params(Arc::new(skin_model()), small_params());
    let err = detector.detect(&image).unwrap_err();
    assert!(matches!(err, CalibrationError::ExtractionIncomplete(_)));
}

#[test]
fn test_model_loading_is_deterministic() {
    let path = std::env::temp_dir().join(format!("handcal-model-{}.txt", std::process::id()));
    std::fs::write(&path, skin_model().to_line()).unwrap();

    let first = ClassifierModel::load(&path).unwrap();
    let second = ClassifierModel::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(first, second);
    assert_eq!(first, skin_model());

    let (image, _) = two_hand_scene();
    let a = HandDetector::with_params(Arc::new(first), small_params()).segment(&image);
    let b = HandDetector::with_params(Arc::new(second), small_params()).segment(&image);
    assert_eq!(a, b);
}
