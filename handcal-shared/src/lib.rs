//! Types shared by the detector, the solver and the calibration client.

use serde::{Deserialize, Serialize};

mod error;
pub mod protocol;
pub mod sensor;

pub use error::CalibrationError;

/// Number of hands expected in every calibration capture
pub const HANDS_PER_CAPTURE: usize = 2;

/// Number of fingertips tracked per hand
pub const FINGERS_PER_HAND: usize = 5;

/// Fingertips contributed by one capture
pub const TIPS_PER_CAPTURE: usize = HANDS_PER_CAPTURE * FINGERS_PER_HAND;

/// A 2D point in image coordinates (pixels)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Calculate distance to another point
    pub fn distance_to(&self, other: &Point2) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A 3D point in meters, camera convention (x right, y down, z forward)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A fingertip seen by the camera paired with the same fingertip seen by the sensor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Correspondence {
    pub image: Point2,
    pub sensor: Point3,
}

impl Correspondence {
    pub fn new(image: Point2, sensor: Point3) -> Self {
        Self { image, sensor }
    }
}

/// Pair image-space and sensor-space fingertips of one capture.
///
/// Both sequences must already be in matching order; a length mismatch is
/// rejected rather than truncated.
pub fn pair_fingertips(
    image: &[Point2],
    sensor: &[Point3],
) -> Result<Vec<Correspondence>, CalibrationError> {
    if image.len() != sensor.len() {
        return Err(CalibrationError::InsufficientCorrespondences {
            found: image.len().min(sensor.len()),
            required: image.len().max(sensor.len()),
        });
    }
    Ok(image
        .iter()
        .zip(sensor)
        .map(|(i, s)| Correspondence::new(*i, *s))
        .collect())
}

/// Pinhole intrinsics of the head-mounted camera
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }
}

/// Brown-Conrady lens distortion coefficients
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct DistortionCoefficients {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    #[serde(default)]
    pub k3: f64,
}

impl DistortionCoefficients {
    pub fn is_zero(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0 && self.k3 == 0.0
    }
}

/// Rigid transform taking sensor-space points into the camera frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CalibrationResult {
    /// Row-major 3x3 rotation matrix
    pub rotation: [[f64; 3]; 3],
    /// Translation in meters
    pub translation: [f64; 3],
}

impl CalibrationResult {
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }

    /// Apply the transform to a sensor-space point
    pub fn transform(&self, p: &Point3) -> Point3 {
        let r = &self.rotation;
        let t = &self.translation;
        Point3::new(
            r[0][0] * p.x + r[0][1] * p.y + r[0][2] * p.z + t[0],
            r[1][0] * p.x + r[1][1] * p.y + r[1][2] * p.z + t[1],
            r[2][0] * p.x + r[2][1] * p.y + r[2][2] * p.z + t[2],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_distance() {
        let p1 = Point2::new(0.0, 0.0);
        let p2 = Point2::new(3.0, 4.0);
        assert_eq!(p1.distance_to(&p2), 5.0);
    }

    #[test]
    fn test_pair_fingertips_keeps_order() {
        let image = [Point2::new(1.0, 2.0), Point2::new(3.0, 4.0)];
        let sensor = [Point3::new(0.1, 0.2, 0.3), Point3::new(0.4, 0.5, 0.6)];
        let pairs = pair_fingertips(&image, &sensor).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].image, image[1]);
        assert_eq!(pairs[1].sensor, sensor[1]);
    }

    #[test]
    fn test_pair_fingertips_rejects_length_mismatch() {
        let image = [Point2::new(1.0, 2.0)];
        let sensor = [Point3::new(0.1, 0.2, 0.3), Point3::new(0.4, 0.5, 0.6)];
        assert!(pair_fingertips(&image, &sensor).is_err());
    }

    #[test]
    fn test_identity_transform() {
        let p = Point3::new(0.1, -0.2, 0.5);
        assert_eq!(CalibrationResult::identity().transform(&p), p);
    }
}
