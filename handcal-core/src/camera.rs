//! Pinhole camera with Brown-Conrady distortion.

use handcal_shared::{CameraIntrinsics, DistortionCoefficients, Point2};
use nalgebra::{Vector2, Vector3};

const UNDISTORT_ITERATIONS: usize = 20;

/// Smallest depth used when projecting; keeps points on the image plane finite
const MIN_DEPTH: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeCamera {
    pub intrinsics: CameraIntrinsics,
    pub distortion: DistortionCoefficients,
}

impl PinholeCamera {
    pub fn new(intrinsics: CameraIntrinsics, distortion: DistortionCoefficients) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Apply lens distortion to normalized image coordinates
    pub fn distort(&self, n: &Vector2<f64>) -> Vector2<f64> {
        let d = &self.distortion;
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + d.k1 * r2 + d.k2 * r4 + d.k3 * r6;

        let x_tan = 2.0 * d.p1 * x * y + d.p2 * (r2 + 2.0 * x * x);
        let y_tan = d.p1 * (r2 + 2.0 * y * y) + 2.0 * d.p2 * x * y;
        Vector2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Invert [`distort`](Self::distort) by fixed-point iteration
    pub fn undistort(&self, n: &Vector2<f64>) -> Vector2<f64> {
        if self.distortion.is_zero() {
            return *n;
        }
        let mut u = *n;
        for _ in 0..UNDISTORT_ITERATIONS {
            u -= self.distort(&u) - n;
        }
        u
    }

    /// Pixel to undistorted normalized coordinates
    pub fn normalize(&self, pixel: &Point2) -> Vector2<f64> {
        let k = &self.intrinsics;
        let n = Vector2::new((pixel.x - k.cx) / k.fx, (pixel.y - k.cy) / k.fy);
        self.undistort(&n)
    }

    /// Camera-frame point to distorted pixel coordinates
    pub fn project(&self, p: &Vector3<f64>) -> Vector2<f64> {
        let z = if p.z.abs() < MIN_DEPTH {
            MIN_DEPTH.copysign(p.z)
        } else {
            p.z
        };
        let d = self.distort(&Vector2::new(p.x / z, p.y / z));
        let k = &self.intrinsics;
        Vector2::new(k.fx * d.x + k.cx, k.fy * d.y + k.cy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(distortion: DistortionCoefficients) -> PinholeCamera {
        PinholeCamera::new(CameraIntrinsics::new(800.0, 780.0, 320.0, 240.0), distortion)
    }

    #[test]
    fn test_project_center() {
        let cam = camera(DistortionCoefficients::default());
        let px = cam.project(&Vector3::new(0.0, 0.0, 2.0));
        assert_eq!(px, Vector2::new(320.0, 240.0));
        let px = cam.project(&Vector3::new(0.1, -0.2, 1.0));
        assert!((px.x - 400.0).abs() < 1e-9);
        assert!((px.y - 84.0).abs() < 1e-9);
    }

    #[test]
    fn test_undistort_inverts_distort() {
        let cam = camera(DistortionCoefficients {
            k1: 0.153665,
            k2: 0.107066,
            p1: -0.008653,
            p2: -0.000786,
            k3: 0.0,
        });
        let n = Vector2::new(0.25, -0.15);
        let back = cam.undistort(&cam.distort(&n));
        assert!((back - n).norm() < 1e-9);
    }

    #[test]
    fn test_normalize_inverts_project() {
        let cam = camera(DistortionCoefficients {
            k1: -0.1,
            k2: 0.02,
            p1: 0.001,
            p2: -0.002,
            k3: 0.0,
        });
        let p = Vector3::new(0.05, 0.08, 0.6);
        let px = cam.project(&p);
        let n = cam.normalize(&Point2::new(px.x, px.y));
        assert!((n - Vector2::new(p.x / p.z, p.y / p.z)).norm() < 1e-9);
    }
}
