//! Sensor-to-camera pose from fingertip correspondences.
//!
//! EPnP gives the initial pose, Levenberg-Marquardt refines the rotation
//! vector and translation against the distorted pixel reprojection error,
//! and the rig's empirical correction is applied last.

use crate::camera::PinholeCamera;
use crate::epnp::{check_geometry, epnp};
use handcal_shared::{
    CalibrationError, CalibrationResult, CameraIntrinsics, Correspondence, DistortionCoefficients,
};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Rotation3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Fewest correspondences the solver accepts
pub const MIN_CORRESPONDENCES: usize = 4;

/// Step used for the central-difference Jacobian
const JACOBIAN_STEP: f64 = 1e-7;

/// Constant offset added to the solved pose
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorrectionOffset {
    /// Added to the rotation vector (radians)
    pub rotation: [f64; 3],
    /// Added to the translation (meters)
    pub translation: [f64; 3],
}

impl CorrectionOffset {
    pub fn is_zero(&self) -> bool {
        self.rotation == [0.0; 3] && self.translation == [0.0; 3]
    }
}

/// Camera model details of a particular headset rig
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RigProfile {
    /// Replaces the intrinsics announced by the peer when set
    pub intrinsics: Option<CameraIntrinsics>,
    pub distortion: DistortionCoefficients,
    pub correction: CorrectionOffset,
}

impl RigProfile {
    /// Hand-calibrated values of the reference headset
    pub fn reference() -> Self {
        Self {
            intrinsics: Some(CameraIntrinsics::new(
                1605.164063,
                1604.750732,
                1023.521851,
                543.316895,
            )),
            distortion: DistortionCoefficients {
                k1: 0.153665,
                k2: 0.107066,
                p1: -0.008653,
                p2: -0.000786,
                k3: 0.0,
            },
            correction: CorrectionOffset {
                rotation: [0.088, 0.015, 0.0],
                translation: [0.0, 0.0, 0.045],
            },
        }
    }

    /// Announced intrinsics, no distortion, no correction
    pub fn neutral() -> Self {
        Self {
            intrinsics: None,
            distortion: DistortionCoefficients::default(),
            correction: CorrectionOffset::default(),
        }
    }

    pub fn camera(&self, announced: &CameraIntrinsics) -> PinholeCamera {
        PinholeCamera::new(self.intrinsics.unwrap_or(*announced), self.distortion)
    }
}

impl Default for RigProfile {
    fn default() -> Self {
        Self::reference()
    }
}

/// Pose as rotation vector and translation, camera-from-sensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseEstimate {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
    /// Root-mean-square pixel reprojection error of the fit
    pub rms_error: f64,
}

impl PoseEstimate {
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::new(self.rvec)
    }

    /// Pose with `offset` added to both vectors
    pub fn corrected(&self, offset: &CorrectionOffset) -> PoseEstimate {
        PoseEstimate {
            rvec: self.rvec + Vector3::from(offset.rotation),
            tvec: self.tvec + Vector3::from(offset.translation),
            rms_error: self.rms_error,
        }
    }

    /// Matrix form sent to the peer
    pub fn to_result(&self) -> CalibrationResult {
        let r = self.rotation();
        let m = r.matrix();
        let mut rotation = [[0.0; 3]; 3];
        for (row, values) in rotation.iter_mut().enumerate() {
            for (col, value) in values.iter_mut().enumerate() {
                *value = m[(row, col)];
            }
        }
        CalibrationResult {
            rotation,
            translation: [self.tvec.x, self.tvec.y, self.tvec.z],
        }
    }
}

/// Reprojection least-squares problem over `[rvec, tvec]`
struct ReprojectionProblem<'a> {
    camera: &'a PinholeCamera,
    world: &'a [Vector3<f64>],
    pixels: &'a [Vector2<f64>],
    params: DVector<f64>,
}

impl ReprojectionProblem<'_> {
    fn residuals_at(&self, params: &DVector<f64>) -> DVector<f64> {
        let rotation = Rotation3::new(Vector3::new(params[0], params[1], params[2]));
        let translation = Vector3::new(params[3], params[4], params[5]);
        let mut residuals = DVector::zeros(2 * self.world.len());
        for (i, (p, observed)) in self.world.iter().zip(self.pixels).enumerate() {
            let projected = self.camera.project(&(rotation * p + translation));
            residuals[2 * i] = projected.x - observed.x;
            residuals[2 * i + 1] = projected.y - observed.y;
        }
        residuals
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for ReprojectionProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self.residuals_at(&self.params);
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let rows = 2 * self.world.len();
        let mut jacobian = DMatrix::zeros(rows, self.params.len());
        for j in 0..self.params.len() {
            let h = JACOBIAN_STEP * self.params[j].abs().max(1.0);
            let mut plus = self.params.clone();
            let mut minus = self.params.clone();
            plus[j] += h;
            minus[j] -= h;
            let column = (self.residuals_at(&plus) - self.residuals_at(&minus)) / (2.0 * h);
            jacobian.set_column(j, &column);
        }
        Some(jacobian)
    }
}

/// Solves for the rigid transform taking sensor fingertips into the camera frame
#[derive(Debug, Clone, Default)]
pub struct PoseSolver {
    rig: RigProfile,
}

impl PoseSolver {
    pub fn new(rig: RigProfile) -> Self {
        Self { rig }
    }

    pub fn rig(&self) -> &RigProfile {
        &self.rig
    }

    /// Pose with the rig correction applied
    pub fn solve(
        &self,
        correspondences: &[Correspondence],
        announced: &CameraIntrinsics,
    ) -> Result<PoseEstimate, CalibrationError> {
        let raw = self.solve_uncorrected(correspondences, announced)?;
        Ok(raw.corrected(&self.rig.correction))
    }

    /// EPnP initial guess refined by Levenberg-Marquardt
    pub fn solve_uncorrected(
        &self,
        correspondences: &[Correspondence],
        announced: &CameraIntrinsics,
    ) -> Result<PoseEstimate, CalibrationError> {
        if correspondences.len() < MIN_CORRESPONDENCES {
            return Err(CalibrationError::InsufficientCorrespondences {
                found: correspondences.len(),
                required: MIN_CORRESPONDENCES,
            });
        }
        let started = Instant::now();
        let camera = self.rig.camera(announced);

        let world: Vec<Vector3<f64>> = correspondences
            .iter()
            .map(|c| Vector3::new(c.sensor.x, c.sensor.y, c.sensor.z))
            .collect();
        let pixels: Vec<Vector2<f64>> = correspondences
            .iter()
            .map(|c| Vector2::new(c.image.x, c.image.y))
            .collect();
        check_geometry(&world)?;

        let normalized: Vec<Vector2<f64>> = correspondences
            .iter()
            .map(|c| camera.normalize(&c.image))
            .collect();
        let initial = epnp(&world, &normalized)?;
        let rvec0 = initial.rotation.scaled_axis();

        let problem = ReprojectionProblem {
            camera: &camera,
            world: &world,
            pixels: &pixels,
            params: DVector::from_vec(vec![
                rvec0.x,
                rvec0.y,
                rvec0.z,
                initial.translation.x,
                initial.translation.y,
                initial.translation.z,
            ]),
        };
        let initial_rms = rms(&problem.residuals_at(&problem.params));

        let (problem, report) = LevenbergMarquardt::new().minimize(problem);
        let accepted = report.termination.was_successful()
            || matches!(report.termination, TerminationReason::NoImprovementPossible(_));
        if !accepted {
            return Err(CalibrationError::SolverDidNotConverge(format!(
                "{:?} after {} evaluations",
                report.termination, report.number_of_evaluations
            )));
        }

        let p = &problem.params;
        if p.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::SolverDidNotConverge(
                "non-finite pose".into(),
            ));
        }
        let estimate = PoseEstimate {
            rvec: Vector3::new(p[0], p[1], p[2]),
            tvec: Vector3::new(p[3], p[4], p[5]),
            rms_error: rms(&problem.residuals_at(p)),
        };
        log::debug!(
            "Solved pose from {} correspondences in {:?}: rms {:.3} px (initial {:.3} px), {:?}",
            correspondences.len(),
            started.elapsed(),
            estimate.rms_error,
            initial_rms,
            report.termination
        );
        Ok(estimate)
    }
}

/// RMS pixel distance of interleaved `(du, dv)` residuals
fn rms(residuals: &DVector<f64>) -> f64 {
    let points = (residuals.len() / 2).max(1) as f64;
    (residuals.norm_squared() / points).sqrt()
}
