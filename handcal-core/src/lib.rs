//! Geometry of the calibration: sensor fingertip mapping and pose solving.

pub mod camera;
pub mod epnp;
pub mod mapper;
pub mod pose;

pub use camera::PinholeCamera;
pub use mapper::{map_fingertips, sensor_to_camera};
pub use pose::{CorrectionOffset, PoseEstimate, PoseSolver, RigProfile, MIN_CORRESPONDENCES};
