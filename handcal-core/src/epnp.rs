//! Closed-form EPnP initial pose from normalized image coordinates.
//!
//! World points are expressed as barycentric combinations of control points
//! placed along the principal axes of the point cloud. The camera-frame
//! control points are the null vector of the projection constraints, scaled
//! to preserve inter-control-point distances. A nearly planar cloud uses
//! three control points instead of four.

use handcal_shared::CalibrationError;
use nalgebra::{DMatrix, Matrix3, Rotation3, SymmetricEigen, Vector2, Vector3};

/// Relative eigenvalue below which an axis of the cloud counts as flat
const PLANAR_RATIO: f64 = 1e-8;
/// Relative eigenvalue below which the cloud counts as a line
const LINEAR_RATIO: f64 = 1e-10;

/// Camera-from-world rotation and translation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidPose {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

/// Principal axes of a point cloud, largest spread first
struct Spread {
    centroid: Vector3<f64>,
    axes: [Vector3<f64>; 3],
    variances: [f64; 3],
}

fn spread(points: &[Vector3<f64>]) -> Spread {
    let n = points.len() as f64;
    let centroid = points.iter().sum::<Vector3<f64>>() / n;
    let mut covariance = Matrix3::zeros();
    for p in points {
        let d = p - centroid;
        covariance += d * d.transpose();
    }
    covariance /= n;

    let eig = SymmetricEigen::new(covariance);
    let mut order = [0usize, 1, 2];
    order.sort_by(|a, b| eig.eigenvalues[*b].total_cmp(&eig.eigenvalues[*a]));
    Spread {
        centroid,
        axes: order.map(|i| eig.eigenvectors.column(i).into_owned()),
        variances: order.map(|i| eig.eigenvalues[i].max(0.0)),
    }
}

/// Reject clouds that cannot constrain a pose
pub fn check_geometry(points: &[Vector3<f64>]) -> Result<(), CalibrationError> {
    let s = spread(points);
    if s.variances[0] <= f64::EPSILON {
        return Err(CalibrationError::DegenerateCorrespondences(
            "sensor points coincide".into(),
        ));
    }
    if s.variances[1] <= LINEAR_RATIO * s.variances[0] {
        return Err(CalibrationError::DegenerateCorrespondences(
            "sensor points are collinear".into(),
        ));
    }
    Ok(())
}

/// Estimate the pose from world points and their normalized image coordinates
pub fn epnp(world: &[Vector3<f64>], image: &[Vector2<f64>]) -> Result<RigidPose, CalibrationError> {
    let n = world.len();
    if n < 4 || image.len() != n {
        return Err(CalibrationError::InsufficientCorrespondences {
            found: n.min(image.len()),
            required: 4,
        });
    }
    check_geometry(world)?;

    let s = spread(world);
    let planar = s.variances[2] <= PLANAR_RATIO * s.variances[0];
    let used_axes = if planar { 2 } else { 3 };
    let controls = used_axes + 1;

    let mut control_world = vec![s.centroid];
    let mut scales = Vec::with_capacity(used_axes);
    for i in 0..used_axes {
        let scale = s.variances[i].sqrt();
        scales.push(scale);
        control_world.push(s.centroid + s.axes[i] * scale);
    }

    // Barycentric weights of every world point
    let alphas: Vec<Vec<f64>> = world
        .iter()
        .map(|p| {
            let d = p - s.centroid;
            let mut a = vec![0.0; controls];
            for i in 0..used_axes {
                a[i + 1] = s.axes[i].dot(&d) / scales[i];
            }
            a[0] = 1.0 - a[1..].iter().sum::<f64>();
            a
        })
        .collect();

    let mut m = DMatrix::<f64>::zeros(2 * n, 3 * controls);
    for (i, (a, uv)) in alphas.iter().zip(image).enumerate() {
        for (j, alpha) in a.iter().enumerate() {
            let c = 3 * j;
            m[(2 * i, c)] = *alpha;
            m[(2 * i, c + 2)] = -uv.x * alpha;
            m[(2 * i + 1, c + 1)] = *alpha;
            m[(2 * i + 1, c + 2)] = -uv.y * alpha;
        }
    }

    // Null vector of M = eigenvector of MᵀM with the smallest eigenvalue
    let mtm = m.transpose() * &m;
    let eig = SymmetricEigen::new(mtm);
    let (min_index, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or_else(|| CalibrationError::DegenerateCorrespondences("empty system".into()))?;
    let null = eig.eigenvectors.column(min_index);

    let mut control_camera: Vec<Vector3<f64>> = (0..controls)
        .map(|j| Vector3::new(null[3 * j], null[3 * j + 1], null[3 * j + 2]))
        .collect();

    let mut sum_world = 0.0;
    let mut sum_camera = 0.0;
    for i in 0..controls {
        for j in (i + 1)..controls {
            sum_world += (control_world[i] - control_world[j]).norm_squared();
            sum_camera += (control_camera[i] - control_camera[j]).norm_squared();
        }
    }
    if sum_camera <= f64::EPSILON {
        return Err(CalibrationError::DegenerateCorrespondences(
            "control points collapsed".into(),
        ));
    }
    let scale = (sum_world / sum_camera).sqrt();

    let camera_points = |controls: &[Vector3<f64>]| -> Vec<Vector3<f64>> {
        alphas
            .iter()
            .map(|a| a.iter().zip(controls).map(|(w, c)| c * *w).sum::<Vector3<f64>>())
            .collect()
    };

    // The null vector's sign is arbitrary; the points must end up in front
    for c in control_camera.iter_mut() {
        *c *= scale;
    }
    let mut points = camera_points(&control_camera);
    let in_front = points.iter().filter(|p| p.z > 0.0).count();
    if in_front * 2 < n {
        for c in control_camera.iter_mut() {
            *c = -*c;
        }
        points = camera_points(&control_camera);
    }

    log::trace!(
        "EPnP with {} control points over {} correspondences",
        controls,
        n
    );
    kabsch(world, &points)
}

/// Rigid transform mapping `world` onto `camera` in the least-squares sense
pub fn kabsch(world: &[Vector3<f64>], camera: &[Vector3<f64>]) -> Result<RigidPose, CalibrationError> {
    if world.len() != camera.len() || world.len() < 3 {
        return Err(CalibrationError::DegenerateCorrespondences(
            "too few points to align".into(),
        ));
    }
    let n = world.len() as f64;
    let c_w = world.iter().sum::<Vector3<f64>>() / n;
    let c_c = camera.iter().sum::<Vector3<f64>>() / n;

    let mut h = Matrix3::zeros();
    for (pw, pc) in world.iter().zip(camera) {
        h += (pc - c_c) * (pw - c_w).transpose();
    }

    let svd = h.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => {
            return Err(CalibrationError::DegenerateCorrespondences(
                "alignment SVD failed".into(),
            ))
        }
    };
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fix = u;
        u_fix.column_mut(2).neg_mut();
        r = u_fix * v_t;
    }

    Ok(RigidPose {
        rotation: Rotation3::from_matrix_unchecked(r),
        translation: c_c - r * c_w,
    })
}
