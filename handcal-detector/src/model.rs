//! Skin color model produced by the offline trainer.
//!
//! The file is a single line:
//! `dimension;cluster_count;` followed, per cluster, by
//! `mahalanobis_mean;mahalanobis_stddev;mean_vector;inverse_covariance;`
//! where vectors and matrices are comma-separated, row-major.

use handcal_shared::CalibrationError;
use nalgebra::{DMatrix, DVector};
use std::fs;
use std::path::Path;

use crate::features::{FEATURE_DIM, RAW_FEATURES};

/// Multiplier on the distance standard deviation giving the upper threshold
pub const STD_DEV_MARGIN: f64 = 0.6;

/// One Gaussian skin cluster
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    mean: DVector<f64>,
    inv_covariance: DMatrix<f64>,
    lower: f64,
    upper: f64,
}

impl Cluster {
    /// Build a cluster from the trainer's distance statistics
    pub fn new(
        mean: DVector<f64>,
        inv_covariance: DMatrix<f64>,
        mahalanobis_mean: f64,
        mahalanobis_std_dev: f64,
    ) -> Self {
        Self {
            mean,
            inv_covariance,
            lower: 0.0,
            upper: mahalanobis_mean + STD_DEV_MARGIN * mahalanobis_std_dev,
        }
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn thresholds(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    /// Mahalanobis distance of `sample` to the cluster mean.
    ///
    /// `sample` must have the cluster's dimension.
    pub fn mahalanobis(&self, sample: &[f64]) -> f64 {
        let dim = self.mean.len();
        let mut diff = [0.0; FEATURE_DIM];
        for (d, (s, m)) in diff.iter_mut().zip(sample.iter().zip(self.mean.iter())) {
            *d = s - m;
        }

        let mut acc = 0.0;
        for col in 0..dim {
            let dc = diff[col];
            if dc == 0.0 {
                continue;
            }
            let column = self.inv_covariance.column(col);
            let mut partial = 0.0;
            for row in 0..dim {
                partial += diff[row] * column[row];
            }
            acc += partial * dc;
        }
        acc.max(0.0).sqrt()
    }

    /// Whether the distance of `sample` falls inside the acceptance band
    pub fn accepts(&self, sample: &[f64]) -> bool {
        let distance = self.mahalanobis(sample);
        distance >= self.lower && distance <= self.upper
    }
}

/// Loaded skin model: a set of clusters over 16- or 32-dimensional features
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierModel {
    dimension: usize,
    clusters: Vec<Cluster>,
}

impl ClassifierModel {
    pub fn new(dimension: usize, clusters: Vec<Cluster>) -> Result<Self, CalibrationError> {
        if dimension != RAW_FEATURES && dimension != FEATURE_DIM {
            return Err(CalibrationError::DimensionMismatch {
                expected: FEATURE_DIM,
                actual: dimension,
            });
        }
        if clusters.is_empty() {
            return Err(CalibrationError::ModelFormat("model has no clusters".into()));
        }
        for cluster in &clusters {
            if cluster.mean.len() != dimension
                || cluster.inv_covariance.nrows() != dimension
                || cluster.inv_covariance.ncols() != dimension
            {
                return Err(CalibrationError::DimensionMismatch {
                    expected: dimension,
                    actual: cluster.mean.len(),
                });
            }
        }
        Ok(Self {
            dimension,
            clusters,
        })
    }

    /// Read and parse a model file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| CalibrationError::ModelFile {
            path: path.display().to_string(),
            source,
        })?;
        let line = contents.lines().next().unwrap_or_default();
        let model = Self::parse(line)?;
        log::info!(
            "Loaded {}-dimensional skin model with {} clusters from {}",
            model.dimension,
            model.clusters.len(),
            path.display()
        );
        Ok(model)
    }

    /// Parse the single-line model format
    pub fn parse(line: &str) -> Result<Self, CalibrationError> {
        let mut fields = line.trim().split(';');

        let dimension = parse_count(next_field(&mut fields, "sample dimension")?, "sample dimension")?;
        let cluster_count = parse_count(next_field(&mut fields, "cluster count")?, "cluster count")?;

        let mut clusters = Vec::with_capacity(cluster_count.min(64));
        for _ in 0..cluster_count {
            let mah_mean = parse_float(next_field(&mut fields, "mahalanobis mean")?)?;
            let mah_std_dev = parse_float(next_field(&mut fields, "mahalanobis standard deviation")?)?;
            let mean = parse_list(next_field(&mut fields, "mean vector")?, dimension)?;
            let inv_covariance =
                parse_list(next_field(&mut fields, "inverse covariance")?, dimension * dimension)?;

            clusters.push(Cluster::new(
                DVector::from_vec(mean),
                DMatrix::from_row_slice(dimension, dimension, &inv_covariance),
                mah_mean,
                mah_std_dev,
            ));
        }

        Self::new(dimension, clusters)
    }

    /// Render the model in the file format.
    ///
    /// The upper threshold is written as the distance mean with a zero
    /// standard deviation, so parsing the line gives back the same model.
    pub fn to_line(&self) -> String {
        let mut line = format!("{};{};", self.dimension, self.clusters.len());
        for cluster in &self.clusters {
            line.push_str(&format!("{};0;", cluster.upper));
            let mean: Vec<String> = cluster.mean.iter().map(|v| v.to_string()).collect();
            line.push_str(&mean.join(","));
            line.push(';');
            let mut entries = Vec::with_capacity(self.dimension * self.dimension);
            for row in 0..self.dimension {
                for col in 0..self.dimension {
                    entries.push(cluster.inv_covariance[(row, col)].to_string());
                }
            }
            line.push_str(&entries.join(","));
            line.push(';');
        }
        line
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// True if any cluster accepts the feature vector
    pub fn is_skin(&self, sample: &[f64]) -> bool {
        self.clusters.iter().any(|c| c.accepts(sample))
    }
}

fn next_field<'a>(
    fields: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<&'a str, CalibrationError> {
    fields
        .next()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| CalibrationError::ModelFormat(format!("missing {}", what)))
}

fn parse_count(field: &str, what: &str) -> Result<usize, CalibrationError> {
    field
        .parse::<usize>()
        .map_err(|e| CalibrationError::ModelFormat(format!("{} {:?}: {}", what, field, e)))
}

fn parse_float(field: &str) -> Result<f64, CalibrationError> {
    field
        .parse::<f64>()
        .map_err(|e| CalibrationError::ModelFormat(format!("value {:?}: {}", field, e)))
}

fn parse_list(field: &str, expected: usize) -> Result<Vec<f64>, CalibrationError> {
    let values = field
        .split(',')
        .map(|v| parse_float(v.trim()))
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() != expected {
        return Err(CalibrationError::ModelFormat(format!(
            "expected {} comma-separated values, got {}",
            expected,
            values.len()
        )));
    }
    Ok(values)
}
