use thiserror::Error;

/// Failures raised by the calibration pipeline
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("classifier model file {path}: {source}")]
    ModelFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed classifier model: {0}")]
    ModelFormat(String),

    #[error("feature dimension mismatch: model expects {expected}, pipeline produces {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("fingertip extraction incomplete: {0}")]
    ExtractionIncomplete(String),

    #[error("sensor snapshot is missing the {0} hand")]
    SensorHandMissing(&'static str),

    #[error("need at least {required} correspondences, got {found}")]
    InsufficientCorrespondences { found: usize, required: usize },

    #[error("degenerate correspondence configuration: {0}")]
    DegenerateCorrespondences(String),

    #[error("pose refinement did not converge: {0}")]
    SolverDidNotConverge(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl CalibrationError {
    /// Whether the session may recover by restarting the capture cycle.
    ///
    /// Model problems are setup failures; everything else depends on the
    /// captured data and can be redone by the peer.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CalibrationError::ModelFile { .. }
                | CalibrationError::ModelFormat(_)
                | CalibrationError::DimensionMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CalibrationError::SensorHandMissing("left").is_retryable());
        assert!(CalibrationError::ExtractionIncomplete("x".into()).is_retryable());
        assert!(!CalibrationError::ModelFormat("bad".into()).is_retryable());
    }
}
