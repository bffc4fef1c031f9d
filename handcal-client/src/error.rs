use handcal_shared::CalibrationError;
use std::time::Duration;
use thiserror::Error;

/// Ways a calibration session ends other than `Done` or `Aborted`
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("gave up after {attempts} failed calibration attempts")]
    RetriesExhausted { attempts: usize },

    #[error("session cancelled")]
    Cancelled,

    #[error("no data from peer within {0:?}")]
    Timeout(Duration),

    #[error("peer closed the connection")]
    ConnectionClosed,

    #[error("control channel I/O: {0}")]
    Io(#[from] std::io::Error),

    /// A failure that retrying cannot fix
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}
