//! Calibration client: talks to the display peer and runs the pipeline.

pub mod channel;
pub mod config;
mod error;
pub mod sensor;
pub mod session;

pub use channel::{connect_with_retry, ControlChannel};
pub use config::SessionConfig;
pub use error::SessionError;
pub use sensor::{ReplaySensor, SensorSource};
pub use session::{Capture, Session, SessionReport, SessionState};
