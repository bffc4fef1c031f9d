//! Where sensor snapshots come from.

use anyhow::{Context, Result};
use handcal_shared::sensor::SensorFrame;
use std::path::Path;

/// Source of the hand-tracking sensor's latest frame
pub trait SensorSource {
    /// Snapshot of what the sensor reports right now
    fn current_frame(&mut self) -> SensorFrame;
}

/// Plays back recorded frames, one per request.
///
/// Once the recording runs out the last frame keeps being reported, the way a
/// live sensor keeps reporting a hand held still.
#[derive(Debug, Clone, Default)]
pub struct ReplaySensor {
    frames: Vec<SensorFrame>,
    next: usize,
}

impl ReplaySensor {
    pub fn from_frames(frames: Vec<SensorFrame>) -> Self {
        Self { frames, next: 0 }
    }

    /// Load a JSON-lines recording; blank lines are skipped
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sensor recording {}", path.display()))?;
        let sensor = Self::parse(&text)
            .with_context(|| format!("Invalid sensor recording {}", path.display()))?;
        log::info!("Replaying {} sensor frames from {}", sensor.len(), path.display());
        Ok(sensor)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let frames = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                SensorFrame::from_json(line).with_context(|| format!("line {}", i + 1))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_frames(frames))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl SensorSource for ReplaySensor {
    fn current_frame(&mut self) -> SensorFrame {
        let Some(last) = self.frames.len().checked_sub(1) else {
            log::warn!("Sensor recording is empty, reporting no hands");
            return SensorFrame::default();
        };
        let frame = self.frames[self.next.min(last)].clone();
        self.next += 1;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDING: &str = r#"{"id": 1, "hands": []}

{"id": 2, "hands": [{"is_left": true, "fingers": []}]}
"#;

    #[test]
    fn test_replay_advances_then_holds() {
        let mut sensor = ReplaySensor::parse(RECORDING).unwrap();
        assert_eq!(sensor.len(), 2);
        assert_eq!(sensor.current_frame().id, 1);
        assert_eq!(sensor.current_frame().id, 2);
        assert_eq!(sensor.current_frame().id, 2);
    }

    #[test]
    fn test_bad_line_is_reported() {
        let err = ReplaySensor::parse("{\"id\": 1}\nnot json\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_empty_recording_reports_no_hands() {
        let mut sensor = ReplaySensor::default();
        assert!(sensor.is_empty());
        assert!(sensor.current_frame().hands.is_empty());
    }
}
