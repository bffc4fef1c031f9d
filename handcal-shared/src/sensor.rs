//! Hand skeleton snapshots as reported by the hand-tracking sensor.
//!
//! Positions are in the sensor's native frame and unit (millimeters).

use serde::{Deserialize, Serialize};

/// Digit identifier, in the sensor's thumb-to-pinky order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FingerType {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorFinger {
    #[serde(rename = "type")]
    pub finger_type: FingerType,
    /// Stabilized tip position, sensor axes, millimeters
    pub stabilized_tip_position: [f64; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorHand {
    pub is_left: bool,
    /// Fingers ordered thumb to pinky
    pub fingers: Vec<SensorFinger>,
}

/// One sensor frame: zero, one or two hands
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SensorFrame {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub hands: Vec<SensorHand>,
}

impl SensorFrame {
    pub fn left_hand(&self) -> Option<&SensorHand> {
        self.hands.iter().find(|h| h.is_left)
    }

    pub fn right_hand(&self) -> Option<&SensorHand> {
        self.hands.iter().find(|h| !h.is_left)
    }

    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}
