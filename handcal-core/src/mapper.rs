//! Sensor fingertips in the camera's axis convention.
//!
//! The sensor reports millimeters with y up and z toward the user; the
//! camera frame has x right, y down, z forward, in meters.

use handcal_shared::sensor::{SensorFrame, SensorHand};
use handcal_shared::{CalibrationError, Point3, FINGERS_PER_HAND, TIPS_PER_CAPTURE};

const MILLIMETERS_TO_METERS: f64 = 0.001;

/// Convert one sensor position `(x, y, z)` mm to `(-x, z, y)` m
pub fn sensor_to_camera(position: [f64; 3]) -> Point3 {
    let [x, y, z] = position;
    Point3::new(
        -x * MILLIMETERS_TO_METERS,
        z * MILLIMETERS_TO_METERS,
        y * MILLIMETERS_TO_METERS,
    )
}

/// Fingertips of both hands in the order the image extractor produces them:
/// left hand thumb to pinky, then right hand pinky to thumb.
pub fn map_fingertips(frame: &SensorFrame) -> Result<Vec<Point3>, CalibrationError> {
    let left = frame
        .left_hand()
        .ok_or(CalibrationError::SensorHandMissing("left"))?;
    let right = frame
        .right_hand()
        .ok_or(CalibrationError::SensorHandMissing("right"))?;

    let mut tips = Vec::with_capacity(TIPS_PER_CAPTURE);
    tips.extend(hand_tips(left, "left")?);
    tips.extend(hand_tips(right, "right")?.into_iter().rev());
    Ok(tips)
}

/// Thumb-to-pinky tips of one hand
fn hand_tips(hand: &SensorHand, side: &'static str) -> Result<Vec<Point3>, CalibrationError> {
    if hand.fingers.len() < FINGERS_PER_HAND {
        log::warn!(
            "Sensor reports only {} fingers on the {} hand",
            hand.fingers.len(),
            side
        );
        return Err(CalibrationError::SensorHandMissing(side));
    }
    let mut fingers: Vec<_> = hand.fingers.iter().collect();
    fingers.sort_by_key(|f| f.finger_type);
    Ok(fingers
        .iter()
        .take(FINGERS_PER_HAND)
        .map(|f| sensor_to_camera(f.stabilized_tip_position))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use handcal_shared::sensor::{FingerType, SensorFinger};

    const ORDER: [FingerType; 5] = [
        FingerType::Thumb,
        FingerType::Index,
        FingerType::Middle,
        FingerType::Ring,
        FingerType::Pinky,
    ];

    fn hand(is_left: bool, offset: f64) -> SensorHand {
        SensorHand {
            is_left,
            fingers: ORDER
                .iter()
                .enumerate()
                .map(|(i, t)| SensorFinger {
                    finger_type: *t,
                    stabilized_tip_position: [offset + i as f64, 200.0, -30.0],
                })
                .collect(),
        }
    }

    #[test]
    fn test_axis_convention() {
        let p = sensor_to_camera([10.0, 250.0, -40.0]);
        assert!((p.x + 0.010).abs() < 1e-12);
        assert!((p.y + 0.040).abs() < 1e-12);
        assert!((p.z - 0.250).abs() < 1e-12);
    }

    #[test]
    fn test_left_then_right_reversed() {
        // Right hand listed first on purpose
        let frame = SensorFrame {
            id: 1,
            hands: vec![hand(false, 100.0), hand(true, 0.0)],
        };
        let tips = map_fingertips(&frame).unwrap();
        assert_eq!(tips.len(), 10);

        let xs: Vec<f64> = tips.iter().map(|p| -p.x * 1000.0).collect();
        let expected = [0.0, 1.0, 2.0, 3.0, 4.0, 104.0, 103.0, 102.0, 101.0, 100.0];
        for (x, e) in xs.iter().zip(expected) {
            assert!((x - e).abs() < 1e-9, "{:?}", xs);
        }
    }

    #[test]
    fn test_unordered_fingers_are_sorted() {
        let mut left = hand(true, 0.0);
        left.fingers.reverse();
        let frame = SensorFrame {
            id: 2,
            hands: vec![left, hand(false, 100.0)],
        };
        let tips = map_fingertips(&frame).unwrap();
        assert!((tips[0].x - 0.0).abs() < 1e-12);
        assert!((tips[4].x + 0.004).abs() < 1e-12);
    }

    #[test]
    fn test_missing_hand() {
        let frame = SensorFrame {
            id: 3,
            hands: vec![hand(true, 0.0)],
        };
        let err = map_fingertips(&frame).unwrap_err();
        assert!(matches!(err, CalibrationError::SensorHandMissing("right")));
    }

    #[test]
    fn test_short_hand_is_rejected() {
        let mut right = hand(false, 100.0);
        right.fingers.pop();
        let frame = SensorFrame {
            id: 4,
            hands: vec![hand(true, 0.0), right],
        };
        assert!(map_fingertips(&frame).is_err());
    }
}
