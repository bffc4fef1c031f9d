//! Control channel vocabulary between the calibration client and the display.
//!
//! Messages are plain ASCII. Numeric fields are `;`-separated.

use crate::{CalibrationError, CameraIntrinsics, CalibrationResult};

/// Receive buffer length used for every text message
pub const RECEIVE_BUFFER_LENGTH: usize = 1024;

/// Sent by the client when it can start a calibration
pub const READY_FOR_CALIBRATION: &str = "Leap Motion is running and ready for calibration";
/// Peer asks for a fresh calibration
pub const DO_CALIBRATION: &str = "Do calibration";
/// Peer will reuse its stored calibration
pub const SKIP_CALIBRATION: &str = "Skip calibration";
/// Prefix of the result message
pub const CALIBRATION_SUCCESS: &str = "Calibration successfull";
/// Sent by the client when an attempt produced no result
pub const CALIBRATION_FAILED: &str = "Calibration failed";
/// Peer accepted the result
pub const PEER_ACK_SUCCESS: &str = "Hololens calibration success";
/// Peer rejected the result and will send new images
pub const PEER_ACK_FAIL: &str = "Hololens calibration fail. Redo calibration";

/// Bytes per pixel of the raw images following the descriptor (BGR)
pub const BYTES_PER_PIXEL: usize = 3;

/// `;`-separated fields of an image descriptor
pub const DESCRIPTOR_FIELDS: usize = 8;

/// Most images one descriptor may announce
pub const MAX_IMAGES_PER_BATCH: usize = 64;

/// Largest accepted payload of a single image
pub const MAX_IMAGE_BYTES: usize = 64 * 1024 * 1024;

/// Peer's answer to the ready announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationChoice {
    Calibrate,
    UsePrevious,
    Unknown(String),
}

impl CalibrationChoice {
    pub fn parse(message: &str) -> Self {
        match message {
            DO_CALIBRATION => CalibrationChoice::Calibrate,
            SKIP_CALIBRATION => CalibrationChoice::UsePrevious,
            other => CalibrationChoice::Unknown(other.to_string()),
        }
    }
}

/// Peer's verdict on a transmitted result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAck {
    Success,
    Fail,
    /// Anything else ends the session without error
    Other(String),
}

impl PeerAck {
    pub fn parse(message: &str) -> Self {
        match message {
            PEER_ACK_SUCCESS => PeerAck::Success,
            PEER_ACK_FAIL => PeerAck::Fail,
            other => PeerAck::Other(other.to_string()),
        }
    }
}

/// Capture parameters announced before the images are streamed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageDescriptor {
    pub intrinsics: CameraIntrinsics,
    pub width: usize,
    pub height: usize,
    pub image_count: usize,
    pub image_size: usize,
}

impl ImageDescriptor {
    /// Parse `fx;fy;cx;cy;width;height;image_count;image_size[;]`
    pub fn parse(message: &str) -> Result<Self, CalibrationError> {
        let fields: Vec<&str> = message
            .trim()
            .split(';')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();
        if fields.len() != DESCRIPTOR_FIELDS {
            return Err(CalibrationError::Protocol(format!(
                "image descriptor needs {} fields, got {} in {:?}",
                DESCRIPTOR_FIELDS,
                fields.len(),
                message
            )));
        }

        let float = |i: usize| -> Result<f64, CalibrationError> {
            fields[i].parse::<f64>().map_err(|e| {
                CalibrationError::Protocol(format!("descriptor field {} ({:?}): {}", i, fields[i], e))
            })
        };
        let int = |i: usize| -> Result<usize, CalibrationError> {
            fields[i].parse::<usize>().map_err(|e| {
                CalibrationError::Protocol(format!("descriptor field {} ({:?}): {}", i, fields[i], e))
            })
        };

        let descriptor = Self {
            intrinsics: CameraIntrinsics::new(float(0)?, float(1)?, float(2)?, float(3)?),
            width: int(4)?,
            height: int(5)?,
            image_count: int(6)?,
            image_size: int(7)?,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Byte count of one decoded image, `None` on overflow
    pub fn pixel_bytes(&self) -> Option<usize> {
        self.width
            .checked_mul(self.height)?
            .checked_mul(BYTES_PER_PIXEL)
    }

    fn validate(&self) -> Result<(), CalibrationError> {
        if self.width == 0 || self.height == 0 {
            return Err(CalibrationError::Protocol("image has zero area".into()));
        }
        if self.image_count == 0 {
            return Err(CalibrationError::Protocol("descriptor announces no images".into()));
        }
        if self.image_count > MAX_IMAGES_PER_BATCH {
            return Err(CalibrationError::Protocol(format!(
                "descriptor announces {} images, at most {} allowed",
                self.image_count, MAX_IMAGES_PER_BATCH
            )));
        }
        if self.image_size > MAX_IMAGE_BYTES {
            return Err(CalibrationError::Protocol(format!(
                "image size {} exceeds {} bytes",
                self.image_size, MAX_IMAGE_BYTES
            )));
        }
        let pixel_bytes = self.pixel_bytes().ok_or_else(|| {
            CalibrationError::Protocol(format!("{}x{} image is too large", self.width, self.height))
        })?;
        if self.image_size < pixel_bytes {
            return Err(CalibrationError::Protocol(format!(
                "image size {} is smaller than {}x{}x{}",
                self.image_size, self.width, self.height, BYTES_PER_PIXEL
            )));
        }
        Ok(())
    }

    /// Render the descriptor the way the peer sends it
    pub fn to_message(&self) -> String {
        format!(
            "{};{};{};{};{};{};{};{};",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.width,
            self.height,
            self.image_count,
            self.image_size
        )
    }
}

/// Serialize a result: success prefix, 9 rotation values, 3 translation values
pub fn format_result(result: &CalibrationResult) -> String {
    let mut message = String::from(CALIBRATION_SUCCESS);
    message.push(';');
    for row in &result.rotation {
        for value in row {
            message.push_str(&format!("{:.6};", value));
        }
    }
    for value in &result.translation {
        message.push_str(&format!("{:.6};", value));
    }
    message.push('\n');
    message
}

/// Inverse of [`format_result`], used by peers and tests
pub fn parse_result(message: &str) -> Result<CalibrationResult, CalibrationError> {
    let mut fields = message.trim().split(';');
    if fields.next() != Some(CALIBRATION_SUCCESS) {
        return Err(CalibrationError::Protocol(format!(
            "not a calibration result: {:?}",
            message
        )));
    }
    let values = fields
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| {
            f.parse::<f64>()
                .map_err(|e| CalibrationError::Protocol(format!("result value {:?}: {}", f, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() != 12 {
        return Err(CalibrationError::Protocol(format!(
            "calibration result needs 12 values, got {}",
            values.len()
        )));
    }

    let mut result = CalibrationResult::identity();
    for row in 0..3 {
        for col in 0..3 {
            result.rotation[row][col] = values[row * 3 + col];
        }
    }
    result.translation.copy_from_slice(&values[9..12]);
    Ok(result)
}

/// Turn the bytes of one receive into a message string.
///
/// Stops at the first NUL and drops surrounding whitespace and line endings.
pub fn decode_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptor_without_trailing_separator() {
        let d = ImageDescriptor::parse("1605.1;1604.7;1023.5;543.3;2048;1152;4;7077888").unwrap();
        assert_eq!(d.width, 2048);
        assert_eq!(d.height, 1152);
        assert_eq!(d.image_count, 4);
        assert_eq!(d.image_size, 2048 * 1152 * 3);
        assert!((d.intrinsics.fx - 1605.1).abs() < 1e-9);
    }

    #[test]
    fn test_parse_descriptor_with_trailing_separator() {
        let d = ImageDescriptor::parse("100;100;50;50;10;10;2;300;\n").unwrap();
        assert_eq!(d.image_count, 2);
        assert_eq!(d.pixel_bytes(), Some(300));
    }

    #[test]
    fn test_descriptor_rejects_short_image_size() {
        assert!(ImageDescriptor::parse("100;100;50;50;10;10;2;299").is_err());
    }

    #[test]
    fn test_descriptor_rejects_overflowing_dimensions() {
        let err = ImageDescriptor::parse("1;1;0;0;4294967296;4294967296;1;300").unwrap_err();
        assert!(matches!(err, CalibrationError::Protocol(_)));
    }

    #[test]
    fn test_descriptor_rejects_oversized_batches() {
        let err = ImageDescriptor::parse("1;1;0;0;1;1;18446744073709551615;3;").unwrap_err();
        assert!(matches!(err, CalibrationError::Protocol(_)));
        assert!(ImageDescriptor::parse("1;1;0;0;1;1;65;3;").is_err());
        assert!(ImageDescriptor::parse("1;1;0;0;1;1;64;3;").is_ok());
        assert!(ImageDescriptor::parse("1;1;0;0;1;1;1;67108865;").is_err());
    }

    #[test]
    fn test_descriptor_rejects_garbage() {
        assert!(ImageDescriptor::parse("Do calibration").is_err());
        assert!(ImageDescriptor::parse("a;b;c;d;e;f;g;h").is_err());
    }

    #[test]
    fn test_result_message_layout() {
        let mut result = CalibrationResult::identity();
        result.translation = [0.1, -0.2, 0.3];
        let message = format_result(&result);
        assert!(message.starts_with("Calibration successfull;1.000000;0.000000;"));
        assert!(message.ends_with("0.100000;-0.200000;0.300000;\n"));
        assert_eq!(message.matches(';').count(), 13);

        let parsed = parse_result(&message).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_choice_and_ack_parsing() {
        assert_eq!(CalibrationChoice::parse(DO_CALIBRATION), CalibrationChoice::Calibrate);
        assert_eq!(CalibrationChoice::parse(SKIP_CALIBRATION), CalibrationChoice::UsePrevious);
        assert_eq!(PeerAck::parse(PEER_ACK_FAIL), PeerAck::Fail);
        assert_eq!(PeerAck::parse("bye"), PeerAck::Other("bye".into()));
    }

    #[test]
    fn test_decode_text_trims_padding() {
        let mut buffer = [0u8; 32];
        buffer[..16].copy_from_slice(b"Do calibration\r\n");
        assert_eq!(decode_text(&buffer), DO_CALIBRATION);
    }
}
