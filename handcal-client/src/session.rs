//! The calibration handshake with the display peer.
//!
//! One session per connection. The peer chooses between a fresh calibration
//! and its stored one, then streams capture batches until it accepts a
//! result, rejects it, or hangs up.

use crate::channel::ControlChannel;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::sensor::SensorSource;
use handcal_core::{map_fingertips, PoseSolver};
use handcal_detector::{rgb_from_bgr, HandDetector, Mask};
use handcal_shared::protocol::{
    format_result, CalibrationChoice, ImageDescriptor, PeerAck, CALIBRATION_FAILED,
    DESCRIPTOR_FIELDS, READY_FOR_CALIBRATION,
};
use handcal_shared::sensor::SensorFrame;
use handcal_shared::{pair_fingertips, CalibrationError, CalibrationResult, Correspondence};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};

/// One camera image with the sensor frame grabbed as it arrived
#[derive(Debug, Clone)]
pub struct Capture {
    pub image: RgbImage,
    pub sensor: SensorFrame,
}

#[derive(Debug, Clone)]
pub enum SessionState {
    AwaitingChoice,
    AwaitingCaptureParams,
    CapturingImages(ImageDescriptor),
    Calibrating {
        descriptor: ImageDescriptor,
        captures: Vec<Capture>,
    },
    AwaitingAck,
    Done,
    Aborted,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::AwaitingChoice => "awaiting choice",
            SessionState::AwaitingCaptureParams => "awaiting capture parameters",
            SessionState::CapturingImages(_) => "capturing images",
            SessionState::Calibrating { .. } => "calibrating",
            SessionState::AwaitingAck => "awaiting acknowledgement",
            SessionState::Done => "done",
            SessionState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Aborted)
    }
}

/// How a session that did not fail ended
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// `Done` or `Aborted`
    pub state: SessionState,
    /// Capture cycles started
    pub attempts: usize,
    /// Last result sent to the peer
    pub result: Option<CalibrationResult>,
}

pub struct Session<S, T> {
    channel: ControlChannel<S>,
    sensor: T,
    detector: HandDetector,
    solver: PoseSolver,
    max_attempts: usize,
    debug_dir: Option<PathBuf>,
    attempts: usize,
    correspondences: Vec<Correspondence>,
    last_result: Option<CalibrationResult>,
}

impl<S, T> Session<S, T>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: SensorSource,
{
    pub fn new(channel: ControlChannel<S>, sensor: T, detector: HandDetector, config: &SessionConfig) -> Self {
        Self {
            channel,
            sensor,
            detector,
            solver: PoseSolver::new(config.rig),
            max_attempts: config.max_attempts.max(1),
            debug_dir: config.debug_dir.clone(),
            attempts: 0,
            correspondences: Vec::new(),
            last_result: None,
        }
    }

    /// Drive the handshake to a terminal state
    pub async fn run(mut self) -> Result<SessionReport, SessionError> {
        self.channel.send_line(READY_FOR_CALIBRATION).await?;
        let mut state = SessionState::AwaitingChoice;
        log::info!("Session started, {}", state.name());

        loop {
            let next = match state {
                SessionState::AwaitingChoice => self.await_choice().await?,
                SessionState::AwaitingCaptureParams => self.await_capture_params().await?,
                SessionState::CapturingImages(descriptor) => self.capture_images(descriptor).await?,
                SessionState::Calibrating { descriptor, captures } => {
                    self.calibrate(&descriptor, captures).await?
                }
                SessionState::AwaitingAck => self.await_ack().await?,
                terminal @ (SessionState::Done | SessionState::Aborted) => {
                    return Ok(SessionReport {
                        state: terminal,
                        attempts: self.attempts,
                        result: self.last_result,
                    });
                }
            };
            log::info!("Session {}", next.name());
            state = next;
        }
    }

    async fn await_choice(&mut self) -> Result<SessionState, SessionError> {
        let message = self.channel.recv_text().await?;
        Ok(match CalibrationChoice::parse(&message) {
            CalibrationChoice::Calibrate => SessionState::AwaitingCaptureParams,
            CalibrationChoice::UsePrevious => {
                log::info!("Peer keeps its previous calibration");
                SessionState::Done
            }
            CalibrationChoice::Unknown(other) => {
                log::warn!("Ignoring unexpected message {:?}", other);
                SessionState::AwaitingChoice
            }
        })
    }

    async fn await_capture_params(&mut self) -> Result<SessionState, SessionError> {
        // Image bytes may follow the descriptor's last `;` without a line break
        let message = self.channel.recv_fields(DESCRIPTOR_FIELDS).await?;
        self.attempts += 1;
        match ImageDescriptor::parse(&message) {
            Ok(descriptor) => {
                log::info!(
                    "Attempt {}/{}: expecting {} images of {}x{}",
                    self.attempts,
                    self.max_attempts,
                    descriptor.image_count,
                    descriptor.width,
                    descriptor.height
                );
                Ok(SessionState::CapturingImages(descriptor))
            }
            Err(e) => self.fail_attempt(e).await,
        }
    }

    async fn capture_images(&mut self, descriptor: ImageDescriptor) -> Result<SessionState, SessionError> {
        let mut captures = Vec::with_capacity(descriptor.image_count);
        let mut decode_error = None;

        for index in 0..descriptor.image_count {
            let sensor = &mut self.sensor;
            let mut snapshot = None;
            let bytes = self
                .channel
                .recv_exact(descriptor.image_size, || snapshot = Some(sensor.current_frame()))
                .await?;
            let sensor = snapshot.unwrap_or_default();
            log::debug!(
                "Image {}/{} received with sensor frame {}",
                index + 1,
                descriptor.image_count,
                sensor.id
            );

            // Keep reading the batch even if one image is unusable
            match rgb_from_bgr(descriptor.width, descriptor.height, &bytes) {
                Some(image) => captures.push(Capture { image, sensor }),
                None => {
                    decode_error.get_or_insert_with(|| {
                        CalibrationError::Protocol(format!("image {} is too short", index + 1))
                    });
                }
            }
        }

        match decode_error {
            Some(e) => self.fail_attempt(e).await,
            None => Ok(SessionState::Calibrating { descriptor, captures }),
        }
    }

    async fn calibrate(
        &mut self,
        descriptor: &ImageDescriptor,
        captures: Vec<Capture>,
    ) -> Result<SessionState, SessionError> {
        let started = Instant::now();
        for (index, capture) in captures.iter().enumerate() {
            match self.process_capture(index, capture) {
                Ok(pairs) => self.correspondences.extend(pairs),
                Err(e) => log::warn!("Discarding capture {}: {}", index + 1, e),
            }
        }
        log::debug!(
            "{} correspondences from {} captures in {:?}",
            self.correspondences.len(),
            captures.len(),
            started.elapsed()
        );

        match self.solver.solve(&self.correspondences, &descriptor.intrinsics) {
            Ok(pose) => {
                log::info!(
                    "Pose solved from {} correspondences, reprojection RMS {:.3} px",
                    self.correspondences.len(),
                    pose.rms_error
                );
                let result = pose.to_result();
                self.channel.send_line(&format_result(&result)).await?;
                self.last_result = Some(result);
                Ok(SessionState::AwaitingAck)
            }
            Err(e) => self.fail_attempt(e).await,
        }
    }

    /// Fingertip pairs of one capture, all or nothing
    fn process_capture(&self, index: usize, capture: &Capture) -> Result<Vec<Correspondence>, CalibrationError> {
        let mask = self.detector.segment(&capture.image);
        if let Some(dir) = &self.debug_dir {
            self.dump(dir, index, capture, &mask);
        }
        let image_tips = self.detector.locate(&mask)?;
        let sensor_tips = map_fingertips(&capture.sensor)?;
        pair_fingertips(&image_tips, &sensor_tips)
    }

    fn dump(&self, dir: &Path, index: usize, capture: &Capture, mask: &Mask) {
        let stem = format!("attempt{}_capture{}", self.attempts, index + 1);
        let image_path = dir.join(format!("{}_image.png", stem));
        let mask_path = dir.join(format!("{}_mask.png", stem));
        if let Err(e) = std::fs::create_dir_all(dir) {
            log::warn!("Cannot create debug directory {}: {}", dir.display(), e);
            return;
        }
        if let Err(e) = capture.image.save(&image_path) {
            log::warn!("Failed to write {}: {}", image_path.display(), e);
        }
        if let Err(e) = mask.to_gray_image().save(&mask_path) {
            log::warn!("Failed to write {}: {}", mask_path.display(), e);
        }
    }

    async fn await_ack(&mut self) -> Result<SessionState, SessionError> {
        let message = self.channel.recv_text().await?;
        match PeerAck::parse(&message) {
            PeerAck::Success => Ok(SessionState::Done),
            PeerAck::Fail => {
                log::warn!("Peer rejected the result of attempt {}", self.attempts);
                self.restart().await
            }
            PeerAck::Other(other) => {
                log::info!("Peer ended the session with {:?}", other);
                Ok(SessionState::Aborted)
            }
        }
    }

    /// Report a failed attempt to the peer and start over
    async fn fail_attempt(&mut self, error: CalibrationError) -> Result<SessionState, SessionError> {
        if !error.is_retryable() {
            return Err(error.into());
        }
        log::warn!("Calibration attempt {} failed: {}", self.attempts, error);
        self.channel.send_line(CALIBRATION_FAILED).await?;
        self.restart().await
    }

    async fn restart(&mut self) -> Result<SessionState, SessionError> {
        if self.attempts >= self.max_attempts {
            return Err(SessionError::RetriesExhausted {
                attempts: self.attempts,
            });
        }
        self.correspondences.clear();
        self.channel.send_line(READY_FOR_CALIBRATION).await?;
        Ok(SessionState::AwaitingCaptureParams)
    }
}
