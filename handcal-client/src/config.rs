use anyhow::{Context, Result};
use handcal_core::RigProfile;
use handcal_detector::DetectorParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Calibration attempts allowed per session
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Session settings, read from an optional JSON file.
///
/// Every field may be omitted; command line flags override the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub max_attempts: usize,
    /// No timeout when unset
    pub read_timeout_secs: Option<u64>,
    pub rig: RigProfile,
    pub detector: DetectorParams,
    /// Directory receiving image and mask dumps of every capture
    pub debug_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            read_timeout_secs: None,
            rig: RigProfile::default(),
            detector: DetectorParams::default(),
            debug_dir: None,
        }
    }
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handcal_detector::RefineMode;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: SessionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.max_attempts, 5);
        assert!(config.read_timeout().is_none());
        assert_eq!(config.rig, RigProfile::reference());
    }

    #[test]
    fn test_partial_config() {
        let config: SessionConfig = serde_json::from_str(
            r#"{
                "max_attempts": 2,
                "read_timeout_secs": 30,
                "rig": { "intrinsics": null, "correction": { "translation": [0.0, 0.0, 0.01] } },
                "detector": { "refine_mode": "raw" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(30)));
        assert!(config.rig.intrinsics.is_none());
        assert_eq!(config.rig.correction.translation, [0.0, 0.0, 0.01]);
        assert_eq!(config.rig.correction.rotation, [0.0; 3]);
        assert_eq!(config.detector.refine_mode, RefineMode::Raw);
    }

    #[test]
    fn test_missing_file() {
        let err = SessionConfig::load("/nonexistent/handcal.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
