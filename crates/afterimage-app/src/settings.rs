use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::media::playback::PlaybackConfig;
use crate::media::webcam_manager::{DEFAULT_GRACE, WebcamDefaults};

/// `<config dir>/afterimage`, where settings and saved sets live.
pub fn config_root() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("afterimage"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub version: u32,
    /// Fallbacks for webcam constraints a layer leaves unspecified.
    pub webcam: WebcamDefaults,
    /// How long an unreferenced camera stays open (seconds).
    pub webcam_grace_secs: f64,
    /// Distance from the end of a clip that counts as "ended" (seconds).
    pub end_epsilon: f64,
    /// Backward steps per second for reverse/ping-pong.
    pub reverse_step_rate: f64,
    /// Externally supplied tempo, exposed to shaders as `u.bpm`.
    pub bpm: f32,
    /// Resolution scale of global-effect scene captures.
    pub capture_scale: f32,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        let playback = PlaybackConfig::default();
        Self {
            version: 1,
            webcam: WebcamDefaults::default(),
            webcam_grace_secs: DEFAULT_GRACE.as_secs_f64(),
            end_epsilon: playback.end_epsilon,
            reverse_step_rate: playback.reverse_step_rate,
            bpm: 120.0,
            capture_scale: 1.0,
        }
    }
}

impl SettingsConfig {
    pub fn load() -> Self {
        let Some(root) = config_root() else {
            return Self::default();
        };
        let path = root.join("settings.json");
        if !path.exists() {
            // Write a template with every field so users can edit it
            let settings = Self::default();
            settings.save();
            return settings;
        }
        Self::load_from(&path)
    }

    /// Missing or malformed files fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<Self>(&json) {
                Ok(settings) => settings.sanitized(),
                Err(e) => {
                    log::warn!("Ignoring malformed settings {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) {
        let Some(root) = config_root() else {
            return;
        };
        if let Err(e) = self.save_to(&root.join("settings.json")) {
            log::warn!("Failed to save settings: {e}");
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Clamp values a hand-edited file could get wrong.
    fn sanitized(mut self) -> Self {
        let d = Self::default();
        if !(self.webcam_grace_secs.is_finite() && self.webcam_grace_secs >= 0.0) {
            self.webcam_grace_secs = d.webcam_grace_secs;
        }
        if !(self.end_epsilon.is_finite() && self.end_epsilon >= 0.0) {
            self.end_epsilon = d.end_epsilon;
        }
        if !(self.reverse_step_rate.is_finite() && self.reverse_step_rate >= 1.0) {
            self.reverse_step_rate = d.reverse_step_rate;
        }
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            self.bpm = d.bpm;
        }
        self.capture_scale = if self.capture_scale.is_finite() {
            self.capture_scale.clamp(0.25, 1.0)
        } else {
            d.capture_scale
        };
        self
    }

    pub fn webcam_grace(&self) -> Duration {
        Duration::from_secs_f64(self.webcam_grace_secs)
    }

    pub fn playback(&self) -> PlaybackConfig {
        PlaybackConfig {
            end_epsilon: self.end_epsilon,
            reverse_step_rate: self.reverse_step_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = SettingsConfig::default();
        assert_eq!(s.webcam.width, 1280);
        assert_eq!(s.webcam.height, 720);
        assert_eq!(s.webcam.fps, 30);
        assert_eq!(s.webcam_grace(), Duration::from_secs(10));
        assert_eq!(s.playback(), PlaybackConfig::default());
    }

    #[test]
    fn save_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.json");
        let s = SettingsConfig {
            bpm: 128.0,
            webcam_grace_secs: 2.5,
            reverse_step_rate: 60.0,
            ..Default::default()
        };
        s.save_to(&path).unwrap();
        assert_eq!(SettingsConfig::load_from(&path), s);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = SettingsConfig::load_from(&dir.path().join("absent.json"));
        assert_eq!(s, SettingsConfig::default());
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert_eq!(SettingsConfig::load_from(&path), SettingsConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults_and_sanitizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"bpm": 140, "reverse_step_rate": 0, "capture_scale": 4}"#).unwrap();
        let s = SettingsConfig::load_from(&path);
        assert_eq!(s.bpm, 140.0);
        assert_eq!(s.reverse_step_rate, 30.0);
        assert_eq!(s.capture_scale, 1.0);
        assert_eq!(s.webcam, WebcamDefaults::default());
    }
}
