use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path))?;
        Ok(config)
    }

    /// Load the config file if present, otherwise fall back to defaults.
    /// Every field is individually defaulted, so a partial file is fine.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            info!("No config file at {}, using defaults", path);
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_calibration() {
        let cfg = Config::default();
        assert_eq!(cfg.video.target_fps, 30);
        assert_eq!(cfg.analysis.meters_per_pixel, 0.0025);
        assert_eq!(cfg.analysis.bat_ema_alpha, 0.3);
        assert_eq!(cfg.analysis.speed_cap_kmh, 160.0);
        assert_eq!(cfg.analysis.ball_window, 5);
        assert_eq!(cfg.segmenter.buffer_capacity, 120);
        assert_eq!(cfg.highlights.min_shot_frames, 5);
        assert_eq!(cfg.phases.backlift_min_deg, 150);
        assert_eq!(cfg.coach.min_bat_speed_kmh, 60.0);
    }

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let cfg: Config = serde_yaml::from_str(
            "analysis:\n  target_track_id: 7\n  bat_ema_alpha: 0.5\nsegmenter:\n  buffer_capacity: 60\n",
        )
        .unwrap();
        assert_eq!(cfg.analysis.target_track_id, Some(7));
        assert_eq!(cfg.analysis.bat_ema_alpha, 0.5);
        assert_eq!(cfg.segmenter.buffer_capacity, 60);
        // untouched fields keep their defaults
        assert_eq!(cfg.analysis.speed_cap_kmh, 160.0);
        assert_eq!(cfg.video.target_fps, 30);
    }
}
