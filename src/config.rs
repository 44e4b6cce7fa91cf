use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let config = if Path::new(path).exists() {
            let contents =
                fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
            serde_yaml::from_str::<Config>(&contents)
                .with_context(|| format!("Invalid config file {}", path))?
        } else {
            tracing::warn!("Config file {} not found, using defaults", path);
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let cal = &self.calibration;
        if !(cal.pixels_per_meter > 0.0) {
            bail!("calibration.pixels_per_meter must be > 0");
        }
        if !(cal.capture_distance_px > 0.0) {
            bail!("calibration.capture_distance_px must be > 0");
        }
        if cal.speed_threshold_kmh < 0.0 {
            bail!("calibration.speed_threshold_kmh must be >= 0");
        }

        let trk = &self.tracking;
        if trk.box_size == 0 {
            bail!("tracking.box_size must be > 0");
        }
        if !(-1.0..=1.0).contains(&trk.match_confidence_threshold) {
            bail!("tracking.match_confidence_threshold must lie in [-1, 1]");
        }
        if trk.texture_threshold < 0.0 {
            bail!("tracking.texture_threshold must be >= 0");
        }
        if !(trk.reset_interval_ms > 0.0) {
            bail!("tracking.reset_interval_ms must be > 0");
        }

        if !(self.smoothing.window_ms > 0.0) {
            bail!("smoothing.window_ms must be > 0");
        }
        Ok(())
    }
}
