// src/output/composite.rs

use crate::analysis::CompositeImage;
use crate::pipeline::MetricsSummary;
use crate::types::Config;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where the composite for `source` goes. `None` means a live camera.
pub fn composite_path_for(config: &Config, source: Option<&Path>) -> PathBuf {
    if let Some(explicit) = &config.output.composite_path {
        return PathBuf::from(explicit);
    }

    let file_name = match source.and_then(|p| p.file_stem()).and_then(|s| s.to_str()) {
        Some(stem) => format!("{}_slitscan.png", stem),
        None => format!(
            "slitscan_{}.png",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ),
    };

    PathBuf::from(&config.video.output_dir).join(file_name)
}

/// Report sits next to the composite: `foo_slitscan.png` → `foo_report.json`
pub fn report_path_for(composite_path: &Path) -> PathBuf {
    let stem = composite_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("slitscan");
    let base = stem.strip_suffix("_slitscan").unwrap_or(stem);
    composite_path.with_file_name(format!("{}_report.json", base))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Write the composite as an RGB image; format follows the extension.
pub fn save_composite(composite: &CompositeImage, path: &Path) -> Result<()> {
    ensure_parent(path)?;

    let width = composite.width() as u32;
    let height = composite.height() as u32;
    let buffer = image::RgbImage::from_raw(width, height, composite.to_rgb())
        .context("Composite buffer does not match its dimensions")?;

    buffer
        .save(path)
        .with_context(|| format!("Failed to save composite to {}", path.display()))?;

    info!(
        "💾 Composite saved: {} ({}x{})",
        path.display(),
        width,
        height
    );
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ScanReport<'a> {
    pub source: String,
    pub composite: Option<String>,
    pub composite_width: usize,
    pub final_speed_kmh: f64,
    pub metrics: &'a MetricsSummary,
}

pub fn write_report(path: &Path, report: &ScanReport<'_>) -> Result<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    info!("💾 Report written: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SlitAccumulator;
    use crate::types::Frame;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("slitscan_{}_{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_file_source_names() {
        let mut config = Config::default();
        config.video.output_dir = "out".to_string();

        let path = composite_path_for(&config, Some(Path::new("/videos/train.mp4")));
        assert_eq!(path, PathBuf::from("out/train_slitscan.png"));
        assert_eq!(report_path_for(&path), PathBuf::from("out/train_report.json"));
    }

    #[test]
    fn test_camera_name_is_timestamped() {
        let config = Config::default();
        let path = composite_path_for(&config, None);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("slitscan_"));
        assert!(name.ends_with(".png"));
        // slitscan_YYYYmmdd_HHMMSS.png
        assert_eq!(name.len(), "slitscan_".len() + 15 + ".png".len());
    }

    #[test]
    fn test_explicit_path_wins() {
        let mut config = Config::default();
        config.output.composite_path = Some("/tmp/result.png".to_string());
        let path = composite_path_for(&config, Some(Path::new("a.mp4")));
        assert_eq!(path, PathBuf::from("/tmp/result.png"));
    }

    #[test]
    fn test_save_and_reload() {
        let (w, h) = (8, 4);
        let mut data = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                data.extend_from_slice(&[(x * 30) as u8, (y * 60) as u8, 7]);
            }
        }
        let frame = Frame::new(data, w, h, 0.0);

        let mut acc = SlitAccumulator::new(1.0, 0.15, Some(3));
        acc.update(&frame, 5.0, 10.0).unwrap();
        let composite = acc.composite().unwrap();

        let dir = temp_dir("save");
        let path = dir.join("nested").join("scan.png");
        save_composite(composite, &path).unwrap();

        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(loaded.dimensions(), (5, 4));
        // Every column is the slit at x=3
        assert_eq!(loaded.get_pixel(0, 2).0, [90, 120, 7]);
        assert_eq!(loaded.get_pixel(4, 3).0, [90, 180, 7]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_report_is_json() {
        let summary = crate::pipeline::ScanMetrics::new().summary();
        let report = ScanReport {
            source: "camera 0".to_string(),
            composite: None,
            composite_width: 0,
            final_speed_kmh: 0.0,
            metrics: &summary,
        };

        let dir = temp_dir("report");
        let path = dir.join("x_report.json");
        write_report(&path, &report).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["source"], "camera 0");
        assert_eq!(value["metrics"]["total_frames"], 0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
