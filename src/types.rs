use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub calibration: CalibrationConfig,
    pub tracking: TrackingConfig,
    pub smoothing: SmoothingConfig,
    pub scan: ScanConfig,
    pub video: VideoConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Image pixels covering one metre at the measurement plane
    pub pixels_per_meter: f64,
    /// Slices are only captured above this speed
    pub speed_threshold_kmh: f64,
    /// Pixels of travel per captured slit column
    pub capture_distance_px: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            pixels_per_meter: 500.0,
            speed_threshold_kmh: 0.15,
            capture_distance_px: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    Opencv,
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Side of the square acquisition box and reference patch
    pub box_size: usize,
    /// Extra rows above and below the box searched while tracking
    pub search_margin_px: usize,
    pub match_confidence_threshold: f64,
    pub texture_threshold: f64,
    /// Tracking is dropped and re-acquired at this interval, even when locked
    pub reset_interval_ms: f64,
    pub matcher: MatcherKind,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            box_size: 100,
            search_margin_px: 20,
            match_confidence_threshold: 0.8,
            texture_threshold: 20.0,
            reset_interval_ms: 1000.0,
            matcher: MatcherKind::Opencv,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub window_ms: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self { window_ms: 1000.0 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Column sampled into the composite; frame centre when unset
    pub slit_x: Option<usize>,
    /// Start with scan mode on (always on when the preview is disabled)
    pub start_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Camera index ("0"), a video file, or a directory of videos
    pub source: String,
    pub mirror: bool,
    /// Iteration rate cap; 0 disables the cap
    pub target_fps: u32,
    pub show_preview: bool,
    pub output_dir: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            mirror: true,
            target_fps: 0,
            show_preview: true,
            output_dir: "output".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    None,
    Pipe,
    SharedMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishedValue {
    Smoothed,
    Instantaneous,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub transport: Transport,
    /// FIFO path, or "-" for stdout
    pub pipe_path: String,
    pub shm_name: String,
    pub sem_name: String,
    /// 0 publishes every frame
    pub publish_interval_ms: u64,
    pub published_value: PublishedValue,
    /// Overrides the generated composite file name
    pub composite_path: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            transport: Transport::None,
            pipe_path: "-".to_string(),
            shm_name: "speed_shm".to_string(),
            sem_name: "speed_sem".to_string(),
            publish_interval_ms: 0,
            published_value: PublishedValue::Smoothed,
            composite_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Packed RGB frame, row-major: pixel (x, y) starts at `(y * width + x) * 3`
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

impl Frame {
    pub const CHANNELS: usize = 3;

    pub fn new(data: Vec<u8>, width: usize, height: usize, timestamp_ms: f64) -> Self {
        debug_assert_eq!(data.len(), width * height * Self::CHANNELS);
        Self {
            data,
            width,
            height,
            timestamp_ms,
        }
    }

    pub fn contains(&self, x: usize, y: usize, w: usize, h: usize) -> bool {
        w > 0 && h > 0 && x + w <= self.width && y + h <= self.height
    }

    /// Copy a w×h region at `origin`. None when it does not fit in the frame.
    pub fn patch(&self, origin: Position, w: usize, h: usize) -> Option<Patch> {
        if !self.contains(origin.x, origin.y, w, h) {
            return None;
        }
        let row_bytes = w * Self::CHANNELS;
        let mut data = Vec::with_capacity(row_bytes * h);
        for y in origin.y..origin.y + h {
            let start = (y * self.width + origin.x) * Self::CHANNELS;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        Some(Patch {
            origin,
            width: w,
            height: h,
            data,
            captured_at_ms: self.timestamp_ms,
        })
    }

    /// Full-height single-pixel column at `x`, top to bottom.
    pub fn column(&self, x: usize) -> Option<Vec<u8>> {
        if x >= self.width {
            return None;
        }
        let mut col = Vec::with_capacity(self.height * Self::CHANNELS);
        for y in 0..self.height {
            let start = (y * self.width + x) * Self::CHANNELS;
            col.extend_from_slice(&self.data[start..start + Self::CHANNELS]);
        }
        Some(col)
    }
}

/// Top-left corner of a patch, in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

impl Position {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Reference region used for correlation. Replaced wholesale, never edited.
#[derive(Debug, Clone)]
pub struct Patch {
    pub origin: Position,
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
    pub captured_at_ms: f64,
}

/// Horizontal band searched while tracking (rows `y..y + height`, full width)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchBand {
    pub y: usize,
    pub height: usize,
}
