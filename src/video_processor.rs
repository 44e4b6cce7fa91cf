// src/video_processor.rs

use crate::analysis::{CompositeImage, TrackState};
use crate::pipeline::ScanSession;
use crate::types::{Config, Frame};
use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTraitConst},
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: [&str; 8] = ["mp4", "avi", "mov", "mkv", "MP4", "AVI", "MOV", "MKV"];
const FALLBACK_FPS: f64 = 30.0;

#[derive(Debug, Clone, PartialEq)]
pub enum VideoSource {
    Camera(i32),
    File(PathBuf),
}

impl VideoSource {
    /// File path, or None for a live camera
    pub fn path(&self) -> Option<&Path> {
        match self {
            VideoSource::Camera(_) => None,
            VideoSource::File(p) => Some(p),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            VideoSource::Camera(i) => format!("camera {}", i),
            VideoSource::File(p) => p.display().to_string(),
        }
    }
}

pub struct VideoProcessor {
    config: Config,
}

impl VideoProcessor {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Expand `video.source`: an integer is a camera index, a directory is
    /// walked for video files, anything else is a single file.
    pub fn resolve_sources(&self) -> Result<Vec<VideoSource>> {
        let source = self.config.video.source.trim();

        if let Ok(index) = source.parse::<i32>() {
            return Ok(vec![VideoSource::Camera(index)]);
        }

        let path = Path::new(source);
        if path.is_dir() {
            let videos = find_video_files(path);
            info!("Found {} video files in {}", videos.len(), path.display());
            return Ok(videos.into_iter().map(VideoSource::File).collect());
        }

        if !path.exists() {
            anyhow::bail!("Video source not found: {}", source);
        }
        Ok(vec![VideoSource::File(path.to_path_buf())])
    }

    pub fn open(&self, source: &VideoSource) -> Result<VideoReader> {
        match source {
            VideoSource::Camera(index) => self.open_camera(*index),
            VideoSource::File(path) => self.open_video(path),
        }
    }

    pub fn open_video(&self, path: &Path) -> Result<VideoReader> {
        info!("Opening video: {}", path.display());

        let path_str = path
            .to_str()
            .with_context(|| format!("Non UTF-8 path: {}", path.display()))?;
        let cap = VideoCapture::from_file(path_str, videoio::CAP_ANY)?;

        if !cap.is_opened()? {
            anyhow::bail!("Failed to open video file {}", path.display());
        }

        let mut fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        if !fps.is_finite() || fps <= 0.0 {
            warn!("Video reports no frame rate, assuming {} FPS", FALLBACK_FPS);
            fps = FALLBACK_FPS;
        }
        let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i32;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames",
            width, height, fps, total_frames
        );

        Ok(VideoReader {
            cap,
            fps,
            total_frames,
            current_frame: 0,
            mirror: self.config.video.mirror,
            clock: None,
        })
    }

    pub fn open_camera(&self, index: i32) -> Result<VideoReader> {
        info!("Opening camera {}", index);

        let cap = VideoCapture::new(index, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            anyhow::bail!("Could not open camera {}", index);
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        info!("Camera properties: {}x{} @ {:.1} FPS (nominal)", width, height, fps);

        Ok(VideoReader {
            cap,
            fps,
            total_frames: 0,
            current_frame: 0,
            mirror: self.config.video.mirror,
            clock: Some(Instant::now()),
        })
    }
}

pub fn find_video_files(dir: &Path) -> Vec<PathBuf> {
    let mut videos: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| VIDEO_EXTENSIONS.contains(&ext))
        })
        .collect();
    videos.sort();
    videos
}

pub struct VideoReader {
    pub cap: VideoCapture,
    pub fps: f64,
    pub total_frames: i32,
    pub current_frame: i32,
    pub mirror: bool,
    /// Live sources stamp frames with elapsed wall time from open
    clock: Option<Instant>,
}

impl VideoReader {
    pub fn is_live(&self) -> bool {
        self.clock.is_some()
    }

    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        use opencv::videoio::VideoCaptureTrait;

        let mut mat = Mat::default();

        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            return Ok(None);
        }

        let timestamp_ms = match self.clock {
            Some(start) => start.elapsed().as_secs_f64() * 1000.0,
            None => (self.current_frame as f64 / self.fps) * 1000.0,
        };
        self.current_frame += 1;

        let mat = if self.mirror {
            let mut flipped = Mat::default();
            core::flip(&mat, &mut flipped, 1)?;
            flipped
        } else {
            mat
        };

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

        let data = rgb_mat.data_bytes()?.to_vec();

        Ok(Some(Frame::new(
            data,
            rgb_mat.cols() as usize,
            rgb_mat.rows() as usize,
            timestamp_ms,
        )))
    }

    pub fn progress(&self) -> f32 {
        if self.total_frames <= 0 {
            return 0.0;
        }
        (self.current_frame as f32 / self.total_frames as f32) * 100.0
    }
}

fn bgr_from_rgb(data: &[u8], height: usize) -> Result<Mat> {
    let mat = Mat::from_slice(data)?;
    let mat = mat.reshape(3, height as i32)?;
    let mut bgr_mat = Mat::default();
    imgproc::cvt_color(&mat, &mut bgr_mat, imgproc::COLOR_RGB2BGR, 0)?;
    Ok(bgr_mat)
}

fn put_label(output: &mut Mat, text: &str, x: i32, y: i32, scale: f64, color: core::Scalar) -> Result<()> {
    imgproc::put_text(
        output,
        text,
        core::Point::new(x, y),
        imgproc::FONT_HERSHEY_SIMPLEX,
        scale,
        color,
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

/// Live view: slit line, the box being acquired or followed, mode and speed
pub fn draw_scan_overlay(frame: &Frame, session: &ScanSession) -> Result<Mat> {
    let mut output = bgr_from_rgb(&frame.data, frame.height)?;
    let width = frame.width as i32;
    let height = frame.height as i32;

    let slit_x = session.slit_x_for(frame.width) as i32;
    imgproc::line(
        &mut output,
        core::Point::new(slit_x, 0),
        core::Point::new(slit_x, height - 1),
        core::Scalar::new(0.0, 0.0, 255.0, 0.0),
        1,
        imgproc::LINE_8,
        0,
    )?;

    let tracker = session.tracker();
    let box_size = tracker.config().box_size as i32;

    if session.is_scan_active() {
        let (origin, color) = match (session.state(), tracker.context().last_known_position) {
            (TrackState::Tracking, Some(pos)) => (pos, core::Scalar::new(0.0, 255.0, 0.0, 0.0)),
            _ => (
                tracker.acquisition_origin(frame.width, frame.height),
                core::Scalar::new(0.0, 255.0, 255.0, 0.0),
            ),
        };
        imgproc::rectangle(
            &mut output,
            core::Rect::new(origin.x as i32, origin.y as i32, box_size, box_size),
            color,
            2,
            imgproc::LINE_8,
            0,
        )?;
    }

    // Info overlay background
    imgproc::rectangle(
        &mut output,
        core::Rect::new(5, 5, (width - 10).clamp(0, 420), 70),
        core::Scalar::new(40.0, 40.0, 40.0, 0.0),
        -1,
        imgproc::LINE_8,
        0,
    )?;

    let (status, status_color) = if !session.is_scan_active() {
        ("SCAN OFF (s to start)", core::Scalar::new(200.0, 200.0, 200.0, 0.0))
    } else {
        match session.state() {
            TrackState::WaitingForObject => {
                ("WAITING FOR OBJECT", core::Scalar::new(0.0, 255.0, 255.0, 0.0))
            }
            TrackState::Tracking => ("TRACKING", core::Scalar::new(0.0, 255.0, 0.0, 0.0)),
        }
    };
    put_label(&mut output, status, 15, 32, 0.7, status_color)?;

    let speed = format!("Speed: {:.2} km/h", session.displayed_speed_kmh());
    put_label(
        &mut output,
        &speed,
        15,
        62,
        0.7,
        core::Scalar::new(255.0, 255.0, 255.0, 0.0),
    )?;

    Ok(output)
}

/// Composite window contents. The column store is only exported again when
/// slices were added, the result was cleared, or the target height changed.
pub struct CompositePreview {
    key: Option<(u64, bool, i32)>,
    mat: Mat,
    renders: u64,
}

impl CompositePreview {
    pub fn new() -> Self {
        Self {
            key: None,
            mat: Mat::default(),
            renders: 0,
        }
    }

    /// `slices_total` is the run's monotonic slice count
    pub fn render(
        &mut self,
        composite: Option<&CompositeImage>,
        slices_total: u64,
        preview_height: i32,
    ) -> Result<&Mat> {
        let key = (slices_total, composite.is_some(), preview_height);
        if self.key != Some(key) {
            self.mat = draw_composite_preview(composite, preview_height)?;
            self.key = Some(key);
            self.renders += 1;
        }
        Ok(&self.mat)
    }

    pub fn renders(&self) -> u64 {
        self.renders
    }
}

/// Composite scaled to `preview_height`, or a placeholder before the first slice
pub fn draw_composite_preview(composite: Option<&CompositeImage>, preview_height: i32) -> Result<Mat> {
    let Some(composite) = composite.filter(|c| c.width() > 0) else {
        let mut placeholder = Mat::new_rows_cols_with_default(
            preview_height.max(60),
            400,
            core::CV_8UC3,
            core::Scalar::all(0.0),
        )?;
        put_label(
            &mut placeholder,
            "Waiting for scan...",
            20,
            40,
            0.8,
            core::Scalar::new(255.0, 255.0, 255.0, 0.0),
        )?;
        return Ok(placeholder);
    };

    let bgr = bgr_from_rgb(&composite.to_rgb(), composite.height())?;
    if preview_height <= 0 || composite.height() as i32 == preview_height {
        return Ok(bgr);
    }

    let scale = preview_height as f64 / composite.height() as f64;
    let new_width = ((composite.width() as f64 * scale).round() as i32).max(1);
    let mut resized = Mat::default();
    imgproc::resize(
        &bgr,
        &mut resized,
        core::Size::new(new_width, preview_height),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;
    Ok(resized)
}
