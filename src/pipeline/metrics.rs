// src/pipeline/metrics.rs
//
// Per-run counters, summarised into the JSON report written next to the
// composite.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct ScanMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub tracked_frames: Arc<AtomicU64>,
    pub acquisitions: Arc<AtomicU64>,
    pub losses: Arc<AtomicU64>,
    pub periodic_resets: Arc<AtomicU64>,
    pub slices_captured: Arc<AtomicU64>,
    pub publishes: Arc<AtomicU64>,
    pub frame_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            tracked_frames: Arc::new(AtomicU64::new(0)),
            acquisitions: Arc::new(AtomicU64::new(0)),
            losses: Arc::new(AtomicU64::new(0)),
            periodic_resets: Arc::new(AtomicU64::new(0)),
            slices_captured: Arc::new(AtomicU64::new(0)),
            publishes: Arc::new(AtomicU64::new(0)),
            frame_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            tracked_frames: self.tracked_frames.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            losses: self.losses.load(Ordering::Relaxed),
            periodic_resets: self.periodic_resets.load(Ordering::Relaxed),
            slices_captured: self.slices_captured.load(Ordering::Relaxed),
            publishes: self.publishes.load(Ordering::Relaxed),
            last_frame_us: self.frame_time_us.load(Ordering::Relaxed),
            fps: self.fps(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub tracked_frames: u64,
    pub acquisitions: u64,
    pub losses: u64,
    pub periodic_resets: u64,
    pub slices_captured: u64,
    pub publishes: u64,
    pub last_frame_us: u64,
    pub fps: f64,
    pub elapsed_secs: f64,
}
