// src/analysis/slit_accumulator.rs
//
// Slit-scan capture. Measured travel accumulates as a pixel budget; each
// `capture_distance` of budget appends one full-height column of the current
// frame (taken at the slit) to the right edge of the composite.
//
// The composite is a column store: columns are appended contiguously to one
// Vec, so growth is amortized O(1) per slice. Row-major pixels are produced
// once, on export.

use crate::types::Frame;
use anyhow::{bail, Result};
use tracing::debug;

/// Append-only image grown one column at a time
#[derive(Debug, Clone)]
pub struct CompositeImage {
    height: usize,
    columns: usize,
    /// Column-major packed RGB: column `c` is `data[c * height * 3..][..height * 3]`
    data: Vec<u8>,
}

impl CompositeImage {
    fn with_height(height: usize) -> Self {
        Self {
            height,
            columns: 0,
            data: Vec::with_capacity(height * Frame::CHANNELS * 256),
        }
    }

    fn push_column(&mut self, column: &[u8]) -> Result<()> {
        if column.len() != self.height * Frame::CHANNELS {
            bail!(
                "slit column has {} bytes, composite expects {}",
                column.len(),
                self.height * Frame::CHANNELS
            );
        }
        self.data.extend_from_slice(column);
        self.columns += 1;
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.columns
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Packed RGB, row-major, `width() * height() * 3` bytes
    pub fn to_rgb(&self) -> Vec<u8> {
        let ch = Frame::CHANNELS;
        let mut out = vec![0u8; self.columns * self.height * ch];
        for c in 0..self.columns {
            let col = &self.data[c * self.height * ch..(c + 1) * self.height * ch];
            for y in 0..self.height {
                let dst = (y * self.columns + c) * ch;
                out[dst..dst + ch].copy_from_slice(&col[y * ch..(y + 1) * ch]);
            }
        }
        out
    }
}

pub struct SlitAccumulator {
    capture_distance: f64,
    speed_threshold_kmh: f64,
    slit_x: Option<usize>,
    pending_shift: f64,
    composite: Option<CompositeImage>,
}

impl SlitAccumulator {
    /// # Arguments
    /// * `capture_distance` - Pixels of travel per slice (> 0)
    /// * `speed_threshold_kmh` - Travel at or below this speed is ignored
    /// * `slit_x` - Sampled column; frame centre when None
    pub fn new(capture_distance: f64, speed_threshold_kmh: f64, slit_x: Option<usize>) -> Self {
        Self {
            capture_distance,
            speed_threshold_kmh,
            slit_x,
            pending_shift: 0.0,
            composite: None,
        }
    }

    pub fn slit_x_for(&self, frame_width: usize) -> usize {
        self.slit_x
            .unwrap_or(frame_width / 2)
            .min(frame_width.saturating_sub(1))
    }

    /// Feed one tracked frame. Returns the number of slices appended.
    ///
    /// Only call while tracking; sub-threshold speeds are treated as jitter
    /// and leave the budget untouched.
    pub fn update(&mut self, frame: &Frame, displacement_px: f64, speed_kmh: f64) -> Result<usize> {
        if speed_kmh <= self.speed_threshold_kmh {
            return Ok(0);
        }
        self.pending_shift += displacement_px.abs();

        let mut captured = 0;
        if self.pending_shift >= self.capture_distance {
            let x = self.slit_x_for(frame.width);
            let Some(column) = frame.column(x) else {
                bail!("slit x={} outside frame width {}", x, frame.width);
            };
            while self.pending_shift >= self.capture_distance {
                self.composite
                    .get_or_insert_with(|| CompositeImage::with_height(frame.height))
                    .push_column(&column)?;
                self.pending_shift -= self.capture_distance;
                captured += 1;
            }
            debug!(
                "Captured {} slice(s), composite width {}, pending {:.3}px",
                captured,
                self.composite.as_ref().map_or(0, |c| c.width()),
                self.pending_shift
            );
        }
        Ok(captured)
    }

    pub fn pending_shift(&self) -> f64 {
        self.pending_shift
    }

    pub fn is_empty(&self) -> bool {
        self.composite.as_ref().map_or(true, |c| c.width() == 0)
    }

    /// The composite so far, or None before the first slice
    pub fn composite(&self) -> Option<&CompositeImage> {
        self.composite.as_ref().filter(|c| c.width() > 0)
    }

    pub fn slice_count(&self) -> usize {
        self.composite.as_ref().map_or(0, |c| c.width())
    }

    /// Forget the composite and the pending budget
    pub fn clear(&mut self) {
        self.composite = None;
        self.pending_shift = 0.0;
    }
}
