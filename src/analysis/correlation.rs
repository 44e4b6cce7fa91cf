// src/analysis/correlation.rs
//
// Image primitives the tracker calls through: template correlation and
// texture scoring.
//
// `NativeMatcher` is a zero-dependency implementation working on a
// grayscale plane. It computes the same zero-mean normalized correlation
// as OpenCV's TM_CCOEFF_NORMED and the variance of a 4-neighbour
// Laplacian, so it can stand in for the OpenCV backend (`opencv_backend`)
// when OpenCV matching is not wanted, and drives the tracker in tests.

use crate::types::{Frame, Patch, Position, SearchBand};
use anyhow::Result;

/// Best placement of a reference patch inside a search band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Top-left of the best match, in frame coordinates
    pub position: Position,
    /// Normalized correlation score in [-1, 1]
    pub confidence: f64,
}

pub trait CorrelationEngine {
    /// Correlate `reference` against the band. `Ok(None)` when the band
    /// cannot hold the patch.
    fn best_match(
        &mut self,
        frame: &Frame,
        reference: &Patch,
        band: SearchBand,
    ) -> Result<Option<MatchResult>>;
}

pub trait TextureGate {
    /// Larger means more local contrast. Uniform regions score ~0.
    fn texture_score(&mut self, patch: &Patch) -> Result<f64>;
}

/// Both primitives behind one object, so the backend can be picked at runtime
pub trait ImageMatcher: CorrelationEngine + TextureGate {
    fn name(&self) -> &'static str;
}

// ============================================================================
// GRAYSCALE PLANE
// ============================================================================

/// Row-major luma plane: pixel at (x, y) = data[y * width + x]
#[derive(Debug, Clone)]
pub struct GrayPlane {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
}

impl GrayPlane {
    /// ITU-R BT.601 luma from packed RGB
    pub fn from_rgb(rgb: &[u8], width: usize, height: usize) -> Self {
        let data = rgb
            .chunks_exact(3)
            .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
            .collect::<Vec<_>>();
        debug_assert_eq!(data.len(), width * height);
        Self {
            data,
            width,
            height,
        }
    }

    #[inline]
    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Reflect-101 border lookup (`-1 -> 1`, `n -> n - 2`)
    #[inline]
    fn at_reflect(&self, x: isize, y: isize) -> f32 {
        let rx = reflect_101(x, self.width);
        let ry = reflect_101(y, self.height);
        self.at(rx, ry)
    }
}

#[inline]
fn reflect_101(i: isize, n: usize) -> usize {
    let n = n as isize;
    let r = if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    };
    r.clamp(0, n - 1) as usize
}

// ============================================================================
// NATIVE MATCHER
// ============================================================================

#[derive(Debug, Default)]
pub struct NativeMatcher;

impl NativeMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl CorrelationEngine for NativeMatcher {
    fn best_match(
        &mut self,
        frame: &Frame,
        reference: &Patch,
        band: SearchBand,
    ) -> Result<Option<MatchResult>> {
        let (tw, th) = (reference.width, reference.height);
        let band_bottom = (band.y + band.height).min(frame.height);
        if tw == 0 || th == 0 || tw > frame.width || band.y + th > band_bottom {
            return Ok(None);
        }

        let image = GrayPlane::from_rgb(&frame.data, frame.width, frame.height);
        let templ = GrayPlane::from_rgb(&reference.data, tw, th);

        // Zero-mean template, so sum(I * t') == sum((I - mean_I) * t')
        let n = (tw * th) as f64;
        let t_mean = templ.data.iter().map(|&v| v as f64).sum::<f64>() / n;
        let t_zero: Vec<f64> = templ.data.iter().map(|&v| v as f64 - t_mean).collect();
        let t_norm = t_zero.iter().map(|v| v * v).sum::<f64>().sqrt();

        // Raw score of the best placement; clamped only on return
        let mut best: Option<(Position, f64)> = None;

        for cy in band.y..=band_bottom - th {
            for cx in 0..=frame.width - tw {
                let mut cross = 0.0f64;
                let mut sum = 0.0f64;
                let mut sum_sq = 0.0f64;
                for dy in 0..th {
                    let row = (cy + dy) * image.width + cx;
                    let t_row = dy * tw;
                    for dx in 0..tw {
                        let v = image.data[row + dx] as f64;
                        cross += v * t_zero[t_row + dx];
                        sum += v;
                        sum_sq += v * v;
                    }
                }
                let window_var = (sum_sq - sum * sum / n).max(0.0);
                let denom = t_norm * window_var.sqrt();
                let score = if denom > f64::EPSILON { cross / denom } else { 0.0 };

                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((Position::new(cx, cy), score));
                }
            }
        }

        Ok(best.map(|(position, score)| MatchResult {
            position,
            confidence: score.clamp(-1.0, 1.0),
        }))
    }
}

impl TextureGate for NativeMatcher {
    fn texture_score(&mut self, patch: &Patch) -> Result<f64> {
        Ok(laplacian_variance(&GrayPlane::from_rgb(
            &patch.data,
            patch.width,
            patch.height,
        )))
    }
}

impl ImageMatcher for NativeMatcher {
    fn name(&self) -> &'static str {
        "native"
    }
}

/// Variance of the 4-neighbour Laplacian with reflect-101 borders
pub fn laplacian_variance(plane: &GrayPlane) -> f64 {
    if plane.width < 2 || plane.height < 2 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..plane.height as isize {
        for x in 0..plane.width as isize {
            let lap = plane.at_reflect(x - 1, y)
                + plane.at_reflect(x + 1, y)
                + plane.at_reflect(x, y - 1)
                + plane.at_reflect(x, y + 1)
                - 4.0 * plane.at_reflect(x, y);
            let lap = lap as f64;
            sum += lap;
            sum_sq += lap * lap;
        }
    }
    let n = (plane.width * plane.height) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Vertical stripes with a per-row wobble so every window is distinct.
    /// The scene is moved right by `shift_x`.
    pub(crate) fn textured_frame(width: usize, height: usize, shift_x: usize, ts: f64) -> Frame {
        let mut data = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                let sx = (x + width - shift_x % width) % width;
                let v = ((sx * 37 + y * 11 + (sx * sx) % 23) % 251) as u8;
                data.extend_from_slice(&[v, v, v]);
            }
        }
        Frame::new(data, width, height, ts)
    }

    pub(crate) fn flat_frame(width: usize, height: usize, level: u8, ts: f64) -> Frame {
        Frame::new(vec![level; width * height * 3], width, height, ts)
    }

    #[test]
    fn test_match_finds_shifted_patch() {
        let prev = textured_frame(80, 40, 0, 0.0);
        let curr = textured_frame(80, 40, 7, 33.0);
        let reference = prev.patch(Position::new(30, 10), 16, 16).unwrap();

        let mut matcher = NativeMatcher::new();
        let band = SearchBand { y: 6, height: 24 };
        let found = matcher.best_match(&curr, &reference, band).unwrap().unwrap();

        assert_eq!(found.position, Position::new(37, 10));
        assert!(found.confidence > 0.99, "got {}", found.confidence);
    }

    #[test]
    fn test_duplicate_placements_pick_first_and_stay_in_range() {
        let (w, h) = (60, 20);
        let mut frame = flat_frame(w, h, 50, 0.0);
        for &x0 in &[5usize, 40] {
            for dy in 0..8 {
                for dx in 0..8 {
                    let v = ((dx * 29 + dy * 13 + dx * dy) % 200) as u8;
                    let i = ((6 + dy) * w + x0 + dx) * 3;
                    frame.data[i..i + 3].copy_from_slice(&[v, v, v]);
                }
            }
        }
        let reference = frame.patch(Position::new(40, 6), 8, 8).unwrap();

        let mut matcher = NativeMatcher::new();
        let band = SearchBand { y: 0, height: h };
        let found = matcher.best_match(&frame, &reference, band).unwrap().unwrap();

        assert_eq!(found.position, Position::new(5, 6));
        assert!(found.confidence <= 1.0 && found.confidence > 0.999);
    }

    #[test]
    fn test_band_smaller_than_patch_yields_none() {
        let frame = textured_frame(40, 40, 0, 0.0);
        let reference = frame.patch(Position::new(0, 0), 16, 16).unwrap();
        let mut matcher = NativeMatcher::new();
        let band = SearchBand { y: 30, height: 20 };
        assert!(matcher.best_match(&frame, &reference, band).unwrap().is_none());
    }

    #[test]
    fn test_flat_patch_has_no_texture() {
        let frame = flat_frame(32, 32, 90, 0.0);
        let patch = frame.patch(Position::new(4, 4), 20, 20).unwrap();
        let mut matcher = NativeMatcher::new();
        assert!(matcher.texture_score(&patch).unwrap() < 1e-9);
    }

    #[test]
    fn test_striped_patch_is_textured() {
        let frame = textured_frame(64, 64, 0, 0.0);
        let patch = frame.patch(Position::new(8, 8), 32, 32).unwrap();
        let mut matcher = NativeMatcher::new();
        assert!(matcher.texture_score(&patch).unwrap() > 20.0);
    }

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(2, 5), 2);
    }
}
