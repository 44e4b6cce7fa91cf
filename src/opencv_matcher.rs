// src/opencv_matcher.rs

use crate::analysis::correlation::{CorrelationEngine, ImageMatcher, MatchResult, TextureGate};
use crate::types::{Frame, Patch, Position, SearchBand};
use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat, Point, Rect},
    imgproc,
    prelude::*,
};

/// TM_CCOEFF_NORMED template matching and Laplacian-variance texture
#[derive(Debug, Default)]
pub struct OpenCvMatcher;

impl OpenCvMatcher {
    pub fn new() -> Self {
        Self
    }
}

/// Wrap packed RGB bytes as an owned 3-channel Mat
fn rgb_mat(data: &[u8], width: usize, height: usize) -> Result<Mat> {
    debug_assert_eq!(data.len(), width * height * 3);
    let mat = Mat::from_slice(data)?;
    let mat = mat.reshape(3, height as i32)?;
    Ok(mat.try_clone()?)
}

impl CorrelationEngine for OpenCvMatcher {
    fn best_match(
        &mut self,
        frame: &Frame,
        reference: &Patch,
        band: SearchBand,
    ) -> Result<Option<MatchResult>> {
        let band_h = band.height.min(frame.height.saturating_sub(band.y));
        if reference.width > frame.width || reference.height > band_h || reference.width == 0 {
            return Ok(None);
        }

        let image = rgb_mat(&frame.data, frame.width, frame.height)?;
        let search = Mat::roi(
            &image,
            Rect::new(0, band.y as i32, frame.width as i32, band_h as i32),
        )?
        .try_clone()?;
        let templ = rgb_mat(&reference.data, reference.width, reference.height)?;

        let mut scores = Mat::default();
        imgproc::match_template(
            &search,
            &templ,
            &mut scores,
            imgproc::TM_CCOEFF_NORMED,
            &core::no_array(),
        )
        .context("match_template failed")?;

        let mut max_val = 0.0f64;
        let mut max_loc = Point::default();
        core::min_max_loc(
            &scores,
            None,
            Some(&mut max_val),
            None,
            Some(&mut max_loc),
            &core::no_array(),
        )?;

        Ok(Some(MatchResult {
            position: Position::new(max_loc.x.max(0) as usize, band.y + max_loc.y.max(0) as usize),
            confidence: max_val.clamp(-1.0, 1.0),
        }))
    }
}

impl TextureGate for OpenCvMatcher {
    fn texture_score(&mut self, patch: &Patch) -> Result<f64> {
        let rgb = rgb_mat(&patch.data, patch.width, patch.height)?;

        let mut gray = Mat::default();
        imgproc::cvt_color(&rgb, &mut gray, imgproc::COLOR_RGB2GRAY, 0)?;

        let mut lap = Mat::default();
        imgproc::laplacian(&gray, &mut lap, core::CV_64F, 1, 1.0, 0.0, core::BORDER_DEFAULT)?;

        let mut mean = Mat::default();
        let mut stddev = Mat::default();
        core::mean_std_dev(&lap, &mut mean, &mut stddev, &core::no_array())?;

        let sd = *stddev.at::<f64>(0)?;
        Ok(sd * sd)
    }
}

impl ImageMatcher for OpenCvMatcher {
    fn name(&self) -> &'static str {
        "opencv"
    }
}
