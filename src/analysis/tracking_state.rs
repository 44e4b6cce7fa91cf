// src/analysis/tracking_state.rs
//
// Single-region template tracker.
//
// States:
//   WaitingForObject → sample the fixed acquisition box each frame; adopt it
//                      as the reference once it carries enough texture.
//   Tracking         → correlate the reference inside a horizontal band
//                      around the acquisition row; on a confident match,
//                      report the x displacement and re-template at the new
//                      position. A weak match drops back to waiting.
//
// Independently of the state, the lock is dropped every `reset_interval_ms`
// so acquisition re-anchors on the measurement line instead of following
// the object (and accumulated drift) across the whole frame. Loss always
// restarts from the acquisition box, never from the last seen location.

use super::correlation::{CorrelationEngine, TextureGate};
use crate::types::{Frame, Patch, Position, SearchBand, TrackingConfig};
use anyhow::Result;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    WaitingForObject,
    Tracking,
}

impl TrackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForObject => "WAITING FOR OBJECT",
            Self::Tracking => "TRACKING",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub box_size: usize,
    pub search_margin_px: usize,
    pub match_confidence_threshold: f64,
    pub texture_threshold: f64,
    pub reset_interval_ms: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::from(&TrackingConfig::default())
    }
}

impl From<&TrackingConfig> for TrackerConfig {
    fn from(cfg: &TrackingConfig) -> Self {
        Self {
            box_size: cfg.box_size,
            search_margin_px: cfg.search_margin_px,
            match_confidence_threshold: cfg.match_confidence_threshold,
            texture_threshold: cfg.texture_threshold,
            reset_interval_ms: cfg.reset_interval_ms,
        }
    }
}

/// Everything the tracker knows about the current lock.
/// `reference_patch` is Some exactly when `state == Tracking`.
#[derive(Debug, Clone)]
pub struct TrackingContext {
    pub state: TrackState,
    pub reference_patch: Option<Patch>,
    pub last_known_position: Option<Position>,
    pub last_acquisition_attempt_ms: Option<f64>,
    pub last_reset_ms: f64,
}

impl TrackingContext {
    fn new(now_ms: f64) -> Self {
        Self {
            state: TrackState::WaitingForObject,
            reference_patch: None,
            last_known_position: None,
            last_acquisition_attempt_ms: None,
            last_reset_ms: now_ms,
        }
    }

    fn drop_lock(&mut self) {
        self.state = TrackState::WaitingForObject;
        self.reference_patch = None;
        self.last_known_position = None;
    }
}

/// What happened to the lock on one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackEvent {
    /// Candidate too uniform (or the box does not fit the frame)
    StillWaiting { texture: Option<f64> },
    Acquired { position: Position, texture: f64 },
    /// Confident match; `displacement_px` is signed along x
    Moved {
        position: Position,
        displacement_px: i64,
        confidence: f64,
    },
    /// Match below threshold (or no placement possible)
    Lost { confidence: Option<f64> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackStep {
    /// The periodic reset fired before this frame was processed
    pub periodic_reset: bool,
    pub event: TrackEvent,
}

impl TrackStep {
    pub fn displacement_px(&self) -> i64 {
        match self.event {
            TrackEvent::Moved {
                displacement_px, ..
            } => displacement_px,
            _ => 0,
        }
    }
}

pub struct TrackingStateMachine {
    config: TrackerConfig,
    context: TrackingContext,
}

impl TrackingStateMachine {
    /// Start in WaitingForObject with the reset timer running from `now_ms`
    pub fn new(config: TrackerConfig, now_ms: f64) -> Self {
        Self {
            config,
            context: TrackingContext::new(now_ms),
        }
    }

    pub fn state(&self) -> TrackState {
        self.context.state
    }

    pub fn is_tracking(&self) -> bool {
        self.context.state == TrackState::Tracking
    }

    pub fn context(&self) -> &TrackingContext {
        &self.context
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Fixed acquisition box origin (box centred in the frame)
    pub fn acquisition_origin(&self, width: usize, height: usize) -> Position {
        let b = self.config.box_size;
        Position::new(width.saturating_sub(b) / 2, height.saturating_sub(b) / 2)
    }

    /// Rows searched while tracking, clamped to the frame
    pub fn search_band(&self, width: usize, height: usize) -> SearchBand {
        let origin = self.acquisition_origin(width, height);
        let top = origin.y.saturating_sub(self.config.search_margin_px);
        let bottom = (origin.y + self.config.box_size + self.config.search_margin_px).min(height);
        SearchBand {
            y: top,
            height: bottom.saturating_sub(top),
        }
    }

    /// Clear all context and restart the reset timer
    pub fn restart(&mut self, now_ms: f64) {
        self.context = TrackingContext::new(now_ms);
    }

    /// Advance the tracker by one frame.
    pub fn update<M>(&mut self, frame: &Frame, matcher: &mut M) -> Result<TrackStep>
    where
        M: CorrelationEngine + TextureGate + ?Sized,
    {
        let now = frame.timestamp_ms;

        let periodic_reset = now - self.context.last_reset_ms >= self.config.reset_interval_ms;
        if periodic_reset {
            self.context.drop_lock();
            self.context.last_reset_ms = now;
            debug!("Periodic reset at {:.0}ms, re-acquiring from box", now);
        }

        let event = match self.context.state {
            TrackState::WaitingForObject => self.try_acquire(frame, matcher)?,
            TrackState::Tracking => self.follow(frame, matcher)?,
        };

        Ok(TrackStep {
            periodic_reset,
            event,
        })
    }

    fn try_acquire<M>(&mut self, frame: &Frame, matcher: &mut M) -> Result<TrackEvent>
    where
        M: TextureGate + ?Sized,
    {
        self.context.last_acquisition_attempt_ms = Some(frame.timestamp_ms);

        let origin = self.acquisition_origin(frame.width, frame.height);
        let b = self.config.box_size;
        let Some(candidate) = frame.patch(origin, b, b) else {
            debug!(
                "Acquisition box {}px does not fit {}x{} frame",
                b, frame.width, frame.height
            );
            return Ok(TrackEvent::StillWaiting { texture: None });
        };

        let texture = matcher.texture_score(&candidate)?;
        if texture <= self.config.texture_threshold {
            return Ok(TrackEvent::StillWaiting {
                texture: Some(texture),
            });
        }

        self.context.state = TrackState::Tracking;
        self.context.reference_patch = Some(candidate);
        self.context.last_known_position = Some(origin);
        info!(
            "Object acquired at ({}, {}), texture {:.1}",
            origin.x, origin.y, texture
        );

        Ok(TrackEvent::Acquired {
            position: origin,
            texture,
        })
    }

    fn follow<M>(&mut self, frame: &Frame, matcher: &mut M) -> Result<TrackEvent>
    where
        M: CorrelationEngine + ?Sized,
    {
        let (Some(reference), Some(last)) = (
            self.context.reference_patch.as_ref(),
            self.context.last_known_position,
        ) else {
            self.context.drop_lock();
            return Ok(TrackEvent::Lost { confidence: None });
        };

        let band = self.search_band(frame.width, frame.height);
        let found = matcher.best_match(frame, reference, band)?;

        let found = match found {
            Some(m) if m.confidence >= self.config.match_confidence_threshold => m,
            other => {
                let confidence = other.map(|m| m.confidence);
                info!(
                    "Tracking lost (confidence {}), searching for a new object",
                    confidence.map_or("n/a".to_string(), |c| format!("{:.2}", c))
                );
                self.context.drop_lock();
                return Ok(TrackEvent::Lost { confidence });
            }
        };

        let (w, h) = (reference.width, reference.height);
        let Some(fresh) = frame.patch(found.position, w, h) else {
            self.context.drop_lock();
            return Ok(TrackEvent::Lost {
                confidence: Some(found.confidence),
            });
        };

        let displacement_px = found.position.x as i64 - last.x as i64;
        self.context.last_known_position = Some(found.position);
        self.context.reference_patch = Some(fresh);

        Ok(TrackEvent::Moved {
            position: found.position,
            displacement_px,
            confidence: found.confidence,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::super::correlation::tests::{flat_frame, textured_frame};
    use super::super::correlation::{MatchResult, NativeMatcher};
    use super::*;
    use std::collections::VecDeque;

    /// Replays fixed texture scores and match results
    pub(crate) struct ScriptedMatcher {
        pub texture: f64,
        pub matches: VecDeque<Option<MatchResult>>,
        pub default_match: Option<MatchResult>,
    }

    impl ScriptedMatcher {
        pub(crate) fn new(texture: f64) -> Self {
            Self {
                texture,
                matches: VecDeque::new(),
                default_match: None,
            }
        }
    }

    impl CorrelationEngine for ScriptedMatcher {
        fn best_match(
            &mut self,
            _frame: &Frame,
            _reference: &Patch,
            _band: SearchBand,
        ) -> Result<Option<MatchResult>> {
            Ok(self.matches.pop_front().unwrap_or(self.default_match))
        }
    }

    impl TextureGate for ScriptedMatcher {
        fn texture_score(&mut self, _patch: &Patch) -> Result<f64> {
            Ok(self.texture)
        }
    }

    fn small_config() -> TrackerConfig {
        TrackerConfig {
            box_size: 10,
            search_margin_px: 4,
            match_confidence_threshold: 0.8,
            texture_threshold: 20.0,
            reset_interval_ms: 1000.0,
        }
    }

    fn hit(x: usize, y: usize, confidence: f64) -> Option<MatchResult> {
        Some(MatchResult {
            position: Position::new(x, y),
            confidence,
        })
    }

    #[test]
    fn test_low_texture_never_acquires() {
        let mut sm = TrackingStateMachine::new(small_config(), 0.0);
        let mut matcher = ScriptedMatcher::new(20.0);

        for i in 0..20 {
            let frame = flat_frame(40, 30, 128, i as f64 * 33.0);
            let step = sm.update(&frame, &mut matcher).unwrap();
            assert_eq!(
                step.event,
                TrackEvent::StillWaiting {
                    texture: Some(20.0)
                }
            );
            assert_eq!(sm.state(), TrackState::WaitingForObject);
            assert!(sm.context().reference_patch.is_none());
        }
    }

    #[test]
    fn test_acquisition_sets_reference_and_position() {
        let mut sm = TrackingStateMachine::new(small_config(), 0.0);
        let mut matcher = ScriptedMatcher::new(50.0);
        let frame = flat_frame(40, 30, 128, 10.0);

        let step = sm.update(&frame, &mut matcher).unwrap();

        assert_eq!(
            step.event,
            TrackEvent::Acquired {
                position: Position::new(15, 10),
                texture: 50.0
            }
        );
        assert!(sm.is_tracking());
        let ctx = sm.context();
        assert_eq!(ctx.last_known_position, Some(Position::new(15, 10)));
        let patch = ctx.reference_patch.as_ref().unwrap();
        assert_eq!((patch.width, patch.height), (10, 10));
        assert_eq!(ctx.last_acquisition_attempt_ms, Some(10.0));
    }

    #[test]
    fn test_confident_match_moves_and_retemplates() {
        let mut sm = TrackingStateMachine::new(small_config(), 0.0);
        let mut matcher = ScriptedMatcher::new(50.0);
        matcher.matches.push_back(hit(22, 11, 0.95));

        sm.update(&flat_frame(40, 30, 128, 0.0), &mut matcher).unwrap();
        let step = sm
            .update(&textured_frame(40, 30, 0, 33.0), &mut matcher)
            .unwrap();

        assert_eq!(step.displacement_px(), 7);
        assert!(sm.is_tracking());
        let ctx = sm.context();
        assert_eq!(ctx.last_known_position, Some(Position::new(22, 11)));
        let patch = ctx.reference_patch.as_ref().unwrap();
        assert_eq!(patch.origin, Position::new(22, 11));
        assert_eq!(patch.captured_at_ms, 33.0);
    }

    #[test]
    fn test_weak_match_drops_to_waiting() {
        let mut sm = TrackingStateMachine::new(small_config(), 0.0);
        let mut matcher = ScriptedMatcher::new(50.0);
        matcher.matches.push_back(hit(20, 10, 0.75));

        sm.update(&flat_frame(40, 30, 128, 0.0), &mut matcher).unwrap();
        let step = sm.update(&flat_frame(40, 30, 128, 33.0), &mut matcher).unwrap();

        assert_eq!(
            step.event,
            TrackEvent::Lost {
                confidence: Some(0.75)
            }
        );
        assert_eq!(sm.state(), TrackState::WaitingForObject);
        assert!(sm.context().reference_patch.is_none());
        assert!(sm.context().last_known_position.is_none());
    }

    #[test]
    fn test_periodic_reset_drops_a_good_lock() {
        let mut sm = TrackingStateMachine::new(small_config(), 0.0);
        // Texture fails after the first acquisition so the reset is observable
        let mut matcher = ScriptedMatcher::new(50.0);
        matcher.default_match = hit(15, 10, 1.0);

        sm.update(&flat_frame(40, 30, 128, 0.0), &mut matcher).unwrap();
        assert!(sm.is_tracking());
        matcher.texture = 0.0;

        let mut t = 0.0;
        while t < 990.0 {
            t += 33.0;
            let step = sm.update(&flat_frame(40, 30, 128, t), &mut matcher).unwrap();
            assert!(!step.periodic_reset);
            assert!(sm.is_tracking(), "still locked at {}", t);
        }

        let step = sm.update(&flat_frame(40, 30, 128, 1000.0), &mut matcher).unwrap();
        assert!(step.periodic_reset);
        assert_eq!(sm.state(), TrackState::WaitingForObject);
        assert_eq!(sm.context().last_reset_ms, 1000.0);
    }

    #[test]
    fn test_reacquires_on_reset_frame() {
        let mut sm = TrackingStateMachine::new(small_config(), 0.0);
        let mut matcher = ScriptedMatcher::new(50.0);
        matcher.default_match = hit(30, 10, 1.0);

        sm.update(&flat_frame(40, 30, 128, 0.0), &mut matcher).unwrap();
        sm.update(&flat_frame(40, 30, 128, 500.0), &mut matcher).unwrap();
        assert_eq!(sm.context().last_known_position, Some(Position::new(30, 10)));

        let step = sm.update(&flat_frame(40, 30, 128, 1000.0), &mut matcher).unwrap();
        assert!(step.periodic_reset);
        // back at the acquisition box, not the last seen location
        assert_eq!(
            step.event,
            TrackEvent::Acquired {
                position: Position::new(15, 10),
                texture: 50.0
            }
        );
    }

    #[test]
    fn test_search_band_is_clamped() {
        let sm = TrackingStateMachine::new(small_config(), 0.0);
        assert_eq!(sm.search_band(40, 30), SearchBand { y: 6, height: 18 });

        let sm = TrackingStateMachine::new(
            TrackerConfig {
                search_margin_px: 50,
                ..small_config()
            },
            0.0,
        );
        assert_eq!(sm.search_band(40, 30), SearchBand { y: 0, height: 30 });
    }

    #[test]
    fn test_box_larger_than_frame_keeps_waiting() {
        let mut sm = TrackingStateMachine::new(small_config(), 0.0);
        let mut matcher = ScriptedMatcher::new(99.0);
        let step = sm.update(&flat_frame(8, 8, 0, 0.0), &mut matcher).unwrap();
        assert_eq!(step.event, TrackEvent::StillWaiting { texture: None });
    }

    #[test]
    fn test_native_matcher_follows_moving_texture() {
        let mut sm = TrackingStateMachine::new(small_config(), 0.0);
        let mut matcher = NativeMatcher::new();

        let step = sm
            .update(&textured_frame(60, 30, 0, 0.0), &mut matcher)
            .unwrap();
        assert!(matches!(step.event, TrackEvent::Acquired { .. }));

        for i in 1..=4 {
            let step = sm
                .update(&textured_frame(60, 30, 3 * i, 33.0 * i as f64), &mut matcher)
                .unwrap();
            assert_eq!(step.displacement_px(), 3, "frame {}", i);
        }
        assert_eq!(sm.context().last_known_position, Some(Position::new(37, 10)));
    }
}
