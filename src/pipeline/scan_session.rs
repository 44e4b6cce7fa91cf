// src/pipeline/scan_session.rs
//
// The per-stream context object. Owns the tracker, the speed smoother and
// the slit accumulator, and runs them in order for each frame. Everything a
// run mutates lives here; nothing is process-wide.

use super::event_bus::{EventBus, ScanEvent};
use super::metrics::ScanMetrics;
use crate::analysis::correlation::ImageMatcher;
use crate::analysis::{
    CompositeImage, DisplacementToSpeed, SlitAccumulator, SpeedSmoother, TrackEvent, TrackState,
    TrackStep, TrackerConfig, TrackingStateMachine,
};
use crate::types::{Config, Frame, PublishedValue};
use anyhow::Result;

/// Result of one `process_frame` call
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    pub scan_active: bool,
    pub state: TrackState,
    pub step: Option<TrackStep>,
    pub instantaneous_kmh: f64,
    pub displayed_kmh: f64,
    /// Some when the smoothed readout was recomputed on this frame
    pub display_refreshed: Option<f64>,
    pub slices_captured: usize,
}

pub struct ScanSession {
    scan_active: bool,
    tracker: TrackingStateMachine,
    converter: DisplacementToSpeed,
    smoother: SpeedSmoother,
    accumulator: SlitAccumulator,
    events: EventBus,
    metrics: ScanMetrics,
    last_frame_ms: Option<f64>,
    instantaneous_kmh: f64,
}

impl ScanSession {
    pub fn new(config: &Config, now_ms: f64) -> Self {
        let cal = &config.calibration;
        Self {
            scan_active: false,
            tracker: TrackingStateMachine::new(TrackerConfig::from(&config.tracking), now_ms),
            converter: DisplacementToSpeed::new(cal.pixels_per_meter),
            smoother: SpeedSmoother::new(config.smoothing.window_ms),
            accumulator: SlitAccumulator::new(
                cal.capture_distance_px,
                cal.speed_threshold_kmh,
                config.scan.slit_x,
            ),
            events: EventBus::new(256),
            metrics: ScanMetrics::new(),
            last_frame_ms: None,
            instantaneous_kmh: 0.0,
        }
    }

    // ── Mode control ────────────────────────────────────────────────────

    pub fn toggle_scan(&mut self, now_ms: f64) {
        self.set_scan_active(!self.scan_active, now_ms);
    }

    /// Turning scan mode off drops the lock and zeroes the readout; the
    /// composite is kept. Turning it on starts a fresh context.
    pub fn set_scan_active(&mut self, active: bool, now_ms: f64) {
        if active == self.scan_active {
            return;
        }
        self.scan_active = active;
        self.tracker.restart(now_ms);
        if !active {
            self.smoother.force_zero();
            self.instantaneous_kmh = 0.0;
        }
        self.events.publish(ScanEvent::ScanToggled {
            active,
            timestamp_ms: now_ms,
        });
    }

    pub fn clear_result(&mut self) {
        self.accumulator.clear();
        self.events.publish(ScanEvent::ResultCleared);
    }

    // ── Per-frame ───────────────────────────────────────────────────────

    pub fn process_frame(
        &mut self,
        frame: &Frame,
        matcher: &mut dyn ImageMatcher,
    ) -> Result<FrameOutcome> {
        let now = frame.timestamp_ms;
        let prev = self.last_frame_ms.replace(now);
        self.metrics.inc(&self.metrics.total_frames);

        let mut instantaneous_kmh = 0.0;
        let mut slices_captured = 0;
        let mut step = None;

        if self.scan_active {
            let s = self.tracker.update(frame, matcher)?;
            self.record(&s, now);

            if let TrackEvent::Moved {
                displacement_px, ..
            } = s.event
            {
                let d = displacement_px as f64;
                instantaneous_kmh = match prev {
                    Some(p) => self.converter.speed_between_kmh(d, p, now),
                    None => 0.0,
                };
                slices_captured = self.accumulator.update(frame, d, instantaneous_kmh)?;
                if slices_captured > 0 {
                    self.metrics
                        .add(&self.metrics.slices_captured, slices_captured as u64);
                    self.events.publish(ScanEvent::SlicesCaptured {
                        count: slices_captured,
                        composite_width: self.accumulator.slice_count(),
                    });
                }
            }
            step = Some(s);
        }

        let tracking = self.scan_active && self.tracker.is_tracking();
        if tracking {
            self.metrics.inc(&self.metrics.tracked_frames);
        }
        self.instantaneous_kmh = instantaneous_kmh;
        let display_refreshed = self.smoother.push(now, instantaneous_kmh, tracking);

        Ok(FrameOutcome {
            scan_active: self.scan_active,
            state: self.tracker.state(),
            step,
            instantaneous_kmh,
            displayed_kmh: self.smoother.displayed_kmh(),
            display_refreshed,
            slices_captured,
        })
    }

    fn record(&mut self, step: &TrackStep, now: f64) {
        if step.periodic_reset {
            self.metrics.inc(&self.metrics.periodic_resets);
            self.events
                .publish(ScanEvent::PeriodicReset { timestamp_ms: now });
        }
        match step.event {
            TrackEvent::Acquired { position, texture } => {
                self.metrics.inc(&self.metrics.acquisitions);
                self.events.publish(ScanEvent::Acquired {
                    position,
                    texture,
                    timestamp_ms: now,
                });
            }
            TrackEvent::Lost { confidence } => {
                self.metrics.inc(&self.metrics.losses);
                self.events.publish(ScanEvent::Lost {
                    confidence,
                    timestamp_ms: now,
                });
            }
            TrackEvent::Moved { .. } | TrackEvent::StillWaiting { .. } => {}
        }
    }

    // ── Read side ───────────────────────────────────────────────────────

    pub fn is_scan_active(&self) -> bool {
        self.scan_active
    }

    pub fn state(&self) -> TrackState {
        self.tracker.state()
    }

    pub fn tracker(&self) -> &TrackingStateMachine {
        &self.tracker
    }

    pub fn displayed_speed_kmh(&self) -> f64 {
        self.smoother.displayed_kmh()
    }

    pub fn instantaneous_speed_kmh(&self) -> f64 {
        self.instantaneous_kmh
    }

    /// The scalar handed to the speed sink
    pub fn published_speed_kmh(&self, which: PublishedValue) -> f64 {
        match which {
            PublishedValue::Smoothed => self.displayed_speed_kmh(),
            PublishedValue::Instantaneous => self.instantaneous_speed_kmh(),
        }
    }

    pub fn composite(&self) -> Option<&CompositeImage> {
        self.accumulator.composite()
    }

    pub fn slit_x_for(&self, frame_width: usize) -> usize {
        self.accumulator.slit_x_for(frame_width)
    }

    pub fn pending_shift(&self) -> f64 {
        self.accumulator.pending_shift()
    }

    pub fn drain_events(&mut self) -> Vec<ScanEvent> {
        self.events.drain()
    }

    pub fn metrics(&self) -> &ScanMetrics {
        &self.metrics
    }
}
