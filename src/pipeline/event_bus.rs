// src/pipeline/event_bus.rs
//
// Transition log. The session publishes what happened on each frame; the
// driver drains and logs it. Nothing in the core reads it back.

use crate::types::Position;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    ScanToggled {
        active: bool,
        timestamp_ms: f64,
    },
    Acquired {
        position: Position,
        texture: f64,
        timestamp_ms: f64,
    },
    Lost {
        confidence: Option<f64>,
        timestamp_ms: f64,
    },
    PeriodicReset {
        timestamp_ms: f64,
    },
    SlicesCaptured {
        count: usize,
        composite_width: usize,
    },
    ResultCleared,
}

pub struct EventBus {
    events: VecDeque<ScanEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: ScanEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<ScanEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}

/// Log one event at the level it deserves
pub fn log_event(event: &ScanEvent) {
    match event {
        ScanEvent::ScanToggled { active, .. } => {
            if *active {
                info!("Scan mode ON. Move the object through the centre box to start.");
            } else {
                info!("Scan mode OFF");
            }
        }
        ScanEvent::Acquired {
            position,
            texture,
            timestamp_ms,
        } => debug!(
            "Acquired at ({}, {}) texture {:.1} @ {:.0}ms",
            position.x, position.y, texture, timestamp_ms
        ),
        ScanEvent::Lost {
            confidence,
            timestamp_ms,
        } => debug!("Lost (confidence {:?}) @ {:.0}ms", confidence, timestamp_ms),
        ScanEvent::PeriodicReset { timestamp_ms } => {
            debug!("Tracking position reset to centre @ {:.0}ms", timestamp_ms)
        }
        ScanEvent::SlicesCaptured {
            count,
            composite_width,
        } => debug!("+{} slice(s) → {} columns", count, composite_width),
        ScanEvent::ResultCleared => info!("Scan result cleared"),
    }
}
