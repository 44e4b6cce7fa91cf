// src/output/mod.rs
//
// Where the measured speed and the composite go. The session only exposes
// values; these sinks own transport and persistence.

pub mod composite;
pub mod pipe;
pub mod shared_slot;

use crate::types::{OutputConfig, Transport};
use anyhow::Result;
use std::sync::atomic::AtomicBool;
use tracing::info;

pub use composite::{composite_path_for, report_path_for, save_composite, write_report, ScanReport};
pub use pipe::PipeSink;
pub use shared_slot::SharedSpeedSlot;

pub trait SpeedSink {
    /// Publish one reading in km/h. Transport-level disconnects are handled
    /// inside the sink and never surface here.
    fn publish(&mut self, speed_kmh: f64) -> Result<()>;

    fn name(&self) -> &'static str;
}

pub struct NullSink;

impl SpeedSink for NullSink {
    fn publish(&mut self, _speed_kmh: f64) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Non-negative, two fractional digits
pub fn quantize_speed(speed_kmh: f64) -> f64 {
    if !speed_kmh.is_finite() || speed_kmh <= 0.0 {
        return 0.0;
    }
    (speed_kmh * 100.0).round() / 100.0
}

pub fn format_speed(speed_kmh: f64) -> String {
    format!("{:.2}", quantize_speed(speed_kmh))
}

/// Build the configured sink. Opening a FIFO waits for a reader until `stop`.
pub fn open_sink(config: &OutputConfig, stop: &AtomicBool) -> Result<Box<dyn SpeedSink>> {
    let sink: Box<dyn SpeedSink> = match config.transport {
        Transport::None => Box::new(NullSink),
        Transport::Pipe => Box::new(PipeSink::open(&config.pipe_path, stop)?),
        Transport::SharedMemory => {
            Box::new(SharedSpeedSlot::create(&config.shm_name, &config.sem_name)?)
        }
    };
    info!("Speed output: {}", sink.name());
    Ok(sink)
}

/// Decides which frames publish, by stream time
#[derive(Debug, Clone)]
pub struct PublishSchedule {
    interval_ms: f64,
    last_ms: Option<f64>,
}

impl PublishSchedule {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms as f64,
            last_ms: None,
        }
    }

    pub fn due(&mut self, now_ms: f64) -> bool {
        match self.last_ms {
            Some(last) if now_ms - last < self.interval_ms => false,
            _ => {
                self.last_ms = Some(now_ms);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_two_decimals() {
        assert_eq!(format_speed(3.14159), "3.14");
        assert_eq!(format_speed(7.2), "7.20");
        assert_eq!(format_speed(-1.0), "0.00");
        assert_eq!(format_speed(f64::NAN), "0.00");
    }

    #[test]
    fn test_schedule_every_frame() {
        let mut s = PublishSchedule::new(0);
        assert!(s.due(0.0));
        assert!(s.due(0.0));
        assert!(s.due(16.0));
    }

    #[test]
    fn test_schedule_interval() {
        let mut s = PublishSchedule::new(1000);
        assert!(s.due(0.0));
        assert!(!s.due(500.0));
        assert!(!s.due(999.0));
        assert!(s.due(1000.0));
        assert!(!s.due(1500.0));
        assert!(s.due(2100.0));
    }
}
