// src/analysis/speed_smoother.rs

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedSample {
    pub timestamp_ms: f64,
    pub speed_kmh: f64,
}

/// Trailing time-window average of instantaneous speed.
///
/// Samples go in every frame; the displayed value only changes once per
/// window so the readout does not flicker at frame rate.
pub struct SpeedSmoother {
    samples: VecDeque<SpeedSample>,
    window_ms: f64,
    displayed_kmh: f64,
    last_update_ms: Option<f64>,
}

impl SpeedSmoother {
    /// # Arguments
    /// * `window_ms` - Trailing window length, also the display update period
    pub fn new(window_ms: f64) -> Self {
        Self {
            samples: VecDeque::with_capacity(64),
            window_ms,
            displayed_kmh: 0.0,
            last_update_ms: None,
        }
    }

    /// Record this frame's sample. Returns the new displayed value when the
    /// update period elapsed on this call.
    ///
    /// `tracking` decides whether the refreshed value is the window mean or 0.
    pub fn push(&mut self, timestamp_ms: f64, speed_kmh: f64, tracking: bool) -> Option<f64> {
        self.samples.push_back(SpeedSample {
            timestamp_ms,
            speed_kmh,
        });

        // Timestamps are non-decreasing, so stale samples are all at the front
        while let Some(front) = self.samples.front() {
            if timestamp_ms - front.timestamp_ms > self.window_ms {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        let last_update = *self.last_update_ms.get_or_insert(timestamp_ms);
        if timestamp_ms - last_update < self.window_ms {
            return None;
        }

        self.displayed_kmh = if tracking && !self.samples.is_empty() {
            self.mean_kmh()
        } else {
            0.0
        };
        self.last_update_ms = Some(timestamp_ms);
        Some(self.displayed_kmh)
    }

    fn mean_kmh(&self) -> f64 {
        let sum: f64 = self.samples.iter().map(|s| s.speed_kmh).sum();
        sum / self.samples.len() as f64
    }

    pub fn displayed_kmh(&self) -> f64 {
        self.displayed_kmh
    }

    /// Drop the readout to 0 immediately (scan mode switched off)
    pub fn force_zero(&mut self) {
        self.displayed_kmh = 0.0;
    }

    pub fn samples(&self) -> impl Iterator<Item = &SpeedSample> {
        self.samples.iter()
    }

    pub fn history_size(&self) -> usize {
        self.samples.len()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.displayed_kmh = 0.0;
        self.last_update_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_retains_only_recent_samples() {
        let mut smoother = SpeedSmoother::new(1000.0);
        let times = [0.0, 200.0, 500.0, 900.0, 1000.0, 1100.0, 1600.0, 2050.0];

        for (i, &t) in times.iter().enumerate() {
            smoother.push(t, i as f64, true);

            let expected: Vec<f64> = times[..=i]
                .iter()
                .copied()
                .filter(|&s| t - s <= 1000.0)
                .collect();
            let retained: Vec<f64> = smoother.samples().map(|s| s.timestamp_ms).collect();
            assert_eq!(retained, expected, "at t={}", t);
        }
    }

    #[test]
    fn test_display_updates_once_per_window() {
        let mut smoother = SpeedSmoother::new(1000.0);

        assert_eq!(smoother.push(0.0, 10.0, true), None);
        assert_eq!(smoother.push(400.0, 20.0, true), None);
        assert_eq!(smoother.push(800.0, 30.0, true), None);
        assert_eq!(smoother.displayed_kmh(), 0.0);

        // window [0, 1000] holds all four samples
        let shown = smoother.push(1000.0, 40.0, true).unwrap();
        assert!((shown - 25.0).abs() < 1e-12);

        // next refresh is due at 2000
        assert_eq!(smoother.push(1500.0, 100.0, true), None);
        assert!((smoother.displayed_kmh() - 25.0).abs() < 1e-12);

        // window [1000, 2000] = 40, 100, 70
        let shown = smoother.push(2000.0, 70.0, true).unwrap();
        assert!((shown - 70.0).abs() < 1e-12);
    }

    #[test]
    fn test_display_is_zero_when_not_tracking() {
        let mut smoother = SpeedSmoother::new(500.0);
        smoother.push(0.0, 12.0, true);
        smoother.push(250.0, 14.0, true);

        let shown = smoother.push(500.0, 16.0, false).unwrap();
        assert_eq!(shown, 0.0);
        assert_eq!(smoother.displayed_kmh(), 0.0);
    }

    #[test]
    fn test_force_zero_keeps_samples() {
        let mut smoother = SpeedSmoother::new(100.0);
        smoother.push(0.0, 5.0, true);
        smoother.push(100.0, 5.0, true);
        assert_eq!(smoother.displayed_kmh(), 5.0);

        smoother.force_zero();
        assert_eq!(smoother.displayed_kmh(), 0.0);
        assert_eq!(smoother.history_size(), 2);
    }
}
