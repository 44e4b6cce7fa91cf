// src/analysis/speed.rs

/// m/s → km/h
pub const MPS_TO_KMH: f64 = 3.6;

/// Turns a per-frame pixel displacement into a physical speed.
#[derive(Debug, Clone, Copy)]
pub struct DisplacementToSpeed {
    pixels_per_meter: f64,
}

impl DisplacementToSpeed {
    pub fn new(pixels_per_meter: f64) -> Self {
        Self { pixels_per_meter }
    }

    /// Instantaneous speed in km/h. Direction is ignored.
    ///
    /// A non-positive interval (repeated or out-of-order timestamps) gives 0.
    pub fn speed_kmh(&self, displacement_px: f64, elapsed_s: f64) -> f64 {
        if elapsed_s <= 0.0 || self.pixels_per_meter <= 0.0 {
            return 0.0;
        }
        (displacement_px.abs() / self.pixels_per_meter / elapsed_s) * MPS_TO_KMH
    }

    /// Same as [`speed_kmh`](Self::speed_kmh) with millisecond timestamps
    pub fn speed_between_kmh(&self, displacement_px: f64, prev_ms: f64, now_ms: f64) -> f64 {
        self.speed_kmh(displacement_px, (now_ms - prev_ms) / 1000.0)
    }
}
