// src/pipeline/mod.rs

pub mod event_bus;
pub mod metrics;
pub mod scan_session;

pub use event_bus::{EventBus, ScanEvent};
pub use metrics::{MetricsSummary, ScanMetrics};
pub use scan_session::{FrameOutcome, ScanSession};
