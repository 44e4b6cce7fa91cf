// src/analysis/mod.rs
//
// Measurement core.
//
// Signal flow per frame:
//   Frame → tracking_state (correlation primitives) → speed → speed_smoother
//                                                           └→ slit_accumulator
//
// Owned together by pipeline::ScanSession.

pub mod correlation;
pub mod slit_accumulator;
pub mod speed;
pub mod speed_smoother;
pub mod tracking_state;

pub use correlation::{ImageMatcher, MatchResult, NativeMatcher};
pub use slit_accumulator::{CompositeImage, SlitAccumulator};
pub use speed::DisplacementToSpeed;
pub use speed_smoother::SpeedSmoother;
pub use tracking_state::{TrackEvent, TrackState, TrackStep, TrackerConfig, TrackingStateMachine};
