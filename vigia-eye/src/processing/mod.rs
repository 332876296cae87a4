//! Capture decisions and line-crossing counting

pub mod capture;
pub mod line_counter;
pub mod tracker;

pub use capture::{CaptureEngine, CaptureStats};
pub use line_counter::{CountSnapshot, CounterState, CrossingEvent, LineCounter};
pub use tracker::{TrackDecision, TrackTable};
