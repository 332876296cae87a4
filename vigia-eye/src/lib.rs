//! vigia-eye: capture decisions and line-crossing counts for tracked detections
//!
//! Consumes per-frame detections from an upstream detector/tracker and
//! decides which tracks deserve an evidence capture and which ones crossed
//! a virtual counting line.
//!
//! The [`CaptureEngine`] runs on the caller's thread and hands approved
//! captures to a [`CaptureWriter`] in the background. The [`LineCounter`]
//! owns a worker thread fed through a latest-wins slot and publishes count
//! snapshots, crossing events and log lines on separate channels.

pub mod config;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod log_sink;
pub mod processing;
pub mod writer;
mod utils;

pub use config::{CameraConfig, CaptureThresholds, CounterConfig, VigiaConfig};
pub use detection::{BoundingBox, Detection, Frame, ObjectClass};
pub use error::VisionError;
pub use geometry::{Direction, LineModel, Side};
pub use log_sink::{EventFileSink, FanOutSink, LogSink, TracingSink};
pub use processing::{CaptureEngine, CaptureStats, CountSnapshot, CounterState, CrossingEvent, LineCounter};
pub use writer::{CaptureMetadata, CaptureRecord, CaptureRequest, CaptureWriter, DiskCaptureWriter};
