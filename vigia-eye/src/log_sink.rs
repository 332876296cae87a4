//! Human-readable status line sinks

use chrono::Local;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Receives one status line per significant decision.
pub trait LogSink: Send + Sync {
    fn log(&self, text: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, text: &str) {
        self(text)
    }
}

/// Forwards status lines to `tracing` at info level.
pub struct TracingSink {
    camera: String,
}

impl TracingSink {
    pub fn new(camera: impl Into<String>) -> Self {
        Self {
            camera: camera.into(),
        }
    }
}

impl LogSink for TracingSink {
    fn log(&self, text: &str) {
        info!("Cámara {}: {}", self.camera, text);
    }
}

/// Appends timestamped status lines to a plain-text event log.
pub struct EventFileSink {
    camera: String,
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl EventFileSink {
    pub fn new(camera: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            camera: camera.into(),
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format_line(&self, text: &str) -> String {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        format!("[{}] Cámara {}: {}", stamp, self.camera, text)
    }
}

impl LogSink for EventFileSink {
    fn log(&self, text: &str) {
        let line = self.format_line(text);
        let mut guard = self.file.lock();
        if guard.is_none() {
            match OpenOptions::new().create(true).append(true).open(&self.path) {
                Ok(file) => *guard = Some(file),
                Err(e) => {
                    warn!("Cannot open event log {}: {}", self.path.display(), e);
                    return;
                }
            }
        }
        if let Some(file) = guard.as_mut() {
            if let Err(e) = writeln!(file, "{}", line) {
                warn!("Cannot append to event log {}: {}", self.path.display(), e);
                // Reopen on the next line
                *guard = None;
            }
        }
    }
}

/// Sends every line to each inner sink.
pub struct FanOutSink {
    sinks: Vec<Box<dyn LogSink>>,
}

impl FanOutSink {
    pub fn new(sinks: Vec<Box<dyn LogSink>>) -> Self {
        Self { sinks }
    }
}

impl LogSink for FanOutSink {
    fn log(&self, text: &str) {
        for sink in &self.sinks {
            sink.log(text);
        }
    }
}
