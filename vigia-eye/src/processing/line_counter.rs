//! Line-crossing counter
//!
//! A dedicated worker thread consumes detection batches from a single-slot
//! queue where the newest batch always replaces an unprocessed one. The
//! worker owns the per-track side memory and the counts; other threads only
//! see counts through published snapshots.

use crate::config::CounterConfig;
use crate::detection::{Detection, ObjectClass};
use crate::error::VisionError;
use crate::geometry::{Direction, LineModel, Side};
use crate::log_sink::LogSink;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Worker re-checks the stop flag at least this often while idle
const WAKE_INTERVAL: Duration = Duration::from_millis(100);

const EVENT_BUFFER_SIZE: usize = 256;

/// `direction -> class label -> count`
pub type CountSnapshot = BTreeMap<String, BTreeMap<String, u64>>;

/// Emitted once per detected crossing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossingEvent {
    pub track_id: u64,
    pub class_label: String,
    pub direction: Direction,
}

/// Lifecycle of a counter. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterState {
    Idle,
    Running,
    Stopped,
}

struct Batch {
    detections: Vec<Detection>,
    frame_size: (u32, u32),
}

struct LineSlot {
    model: LineModel,
    generation: u64,
}

struct Shared {
    pending: Mutex<Option<Batch>>,
    wake: Condvar,
    running: AtomicBool,
    enabled: AtomicBool,
    reset_requested: AtomicBool,
    line: Mutex<LineSlot>,
    latest: RwLock<CountSnapshot>,
    processed: AtomicU64,
}

/// Counts tracks crossing a virtual line, per direction and class.
pub struct LineCounter {
    shared: Arc<Shared>,
    state: Mutex<CounterState>,
    vessel_model: bool,
    counts_tx: broadcast::Sender<CountSnapshot>,
    events_tx: broadcast::Sender<CrossingEvent>,
    log: Arc<dyn LogSink>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LineCounter {
    pub fn new(config: CounterConfig, log: Arc<dyn LogSink>) -> Result<Self, VisionError> {
        config.line.validate().map_err(VisionError::Config)?;
        if config.line.is_degenerate() {
            warn!("Counting line has identical endpoints, no crossings will register");
        }

        let (counts_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);

        Ok(Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(None),
                wake: Condvar::new(),
                running: AtomicBool::new(false),
                enabled: AtomicBool::new(config.enabled),
                reset_requested: AtomicBool::new(false),
                line: Mutex::new(LineSlot {
                    model: config.line,
                    generation: 0,
                }),
                latest: RwLock::new(empty_counts()),
                processed: AtomicU64::new(0),
            }),
            state: Mutex::new(CounterState::Idle),
            vessel_model: config.vessel_model,
            counts_tx,
            events_tx,
            log,
            worker: Mutex::new(None),
        })
    }

    /// Spawn the worker thread. A stopped counter cannot be restarted.
    pub fn start(&self) -> Result<(), VisionError> {
        let mut state = self.state.lock();
        match *state {
            CounterState::Running => {
                return Err(VisionError::Counter("Counter is already running".to_string()))
            }
            CounterState::Stopped => {
                return Err(VisionError::Counter("Counter was stopped and cannot restart".to_string()))
            }
            CounterState::Idle => {}
        }

        self.shared.running.store(true, Ordering::Release);
        let worker = Worker {
            shared: Arc::clone(&self.shared),
            vessel_model: self.vessel_model,
            counts_tx: self.counts_tx.clone(),
            events_tx: self.events_tx.clone(),
            log: Arc::clone(&self.log),
        };
        let handle = std::thread::Builder::new()
            .name("line-counter".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                VisionError::Counter(format!("Failed to spawn counter thread: {}", e))
            })?;

        *self.worker.lock() = Some(handle);
        *state = CounterState::Running;
        info!("Line counter started");
        Ok(())
    }

    /// Hand a batch to the worker, replacing any batch it has not picked up
    /// yet. Never waits for processing. Returns `false` when the batch was
    /// dropped because the counter is not running or is disabled.
    pub fn update(&self, detections: Vec<Detection>, frame_size: (u32, u32)) -> bool {
        if !self.shared.running.load(Ordering::Acquire) || !self.shared.enabled.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut pending = self.shared.pending.lock();
            if pending.is_some() {
                debug!("Replacing unprocessed counter batch");
            }
            *pending = Some(Batch {
                detections,
                frame_size,
            });
        }
        self.shared.wake.notify_one();
        true
    }

    /// Replace the counting line. Remembered sides are cleared, counts are kept.
    pub fn set_line(&self, line: LineModel) -> Result<(), VisionError> {
        line.validate().map_err(VisionError::Config)?;
        if line.is_degenerate() {
            warn!("Counting line has identical endpoints, no crossings will register");
        }
        {
            let mut slot = self.shared.line.lock();
            slot.model = line;
            slot.generation = slot.generation.wrapping_add(1);
        }
        self.log.log(&format!(
            "Línea actualizada: ({:.2}, {:.2}) - ({:.2}, {:.2})",
            line.start.0, line.start.1, line.end.0, line.end.1
        ));
        Ok(())
    }

    pub fn line(&self) -> LineModel {
        self.shared.line.lock().model
    }

    /// Start accepting batches again, from zeroed counts.
    pub fn enable(&self) {
        self.shared.reset_requested.store(true, Ordering::Release);
        self.shared.enabled.store(true, Ordering::Release);
        self.shared.wake.notify_one();
        self.log.log("Conteo activado");
    }

    /// Drop incoming batches and zero the counts.
    pub fn disable(&self) {
        self.shared.enabled.store(false, Ordering::Release);
        self.shared.reset_requested.store(true, Ordering::Release);
        self.shared.pending.lock().take();
        self.shared.wake.notify_one();
        self.log.log("Conteo desactivado");
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    pub fn state(&self) -> CounterState {
        *self.state.lock()
    }

    /// Latest published counts.
    pub fn counts(&self) -> CountSnapshot {
        self.shared.latest.read().clone()
    }

    /// Number of batches the worker has finished.
    pub fn processed_batches(&self) -> u64 {
        self.shared.processed.load(Ordering::Acquire)
    }

    /// Receive a full count snapshot after every processed batch.
    pub fn subscribe_counts(&self) -> broadcast::Receiver<CountSnapshot> {
        self.counts_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CrossingEvent> {
        self.events_tx.subscribe()
    }

    /// Signal the worker to exit. Returns immediately; a batch being
    /// processed is finished, a pending one is discarded.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if *state == CounterState::Stopped {
            return;
        }
        self.shared.running.store(false, Ordering::Release);
        self.shared.wake.notify_all();
        *state = CounterState::Stopped;
        info!("Line counter stopping");
    }

    /// Stop and wait for the worker thread to exit.
    pub fn join(&self) {
        self.stop();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("Line counter thread panicked");
            }
        }
    }
}

impl Drop for LineCounter {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    shared: Arc<Shared>,
    vessel_model: bool,
    counts_tx: broadcast::Sender<CountSnapshot>,
    events_tx: broadcast::Sender<CrossingEvent>,
    log: Arc<dyn LogSink>,
}

impl Worker {
    fn run(self) {
        let mut sides: HashMap<u64, Side> = HashMap::new();
        let mut counts = empty_counts();
        let mut generation = self.shared.line.lock().generation;

        loop {
            let batch = {
                let mut pending = self.shared.pending.lock();
                if pending.is_none() && self.shared.running.load(Ordering::Acquire) {
                    self.shared.wake.wait_for(&mut pending, WAKE_INTERVAL);
                }
                pending.take()
            };

            if !self.shared.running.load(Ordering::Acquire) {
                break;
            }

            if self.shared.reset_requested.swap(false, Ordering::AcqRel) {
                sides.clear();
                counts = empty_counts();
                self.publish(&counts);
            }

            let Some(batch) = batch else { continue };

            let line = {
                let slot = self.shared.line.lock();
                if slot.generation != generation {
                    generation = slot.generation;
                    sides.clear();
                }
                slot.model
            };

            self.process(&batch, &line, &mut sides, &mut counts);
            self.publish(&counts);
            self.shared.processed.fetch_add(1, Ordering::AcqRel);
        }

        debug!("Line counter worker exited");
    }

    fn process(
        &self,
        batch: &Batch,
        line: &LineModel,
        sides: &mut HashMap<u64, Side>,
        counts: &mut CountSnapshot,
    ) {
        let (width, height) = batch.frame_size;
        if width == 0 || height == 0 {
            warn!("Skipping counter batch with empty frame size");
            return;
        }

        for detection in &batch.detections {
            let Some(track_id) = detection.track_id else { continue };
            let (cx, cy) = detection.center();
            if !cx.is_finite() || !cy.is_finite() {
                continue;
            }

            let side = line.side_of(cx, cy, batch.frame_size);
            let previous = sides.insert(track_id, side);
            let Some(direction) = previous.and_then(|prev| Direction::from_flip(prev, side)) else {
                continue;
            };

            let class = ObjectClass::classify(detection.class_id, self.vessel_model);
            let label = class.count_label().to_string();
            *counts
                .entry(direction.label().to_string())
                .or_default()
                .entry(label.clone())
                .or_insert(0) += 1;

            self.log.log(&format!(
                "Cruce {}: {} (ID: {})",
                direction,
                class.display_name(),
                track_id
            ));
            let _ = self.events_tx.send(CrossingEvent {
                track_id,
                class_label: label,
                direction,
            });
        }
    }

    fn publish(&self, counts: &CountSnapshot) {
        *self.shared.latest.write() = counts.clone();
        // No subscribers is fine
        let _ = self.counts_tx.send(counts.clone());
    }
}

fn empty_counts() -> CountSnapshot {
    Direction::ALL
        .iter()
        .map(|d| (d.label().to_string(), BTreeMap::new()))
        .collect()
}
