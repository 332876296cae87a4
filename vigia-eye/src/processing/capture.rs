//! Capture decision engine
//!
//! Runs synchronously on the caller's thread for every frame of detections.
//! Per detection it applies, in order: discarded-cell filter, capture
//! budget, per-class movement gate and per-track confidence/time gate.
//! Approved detections are handed to a [`CaptureWriter`] as fire-and-forget
//! tokio tasks; the engine only keeps their handles until they finish.

use crate::config::{CameraConfig, CaptureThresholds};
use crate::detection::{uses_vessel_model, Detection, Frame, ObjectClass, VESSEL_MODEL};
use crate::error::VisionError;
use crate::log_sink::LogSink;
use crate::processing::tracker::{TrackDecision, TrackTable};
use crate::utils::{cell_index, grid_cell};
use crate::writer::{CaptureRequest, CaptureWriter};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Snapshot of the engine's bookkeeping for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub approvals: u32,
    pub budget_remaining: u32,
    pub live_workers: usize,
    pub tracked: usize,
    pub streak: u32,
}

pub struct CaptureEngine {
    camera: CameraConfig,
    vessel_model: bool,
    tracks: TrackTable,
    /// Last accepted center per class id
    movement: HashMap<u32, (f32, f32)>,
    discarded: HashSet<(u32, u32)>,
    touched: HashSet<usize>,
    approvals: u32,
    budget_logged: bool,
    streak: u32,
    streak_started: Instant,
    writer: Arc<dyn CaptureWriter>,
    log: Arc<dyn LogSink>,
    runtime: Handle,
    live: LiveTable,
    permits: Arc<Semaphore>,
    next_worker: u64,
}

impl CaptureEngine {
    /// Create an engine for one camera. Writer tasks are spawned on `runtime`.
    pub fn new(
        camera: CameraConfig,
        writer: Arc<dyn CaptureWriter>,
        log: Arc<dyn LogSink>,
        runtime: Handle,
    ) -> Result<Self, VisionError> {
        camera.validate().map_err(VisionError::Config)?;

        let vessel_model = uses_vessel_model(&camera.models);
        let discarded = camera.discarded_cells.iter().copied().collect();
        let permits = Arc::new(Semaphore::new(worker_bound(&camera.thresholds)));

        Ok(Self {
            camera,
            vessel_model,
            tracks: TrackTable::new(),
            movement: HashMap::new(),
            discarded,
            touched: HashSet::new(),
            approvals: 0,
            budget_logged: false,
            streak: 0,
            streak_started: Instant::now(),
            writer,
            log,
            runtime,
            live: Arc::new(Mutex::new(HashMap::new())),
            permits,
            next_worker: 0,
        })
    }

    /// Evaluate one frame of detections. Returns the requests handed to the writer.
    pub fn evaluate(
        &mut self,
        detections: &[Detection],
        frame_size: (u32, u32),
        frame: Option<&Frame>,
    ) -> Vec<CaptureRequest> {
        self.evaluate_at(detections, frame_size, frame, Instant::now())
    }

    pub fn evaluate_at(
        &mut self,
        detections: &[Detection],
        frame_size: (u32, u32),
        frame: Option<&Frame>,
        now: Instant,
    ) -> Vec<CaptureRequest> {
        self.touched.clear();
        self.reset_streak_if_due(now);

        let frame = match frame {
            Some(f) if f.width() > 0 && f.height() > 0 => Some(f),
            _ => {
                if !detections.is_empty() {
                    warn!("No usable frame for {} detections, skipping captures", detections.len());
                    self.log.log("Advertencia: frame no disponible, capturas omitidas");
                }
                None
            }
        };

        let mut approved = Vec::new();
        for detection in detections {
            let (cx, cy) = detection.center();

            if let Some(cell) = grid_cell(cx, cy, frame_size, self.camera.rows, self.camera.columns) {
                self.touched.insert(cell_index(cell, self.camera.columns));
                if self.discarded.contains(&cell) {
                    debug!(
                        "Track {:?} ignored in discarded cell ({}, {})",
                        detection.track_id, cell.0, cell.1
                    );
                    continue;
                }
            }

            let Some(frame) = frame else { continue };

            if !detection.bbox.is_finite() || !detection.confidence.is_finite() {
                warn!("Skipping detection with non-finite values: {:?}", detection);
                continue;
            }

            if self.budget_exhausted() {
                continue;
            }

            if !self.has_moved(detection.class_id, cx, cy) {
                continue;
            }

            if let Some(track_id) = detection.track_id {
                let decision = self.tracks.should_capture_at(
                    track_id,
                    detection.confidence,
                    (cx, cy),
                    &self.camera.thresholds,
                    now,
                );
                if let TrackDecision::LowConfidence { mean } = decision {
                    debug!("Track {} below confidence floor (mean {:.3})", track_id, mean);
                }
                if !decision.is_approved() {
                    continue;
                }
            }

            let request = self.build_request(detection, frame);
            self.approvals += 1;
            self.streak += 1;
            self.log.log(&format!(
                "Captura aprobada: {} (ID: {}, Conf: {:.2})",
                request.class_label,
                track_label(detection.track_id),
                detection.confidence
            ));
            self.dispatch(request.clone());
            approved.push(request);
        }

        approved
    }

    /// Parse raw detector rows, dropping malformed ones, then evaluate.
    pub fn evaluate_rows(
        &mut self,
        rows: &[Vec<f32>],
        frame_size: (u32, u32),
        frame: Option<&Frame>,
    ) -> Vec<CaptureRequest> {
        let mut detections = Vec::with_capacity(rows.len());
        for row in rows {
            match Detection::from_row(row) {
                Ok(detection) => detections.push(detection),
                Err(e) => {
                    warn!("Dropping detection row: {}", e);
                    self.log.log(&format!("Detección descartada: {}", e));
                }
            }
        }
        self.evaluate(&detections, frame_size, frame)
    }

    /// Movement gate keyed by class id only. The first sighting of a class
    /// always passes; later ones need a displacement of at least the
    /// configured threshold from the last accepted center.
    pub fn has_moved(&mut self, class_id: u32, cx: f32, cy: f32) -> bool {
        let threshold = self.camera.thresholds.movement_threshold_px;
        match self.movement.get(&class_id) {
            Some(&(px, py)) => {
                let distance = (cx - px).hypot(cy - py);
                if distance >= threshold {
                    self.movement.insert(class_id, (cx, cy));
                    true
                } else {
                    false
                }
            }
            None => {
                self.movement.insert(class_id, (cx, cy));
                true
            }
        }
    }

    /// Track gate alone for one sample, using the wall clock. The track keeps
    /// its last known center.
    pub fn should_capture(&mut self, track_id: u64, confidence: f32) -> bool {
        let center = self
            .tracks
            .get(track_id)
            .and_then(|track| track.last_center)
            .unwrap_or_default();
        self.tracks
            .should_capture_at(track_id, confidence, center, &self.camera.thresholds, Instant::now())
            .is_approved()
    }

    /// Forget every track not in `active`. The engine never expires tracks on its own.
    pub fn prune_inactive(&mut self, active: &HashSet<u64>) -> usize {
        self.tracks.prune(active)
    }

    /// Replace the gates and restore the full capture budget.
    pub fn configure_capture_thresholds(
        &mut self,
        confidence_floor: f32,
        min_seconds_between_captures: f64,
        max_captures: u32,
    ) -> Result<(), VisionError> {
        let thresholds = CaptureThresholds {
            confidence_floor,
            min_seconds_between_captures,
            max_captures,
            ..self.camera.thresholds.clone()
        };
        self.set_thresholds(thresholds)
    }

    pub fn set_thresholds(&mut self, thresholds: CaptureThresholds) -> Result<(), VisionError> {
        thresholds.validate().map_err(VisionError::Config)?;
        self.permits = Arc::new(Semaphore::new(worker_bound(&thresholds)));
        self.camera.thresholds = thresholds;
        self.reset_budget();
        Ok(())
    }

    pub fn reset_budget(&mut self) {
        self.approvals = 0;
        self.budget_logged = false;
    }

    /// Mark cells as discarded. Cells outside the grid are ignored.
    pub fn discard_cells(&mut self, cells: &[(u32, u32)]) -> usize {
        let (rows, columns) = (self.camera.rows, self.camera.columns);
        let added = cells
            .iter()
            .filter(|(r, c)| *r < rows && *c < columns)
            .filter(|cell| self.discarded.insert(**cell))
            .count();
        self.sync_discarded();
        added
    }

    /// Re-enable previously discarded cells.
    pub fn enable_cells(&mut self, cells: &[(u32, u32)]) -> usize {
        let removed = cells.iter().filter(|cell| self.discarded.remove(*cell)).count();
        if removed > 0 {
            self.log.log(&format!("Celdas habilitadas: {}", removed));
        }
        self.sync_discarded();
        removed
    }

    /// Cell indices (row-major) touched by the last `evaluate` call.
    pub fn touched_cells(&self) -> &HashSet<usize> {
        &self.touched
    }

    pub fn camera_config(&self) -> &CameraConfig {
        &self.camera
    }

    pub fn tracks(&self) -> &TrackTable {
        &self.tracks
    }

    pub fn live_workers(&self) -> usize {
        self.live.lock().len()
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            approvals: self.approvals,
            budget_remaining: self.camera.thresholds.max_captures.saturating_sub(self.approvals),
            live_workers: self.live_workers(),
            tracked: self.tracks.len(),
            streak: self.streak,
        }
    }

    /// Wait for every in-flight writer task. Returns how many were awaited.
    pub async fn flush(&self) -> usize {
        let handles: Vec<JoinHandle<()>> = self.live.lock().drain().map(|(_, h)| h).collect();
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Capture task panicked: {}", e);
            }
        }
        count
    }

    fn reset_streak_if_due(&mut self, now: Instant) {
        let interval = Duration::from_secs(self.camera.thresholds.streak_reset_secs);
        if now.saturating_duration_since(self.streak_started) >= interval {
            if self.streak > 0 {
                debug!("Resetting capture streak after {} approvals", self.streak);
            }
            self.streak = 0;
            self.streak_started = now;
        }
    }

    fn budget_exhausted(&mut self) -> bool {
        if self.approvals < self.camera.thresholds.max_captures {
            return false;
        }
        if !self.budget_logged {
            self.budget_logged = true;
            warn!("Capture budget of {} reached", self.camera.thresholds.max_captures);
            self.log.log(&format!(
                "Límite de capturas alcanzado ({})",
                self.camera.thresholds.max_captures
            ));
        }
        true
    }

    fn build_request(&self, detection: &Detection, frame: &Frame) -> CaptureRequest {
        let class = ObjectClass::classify(detection.class_id, self.vessel_model);
        let bbox = detection.bbox;
        CaptureRequest {
            frame: Arc::clone(frame),
            bbox,
            track_id: detection.track_id,
            class,
            coordinates: (bbox.x1, bbox.y1, bbox.x2, bbox.y2, detection.confidence),
            model_label: self.model_label(class),
            class_label: class.display_name(),
            camera: self.camera.camera.clone(),
        }
    }

    fn model_label(&self, class: ObjectClass) -> String {
        if class == ObjectClass::Vessel {
            return VESSEL_MODEL.to_string();
        }
        self.camera
            .models
            .iter()
            .find(|m| m.as_str() != VESSEL_MODEL)
            .or_else(|| self.camera.models.first())
            .cloned()
            .unwrap_or_else(|| "desconocido".to_string())
    }

    fn dispatch(&mut self, request: CaptureRequest) {
        let id = self.next_worker;
        self.next_worker = self.next_worker.wrapping_add(1);

        let writer = Arc::clone(&self.writer);
        let log = Arc::clone(&self.log);
        let permits = Arc::clone(&self.permits);
        let live = Arc::clone(&self.live);

        // Hold the table lock across spawn so the task cannot remove itself
        // before its handle is registered.
        let mut table = self.live.lock();
        let handle = self.runtime.spawn(async move {
            let _entry = LiveEntry { live, id };
            let _permit = permits.acquire_owned().await.ok();
            let track = request.track_id;
            match writer.write(request).await {
                Ok(record) => {
                    debug!("Capture for track {:?} stored at {}", track, record.image_path.display());
                }
                Err(e) => {
                    error!("Capture for track {:?} failed: {}", track, e);
                    log.log(&format!("Error guardando captura (ID: {}): {}", track_label(track), e));
                }
            }
        });
        table.insert(id, handle);
    }

    fn sync_discarded(&mut self) {
        let mut cells: Vec<(u32, u32)> = self.discarded.iter().copied().collect();
        cells.sort_unstable();
        self.camera.discarded_cells = cells;
    }
}

type LiveTable = Arc<Mutex<HashMap<u64, JoinHandle<()>>>>;

/// Removes a writer task from the live table when the task ends, panics included.
struct LiveEntry {
    live: LiveTable,
    id: u64,
}

impl Drop for LiveEntry {
    fn drop(&mut self) {
        self.live.lock().remove(&self.id);
    }
}

fn worker_bound(thresholds: &CaptureThresholds) -> usize {
    (thresholds.max_captures as usize).max(1)
}

fn track_label(track_id: Option<u64>) -> String {
    track_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "sin track".to_string())
}
