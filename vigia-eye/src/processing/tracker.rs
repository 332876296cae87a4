//! Per-track capture state

use crate::config::CaptureThresholds;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// Slack for comparing confidence gains computed in f32.
const GAIN_EPSILON: f32 = 1e-6;

/// Rolling window of the most recent confidence scores of a track.
#[derive(Debug, Clone)]
pub struct ConfidenceBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl ConfidenceBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one when full.
    pub fn push(&mut self, confidence: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(confidence);
    }

    /// Change the capacity, keeping the newest samples.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        while self.samples.len() > capacity {
            self.samples.pop_front();
        }
        self.capacity = capacity;
    }

    /// Arithmetic mean of the window, 0.0 when empty.
    pub fn mean(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples from oldest to newest.
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().copied()
    }
}

/// What the engine remembers about previous captures of a track.
#[derive(Debug, Clone, Default)]
pub struct CaptureHistory {
    pub captured: bool,
    pub best_confidence: f32,
    pub last_capture: Option<Instant>,
}

impl CaptureHistory {
    fn record(&mut self, confidence: f32, now: Instant) {
        self.captured = true;
        self.best_confidence = self.best_confidence.max(confidence);
        self.last_capture = Some(now);
    }
}

/// Everything the capture engine keeps for one track id.
#[derive(Debug, Clone)]
pub struct TrackState {
    pub track_id: u64,
    pub window: ConfidenceBuffer,
    pub history: CaptureHistory,
    pub last_center: Option<(f32, f32)>,
}

impl TrackState {
    fn new(track_id: u64, window_size: usize) -> Self {
        Self {
            track_id,
            window: ConfidenceBuffer::new(window_size),
            history: CaptureHistory::default(),
            last_center: None,
        }
    }
}

/// Outcome of the track gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackDecision {
    Approved,
    /// Rolling mean below the confidence floor
    LowConfidence { mean: f32 },
    /// Previous capture is too recent
    TooSoon { elapsed: Duration },
    /// Not a materially better shot than the best one so far
    NotImproved { gain: f32 },
}

impl TrackDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, TrackDecision::Approved)
    }
}

/// Track id -> state table. Entries only go away through [`TrackTable::prune`].
#[derive(Debug, Default)]
pub struct TrackTable {
    tracks: HashMap<u64, TrackState>,
}

impl TrackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one confidence sample for `track_id` and decide whether it earns a capture.
    pub fn should_capture_at(
        &mut self,
        track_id: u64,
        confidence: f32,
        center: (f32, f32),
        thresholds: &CaptureThresholds,
        now: Instant,
    ) -> TrackDecision {
        let track = self
            .tracks
            .entry(track_id)
            .or_insert_with(|| TrackState::new(track_id, thresholds.window_size));
        if track.window.capacity() != thresholds.window_size.max(1) {
            track.window.resize(thresholds.window_size);
        }
        track.last_center = Some(center);
        track.window.push(confidence);

        let mean = track.window.mean();
        if mean < thresholds.confidence_floor {
            return TrackDecision::LowConfidence { mean };
        }

        if let Some(last) = track.history.last_capture {
            let elapsed = now.saturating_duration_since(last);
            if elapsed.as_secs_f64() < thresholds.min_seconds_between_captures {
                return TrackDecision::TooSoon { elapsed };
            }
            let gain = confidence - track.history.best_confidence;
            if gain + GAIN_EPSILON < thresholds.improvement_margin {
                return TrackDecision::NotImproved { gain };
            }
        }

        track.history.record(confidence, now);
        debug!(
            "Track {} approved (mean {:.3}, best {:.3})",
            track_id, mean, track.history.best_confidence
        );
        TrackDecision::Approved
    }

    /// Drop every track not in `active`. Returns how many were removed.
    pub fn prune(&mut self, active: &HashSet<u64>) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|id, _| active.contains(id));
        let removed = before - self.tracks.len();
        if removed > 0 {
            debug!("Pruned {} inactive tracks", removed);
        }
        removed
    }

    pub fn get(&self, track_id: u64) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn thresholds() -> CaptureThresholds {
        CaptureThresholds::default()
    }

    #[test]
    fn test_buffer_evicts_oldest() {
        let mut buffer = ConfidenceBuffer::new(5);
        for c in [0.1, 0.2, 0.3, 0.4, 0.5, 0.6] {
            buffer.push(c);
        }
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.samples().collect::<Vec<_>>(), vec![0.2, 0.3, 0.4, 0.5, 0.6]);
    }

    #[test]
    fn test_buffer_resize_keeps_newest() {
        let mut buffer = ConfidenceBuffer::new(5);
        for c in [0.1, 0.2, 0.3, 0.4] {
            buffer.push(c);
        }
        buffer.resize(2);
        assert_eq!(buffer.capacity(), 2);
        assert_eq!(buffer.samples().collect::<Vec<_>>(), vec![0.3, 0.4]);

        buffer.resize(3);
        buffer.push(0.5);
        buffer.push(0.6);
        assert_eq!(buffer.samples().collect::<Vec<_>>(), vec![0.4, 0.5, 0.6]);
    }

    #[test]
    fn test_window_size_change_applies_to_existing_track() {
        let mut table = TrackTable::new();
        let now = Instant::now();
        let defaults = thresholds();
        for _ in 0..3 {
            let decision = table.should_capture_at(1, 0.1, (0.0, 0.0), &defaults, now);
            assert!(matches!(decision, TrackDecision::LowConfidence { .. }));
        }

        let narrow = CaptureThresholds {
            window_size: 2,
            ..thresholds()
        };
        let decision = table.should_capture_at(1, 0.9, (0.0, 0.0), &narrow, now);
        assert!(matches!(decision, TrackDecision::LowConfidence { .. }));
        // Window now holds [0.9, 0.9]
        let decision = table.should_capture_at(1, 0.9, (0.0, 0.0), &narrow, now);
        assert_eq!(decision, TrackDecision::Approved);
        let window = &table.get(1).unwrap().window;
        assert_eq!(window.capacity(), 2);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_buffer_zero_capacity_clamped() {
        let mut buffer = ConfidenceBuffer::new(0);
        buffer.push(0.4);
        buffer.push(0.9);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.samples().collect::<Vec<_>>(), vec![0.9]);
    }

    #[test]
    fn test_empty_buffer_mean() {
        assert_eq!(ConfidenceBuffer::new(5).mean(), 0.0);
    }

    #[test]
    fn test_running_mean_drags_early_samples() {
        let mut table = TrackTable::new();
        let t = thresholds();
        let now = Instant::now();
        let samples = [0.5f32, 0.6, 0.72, 0.75];
        for (i, c) in samples.iter().enumerate() {
            let decision = table.should_capture_at(1, *c, (0.0, 0.0), &t, now);
            let expected_mean = samples[..=i].iter().sum::<f32>() / (i + 1) as f32;
            match decision {
                TrackDecision::LowConfidence { mean } => {
                    assert!((mean - expected_mean).abs() < 1e-5)
                }
                other => panic!("sample {} should be rejected, got {:?}", i + 1, other),
            }
        }
        // Fifth sample pulls the five-sample mean to 0.704
        let decision = table.should_capture_at(1, 0.95, (0.0, 0.0), &t, now);
        assert_eq!(decision, TrackDecision::Approved);
    }

    #[test]
    fn test_recapture_blocked_within_interval() {
        let mut table = TrackTable::new();
        let t = thresholds();
        let start = Instant::now();
        assert!(table.should_capture_at(7, 0.8, (0.0, 0.0), &t, start).is_approved());

        // Much better shot, but too soon
        let decision = table.should_capture_at(7, 0.99, (0.0, 0.0), &t, start + Duration::from_secs(2));
        assert!(matches!(decision, TrackDecision::TooSoon { .. }));
    }

    #[test]
    fn test_recapture_requires_improvement() {
        let mut table = TrackTable::new();
        let t = thresholds();
        let start = Instant::now();
        assert!(table.should_capture_at(7, 0.8, (0.0, 0.0), &t, start).is_approved());

        let later = start + Duration::from_secs(4);
        let decision = table.should_capture_at(7, 0.85, (0.0, 0.0), &t, later);
        assert!(matches!(decision, TrackDecision::NotImproved { .. }));

        let decision = table.should_capture_at(7, 0.95, (0.0, 0.0), &t, later);
        assert!(decision.is_approved());
        assert!((table.get(7).unwrap().history.best_confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_exact_interval_is_allowed() {
        let mut table = TrackTable::new();
        let t = thresholds();
        let start = Instant::now();
        assert!(table.should_capture_at(3, 0.75, (0.0, 0.0), &t, start).is_approved());
        let decision = table.should_capture_at(3, 0.9, (0.0, 0.0), &t, start + Duration::from_secs(3));
        assert!(decision.is_approved());
    }

    #[test]
    fn test_last_center_recorded() {
        let mut table = TrackTable::new();
        table.should_capture_at(5, 0.1, (12.0, 34.0), &thresholds(), Instant::now());
        assert_eq!(table.get(5).unwrap().last_center, Some((12.0, 34.0)));
    }

    #[test]
    fn test_prune_drops_inactive() {
        let mut table = TrackTable::new();
        let t = thresholds();
        let now = Instant::now();
        for id in 1..=4 {
            table.should_capture_at(id, 0.9, (0.0, 0.0), &t, now);
        }
        let active: HashSet<u64> = [2, 4, 99].into_iter().collect();
        assert_eq!(table.prune(&active), 2);
        assert_eq!(table.len(), 2);
        assert!(table.get(1).is_none());
        assert!(table.get(2).is_some());
    }

    proptest! {
        #[test]
        fn test_window_never_exceeds_capacity(
            samples in prop::collection::vec(0.0f32..=1.0f32, 1..64),
            capacity in 1usize..8,
        ) {
            let mut buffer = ConfidenceBuffer::new(capacity);
            for (i, c) in samples.iter().enumerate() {
                buffer.push(*c);
                prop_assert!(buffer.len() <= capacity);
                let start = (i + 1).saturating_sub(capacity);
                let expected: Vec<f32> = samples[start..=i].to_vec();
                prop_assert_eq!(buffer.samples().collect::<Vec<_>>(), expected);
            }
        }

        #[test]
        fn test_best_confidence_non_decreasing(
            samples in prop::collection::vec(0.0f32..=1.0f32, 1..64),
        ) {
            let mut table = TrackTable::new();
            let t = CaptureThresholds::default();
            let start = Instant::now();
            let mut best = 0.0f32;
            for (i, c) in samples.iter().enumerate() {
                let now = start + Duration::from_secs(i as u64 * 2);
                table.should_capture_at(1, *c, (0.0, 0.0), &t, now);
                let current = table.get(1).unwrap().history.best_confidence;
                prop_assert!(current >= best);
                prop_assert!(table.get(1).unwrap().window.len() <= t.window_size);
                best = current;
            }
        }
    }
}
