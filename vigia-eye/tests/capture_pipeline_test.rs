//! End-to-end tests for the capture engine writing to disk

use image::{Rgb, RgbImage};
use std::collections::HashSet;
use std::sync::Arc;
use vigia_eye::config::CameraConfig;
use vigia_eye::writer::CaptureMetadata;
use vigia_eye::{BoundingBox, CaptureEngine, CaptureWriter, Detection, DiskCaptureWriter, Frame, LogSink};

fn frame() -> Frame {
    Arc::new(RgbImage::from_pixel(320, 240, Rgb([90, 90, 90])))
}

fn person(track: u64, x: f32, confidence: f32) -> Detection {
    Detection::new(track, 0, BoundingBox::new(x, 100.0, x + 20.0, 160.0), confidence)
}

fn quiet_sink() -> Arc<dyn LogSink> {
    Arc::new(|_: &str| {})
}

fn read_sidecars(root: &std::path::Path) -> Vec<CaptureMetadata> {
    let mut records = Vec::new();
    for day in std::fs::read_dir(root).unwrap() {
        for entry in std::fs::read_dir(day.unwrap().path()).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let json = std::fs::read_to_string(&path).unwrap();
                records.push(serde_json::from_str(&json).unwrap());
            }
        }
    }
    records
}

#[tokio::test]
async fn test_walking_person_is_captured_once() {
    let dir = tempfile::tempdir().unwrap();
    let writer: Arc<dyn CaptureWriter> = Arc::new(DiskCaptureWriter::new(dir.path()));
    let mut engine = CaptureEngine::new(
        CameraConfig::default(),
        writer,
        quiet_sink(),
        tokio::runtime::Handle::current(),
    )
    .unwrap();

    let frame = frame();
    let mut approved = 0;
    // Same track, steady confidence, moving 20px per frame
    for step in 0..10 {
        let detections = [person(5, 10.0 + step as f32 * 20.0, 0.88)];
        approved += engine.evaluate(&detections, (320, 240), Some(&frame)).len();
        let active: HashSet<u64> = [5].into_iter().collect();
        engine.prune_inactive(&active);
    }
    assert_eq!(approved, 1);
    assert_eq!(engine.flush().await, 1);

    let records = read_sidecars(dir.path());
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.track_id, Some(5));
    assert_eq!(record.clase, "Persona");
    assert_eq!(record.camara, "camara-0");
    assert_eq!(record.coordenadas_frame_original, [10.0, 100.0, 30.0, 160.0]);
    assert!(record.imagen.ends_with(".jpg"));
    assert!(record.imagen.contains("_5_"));
}

#[tokio::test]
async fn test_budget_spans_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let mut camera = CameraConfig::default();
    camera.thresholds.max_captures = 3;
    let writer: Arc<dyn CaptureWriter> = Arc::new(DiskCaptureWriter::new(dir.path()));
    let mut engine =
        CaptureEngine::new(camera, writer, quiet_sink(), tokio::runtime::Handle::current()).unwrap();

    let frame = frame();
    let detections: Vec<Detection> = (0..6).map(|i| person(i, i as f32 * 40.0, 0.95)).collect();
    let requests = engine.evaluate(&detections, (320, 240), Some(&frame));
    assert_eq!(requests.len(), 3);
    engine.flush().await;

    assert_eq!(read_sidecars(dir.path()).len(), 3);
    let stats = engine.stats();
    assert_eq!(stats.approvals, 3);
    assert_eq!(stats.budget_remaining, 0);
    assert_eq!(stats.live_workers, 0);
}

#[tokio::test]
async fn test_box_outside_frame_reports_failure() {
    let dir = tempfile::tempdir().unwrap();
    let lines = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
    let captured = lines.clone();
    let sink: Arc<dyn LogSink> = Arc::new(move |text: &str| captured.lock().push(text.to_string()));
    let writer: Arc<dyn CaptureWriter> = Arc::new(DiskCaptureWriter::new(dir.path()));
    let mut engine =
        CaptureEngine::new(CameraConfig::default(), writer, sink, tokio::runtime::Handle::current())
            .unwrap();

    // Zero-width box leaves nothing to crop
    let flat = Detection::new(9, 2, BoundingBox::new(200.0, 10.0, 200.0, 40.0), 0.9);
    let detections = [flat, person(10, 40.0, 0.9)];
    assert_eq!(engine.evaluate(&detections, (320, 240), Some(&frame())).len(), 2);
    engine.flush().await;

    assert_eq!(read_sidecars(dir.path()).len(), 1);
    assert!(lines
        .lock()
        .iter()
        .any(|l| l.starts_with("Error guardando captura (ID: 9)")));
}

#[test]
fn test_engine_on_blocking_runtime() {
    tokio_test::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let writer: Arc<dyn CaptureWriter> = Arc::new(DiskCaptureWriter::new(dir.path()));
        let mut engine = CaptureEngine::new(
            CameraConfig::default(),
            writer,
            quiet_sink(),
            tokio::runtime::Handle::current(),
        )
        .unwrap();

        let detection = Detection::untracked(8, BoundingBox::new(50.0, 50.0, 90.0, 80.0), 0.6);
        let requests = engine.evaluate(&[detection], (320, 240), Some(&frame()));
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].class_label, "Barco");
        assert_eq!(engine.flush().await, 1);
        assert_eq!(read_sidecars(dir.path())[0].track_id, None);
    });
}
