//! Asynchronous persistence of approved captures

use crate::detection::{BoundingBox, Frame, ObjectClass};
use crate::error::VisionError;
use crate::utils::crop_region;
use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything a writer needs to persist one approved detection.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Owned copy of the frame; the caller may reuse its own buffer
    pub frame: Frame,
    pub bbox: BoundingBox,
    pub track_id: Option<u64>,
    pub class: ObjectClass,
    /// `(x1, y1, x2, y2, confidence)` in original frame pixels
    pub coordinates: (f32, f32, f32, f32, f32),
    /// Detector model that produced the detection
    pub model_label: String,
    pub class_label: String,
    pub camera: String,
}

/// Sidecar record written next to each capture image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub fecha: String,
    pub hora: String,
    pub modelo: String,
    pub clase: String,
    pub camara: String,
    pub track_id: Option<u64>,
    pub coordenadas_frame_original: [f32; 4],
    /// PTZ re-aim coordinates; no PTZ follow-up is performed here
    pub coordenadas_ptz: Option<[f32; 4]>,
    pub confianza: f32,
    pub imagen: String,
}

/// Where a capture ended up.
#[derive(Debug, Clone)]
pub struct CaptureRecord {
    pub image_path: PathBuf,
    pub metadata_path: PathBuf,
    pub metadata: CaptureMetadata,
}

/// Durable sink for approved captures.
#[async_trait]
pub trait CaptureWriter: Send + Sync {
    async fn write(&self, request: CaptureRequest) -> Result<CaptureRecord, VisionError>;
}

/// Writes a JPEG crop plus a JSON sidecar under `<root>/<fecha>/`.
pub struct DiskCaptureWriter {
    root: PathBuf,
}

impl DiskCaptureWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CaptureWriter for DiskCaptureWriter {
    async fn write(&self, request: CaptureRequest) -> Result<CaptureRecord, VisionError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || write_capture(&root, &request)).await?
    }
}

fn write_capture(root: &Path, request: &CaptureRequest) -> Result<CaptureRecord, VisionError> {
    let (width, height) = request.frame.dimensions();
    if width == 0 || height == 0 {
        return Err(VisionError::Frame("Frame has no pixels".to_string()));
    }
    let (x, y, w, h) = crop_region(&request.bbox, width, height).ok_or_else(|| {
        VisionError::Writer(format!(
            "Box ({:.0}, {:.0}, {:.0}, {:.0}) lies outside the {}x{} frame",
            request.bbox.x1, request.bbox.y1, request.bbox.x2, request.bbox.y2, width, height
        ))
    })?;

    let now = Local::now();
    let fecha = now.format("%Y-%m-%d").to_string();
    let hora = now.format("%H-%M-%S").to_string();
    let dir = root.join(&fecha);
    fs::create_dir_all(&dir)?;

    let track = request
        .track_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "na".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let stem = format!(
        "{}_{}_{}_{}_{}",
        fecha,
        hora,
        request.class.count_label(),
        track,
        &suffix[..6]
    );
    let image_path = dir.join(format!("{}.jpg", stem));
    let metadata_path = dir.join(format!("{}.json", stem));

    let crop = image::imageops::crop_imm(&*request.frame, x, y, w, h).to_image();
    crop.save(&image_path)?;

    let (x1, y1, x2, y2, confidence) = request.coordinates;
    let metadata = CaptureMetadata {
        fecha,
        hora,
        modelo: request.model_label.clone(),
        clase: request.class_label.clone(),
        camara: request.camera.clone(),
        track_id: request.track_id,
        coordenadas_frame_original: [x1, y1, x2, y2],
        coordenadas_ptz: None,
        confianza: confidence,
        imagen: format!("{}.jpg", stem),
    };
    fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;
    debug!("Capture written to {}", image_path.display());

    Ok(CaptureRecord {
        image_path,
        metadata_path,
        metadata,
    })
}
