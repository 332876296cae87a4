//! Per-frame detection records handed over by the upstream tracker

use crate::error::VisionError;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Decoded RGB frame shared between the caller and capture writers.
pub type Frame = Arc<RgbImage>;

/// Model name that switches class 1 from "car-ish" detector output to vessels.
pub const VESSEL_MODEL: &str = "Embarcaciones";

/// Axis-aligned box in pixel coordinates of the original frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }
}

/// One tracked object in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Absent for legacy trackless input; such detections skip the track gate.
    #[serde(default)]
    pub track_id: Option<u64>,
    pub class_id: u32,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl Detection {
    pub fn new(track_id: u64, class_id: u32, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            track_id: Some(track_id),
            class_id,
            bbox,
            confidence,
        }
    }

    pub fn untracked(class_id: u32, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            track_id: None,
            class_id,
            bbox,
            confidence,
        }
    }

    /// Parse a flat detector row.
    ///
    /// Accepted layouts:
    /// - `[x1, y1, x2, y2, class]` (legacy, no track id, confidence 1.0)
    /// - `[x1, y1, x2, y2, class, track_id, confidence]`
    pub fn from_row(row: &[f32]) -> Result<Self, VisionError> {
        match row.len() {
            5 => Ok(Self::untracked(
                row[4].max(0.0) as u32,
                BoundingBox::new(row[0], row[1], row[2], row[3]),
                1.0,
            )),
            7 => {
                let track_id = if row[5].is_finite() && row[5] >= 0.0 {
                    Some(row[5] as u64)
                } else {
                    None
                };
                Ok(Self {
                    track_id,
                    class_id: row[4].max(0.0) as u32,
                    bbox: BoundingBox::new(row[0], row[1], row[2], row[3]),
                    confidence: row[6],
                })
            }
            n => Err(VisionError::MalformedDetection(n)),
        }
    }

    pub fn center(&self) -> (f32, f32) {
        self.bbox.center()
    }
}

/// Object bucket derived from the detector's class id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectClass {
    Person,
    Car,
    Boat,
    /// Generic vessel, only produced by the "Embarcaciones" model.
    Vessel,
    Other(u32),
}

impl ObjectClass {
    pub fn classify(class_id: u32, vessel_model: bool) -> Self {
        match class_id {
            1 if vessel_model => ObjectClass::Vessel,
            0 if !vessel_model => ObjectClass::Person,
            2 => ObjectClass::Car,
            8 | 9 => ObjectClass::Boat,
            other => ObjectClass::Other(other),
        }
    }

    /// Human readable name used in log lines and capture metadata.
    pub fn display_name(&self) -> String {
        match self {
            ObjectClass::Person => "Persona".to_string(),
            ObjectClass::Car => "Auto".to_string(),
            ObjectClass::Boat => "Barco".to_string(),
            ObjectClass::Vessel => "Embarcación".to_string(),
            ObjectClass::Other(id) => format!("Clase {}", id),
        }
    }

    /// Key used in the crossing count tables.
    pub fn count_label(&self) -> &'static str {
        match self {
            ObjectClass::Person => "personas",
            ObjectClass::Car => "autos",
            ObjectClass::Boat => "barcos",
            ObjectClass::Vessel => "embarcaciones",
            ObjectClass::Other(_) => "objetos",
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Whether a camera's model list enables vessel classification.
pub fn uses_vessel_model(models: &[String]) -> bool {
    models.iter().any(|m| m == VESSEL_MODEL)
}
