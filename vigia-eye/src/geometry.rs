//! Virtual line model and side test

use serde::{Deserialize, Serialize};
use std::fmt;

/// Counting line with both endpoints in normalized `[0, 1]` frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineModel {
    pub start: (f32, f32),
    pub end: (f32, f32),
}

impl Default for LineModel {
    fn default() -> Self {
        // Vertical line through the middle of the frame
        Self {
            start: (0.5, 0.0),
            end: (0.5, 1.0),
        }
    }
}

impl LineModel {
    pub fn new(start: (f32, f32), end: (f32, f32)) -> Self {
        Self { start, end }
    }

    pub fn validate(&self) -> Result<(), String> {
        let coords = [self.start.0, self.start.1, self.end.0, self.end.1];
        if coords.iter().any(|c| !c.is_finite() || *c < 0.0 || *c > 1.0) {
            return Err("Line endpoints must lie within [0, 1]".to_string());
        }
        Ok(())
    }

    /// Identical endpoints; every point then reports the same side.
    pub fn is_degenerate(&self) -> bool {
        self.start == self.end
    }

    /// Endpoints scaled to a frame of `width` x `height` pixels.
    pub fn to_pixels(&self, width: u32, height: u32) -> ((f32, f32), (f32, f32)) {
        let (w, h) = (width as f32, height as f32);
        (
            (self.start.0 * w, self.start.1 * h),
            (self.end.0 * w, self.end.1 * h),
        )
    }

    /// Signed 2D cross product of the line direction with the vector from
    /// the first endpoint to `(cx, cy)`, all in pixel units.
    pub fn cross_value(&self, cx: f32, cy: f32, frame_size: (u32, u32)) -> f32 {
        let ((lx1, ly1), (lx2, ly2)) = self.to_pixels(frame_size.0, frame_size.1);
        let dx = lx2 - lx1;
        let dy = ly2 - ly1;
        dx * (cy - ly1) - dy * (cx - lx1)
    }

    pub fn side_of(&self, cx: f32, cy: f32, frame_size: (u32, u32)) -> Side {
        if self.cross_value(cx, cy, frame_size) >= 0.0 {
            Side::Positive
        } else {
            Side::Negative
        }
    }
}

/// Half-plane relative to the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Positive,
    Negative,
}

/// Crossing direction label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Entrada,
    Salida,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Entrada, Direction::Salida];

    /// Direction of a side flip, `None` when the side did not change.
    pub fn from_flip(previous: Side, current: Side) -> Option<Self> {
        match (previous, current) {
            (Side::Negative, Side::Positive) => Some(Direction::Entrada),
            (Side::Positive, Side::Negative) => Some(Direction::Salida),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::Entrada => "Entrada",
            Direction::Salida => "Salida",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
