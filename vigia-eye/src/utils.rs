//! Grid and crop helpers shared by the capture engine and writer

use crate::detection::BoundingBox;

/// Cell `(row, column)` containing the point, or `None` when the point lies
/// outside the frame or the frame/grid is empty.
pub fn grid_cell(
    cx: f32,
    cy: f32,
    frame_size: (u32, u32),
    rows: u32,
    columns: u32,
) -> Option<(u32, u32)> {
    let (width, height) = frame_size;
    if width == 0 || height == 0 || rows == 0 || columns == 0 {
        return None;
    }
    if !cx.is_finite() || !cy.is_finite() {
        return None;
    }
    if cx < 0.0 || cy < 0.0 || cx >= width as f32 || cy >= height as f32 {
        return None;
    }

    let cell_w = width as f32 / columns as f32;
    let cell_h = height as f32 / rows as f32;
    let col = ((cx / cell_w) as u32).min(columns - 1);
    let row = ((cy / cell_h) as u32).min(rows - 1);
    Some((row, col))
}

/// Row-major index of a cell.
pub fn cell_index(cell: (u32, u32), columns: u32) -> usize {
    cell.0 as usize * columns as usize + cell.1 as usize
}

/// Pixel rectangle `(x, y, width, height)` of the box clamped to the frame,
/// `None` when nothing of the box is left.
pub fn crop_region(bbox: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    if !bbox.is_finite() || width == 0 || height == 0 {
        return None;
    }
    let (w, h) = (width as f32, height as f32);
    let x1 = bbox.x1.min(bbox.x2).clamp(0.0, w).floor();
    let y1 = bbox.y1.min(bbox.y2).clamp(0.0, h).floor();
    let x2 = bbox.x1.max(bbox.x2).clamp(0.0, w).ceil();
    let y2 = bbox.y1.max(bbox.y2).clamp(0.0, h).ceil();

    let crop_w = (x2 - x1) as u32;
    let crop_h = (y2 - y1) as u32;
    if crop_w == 0 || crop_h == 0 {
        return None;
    }
    Some((x1 as u32, y1 as u32, crop_w, crop_h))
}
