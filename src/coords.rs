use serde::Serialize;

use crate::schema::{Point, VideoScale};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelPoint {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// Maps editor display coordinates onto source video pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransformer {
    scale_x: f64,
    scale_y: f64,
}

impl Default for CoordinateTransformer {
    fn default() -> Self {
        Self {
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

impl CoordinateTransformer {
    /// Missing scale means the editor displayed the video at its native size.
    pub fn new(scale: Option<VideoScale>) -> Self {
        match scale {
            Some(scale) => Self {
                scale_x: scale.scale_x(),
                scale_y: scale.scale_y(),
            },
            None => Self::default(),
        }
    }

    pub fn transform(&self, point: Point) -> PixelPoint {
        PixelPoint {
            x: to_pixels(point.x * self.scale_x),
            y: to_pixels(point.y * self.scale_y),
        }
    }

    pub fn transform_length(&self, length: f64, axis: Axis) -> i64 {
        let scale = match axis {
            Axis::X => self.scale_x,
            Axis::Y => self.scale_y,
        };
        to_pixels(length * scale)
    }

    /// Scales by the smaller axis factor so glyphs keep their aspect ratio.
    pub fn transform_min(&self, length: f64) -> i64 {
        to_pixels(length * self.scale_x.min(self.scale_y))
    }
}

fn to_pixels(value: f64) -> i64 {
    value.round() as i64
}
