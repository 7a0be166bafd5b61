//! Points and axis-aligned boxes in frame pixel coordinates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("degenerate box [{x1}, {y1}, {x2}, {y2}]")]
pub struct GeometryError {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Axis-aligned box with `x1 < x2` and `y1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self, GeometryError> {
        let finite = [x1, y1, x2, y2].iter().all(|v| v.is_finite());
        if !finite || x1 >= x2 || y1 >= y2 {
            return Err(GeometryError { x1, y1, x2, y2 });
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn from_array(a: [f32; 4]) -> Result<Self, GeometryError> {
        Self::new(a[0], a[1], a[2], a[3])
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn center(&self) -> Point {
        Point {
            x: (self.x1 + self.x2) / 2.0,
            y: (self.y1 + self.y2) / 2.0,
        }
    }

    /// True when the two boxes share a region of non-zero area.
    /// Boxes that only touch along an edge do not intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        let w = self.x2.min(other.x2) - self.x1.max(other.x1);
        let h = self.y2.min(other.y2) - self.y1.max(other.y1);
        w > 0.0 && h > 0.0
    }
}

impl TryFrom<[f32; 4]> for BBox {
    type Error = GeometryError;

    fn try_from(a: [f32; 4]) -> Result<Self, Self::Error> {
        Self::from_array(a)
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        b.to_array()
    }
}
