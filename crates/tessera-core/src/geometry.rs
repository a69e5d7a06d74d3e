//! Size and rectangle value types.
//!
//! Rectangles are kept in floating point so that mapping a region between
//! resolution levels does not accumulate integer rounding error; they are
//! rounded to whole pixels only when a decode is requested.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True if this size fits inside `other` in both dimensions.
    pub fn fits_within(&self, other: &Size) -> bool {
        self.width <= other.width && self.height <= other.height
    }

    /// A rectangle at the origin covering the whole size.
    pub fn bounds(&self) -> Rectangle {
        Rectangle::new(0.0, 0.0, self.width as f64, self.height as f64)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A region within one resolution level's pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rectangle {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// True if the rectangle has no area (or a NaN edge).
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Clip the rectangle to `[0, size)`.
    ///
    /// Returns `None` when nothing of the rectangle remains inside the image.
    pub fn clamp_to(&self, size: Size) -> Option<Rectangle> {
        let left = self.x.max(0.0);
        let top = self.y.max(0.0);
        let right = self.right().min(size.width as f64);
        let bottom = self.bottom().min(size.height as f64);
        let clipped = Rectangle::new(left, top, right - left, bottom - top);
        if clipped.is_empty() {
            None
        } else {
            Some(clipped)
        }
    }

    /// Multiply every coordinate along each axis.
    pub fn scaled(&self, sx: f64, sy: f64) -> Rectangle {
        Rectangle::new(self.x * sx, self.y * sy, self.width * sx, self.height * sy)
    }

    /// Smallest whole-pixel rectangle covering this one, clipped to `size`.
    ///
    /// Edges within `epsilon` of a pixel boundary snap to it instead of
    /// pulling in an extra row or column.
    pub fn bounding_pixels(&self, size: Size, epsilon: f64) -> Option<Rectangle> {
        let left = (self.x + epsilon).floor().max(0.0);
        let top = (self.y + epsilon).floor().max(0.0);
        let right = (self.right() - epsilon).ceil().min(size.width as f64);
        let bottom = (self.bottom() - epsilon).ceil().min(size.height as f64);
        let rect = Rectangle::new(left, top, right - left, bottom - top);
        if rect.is_empty() {
            None
        } else {
            Some(rect)
        }
    }

    pub fn int_x(&self) -> u32 {
        self.x.round().max(0.0) as u32
    }

    pub fn int_y(&self) -> u32 {
        self.y.round().max(0.0) as u32
    }

    pub fn int_width(&self) -> u32 {
        self.width.round().max(0.0) as u32
    }

    pub fn int_height(&self) -> u32 {
        self.height.round().max(0.0) as u32
    }

    /// The rounded pixel size of the rectangle.
    pub fn size(&self) -> Size {
        Size::new(self.int_width(), self.int_height())
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}/{}x{}",
            self.int_x(),
            self.int_y(),
            self.int_width(),
            self.int_height()
        )
    }
}
