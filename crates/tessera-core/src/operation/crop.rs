//! Crop requests and their resolution against the full image size.

use serde::{Deserialize, Serialize};

use super::ScaleConstraint;
use crate::error::EngineError;
use crate::geometry::{Rectangle, Size};

/// Which part of the source image the client wants.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum CropRequest {
    /// The whole image.
    #[default]
    Full,
    /// A pixel rectangle in the constrained (virtual) image space.
    PixelRect(Rectangle),
    /// A rectangle in fractions (0.0 to 1.0) of the image dimensions.
    PercentRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
}

impl CropRequest {
    /// Resolve the request to a concrete rectangle in full-resolution space.
    ///
    /// # Arguments
    ///
    /// * `full_size` - Dimensions of the full-resolution image
    /// * `constraint` - Scale constraint the client sees the image through
    ///
    /// # Returns
    ///
    /// The requested rectangle clipped to the image bounds.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnsupportedRegion` if the request has zero width
    /// or height, or lies entirely outside the image.
    pub fn resolve(
        &self,
        full_size: Size,
        constraint: &ScaleConstraint,
    ) -> Result<Rectangle, EngineError> {
        if full_size.is_empty() {
            return Err(EngineError::UnsupportedRegion(format!(
                "image has no area ({})",
                full_size
            )));
        }

        let requested = match *self {
            CropRequest::Full => return Ok(full_size.bounds()),
            CropRequest::PixelRect(rect) => {
                // Pixel coordinates address the constrained image; bring them
                // back up to full resolution.
                let sc = constraint.scale();
                rect.scaled(1.0 / sc, 1.0 / sc)
            }
            CropRequest::PercentRect {
                x,
                y,
                width,
                height,
            } => Rectangle::new(x, y, width, height)
                .scaled(full_size.width as f64, full_size.height as f64),
        };

        if requested.is_empty() {
            return Err(EngineError::UnsupportedRegion(format!(
                "crop {} has zero width or height",
                requested
            )));
        }

        requested.clamp_to(full_size).ok_or_else(|| {
            EngineError::UnsupportedRegion(format!(
                "crop {} lies outside the {} image",
                requested, full_size
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unconstrained() -> ScaleConstraint {
        ScaleConstraint::default()
    }

    #[test]
    fn test_full_crop() {
        let rect = CropRequest::Full
            .resolve(Size::new(64, 56), &unconstrained())
            .unwrap();
        assert_eq!(rect, Rectangle::new(0.0, 0.0, 64.0, 56.0));
    }

    #[test]
    fn test_oversized_pixel_crop_is_clamped() {
        let crop = CropRequest::PixelRect(Rectangle::new(0.0, 0.0, 99999.0, 99999.0));
        let rect = crop.resolve(Size::new(64, 56), &unconstrained()).unwrap();
        assert_eq!(rect, Rectangle::new(0.0, 0.0, 64.0, 56.0));
    }

    #[test]
    fn test_crop_outside_bounds_rejected() {
        let crop = CropRequest::PixelRect(Rectangle::new(99999.0, 0.0, 10.0, 10.0));
        let result = crop.resolve(Size::new(64, 56), &unconstrained());
        assert!(matches!(result, Err(EngineError::UnsupportedRegion(_))));
    }

    #[test]
    fn test_zero_area_crop_rejected() {
        let crop = CropRequest::PixelRect(Rectangle::new(10.0, 10.0, 0.0, 20.0));
        let result = crop.resolve(Size::new(64, 56), &unconstrained());
        assert!(matches!(result, Err(EngineError::UnsupportedRegion(_))));

        let crop = CropRequest::PercentRect {
            x: 0.1,
            y: 0.1,
            width: 0.5,
            height: 0.0,
        };
        assert!(crop.resolve(Size::new(64, 56), &unconstrained()).is_err());
    }

    #[test]
    fn test_percent_crop() {
        let crop = CropRequest::PercentRect {
            x: 0.25,
            y: 0.5,
            width: 0.5,
            height: 0.25,
        };
        let rect = crop.resolve(Size::new(800, 600), &unconstrained()).unwrap();
        assert_eq!(rect, Rectangle::new(200.0, 300.0, 400.0, 150.0));
    }

    #[test]
    fn test_percent_crop_overhang_clamped() {
        let crop = CropRequest::PercentRect {
            x: 0.75,
            y: 0.0,
            width: 0.5,
            height: 1.0,
        };
        let rect = crop.resolve(Size::new(800, 600), &unconstrained()).unwrap();
        assert_eq!(rect, Rectangle::new(600.0, 0.0, 200.0, 600.0));
    }

    #[test]
    fn test_pixel_crop_under_constraint() {
        // The client sees a 400x300 image; its 100x100 crop covers 200x200
        // full-resolution pixels.
        let sc = ScaleConstraint::new(1, 2).unwrap();
        let crop = CropRequest::PixelRect(Rectangle::new(50.0, 50.0, 100.0, 100.0));
        let rect = crop.resolve(Size::new(800, 600), &sc).unwrap();
        assert_eq!(rect, Rectangle::new(100.0, 100.0, 200.0, 200.0));
    }

    #[test]
    fn test_empty_image_rejected() {
        let result = CropRequest::Full.resolve(Size::new(0, 10), &unconstrained());
        assert!(result.is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Strategy for generating image dimensions.
    fn dimensions_strategy() -> impl Strategy<Value = (u32, u32)> {
        (1u32..=10_000, 1u32..=10_000)
    }

    /// Strategy for generating pixel crop rectangles, some out of bounds.
    fn rect_strategy() -> impl Strategy<Value = (f64, f64, f64, f64)> {
        (
            -100.0f64..20_000.0,
            -100.0f64..20_000.0,
            0.5f64..20_000.0,
            0.5f64..20_000.0,
        )
    }

    proptest! {
        /// Property: a resolved crop never exceeds the image bounds and is
        /// never empty.
        #[test]
        fn prop_resolved_crop_within_bounds(
            (width, height) in dimensions_strategy(),
            (x, y, w, h) in rect_strategy(),
        ) {
            let size = Size::new(width, height);
            let crop = CropRequest::PixelRect(Rectangle::new(x, y, w, h));
            match crop.resolve(size, &ScaleConstraint::default()) {
                Ok(rect) => {
                    prop_assert!(rect.x >= 0.0 && rect.y >= 0.0);
                    prop_assert!(rect.right() <= width as f64);
                    prop_assert!(rect.bottom() <= height as f64);
                    prop_assert!(!rect.is_empty());
                }
                Err(e) => prop_assert!(e.is_client_error()),
            }
        }

        /// Property: a full-image percent crop resolves to the full image.
        #[test]
        fn prop_full_percent_is_identity((width, height) in dimensions_strategy()) {
            let size = Size::new(width, height);
            let crop = CropRequest::PercentRect { x: 0.0, y: 0.0, width: 1.0, height: 1.0 };
            let rect = crop.resolve(size, &ScaleConstraint::default()).unwrap();
            prop_assert_eq!(rect, size.bounds());
        }
    }
}
