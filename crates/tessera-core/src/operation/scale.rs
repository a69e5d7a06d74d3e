//! Scale requests and scale constraints.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::geometry::{Rectangle, Size};

/// How the client wants the cropped region scaled.
///
/// Pixel dimensions are the requested output size of the cropped region.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ScaleRequest {
    /// No scaling.
    #[default]
    Full,
    /// Uniform scale; 1.0 is full size, values above 1.0 upscale.
    Percent(f64),
    /// Scale to this width, preserving aspect ratio.
    AspectFitWidth(u32),
    /// Scale to this height, preserving aspect ratio.
    AspectFitHeight(u32),
    /// Scale to fit inside the box, preserving aspect ratio.
    AspectFitInside(u32, u32),
    /// Stretch to exactly this size.
    NonAspectFill(u32, u32),
}

impl ScaleRequest {
    /// Reject requests that can never produce pixels.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidScale` for a non-positive (or NaN)
    /// percentage or a zero pixel dimension.
    pub fn validate(&self) -> Result<(), EngineError> {
        match *self {
            ScaleRequest::Full => Ok(()),
            ScaleRequest::Percent(p) => {
                if p > 0.0 && p.is_finite() {
                    Ok(())
                } else {
                    Err(EngineError::InvalidScale(format!(
                        "percent must be greater than zero (got {})",
                        p
                    )))
                }
            }
            ScaleRequest::AspectFitWidth(w) => non_zero(&[w]),
            ScaleRequest::AspectFitHeight(h) => non_zero(&[h]),
            ScaleRequest::AspectFitInside(w, h) | ScaleRequest::NonAspectFill(w, h) => {
                non_zero(&[w, h])
            }
        }
    }

    /// X and Y scales, relative to full resolution, that turn `region` into
    /// the requested output.
    ///
    /// `region` is the resolved crop in full-resolution space. Percent and
    /// full requests are relative to the constrained image, so the constraint
    /// multiplies in; pixel requests are absolute and ignore it.
    pub fn resulting_scales(&self, region: &Rectangle, constraint: &ScaleConstraint) -> (f64, f64) {
        let sc = constraint.scale();
        match *self {
            ScaleRequest::Full => (sc, sc),
            ScaleRequest::Percent(p) => (p * sc, p * sc),
            ScaleRequest::AspectFitWidth(w) => {
                let s = w as f64 / region.width;
                (s, s)
            }
            ScaleRequest::AspectFitHeight(h) => {
                let s = h as f64 / region.height;
                (s, s)
            }
            ScaleRequest::AspectFitInside(w, h) => {
                let s = (w as f64 / region.width).min(h as f64 / region.height);
                (s, s)
            }
            ScaleRequest::NonAspectFill(w, h) => {
                (w as f64 / region.width, h as f64 / region.height)
            }
        }
    }

    /// Output size in whole pixels after scaling `region`.
    pub fn target_size(&self, region: &Rectangle, constraint: &ScaleConstraint) -> Size {
        let (sx, sy) = self.resulting_scales(region, constraint);
        Size::new(
            (region.width * sx).round().max(0.0) as u32,
            (region.height * sy).round().max(0.0) as u32,
        )
    }

    /// Whether applying the request (with the constraint folded in) changes
    /// the region's size by more than `epsilon`.
    pub fn has_effect(&self, region: &Rectangle, constraint: &ScaleConstraint, epsilon: f64) -> bool {
        if constraint.has_effect() {
            return true;
        }
        let (sx, sy) = self.resulting_scales(region, constraint);
        (sx - 1.0).abs() > epsilon || (sy - 1.0).abs() > epsilon
    }

    /// Whether a level at `level_scale` holds enough pixels to satisfy the
    /// request without upsampling.
    ///
    /// Upscales are capped at 1.0: full resolution always fits.
    pub fn fits(
        &self,
        region: &Rectangle,
        constraint: &ScaleConstraint,
        level_scale: f64,
        epsilon: f64,
    ) -> bool {
        let limit = level_scale + epsilon;
        let sc = constraint.scale();
        let capped = |requested: u32, available: f64| (requested as f64).min(available) / available;
        match *self {
            ScaleRequest::Full => sc <= limit,
            ScaleRequest::Percent(p) => p.min(1.0) * sc <= limit,
            ScaleRequest::AspectFitWidth(w) => capped(w, region.width) <= limit,
            ScaleRequest::AspectFitHeight(h) => capped(h, region.height) <= limit,
            ScaleRequest::AspectFitInside(w, h) | ScaleRequest::NonAspectFill(w, h) => {
                capped(w, region.width) <= limit && capped(h, region.height) <= limit
            }
        }
    }
}

fn non_zero(dims: &[u32]) -> Result<(), EngineError> {
    if dims.iter().any(|&d| d == 0) {
        Err(EngineError::InvalidScale(
            "pixel dimensions must be greater than zero".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// A rational "virtual resize" applied to the source before any client
/// operation, e.g. to serve a reduced-resolution view by policy.
///
/// To the client, the image appears to have the constrained size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScaleConstraint {
    numerator: u64,
    denominator: u64,
}

impl Default for ScaleConstraint {
    fn default() -> Self {
        Self {
            numerator: 1,
            denominator: 1,
        }
    }
}

impl ScaleConstraint {
    /// # Errors
    ///
    /// Returns `EngineError::InvalidScale` if the numerator is zero or larger
    /// than the denominator.
    pub fn new(numerator: u64, denominator: u64) -> Result<Self, EngineError> {
        if numerator == 0 || denominator == 0 {
            return Err(EngineError::InvalidScale(
                "scale constraint terms must both be positive".to_string(),
            ));
        }
        if numerator > denominator {
            return Err(EngineError::InvalidScale(
                "scale constraint numerator must not exceed its denominator".to_string(),
            ));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    pub fn scale(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    pub fn has_effect(&self) -> bool {
        self.numerator != self.denominator
    }

    /// The same ratio in lowest terms.
    pub fn reduced(&self) -> Self {
        let divisor = gcd(self.numerator, self.denominator);
        Self {
            numerator: self.numerator / divisor,
            denominator: self.denominator / divisor,
        }
    }

    /// Size the client sees for an image of `full_size`.
    pub fn constrained_size(&self, full_size: Size) -> Size {
        let s = self.scale();
        Size::new(
            (full_size.width as f64 * s).round() as u32,
            (full_size.height as f64 * s).round() as u32,
        )
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}
