//! Resolution level selection.
//!
//! Picks the most reduced pyramid level that still holds enough pixels for a
//! crop + scale request, and maps the crop into that level's coordinates.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{ImageDescriptor, LevelDescriptor};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::geometry::{Rectangle, Size};
use crate::operation::{CropRequest, ReductionFactor, ScaleConstraint, ScaleRequest};

/// Outcome of level selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub level: LevelDescriptor,
    pub reduction_factor: ReductionFactor,
    /// The resolved crop in full-resolution coordinates.
    pub region: Rectangle,
    /// The crop in the selected level's coordinates. Not clamped.
    pub mapped_region: Rectangle,
    /// Linear scale of the selected level relative to full resolution.
    pub level_scale: f64,
    /// X and Y scales the caller still has to apply to the decoded region.
    pub remaining_scale: (f64, f64),
    /// Final output size once `remaining_scale` is applied.
    pub target_size: Size,
}

/// Level selector with a configurable tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelSelector {
    config: EngineConfig,
    differential_scale: (f64, f64),
}

impl Default for LevelSelector {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            differential_scale: (1.0, 1.0),
        }
    }
}

impl LevelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Extra per-axis expansion applied when mapping into level space, for
    /// decoders whose native grid is coarser than whole pixels.
    ///
    /// Non-positive or non-finite factors are ignored.
    pub fn with_differential_scale(mut self, sx: f64, sy: f64) -> Self {
        let valid = |v: f64| if v > 0.0 && v.is_finite() { v } else { 1.0 };
        self.differential_scale = (valid(sx), valid(sy));
        self
    }

    /// Choose a level for `crop` + `scale` under `constraint`.
    ///
    /// # Arguments
    ///
    /// * `descriptor` - Pyramid geometry of the source
    /// * `crop` - Requested region
    /// * `scale` - Requested output scale
    /// * `constraint` - Virtual size reduction applied before the request
    ///
    /// # Returns
    ///
    /// The smallest level that satisfies the request, falling back to full
    /// resolution when none of the reduced levels does.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidScale` for a zero or negative scale or a
    /// request that resolves to a zero-pixel output, and
    /// `EngineError::UnsupportedRegion` for an empty or out-of-bounds crop.
    pub fn select(
        &self,
        descriptor: &ImageDescriptor,
        crop: &CropRequest,
        scale: &ScaleRequest,
        constraint: &ScaleConstraint,
    ) -> Result<Selection, EngineError> {
        let epsilon = self.config.epsilon;
        let full_size = descriptor.full_size();

        scale.validate()?;
        let region = crop.resolve(full_size, constraint)?;
        let target_size = scale.target_size(&region, constraint);
        if target_size.is_empty() {
            return Err(EngineError::InvalidScale(format!(
                "{:?} of region {} resolves to {}",
                scale, region, target_size
            )));
        }

        let full = descriptor
            .level(0)
            .copied()
            .ok_or_else(|| EngineError::InvalidDescriptor("no levels".to_string()))?;
        let level = if scale.has_effect(&region, constraint, epsilon) {
            self.smallest_fitting(descriptor, &region, scale, constraint)
                .unwrap_or(full)
        } else {
            full
        };

        let level_scale = level.scale_relative_to(full_size);
        let max_factor = u32::try_from(descriptor.num_levels().saturating_sub(1)).unwrap_or(u32::MAX);
        let reduction_factor = ReductionFactor::for_scale(level_scale, epsilon, max_factor);

        let (dx, dy) = self.differential_scale;
        let mapped_region = region.scaled(level_scale * dx, level_scale * dy);

        let (sx, sy) = scale.resulting_scales(&region, constraint);
        let remaining_scale = (sx / (level_scale * dx), sy / (level_scale * dy));

        debug!(
            level = level.index,
            level_size = %level.size,
            level_scale,
            factor = reduction_factor.factor,
            region = %region,
            mapped = %mapped_region,
            "selected pyramid level"
        );

        Ok(Selection {
            level,
            reduction_factor,
            region,
            mapped_region,
            level_scale,
            remaining_scale,
            target_size,
        })
    }

    /// Walk from the most reduced level up and return the first that fits.
    fn smallest_fitting(
        &self,
        descriptor: &ImageDescriptor,
        region: &Rectangle,
        scale: &ScaleRequest,
        constraint: &ScaleConstraint,
    ) -> Option<LevelDescriptor> {
        let full_size = descriptor.full_size();
        descriptor.levels().iter().rev().copied().find(|level| {
            let level_scale = level.scale_relative_to(full_size);
            let fits = scale.fits(region, constraint, level_scale, self.config.epsilon);
            trace!(
                level = level.index,
                level_scale,
                fits,
                "{}",
                if fits { "fits" } else { "too small" }
            );
            fits
        })
    }
}

/// Select with the default tolerance.
pub fn select(
    descriptor: &ImageDescriptor,
    crop: &CropRequest,
    scale: &ScaleRequest,
    constraint: &ScaleConstraint,
) -> Result<Selection, EngineError> {
    LevelSelector::default().select(descriptor, crop, scale, constraint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pyramid() -> ImageDescriptor {
        let tile = Size::new(512, 512);
        ImageDescriptor::new(vec![
            LevelDescriptor::new(0, Size::new(6400, 5600), tile),
            LevelDescriptor::new(1, Size::new(3200, 2800), tile),
            LevelDescriptor::new(2, Size::new(1600, 1400), tile),
        ])
        .unwrap()
    }

    fn none() -> ScaleConstraint {
        ScaleConstraint::default()
    }

    #[test]
    fn test_percent_picks_smallest_fitting_level() {
        let sel = select(&pyramid(), &CropRequest::Full, &ScaleRequest::Percent(0.2), &none()).unwrap();
        assert_eq!(sel.level.index, 2);
        assert_eq!(sel.level_scale, 0.25);
        assert_eq!(sel.reduction_factor.factor, 2);
        assert_eq!(sel.mapped_region, Rectangle::new(0.0, 0.0, 1600.0, 1400.0));
        assert!((sel.remaining_scale.0 - 0.8).abs() < 1e-9);
        assert_eq!(sel.target_size, Size::new(1280, 1120));
    }

    #[test]
    fn test_full_scale_is_identity() {
        let crop = CropRequest::PixelRect(Rectangle::new(100.0, 200.0, 300.0, 400.0));
        let sel = select(&pyramid(), &crop, &ScaleRequest::Full, &none()).unwrap();
        assert_eq!(sel.level.index, 0);
        assert_eq!(sel.reduction_factor.factor, 0);
        assert_eq!(sel.mapped_region, Rectangle::new(100.0, 200.0, 300.0, 400.0));
        assert_eq!(sel.remaining_scale, (1.0, 1.0));
    }

    #[test]
    fn test_upscale_uses_full_resolution() {
        let sel = select(&pyramid(), &CropRequest::Full, &ScaleRequest::Percent(2.0), &none()).unwrap();
        assert_eq!(sel.level.index, 0);
        assert_eq!(sel.remaining_scale, (2.0, 2.0));
    }

    #[test]
    fn test_between_levels_picks_larger() {
        let sel = select(&pyramid(), &CropRequest::Full, &ScaleRequest::Percent(0.3), &none()).unwrap();
        assert_eq!(sel.level.index, 1);
        assert_eq!(sel.reduction_factor.factor, 1);
    }

    #[test]
    fn test_pixel_request_on_crop() {
        // 1000 px wide crop down to 250 px fits level 2 exactly
        let crop = CropRequest::PixelRect(Rectangle::new(0.0, 0.0, 1000.0, 1000.0));
        let sel = select(&pyramid(), &crop, &ScaleRequest::AspectFitWidth(250), &none()).unwrap();
        assert_eq!(sel.level.index, 2);
        assert_eq!(sel.mapped_region, Rectangle::new(0.0, 0.0, 250.0, 250.0));
        assert_eq!(sel.target_size, Size::new(250, 250));
    }

    #[test]
    fn test_fill_needs_both_axes() {
        let sel = select(
            &pyramid(),
            &CropRequest::Full,
            &ScaleRequest::NonAspectFill(1600, 2800),
            &none(),
        )
        .unwrap();
        assert_eq!(sel.level.index, 1);
    }

    #[test]
    fn test_constraint_folds_into_scale() {
        let half = ScaleConstraint::new(1, 2).unwrap();
        let sel = select(&pyramid(), &CropRequest::Full, &ScaleRequest::Full, &half).unwrap();
        assert_eq!(sel.level.index, 1);
        assert_eq!(sel.target_size, Size::new(3200, 2800));

        let sel = select(&pyramid(), &CropRequest::Full, &ScaleRequest::Percent(0.5), &half).unwrap();
        assert_eq!(sel.level.index, 2);
    }

    #[test]
    fn test_single_level_falls_back_to_full() {
        let desc = ImageDescriptor::single_level(Size::new(64, 56), Size::new(64, 56));
        let sel = select(&desc, &CropRequest::Full, &ScaleRequest::Percent(0.1), &none()).unwrap();
        assert_eq!(sel.level.index, 0);
        assert_eq!(sel.reduction_factor.factor, 0);
    }

    #[test]
    fn test_zero_scale_rejected() {
        let result = select(&pyramid(), &CropRequest::Full, &ScaleRequest::Percent(0.0), &none());
        assert!(matches!(result, Err(EngineError::InvalidScale(_))));
    }

    #[test]
    fn test_zero_target_rejected() {
        let desc = ImageDescriptor::single_level(Size::new(64, 56), Size::new(64, 56));
        let result = select(&desc, &CropRequest::Full, &ScaleRequest::Percent(0.001), &none());
        assert!(matches!(result, Err(EngineError::InvalidScale(_))));
    }

    #[test]
    fn test_out_of_bounds_crop_rejected() {
        let crop = CropRequest::PixelRect(Rectangle::new(99_999.0, 0.0, 10.0, 10.0));
        let result = select(&pyramid(), &crop, &ScaleRequest::Full, &none());
        assert!(matches!(result, Err(EngineError::UnsupportedRegion(_))));
    }

    #[test]
    fn test_differential_scale() {
        let selector = LevelSelector::new().with_differential_scale(2.0, 1.0);
        let sel = selector
            .select(&pyramid(), &CropRequest::Full, &ScaleRequest::Percent(0.2), &none())
            .unwrap();
        assert_eq!(sel.mapped_region, Rectangle::new(0.0, 0.0, 3200.0, 1400.0));
        assert!((sel.remaining_scale.0 - 0.4).abs() < 1e-9);
        assert!((sel.remaining_scale.1 - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_epsilon_tolerance() {
        // 0.2502 is just above level 2's scale; a coarse epsilon accepts it
        let strict = LevelSelector::new().with_config(EngineConfig::default().with_epsilon(0.0001));
        let loose = LevelSelector::new().with_config(EngineConfig::default().with_epsilon(0.001));
        let scale = ScaleRequest::Percent(0.2502);
        let s = strict.select(&pyramid(), &CropRequest::Full, &scale, &none()).unwrap();
        let l = loose.select(&pyramid(), &CropRequest::Full, &scale, &none()).unwrap();
        assert_eq!(s.level.index, 1);
        assert_eq!(l.level.index, 2);
    }
}
