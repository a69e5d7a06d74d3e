//! One decode session against one source image.

use tracing::debug;

use super::region::read_region_with;
use super::select::{LevelSelector, Selection};
use super::{DecodePrimitive, ImageDescriptor, ReaderHint, ReaderHints};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::operation::{CropRequest, ScaleConstraint, ScaleRequest};
use crate::pixel::PixelBuffer;

/// Result of [`RegionEngine::read`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRegion {
    pub image: PixelBuffer,
    /// Hints the engine knows to be true of `image`.
    pub hints: ReaderHints,
    pub selection: Selection,
}

impl ProcessedRegion {
    /// X and Y scales still to be applied to `image`.
    pub fn remaining_scale(&self) -> (f64, f64) {
        self.selection.remaining_scale
    }
}

/// Ties a decode primitive to the selector and region reader.
///
/// Geometry is fetched once when the engine is opened and reused for every
/// read.
pub struct RegionEngine<P> {
    primitive: P,
    descriptor: ImageDescriptor,
    selector: LevelSelector,
    config: EngineConfig,
}

impl<P: DecodePrimitive> RegionEngine<P> {
    /// Open a session with the default configuration.
    pub fn open(primitive: P) -> Result<Self, EngineError> {
        Self::open_with(primitive, EngineConfig::default())
    }

    pub fn open_with(primitive: P, config: EngineConfig) -> Result<Self, EngineError> {
        let descriptor = primitive.geometry()?;
        debug!(
            format = %primitive.format(),
            size = %descriptor.full_size(),
            levels = descriptor.num_levels(),
            "opened region engine"
        );
        Ok(Self {
            primitive,
            descriptor,
            selector: LevelSelector::new().with_config(config),
            config,
        })
    }

    /// See [`LevelSelector::with_differential_scale`].
    pub fn with_differential_scale(mut self, sx: f64, sy: f64) -> Self {
        self.selector = self.selector.with_differential_scale(sx, sy);
        self
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    pub fn primitive(&self) -> &P {
        &self.primitive
    }

    /// Select a level for the request and decode it.
    ///
    /// With [`ReaderHint::IgnoreCrop`] in `hints` the level is still chosen
    /// for the requested crop, but the whole level is decoded and the result
    /// does not carry `AlreadyCropped`; `selection.mapped_region` tells the
    /// caller where to crop.
    ///
    /// # Errors
    ///
    /// Client errors from selection (`InvalidScale`, `UnsupportedRegion`)
    /// are raised before any decode call.
    pub fn read(
        &self,
        crop: &CropRequest,
        scale: &ScaleRequest,
        constraint: &ScaleConstraint,
        hints: ReaderHints,
    ) -> Result<ProcessedRegion, EngineError> {
        let selection = self
            .selector
            .select(&self.descriptor, crop, scale, constraint)?;

        let ignore_crop = hints.contains(ReaderHint::IgnoreCrop);
        let region = if ignore_crop {
            selection.level.size.bounds()
        } else {
            selection.mapped_region
        };

        let read = read_region_with(&selection.level, &region, &self.primitive, &self.config)?;

        let hints = if ignore_crop {
            let mut out = ReaderHints::new().with(ReaderHint::IgnoreCrop);
            if read.hints.contains(ReaderHint::AlreadyOriented) {
                out.insert(ReaderHint::AlreadyOriented);
            }
            out
        } else {
            read.hints
        };

        Ok(ProcessedRegion {
            image: read.image,
            hints,
            selection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Rectangle, Size};
    use crate::pyramid::region::tests::RecordingPrimitive;
    use crate::pyramid::{LevelDescriptor, PyramidOptions, RasterPyramid};

    fn engine() -> RegionEngine<RecordingPrimitive> {
        let tile = Size::new(512, 512);
        let descriptor = ImageDescriptor::new(vec![
            LevelDescriptor::new(0, Size::new(6400, 5600), tile),
            LevelDescriptor::new(1, Size::new(3200, 2800), tile),
            LevelDescriptor::new(2, Size::new(1600, 1400), tile),
        ])
        .unwrap();
        RegionEngine::open(RecordingPrimitive::new(descriptor)).unwrap()
    }

    #[test]
    fn test_read_reduced_level() {
        let engine = engine();
        let out = engine
            .read(
                &CropRequest::Full,
                &ScaleRequest::Percent(0.2),
                &ScaleConstraint::default(),
                ReaderHints::new(),
            )
            .unwrap();
        assert_eq!(out.selection.level.index, 2);
        assert_eq!((out.image.width, out.image.height), (1600, 1400));
        assert!(out.hints.contains(ReaderHint::AlreadyCropped));
        assert!((out.remaining_scale().0 - 0.8).abs() < 1e-9);
        assert_eq!(
            engine.primitive().calls.borrow().as_slice(),
            &[(2, Rectangle::new(0.0, 0.0, 1600.0, 1400.0))]
        );
    }

    #[test]
    fn test_ignore_crop_reads_whole_level() {
        let engine = engine();
        let crop = CropRequest::PixelRect(Rectangle::new(400.0, 400.0, 800.0, 800.0));
        let out = engine
            .read(
                &crop,
                &ScaleRequest::Percent(0.5),
                &ScaleConstraint::default(),
                ReaderHints::new().with(ReaderHint::IgnoreCrop),
            )
            .unwrap();
        assert_eq!(out.selection.level.index, 1);
        assert_eq!((out.image.width, out.image.height), (3200, 2800));
        assert_eq!(out.selection.mapped_region, Rectangle::new(200.0, 200.0, 400.0, 400.0));
        assert!(!out.hints.contains(ReaderHint::AlreadyCropped));
        assert!(out.hints.contains(ReaderHint::IgnoreCrop));
    }

    #[test]
    fn test_client_errors_before_decode() {
        let engine = engine();
        let result = engine.read(
            &CropRequest::Full,
            &ScaleRequest::Percent(0.0),
            &ScaleConstraint::default(),
            ReaderHints::new(),
        );
        assert!(matches!(result, Err(EngineError::InvalidScale(_))));
        let result = engine.read(
            &CropRequest::PixelRect(Rectangle::new(99_999.0, 0.0, 10.0, 10.0)),
            &ScaleRequest::Full,
            &ScaleConstraint::default(),
            ReaderHints::new(),
        );
        assert!(matches!(result, Err(EngineError::UnsupportedRegion(_))));
        assert!(engine.primitive().calls.borrow().is_empty());
    }

    #[test]
    fn test_end_to_end_with_raster_pyramid() {
        let full = PixelBuffer::new(64, 56, vec![200; 64 * 56 * 3]);
        let options = PyramidOptions {
            min_edge: 8,
            ..PyramidOptions::default()
        };
        let pyramid = RasterPyramid::from_buffer(crate::format::SourceFormat::Png, full, &options).unwrap();
        let engine = RegionEngine::open(pyramid).unwrap();
        assert_eq!(engine.descriptor().num_levels(), 3);

        let crop = CropRequest::PixelRect(Rectangle::new(0.0, 0.0, 99_999.0, 99_999.0));
        let out = engine
            .read(
                &crop,
                &ScaleRequest::AspectFitWidth(16),
                &ScaleConstraint::default(),
                ReaderHints::new(),
            )
            .unwrap();
        assert_eq!(out.selection.region, Rectangle::new(0.0, 0.0, 64.0, 56.0));
        assert_eq!(out.selection.level.index, 2);
        assert_eq!((out.image.width, out.image.height), (16, 14));
        assert_eq!(out.selection.target_size, Size::new(16, 14));
    }
}
