//! Tile-aware region reads.
//!
//! The reader never joins tiles itself: it computes the whole-pixel bounding
//! rectangle of the request, clamped to the level, and hands it to the decode
//! primitive in one call.

use tracing::{debug, warn};

use super::{DecodePrimitive, LevelDescriptor, ReaderHint, ReaderHints, TileLayout};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::geometry::Rectangle;
use crate::pixel::PixelBuffer;

/// Pixels for one region plus what is already true of them.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionRead {
    pub image: PixelBuffer,
    pub hints: ReaderHints,
    /// Whole-pixel rectangle, in level coordinates, that was decoded.
    pub requested: Rectangle,
}

/// Read `mapped` out of `level` with the default tolerance.
pub fn read_region<P: DecodePrimitive + ?Sized>(
    level: &LevelDescriptor,
    mapped: &Rectangle,
    primitive: &P,
) -> Result<RegionRead, EngineError> {
    read_region_with(level, mapped, primitive, &EngineConfig::default())
}

/// Read `mapped` out of `level`.
///
/// # Errors
///
/// Returns `EngineError::UnsupportedRegion` if nothing of `mapped` lies inside
/// the level, and `EngineError::ContainerDecode` if the primitive produces no
/// pixels. Primitive errors are passed through unchanged.
pub fn read_region_with<P: DecodePrimitive + ?Sized>(
    level: &LevelDescriptor,
    mapped: &Rectangle,
    primitive: &P,
    config: &EngineConfig,
) -> Result<RegionRead, EngineError> {
    let requested = mapped
        .bounding_pixels(level.size, config.epsilon)
        .ok_or_else(|| {
            EngineError::UnsupportedRegion(format!(
                "{} lies outside level {} ({})",
                mapped, level.index, level.size
            ))
        })?;

    let layout = level.tile_layout();
    match layout {
        TileLayout::Untiled => debug!(
            level = level.index,
            region = %requested,
            "reading mono-tiled region"
        ),
        TileLayout::Striped | TileLayout::Tiled => {
            let span = level.tile_span(&requested);
            debug!(
                level = level.index,
                region = %requested,
                tile = %level.tile_size,
                columns = span.map_or(0, |s| s.columns),
                rows = span.map_or(0, |s| s.rows),
                "reading {} region",
                if layout == TileLayout::Striped { "striped" } else { "tiled" }
            );
        }
    }

    let decode_failed = || EngineError::ContainerDecode {
        format: primitive.format(),
        region: requested.to_string(),
    };
    let mut image = primitive
        .decode_region(level.index, &requested)?
        .filter(|img| !img.is_empty())
        .ok_or_else(decode_failed)?;

    let bounds = requested.size();
    if image.width > bounds.width || image.height > bounds.height {
        warn!(
            returned_width = image.width,
            returned_height = image.height,
            requested = %requested,
            "decode primitive returned more than requested, cropping"
        );
        image = image
            .crop(&bounds.bounds())
            .ok_or_else(decode_failed)?;
    }

    let mut hints = ReaderHints::new().with(ReaderHint::AlreadyCropped);
    if primitive.bakes_orientation() {
        hints.insert(ReaderHint::AlreadyOriented);
    }

    Ok(RegionRead {
        image,
        hints,
        requested,
    })
}
