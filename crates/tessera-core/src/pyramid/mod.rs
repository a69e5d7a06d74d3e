//! Multi-resolution image geometry and the decode primitive boundary.
//!
//! # Architecture
//!
//! A [`DecodePrimitive`] reports the pyramid geometry of one source image as an
//! [`ImageDescriptor`] and decodes rectangles out of individual levels. The
//! `select` module picks the cheapest level for a crop + scale request, the
//! `region` module turns the mapped rectangle into a decode call, and
//! [`RegionEngine`] strings the two together.
//!
//! Levels are ordered from full resolution (index 0) to the most reduced.

pub mod raster;
pub mod region;
pub mod select;
pub mod session;

pub use raster::{PyramidOptions, RasterPyramid, ResampleFilter};
pub use region::{read_region, read_region_with, RegionRead};
pub use select::{select, LevelSelector, Selection};
pub use session::{ProcessedRegion, RegionEngine};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::format::SourceFormat;
use crate::geometry::{Rectangle, Size};
use crate::pixel::PixelBuffer;

/// Most wavelet decomposition levels a JPEG 2000 codestream can declare.
pub const MAX_DECOMPOSITION_LEVELS: u8 = 32;

/// One resolution level of a pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDescriptor {
    /// 0 for full resolution, increasing toward smaller levels.
    pub index: usize,
    pub size: Size,
    /// Equal to `size` when the level is not tiled.
    pub tile_size: Size,
}

/// How a level's pixel data is partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileLayout {
    /// One tile (or one strip) covering the whole level.
    Untiled,
    /// Full-width horizontal bands.
    Striped,
    /// A grid of rectangular tiles.
    Tiled,
}

/// Range of tiles a region touches, in tile-grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSpan {
    pub first_column: u32,
    pub first_row: u32,
    pub columns: u32,
    pub rows: u32,
}

impl TileSpan {
    pub fn count(&self) -> u64 {
        self.columns as u64 * self.rows as u64
    }
}

impl LevelDescriptor {
    /// Create a level descriptor.
    ///
    /// A zero tile dimension means "not tiled" along that axis, and tiles
    /// larger than the level are clipped to it, so an untiled level always
    /// ends up with `tile_size == size`.
    pub fn new(index: usize, size: Size, tile_size: Size) -> Self {
        let clip = |tile: u32, full: u32| if tile == 0 { full } else { tile.min(full) };
        Self {
            index,
            size,
            tile_size: Size::new(
                clip(tile_size.width, size.width),
                clip(tile_size.height, size.height),
            ),
        }
    }

    pub fn untiled(index: usize, size: Size) -> Self {
        Self::new(index, size, size)
    }

    pub fn tile_layout(&self) -> TileLayout {
        if self.tile_size == self.size {
            TileLayout::Untiled
        } else if self.tile_size.width == self.size.width {
            TileLayout::Striped
        } else {
            TileLayout::Tiled
        }
    }

    /// Linear scale of this level relative to a full-resolution size.
    pub fn scale_relative_to(&self, full_size: Size) -> f64 {
        if full_size.width == 0 {
            return 1.0;
        }
        self.size.width as f64 / full_size.width as f64
    }

    /// Tiles of this level that a whole-pixel region intersects.
    ///
    /// Returns `None` for regions that fall outside the level.
    pub fn tile_span(&self, region: &Rectangle) -> Option<TileSpan> {
        let px = region.clamp_to(self.size)?;
        let tw = self.tile_size.width.max(1) as f64;
        let th = self.tile_size.height.max(1) as f64;
        let first_column = (px.x / tw).floor() as u32;
        let first_row = (px.y / th).floor() as u32;
        let last_column = ((px.right() / tw).ceil() as u32).max(first_column + 1);
        let last_row = ((px.bottom() / th).ceil() as u32).max(first_row + 1);
        Some(TileSpan {
            first_column,
            first_row,
            columns: last_column - first_column,
            rows: last_row - first_row,
        })
    }
}

/// Pyramid geometry of one source image. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    full_size: Size,
    levels: Vec<LevelDescriptor>,
}

impl ImageDescriptor {
    /// Build a descriptor from levels ordered full resolution first.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidDescriptor` if there are no levels, a
    /// level's index does not match its position, a level has no area, or a
    /// level is larger than the one before it in either dimension.
    pub fn new(levels: Vec<LevelDescriptor>) -> Result<Self, EngineError> {
        let first = levels
            .first()
            .ok_or_else(|| EngineError::InvalidDescriptor("no levels".to_string()))?;
        let full_size = first.size;

        for (position, level) in levels.iter().enumerate() {
            if level.index != position {
                return Err(EngineError::InvalidDescriptor(format!(
                    "level at position {} has index {}",
                    position, level.index
                )));
            }
            if level.size.is_empty() {
                return Err(EngineError::InvalidDescriptor(format!(
                    "level {} has no area ({})",
                    level.index, level.size
                )));
            }
        }
        for pair in levels.windows(2) {
            if !pair[1].size.fits_within(&pair[0].size) {
                return Err(EngineError::InvalidDescriptor(format!(
                    "level {} ({}) is larger than level {} ({})",
                    pair[1].index, pair[1].size, pair[0].index, pair[0].size
                )));
            }
        }

        Ok(Self { full_size, levels })
    }

    /// A pyramid of length one.
    pub fn single_level(size: Size, tile_size: Size) -> Self {
        Self {
            full_size: size,
            levels: vec![LevelDescriptor::new(0, size, tile_size)],
        }
    }

    /// Pyramid implied by a wavelet codestream: `decomposition_levels + 1`
    /// levels, each halving the previous with rounding up.
    pub fn from_decomposition(
        full_size: Size,
        tile_size: Size,
        decomposition_levels: u8,
    ) -> Result<Self, EngineError> {
        if decomposition_levels > MAX_DECOMPOSITION_LEVELS {
            return Err(EngineError::InvalidDescriptor(format!(
                "{} decomposition levels (at most {})",
                decomposition_levels, MAX_DECOMPOSITION_LEVELS
            )));
        }
        let levels = (0..=decomposition_levels as u32)
            .map(|r| {
                let divisor = 1u64 << r;
                let reduce = |v: u32| (v as u64).div_ceil(divisor) as u32;
                LevelDescriptor::new(
                    r as usize,
                    Size::new(reduce(full_size.width), reduce(full_size.height)),
                    Size::new(reduce(tile_size.width), reduce(tile_size.height)),
                )
            })
            .collect();
        Self::new(levels)
    }

    pub fn full_size(&self) -> Size {
        self.full_size
    }

    pub fn levels(&self) -> &[LevelDescriptor] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&LevelDescriptor> {
        self.levels.get(index)
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn is_pyramidal(&self) -> bool {
        self.levels.len() > 1
    }
}

/// Advisory flags passed between caller and engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderHint {
    /// The returned pixels already reflect the requested crop.
    AlreadyCropped,
    /// The returned pixels already reflect the source orientation.
    AlreadyOriented,
    /// Caller-supplied: decode the whole image and let the caller crop.
    IgnoreCrop,
}

impl ReaderHint {
    fn bit(self) -> u8 {
        match self {
            ReaderHint::AlreadyCropped => 0b001,
            ReaderHint::AlreadyOriented => 0b010,
            ReaderHint::IgnoreCrop => 0b100,
        }
    }
}

/// A set of [`ReaderHint`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ReaderHints {
    bits: u8,
}

impl ReaderHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hint: ReaderHint) -> Self {
        self.insert(hint);
        self
    }

    pub fn insert(&mut self, hint: ReaderHint) {
        self.bits |= hint.bit();
    }

    pub fn contains(&self, hint: ReaderHint) -> bool {
        self.bits & hint.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }
}

/// The engine that turns container bytes into pixels.
///
/// Implementations may be internally multithreaded; calls block until done
/// and cannot be cancelled from this side.
pub trait DecodePrimitive {
    /// Format of the source, used to name decode failures.
    fn format(&self) -> SourceFormat;

    /// Pyramid geometry of the source.
    fn geometry(&self) -> Result<ImageDescriptor, EngineError>;

    /// Decode a whole-pixel rectangle of one level.
    ///
    /// Must never return more than was requested, and returns less at the
    /// image edges. `Ok(None)` means the primitive produced no data.
    fn decode_region(
        &self,
        level: usize,
        region: &Rectangle,
    ) -> Result<Option<PixelBuffer>, EngineError>;

    /// Whether decoded pixels already have the source orientation applied.
    fn bakes_orientation(&self) -> bool {
        false
    }
}
