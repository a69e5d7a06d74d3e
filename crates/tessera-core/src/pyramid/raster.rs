//! In-memory decode primitive built on the `image` crate.
//!
//! Decodes an encoded image once, then builds reduced levels by repeated
//! halving. Useful for formats that have no native pyramid (PNG, GIF,
//! baseline JPEG) and as a reference primitive in tests.

use std::io::Cursor;

use image::ImageReader;
use tracing::{debug, warn};

use super::{DecodePrimitive, ImageDescriptor, LevelDescriptor};
use crate::error::EngineError;
use crate::format::SourceFormat;
use crate::geometry::{Rectangle, Size};
use crate::metadata::parse_metadata;
use crate::pixel::PixelBuffer;

/// Interpolation filter used when building reduced levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleFilter {
    /// Nearest neighbor interpolation (fastest, lowest quality).
    Nearest,
    /// Bilinear interpolation (fast, acceptable quality).
    #[default]
    Bilinear,
    /// Lanczos3 interpolation (slower, highest quality).
    Lanczos3,
}

impl ResampleFilter {
    /// Convert to the image crate's FilterType.
    pub fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            ResampleFilter::Nearest => image::imageops::FilterType::Nearest,
            ResampleFilter::Bilinear => image::imageops::FilterType::Triangle,
            ResampleFilter::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

/// How a [`RasterPyramid`] is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PyramidOptions {
    /// Stop halving once the shorter edge would drop below this.
    pub min_edge: u32,
    /// Tile size to advertise; `None` for untiled levels.
    pub tile_size: Option<Size>,
    pub filter: ResampleFilter,
    /// Apply the EXIF/XMP orientation before building levels.
    pub auto_orient: bool,
}

impl Default for PyramidOptions {
    fn default() -> Self {
        Self {
            min_edge: 64,
            tile_size: None,
            filter: ResampleFilter::default(),
            auto_orient: false,
        }
    }
}

/// A fully decoded image held at several resolutions.
pub struct RasterPyramid {
    format: SourceFormat,
    levels: Vec<PixelBuffer>,
    descriptor: ImageDescriptor,
    oriented: bool,
}

impl RasterPyramid {
    /// Decode `bytes` with default options.
    pub fn decode(bytes: &[u8]) -> Result<Self, EngineError> {
        Self::decode_with(bytes, &PyramidOptions::default())
    }

    /// Decode `bytes` and build the pyramid.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Encoded image in any format the `image` crate was built with
    /// * `options` - Level and orientation settings
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnsupportedFormat` if the format cannot be
    /// guessed, and `EngineError::ContainerDecode` if decoding fails.
    pub fn decode_with(bytes: &[u8], options: &PyramidOptions) -> Result<Self, EngineError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| EngineError::Io(e.to_string()))?;
        let format = reader
            .format()
            .map(SourceFormat::from_image_format)
            .or_else(|| SourceFormat::detect(bytes))
            .ok_or(EngineError::UnsupportedFormat(SourceFormat::Unknown))?;

        let img = reader.decode().map_err(|e| {
            debug!(error = %e, %format, "image decode failed");
            EngineError::ContainerDecode {
                format,
                region: "full image".to_string(),
            }
        })?;
        let mut full = PixelBuffer::from_rgb_image(img.into_rgb8());

        let mut oriented = false;
        if options.auto_orient {
            match parse_metadata(format, Cursor::new(bytes)) {
                Ok(record) => {
                    if let Some(orientation) = record.orientation {
                        full = full.oriented(orientation).ok_or_else(|| {
                            EngineError::ContainerDecode {
                                format,
                                region: "full image".to_string(),
                            }
                        })?;
                    }
                    oriented = true;
                }
                Err(EngineError::UnsupportedFormat(_)) => oriented = true,
                Err(e) => warn!(error = %e, %format, "metadata unreadable, orientation not applied"),
            }
        }

        Self::from_buffer(format, full, options).map(|mut pyramid| {
            pyramid.oriented = oriented;
            pyramid
        })
    }

    /// Build a pyramid from an already decoded buffer.
    pub fn from_buffer(
        format: SourceFormat,
        full: PixelBuffer,
        options: &PyramidOptions,
    ) -> Result<Self, EngineError> {
        if full.is_empty() {
            return Err(EngineError::InvalidDescriptor(
                "cannot build a pyramid from an empty image".to_string(),
            ));
        }

        let mut levels = vec![full];
        while let Some(next) = levels.last().and_then(|prev| halve(prev, options)) {
            levels.push(next);
        }

        let tile = options.tile_size.unwrap_or(Size::new(0, 0));
        let descriptor = ImageDescriptor::new(
            levels
                .iter()
                .enumerate()
                .map(|(index, buf)| {
                    LevelDescriptor::new(index, Size::new(buf.width, buf.height), tile)
                })
                .collect(),
        )?;

        debug!(
            %format,
            size = %descriptor.full_size(),
            levels = descriptor.num_levels(),
            "built raster pyramid"
        );
        Ok(Self {
            format,
            levels,
            descriptor,
            oriented: false,
        })
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }
}

/// Half-size copy of `prev`, or `None` once the shorter edge would fall
/// below the minimum.
fn halve(prev: &PixelBuffer, options: &PyramidOptions) -> Option<PixelBuffer> {
    let width = prev.width.div_ceil(2);
    let height = prev.height.div_ceil(2);
    if width.min(height) < options.min_edge.max(1) || (width, height) == (prev.width, prev.height) {
        return None;
    }
    let rgb = prev.to_rgb_image()?;
    let resized = image::imageops::resize(&rgb, width, height, options.filter.to_image_filter());
    Some(PixelBuffer::from_rgb_image(resized))
}

impl DecodePrimitive for RasterPyramid {
    fn format(&self) -> SourceFormat {
        self.format
    }

    fn geometry(&self) -> Result<ImageDescriptor, EngineError> {
        Ok(self.descriptor.clone())
    }

    fn decode_region(
        &self,
        level: usize,
        region: &Rectangle,
    ) -> Result<Option<PixelBuffer>, EngineError> {
        let Some(buffer) = self.levels.get(level) else {
            debug!(level, levels = self.levels.len(), "no such level");
            return Ok(None);
        };
        Ok(buffer.crop(region))
    }

    fn bakes_orientation(&self) -> bool {
        self.oriented
    }
}
