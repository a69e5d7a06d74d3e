//! Source container formats.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Container format of a source image.
///
/// Metadata parsing is routed on this value (see [`crate::metadata::parse_metadata`]);
/// decode primitives report it so that decode failures can name the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceFormat {
    Gif,
    Jpeg,
    Jp2,
    Png,
    Tiff,
    Unknown,
}

const GIF_MAGIC: &[u8] = b"GIF";
const JPEG_MAGIC: [u8; 2] = [0xFF, 0xD8];
const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const TIFF_MAGIC_LE: [u8; 4] = [0x49, 0x49, 0x2A, 0x00]; // II + 42
const TIFF_MAGIC_BE: [u8; 4] = [0x4D, 0x4D, 0x00, 0x2A]; // MM + 42

/// The 12-byte JPEG 2000 signature box.
pub(crate) const JP2_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];

impl SourceFormat {
    /// Guess the format from the first bytes of a stream.
    ///
    /// At least 12 bytes are needed to recognise JP2. Returns `None` when no
    /// known magic number matches.
    pub fn detect(bytes: &[u8]) -> Option<SourceFormat> {
        if bytes.starts_with(&JP2_SIGNATURE) {
            Some(SourceFormat::Jp2)
        } else if bytes.starts_with(&JPEG_MAGIC) {
            Some(SourceFormat::Jpeg)
        } else if bytes.starts_with(GIF_MAGIC) {
            Some(SourceFormat::Gif)
        } else if bytes.starts_with(&PNG_MAGIC) {
            Some(SourceFormat::Png)
        } else if bytes.starts_with(&TIFF_MAGIC_LE) || bytes.starts_with(&TIFF_MAGIC_BE) {
            Some(SourceFormat::Tiff)
        } else {
            None
        }
    }

    /// Map an `image` crate format onto ours.
    pub fn from_image_format(format: image::ImageFormat) -> SourceFormat {
        match format {
            image::ImageFormat::Gif => SourceFormat::Gif,
            image::ImageFormat::Jpeg => SourceFormat::Jpeg,
            image::ImageFormat::Png => SourceFormat::Png,
            image::ImageFormat::Tiff => SourceFormat::Tiff,
            _ => SourceFormat::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SourceFormat::Gif => "GIF",
            SourceFormat::Jpeg => "JPEG",
            SourceFormat::Jp2 => "JPEG2000",
            SourceFormat::Png => "PNG",
            SourceFormat::Tiff => "TIFF",
            SourceFormat::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
