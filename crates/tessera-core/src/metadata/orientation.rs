//! Source orientation, as recorded in EXIF or XMP.

use exif::{In, Reader, Tag};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// EXIF orientation values.
///
/// See: <https://exiftool.org/TagNames/EXIF.html> (Orientation tag)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Orientation {
    /// Normal (no transformation needed).
    #[default]
    Normal = 1,
    /// Horizontal flip.
    FlipHorizontal = 2,
    /// Rotate 180 degrees.
    Rotate180 = 3,
    /// Vertical flip.
    FlipVertical = 4,
    /// Transpose (flip horizontal + rotate 270 CW).
    Transpose = 5,
    /// Rotate 90 degrees clockwise.
    Rotate90CW = 6,
    /// Transverse (flip horizontal + rotate 90 CW).
    Transverse = 7,
    /// Rotate 270 degrees clockwise (90 CCW).
    Rotate270CW = 8,
}

impl Orientation {
    /// Map a raw tag value, rejecting anything outside 1..=8.
    pub fn from_exif(value: u32) -> Option<Orientation> {
        let orientation = match value {
            1 => Orientation::Normal,
            2 => Orientation::FlipHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::FlipVertical,
            5 => Orientation::Transpose,
            6 => Orientation::Rotate90CW,
            7 => Orientation::Transverse,
            8 => Orientation::Rotate270CW,
            _ => return None,
        };
        Some(orientation)
    }

    /// Returns true if this orientation swaps width and height dimensions.
    #[inline]
    pub fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            Orientation::Transpose
                | Orientation::Rotate90CW
                | Orientation::Transverse
                | Orientation::Rotate270CW
        )
    }
}

impl From<u32> for Orientation {
    fn from(value: u32) -> Self {
        Orientation::from_exif(value).unwrap_or_default()
    }
}

/// Read the primary-image orientation out of a raw TIFF-structured EXIF
/// block (no `Exif\0\0` prefix).
///
/// Returns `None` if the block does not parse or has no valid orientation.
pub fn orientation_from_exif(tiff: &[u8]) -> Option<Orientation> {
    match Reader::new().read_raw(tiff.to_vec()) {
        Ok(exif) => {
            let field = exif.get_field(Tag::Orientation, In::PRIMARY)?;
            field.value.get_uint(0).and_then(Orientation::from_exif)
        }
        Err(e) => {
            debug!(error = %e, len = tiff.len(), "unreadable EXIF block");
            None
        }
    }
}
