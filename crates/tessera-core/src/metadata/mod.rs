//! Container metadata scanning.
//!
//! Each parser walks the raw byte stream (never the pixel decode path) and
//! produces one immutable [`MetadataRecord`]. Parsers share nothing but the
//! [`SegmentReader`](crate::scan::SegmentReader) cursor.
//!
//! # Example
//!
//! ```ignore
//! use std::io::Cursor;
//! use tessera_core::metadata::MetadataReader;
//!
//! let mut reader = MetadataReader::detect(Cursor::new(bytes))?;
//! let record = reader.record()?;
//! println!("{:?} {:?}", record.size, record.orientation);
//! ```

pub mod gif;
pub mod jp2;
pub mod jpeg;
pub(crate) mod orientation;
pub mod xmp;

pub use gif::{parse_gif, parse_gif_with};
pub use jp2::{parse_jp2, parse_jp2_with};
pub use jpeg::{parse_jpeg, parse_jpeg_with};
pub use orientation::{orientation_from_exif, Orientation};

use std::io::{Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::format::SourceFormat;
use crate::geometry::Size;
use crate::pyramid::ImageDescriptor;

/// Everything a parser learned about one source stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub format: SourceFormat,
    /// Pixel dimensions as declared by the container header.
    pub size: Option<Size>,
    /// EXIF orientation, falling back to XMP `tiff:Orientation`.
    pub orientation: Option<Orientation>,
    /// Embedded ICC profile, reassembled if it was chunked.
    pub icc_profile: Option<Vec<u8>>,
    /// XMP packet trimmed to its `rdf:RDF` element.
    pub xmp: Option<Vec<u8>>,
    /// Raw TIFF-structured EXIF block.
    pub exif: Option<Vec<u8>>,
    /// Raw IPTC-IIM block.
    pub iptc: Option<Vec<u8>>,
    pub details: FormatDetails,
}

impl MetadataRecord {
    pub(crate) fn new(format: SourceFormat, details: FormatDetails) -> Self {
        Self {
            format,
            size: None,
            orientation: None,
            icc_profile: None,
            xmp: None,
            exif: None,
            iptc: None,
            details,
        }
    }

    /// The XMP packet as text, if present and valid UTF-8.
    pub fn xmp_str(&self) -> Option<&str> {
        self.xmp
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Dimensions after the recorded orientation is applied.
    pub fn oriented_size(&self) -> Option<Size> {
        let size = self.size?;
        match self.orientation {
            Some(o) if o.swaps_dimensions() => Some(Size::new(size.height, size.width)),
            _ => Some(size),
        }
    }

    /// Fill `orientation` from the EXIF block, or the XMP packet if EXIF has
    /// none.
    pub(crate) fn resolve_orientation(&mut self) {
        self.orientation = self
            .exif
            .as_deref()
            .and_then(orientation_from_exif)
            .or_else(|| self.xmp.as_deref().and_then(xmp::orientation_from_xmp));
    }
}

/// Fields only one container format carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FormatDetails {
    Gif(GifDetails),
    Jpeg(JpegDetails),
    Jp2(Jp2Details),
}

/// Animation properties of a GIF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GifDetails {
    /// Netscape loop count; 0 loops forever, 1 when no Netscape extension.
    pub loop_count: u16,
    /// Delay of the last Graphic Control Extension, in hundredths of a second.
    pub frame_delay_hundredths: u16,
}

impl Default for GifDetails {
    fn default() -> Self {
        Self {
            loop_count: 1,
            frame_delay_hundredths: 0,
        }
    }
}

impl GifDetails {
    pub fn loops_forever(&self) -> bool {
        self.loop_count == 0
    }
}

/// Color transform declared by an Adobe APP14 segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdobeColorTransform {
    YCbCr,
    Ycck,
    /// Any code other than 1 or 2, including 0 (no transform).
    Unknown(u8),
}

impl From<u8> for AdobeColorTransform {
    fn from(code: u8) -> Self {
        match code {
            1 => AdobeColorTransform::YCbCr,
            2 => AdobeColorTransform::Ycck,
            other => AdobeColorTransform::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JpegDetails {
    pub has_adobe_segment: bool,
    pub adobe_color_transform: Option<AdobeColorTransform>,
    /// Extended XMP APP1 segments seen, whether or not they were merged.
    pub extended_xmp_segments: u32,
}

/// Codestream geometry of a JPEG2000 image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jp2Details {
    /// Reference grid size minus the image offset.
    pub image_size: Size,
    /// Reference tile size (equal to `image_size` when untiled).
    pub tile_size: Size,
    pub num_components: u16,
    /// Bit depth of the first component.
    pub component_bits: u8,
    /// Wavelet decomposition levels (resolution count minus one).
    pub decomposition_levels: u8,
}

impl Jp2Details {
    /// The resolution pyramid the codestream can be decoded at.
    pub fn image_descriptor(&self) -> Result<ImageDescriptor, EngineError> {
        ImageDescriptor::from_decomposition(
            self.image_size,
            self.tile_size,
            self.decomposition_levels,
        )
    }
}

/// Parse a stream with the parser for `format`.
///
/// # Errors
///
/// Returns `EngineError::UnsupportedFormat` for formats without a parser, and
/// the parser's error otherwise.
pub fn parse_metadata<R: Read + Seek>(
    format: SourceFormat,
    stream: R,
) -> Result<MetadataRecord, EngineError> {
    parse_metadata_with(format, stream, &EngineConfig::default())
}

pub fn parse_metadata_with<R: Read + Seek>(
    format: SourceFormat,
    stream: R,
    config: &EngineConfig,
) -> Result<MetadataRecord, EngineError> {
    match format {
        SourceFormat::Gif => parse_gif_with(stream, config),
        SourceFormat::Jpeg => parse_jpeg_with(stream, config),
        SourceFormat::Jp2 => parse_jp2_with(stream, config),
        other => Err(EngineError::UnsupportedFormat(other)),
    }
}

/// Single-use metadata reader bound to one stream.
///
/// The stream is parsed on first access; later calls return the cached
/// record. Not meant to be shared between threads.
pub struct MetadataReader<R> {
    stream: R,
    format: SourceFormat,
    config: EngineConfig,
    record: Option<MetadataRecord>,
}

impl<R: Read + Seek> MetadataReader<R> {
    pub fn new(format: SourceFormat, stream: R) -> Self {
        Self {
            stream,
            format,
            config: EngineConfig::default(),
            record: None,
        }
    }

    /// Sniff the format from the stream's leading bytes.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnsupportedFormat` if the magic number is not
    /// recognised, or an I/O error if the stream cannot be rewound.
    pub fn detect(mut stream: R) -> Result<Self, EngineError> {
        let mut head = [0u8; 12];
        let mut filled = 0;
        while filled < head.len() {
            match stream.read(&mut head[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(EngineError::Io(e.to_string())),
            }
        }
        stream
            .seek(SeekFrom::Start(0))
            .map_err(|e| EngineError::Io(e.to_string()))?;

        let format = SourceFormat::detect(&head[..filled])
            .ok_or(EngineError::UnsupportedFormat(SourceFormat::Unknown))?;
        debug!(%format, "detected source format");
        Ok(Self::new(format, stream))
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    /// Parse (once) and return the record.
    pub fn record(&mut self) -> Result<&MetadataRecord, EngineError> {
        if self.record.is_none() {
            let record = parse_metadata_with(self.format, &mut self.stream, &self.config)?;
            self.record = Some(record);
        }
        self.record
            .as_ref()
            .ok_or_else(|| EngineError::Io("metadata record missing after parse".to_string()))
    }

    pub fn orientation(&mut self) -> Result<Orientation, EngineError> {
        Ok(self.record()?.orientation.unwrap_or_default())
    }

    pub fn icc_profile(&mut self) -> Result<Option<&[u8]>, EngineError> {
        Ok(self.record()?.icc_profile.as_deref())
    }

    pub fn xmp(&mut self) -> Result<Option<&[u8]>, EngineError> {
        Ok(self.record()?.xmp.as_deref())
    }

    pub fn into_record(mut self) -> Result<MetadataRecord, EngineError> {
        self.record()?;
        self.record
            .ok_or_else(|| EngineError::Io("metadata record missing after parse".to_string()))
    }
}
