//! Tessera Core - region decoding for multi-resolution images
//!
//! This crate picks the cheapest resolution level for a crop + scale request
//! against a (possibly tiled, possibly multi-gigapixel) image pyramid, reads
//! the mapped region through a pluggable decode primitive, and scans GIF,
//! JPEG and JPEG2000 byte streams for the metadata a generic decoder tends to
//! miss: orientation, ICC profiles, XMP, and animation settings.

pub mod config;
pub mod error;
pub mod format;
pub mod geometry;
pub mod metadata;
pub mod operation;
pub mod pixel;
pub mod pyramid;
pub mod scan;

pub use config::EngineConfig;
pub use error::EngineError;
pub use format::SourceFormat;
pub use geometry::{Rectangle, Size};
pub use metadata::{parse_gif, parse_jp2, parse_jpeg, parse_metadata, MetadataReader, MetadataRecord, Orientation};
pub use operation::{CropRequest, ReductionFactor, ScaleConstraint, ScaleRequest};
pub use pixel::PixelBuffer;
pub use pyramid::{
    read_region, select, DecodePrimitive, ImageDescriptor, LevelDescriptor, ReaderHint,
    ReaderHints, RegionEngine, Selection,
};
