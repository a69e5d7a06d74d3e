//! Error types for selection, region reads and metadata parsing.

use thiserror::Error;

use crate::format::SourceFormat;

/// Everything that can go wrong in this crate.
///
/// None of these are retried internally: a given byte stream fails the same
/// way every time.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The first bytes of a stream are not the expected magic number.
    #[error("Invalid {format} signature: {found} (is this a {format}?)")]
    InvalidSignature { format: SourceFormat, found: String },

    /// A read needed more bytes than the stream had left.
    #[error("Truncated stream: {needed} bytes needed at offset {offset}")]
    TruncatedStream { offset: u64, needed: u64 },

    /// A segment is structurally impossible (e.g. a length shorter than its
    /// own length field).
    #[error("Malformed {format} segment: {reason}")]
    MalformedSegment { format: SourceFormat, reason: String },

    /// The requested crop is empty or lies outside the image.
    #[error("Unsupported region: {0}")]
    UnsupportedRegion(String),

    /// The requested scale is zero, negative or produces an empty image.
    #[error("Invalid scale: {0}")]
    InvalidScale(String),

    /// An image descriptor violates its level ordering.
    #[error("Invalid image descriptor: {0}")]
    InvalidDescriptor(String),

    /// The decode primitive produced no pixels for a well-formed request.
    #[error("Failed to decode {format} region {region}")]
    ContainerDecode { format: SourceFormat, region: String },

    /// No metadata parser exists for the format.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(SourceFormat),

    /// I/O error other than a premature end of stream.
    #[error("I/O error: {0}")]
    Io(String),
}

impl EngineError {
    pub(crate) fn malformed(format: SourceFormat, reason: impl Into<String>) -> Self {
        EngineError::MalformedSegment {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_signature(format: SourceFormat, found: &[u8]) -> Self {
        EngineError::InvalidSignature {
            format,
            found: to_hex(found),
        }
    }

    /// Whether the error was caused by the caller's request rather than the
    /// source data.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::UnsupportedRegion(_) | EngineError::InvalidScale(_)
        )
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
