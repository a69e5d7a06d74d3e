//! GIF metadata parser.
//!
//! Reads the Logical Screen Descriptor, then walks blocks up to the trailer
//! collecting the Netscape loop count, the frame delay and the XMP
//! application extension. Image data is skipped sub-block by sub-block.

use std::io::{Read, Seek};

use tracing::{debug, warn};

use super::{xmp, FormatDetails, GifDetails, MetadataRecord};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::format::SourceFormat;
use crate::geometry::Size;
use crate::scan::SegmentReader;

const SIGNATURE: &[u8; 3] = b"GIF";
const VERSIONS: [&[u8; 3]; 2] = [b"87a", b"89a"];

const IMAGE_DESCRIPTOR: u8 = 0x2C;
const EXTENSION_INTRODUCER: u8 = 0x21;
const TRAILER: u8 = 0x3B;

const PLAIN_TEXT_LABEL: u8 = 0x01;
const GRAPHIC_CONTROL_LABEL: u8 = 0xF9;
const COMMENT_LABEL: u8 = 0xFE;
const APPLICATION_LABEL: u8 = 0xFF;

const NETSCAPE_ID: &[u8; 8] = b"NETSCAPE";
const NETSCAPE_AUTH: &[u8; 3] = b"2.0";
const XMP_ID: &[u8; 8] = b"XMP Data";
const XMP_AUTH: &[u8; 3] = b"XMP";

/// Length of the XMP "magic trailer" that precedes the final zero byte.
const XMP_MAGIC_TRAILER_LEN: usize = 256;

/// Color table flag in a packed descriptor byte.
const COLOR_TABLE_FLAG: u8 = 0x80;

/// Parse GIF metadata with the default configuration.
pub fn parse_gif<R: Read + Seek>(stream: R) -> Result<MetadataRecord, EngineError> {
    parse_gif_with(stream, &EngineConfig::default())
}

/// Parse GIF metadata.
///
/// # Errors
///
/// Returns `EngineError::InvalidSignature` if the stream does not start with
/// `GIF87a` or `GIF89a`, and `EngineError::TruncatedStream` if the stream ends
/// before the trailer.
pub fn parse_gif_with<R: Read + Seek>(
    stream: R,
    config: &EngineConfig,
) -> Result<MetadataRecord, EngineError> {
    let mut reader = SegmentReader::new(stream);

    let header: [u8; 6] = reader.read_array()?;
    if &header[..3] != SIGNATURE || !VERSIONS.iter().any(|v| &header[3..] == *v) {
        return Err(EngineError::invalid_signature(SourceFormat::Gif, &header));
    }

    // Logical Screen Descriptor
    let width = reader.read_u16_le()?;
    let height = reader.read_u16_le()?;
    let packed = reader.read_u8()?;
    reader.skip(2)?; // background color index, pixel aspect ratio
    let after_descriptor = reader.position()?;

    let gct_len = color_table_len(packed);
    let state = match gct_len {
        Some(len) => {
            let attempt = reader
                .skip(len)
                .and_then(|_| read_blocks(&mut reader, config));
            match attempt {
                Err(EngineError::TruncatedStream { .. }) => {
                    // Some encoders set the GCT flag without writing a table.
                    warn!(
                        gct_len = len,
                        "GIF blocks unreadable after global color table, retrying without it"
                    );
                    reader.seek_to(after_descriptor)?;
                    read_blocks(&mut reader, config)?
                }
                other => other?,
            }
        }
        None => read_blocks(&mut reader, config)?,
    };

    let mut record = MetadataRecord::new(SourceFormat::Gif, FormatDetails::Gif(state.details));
    record.size = Some(Size::new(width as u32, height as u32));
    record.xmp = state.xmp;
    record.resolve_orientation();

    debug!(
        width,
        height,
        loop_count = state.details.loop_count,
        delay = state.details.frame_delay_hundredths,
        frames = state.frames,
        has_xmp = record.xmp.is_some(),
        "parsed GIF metadata"
    );
    Ok(record)
}

#[derive(Default)]
struct BlockState {
    details: GifDetails,
    xmp: Option<Vec<u8>>,
    frames: u32,
}

/// Byte length of a color table declared by a packed descriptor byte.
fn color_table_len(packed: u8) -> Option<u64> {
    if packed & COLOR_TABLE_FLAG == 0 {
        return None;
    }
    let entries = 1u64 << ((packed & 0x07) + 1);
    Some(3 * entries)
}

fn read_blocks<R: Read + Seek>(
    reader: &mut SegmentReader<R>,
    config: &EngineConfig,
) -> Result<BlockState, EngineError> {
    let mut state = BlockState::default();
    loop {
        match reader.read_u8()? {
            IMAGE_DESCRIPTOR => {
                read_image(reader)?;
                state.frames += 1;
            }
            EXTENSION_INTRODUCER => read_extension(reader, &mut state, config)?,
            TRAILER => return Ok(state),
            // Blocks may appear in any order; stray bytes are stepped over
            other => debug!(byte = other, "skipping unknown GIF block introducer"),
        }
    }
}

fn read_image<R: Read + Seek>(reader: &mut SegmentReader<R>) -> Result<(), EngineError> {
    // left, top, width, height, packed
    let descriptor: [u8; 9] = reader.read_array()?;
    if let Some(lct_len) = color_table_len(descriptor[8]) {
        reader.skip(lct_len)?;
    }
    reader.skip(1)?; // LZW minimum code size
    skip_sub_blocks(reader)
}

fn read_extension<R: Read + Seek>(
    reader: &mut SegmentReader<R>,
    state: &mut BlockState,
    config: &EngineConfig,
) -> Result<(), EngineError> {
    match reader.read_u8()? {
        PLAIN_TEXT_LABEL => {
            reader.skip(13)?;
            skip_sub_blocks(reader)
        }
        APPLICATION_LABEL => read_application_extension(reader, state, config),
        GRAPHIC_CONTROL_LABEL => {
            reader.skip(2)?; // block size, packed fields
            let delay = reader.read_u16_le()?;
            reader.skip(1)?; // transparent color index
            state.details.frame_delay_hundredths = delay;
            skip_sub_blocks(reader)
        }
        COMMENT_LABEL => skip_sub_blocks(reader),
        other => {
            debug!(label = other, "skipping unknown GIF extension");
            skip_sub_blocks(reader)
        }
    }
}

fn read_application_extension<R: Read + Seek>(
    reader: &mut SegmentReader<R>,
    state: &mut BlockState,
    config: &EngineConfig,
) -> Result<(), EngineError> {
    reader.skip(1)?; // block size, always 0x0B
    let identifier: [u8; 8] = reader.read_array()?;
    let auth: [u8; 3] = reader.read_array()?;

    if &identifier == NETSCAPE_ID && &auth == NETSCAPE_AUTH {
        reader.skip(2)?; // sub-block size, sub-block index
        state.details.loop_count = reader.read_u16_le()?;
        skip_sub_blocks(reader)
    } else if &identifier == XMP_ID && &auth == XMP_AUTH {
        state.xmp = read_xmp(reader, config.max_gif_xmp_len)?;
        skip_sub_blocks(reader)
    } else {
        skip_sub_blocks(reader)
    }
}

/// Read the XMP extension body.
///
/// The packet is not split into sub-blocks: it runs until the zero byte that
/// ends the magic trailer. Anything beyond `max_len` is consumed and dropped.
fn read_xmp<R: Read + Seek>(
    reader: &mut SegmentReader<R>,
    max_len: usize,
) -> Result<Option<Vec<u8>>, EngineError> {
    let cap = max_len.saturating_add(XMP_MAGIC_TRAILER_LEN);
    let mut buffer = Vec::new();
    let mut overflowed = false;
    loop {
        let b = reader.read_u8()?;
        if b == 0 {
            break;
        }
        if buffer.len() < cap {
            buffer.push(b);
        } else {
            overflowed = true;
        }
    }
    if overflowed {
        warn!(max_len, "GIF XMP packet exceeds limit, discarding");
        return Ok(None);
    }

    buffer.truncate(buffer.len().saturating_sub(XMP_MAGIC_TRAILER_LEN));
    let trimmed = xmp::trim_to_rdf(&buffer);
    if trimmed.is_none() {
        debug!(len = buffer.len(), "GIF XMP packet has no rdf:RDF element");
    }
    Ok(trimmed)
}

fn skip_sub_blocks<R: Read + Seek>(reader: &mut SegmentReader<R>) -> Result<(), EngineError> {
    loop {
        let len = reader.read_u8()?;
        if len == 0 {
            return Ok(());
        }
        reader.skip(len as u64)?;
    }
}
