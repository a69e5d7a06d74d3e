//! JPEG marker parser.
//!
//! Walks marker segments from SOI to the first Huffman table (or the start of
//! scan), which is where every segment of interest lives. APP1 payloads are
//! told apart by their signatures rather than the marker number.
//!
//! XMP too large for one segment continues in extended XMP segments keyed by
//! a GUID. Those are reassembled by offset once the walk is over and merged
//! into the main packet.

use std::io::{Read, Seek};

use tracing::{debug, warn};

use super::{xmp, AdobeColorTransform, FormatDetails, JpegDetails, MetadataRecord};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::format::SourceFormat;
use crate::geometry::Size;
use crate::scan::SegmentReader;

const SOI: [u8; 2] = [0xFF, 0xD8];

const TEM: u8 = 0x01;
const DHT: u8 = 0xC4;
const RST0: u8 = 0xD0;
const RST7: u8 = 0xD7;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP1: u8 = 0xE1;
const APP2: u8 = 0xE2;
const APP13: u8 = 0xED;
const APP14: u8 = 0xEE;

const EXIF_SIGNATURE: &[u8] = b"Exif\0\0";
const XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
const EXTENDED_XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xmp/extension/\0";
const ICC_SIGNATURE: &[u8] = b"ICC_PROFILE\0";
const PHOTOSHOP_SIGNATURE: &[u8] = b"Photoshop 3.0\0";
const ADOBE_SIGNATURE: &[u8] = b"Adobe";

/// GUID, full packet length and chunk offset ahead of extended XMP data.
const EXTENDED_XMP_HEADER_LEN: usize = 32 + 4 + 4;

/// Photoshop image resource holding IPTC-IIM data.
const IPTC_RESOURCE_ID: u16 = 0x0404;

/// Offset of the transform byte within an Adobe APP14 payload.
const ADOBE_TRANSFORM_OFFSET: usize = 11;

/// Parse JPEG metadata with the default configuration.
pub fn parse_jpeg<R: Read + Seek>(stream: R) -> Result<MetadataRecord, EngineError> {
    parse_jpeg_with(stream, &EngineConfig::default())
}

/// Parse JPEG metadata.
///
/// # Errors
///
/// Returns `EngineError::InvalidSignature` if the stream does not start with
/// SOI, `EngineError::MalformedSegment` for a segment length below 2, and
/// `EngineError::TruncatedStream` if a segment runs past the end.
pub fn parse_jpeg_with<R: Read + Seek>(
    stream: R,
    config: &EngineConfig,
) -> Result<MetadataRecord, EngineError> {
    let mut reader = SegmentReader::new(stream);

    let soi: [u8; 2] = reader.read_array()?;
    if soi != SOI {
        return Err(EngineError::invalid_signature(SourceFormat::Jpeg, &soi));
    }

    let mut scan = MarkerScan {
        max_extended_xmp_len: config.max_extended_xmp_len,
        ..MarkerScan::default()
    };
    loop {
        let marker = next_marker(&mut reader)?;
        match marker {
            DHT | SOS | EOI => {
                debug!(marker = format_args!("0x{:02X}", marker), "end of JPEG header region");
                break;
            }
            TEM | RST0..=RST7 => continue,
            _ => {}
        }

        let offset = reader.position()?;
        let len = reader.read_u16_be()?;
        if len < 2 {
            return Err(EngineError::malformed(
                SourceFormat::Jpeg,
                format!("segment 0x{:02X} at offset {} has length {}", marker, offset, len),
            ));
        }
        let payload_len = (len - 2) as usize;

        match marker {
            m if is_sof(m) => {
                let payload = reader.read_exact(payload_len)?;
                scan.read_sof(&payload);
            }
            APP1 => {
                let payload = reader.read_exact(payload_len)?;
                scan.read_app1(payload);
            }
            APP2 => {
                let payload = reader.read_exact(payload_len)?;
                scan.read_app2(&payload);
            }
            APP13 => {
                let payload = reader.read_exact(payload_len)?;
                scan.read_app13(&payload);
            }
            APP14 => {
                let payload = reader.read_exact(payload_len)?;
                scan.read_app14(&payload);
            }
            _ => reader.skip(payload_len as u64)?,
        }
    }

    let xmp = scan.assemble_xmp();
    let mut record = MetadataRecord::new(SourceFormat::Jpeg, FormatDetails::Jpeg(scan.details));
    record.size = scan.size;
    record.icc_profile = scan.icc_profile;
    record.xmp = xmp;
    record.exif = scan.exif;
    record.iptc = scan.iptc;
    record.resolve_orientation();

    debug!(
        size = ?record.size,
        orientation = ?record.orientation,
        icc_len = record.icc_profile.as_ref().map_or(0, Vec::len),
        icc_chunks = scan.icc_chunks,
        has_exif = record.exif.is_some(),
        has_xmp = record.xmp.is_some(),
        has_iptc = record.iptc.is_some(),
        adobe = ?scan.details.adobe_color_transform,
        "parsed JPEG metadata"
    );
    Ok(record)
}

/// Start-of-frame markers; C4, C8 and CC share the range but are not frames.
fn is_sof(marker: u8) -> bool {
    matches!(marker, 0xC0..=0xCF) && !matches!(marker, DHT | 0xC8 | 0xCC)
}

/// Read up to the next marker code, stepping over fill bytes.
fn next_marker<R: Read + Seek>(reader: &mut SegmentReader<R>) -> Result<u8, EngineError> {
    let offset = reader.position()?;
    let prefix = reader.read_u8()?;
    if prefix != 0xFF {
        return Err(EngineError::malformed(
            SourceFormat::Jpeg,
            format!("expected marker at offset {}, found 0x{:02X}", offset, prefix),
        ));
    }
    loop {
        let code = reader.read_u8()?;
        if code != 0xFF {
            return Ok(code);
        }
    }
}

#[derive(Default)]
struct MarkerScan {
    details: JpegDetails,
    size: Option<Size>,
    exif: Option<Vec<u8>>,
    /// Main XMP packet, untrimmed.
    xmp: Option<Vec<u8>>,
    extended_xmp: Vec<ExtendedXmp>,
    max_extended_xmp_len: usize,
    iptc: Option<Vec<u8>>,
    icc_profile: Option<Vec<u8>>,
    icc_chunks: u32,
}

/// One extended XMP packet being filled in from its chunks.
struct ExtendedXmp {
    guid: [u8; 32],
    packet: Vec<u8>,
    received: usize,
}

impl ExtendedXmp {
    fn is_complete(&self) -> bool {
        self.received >= self.packet.len()
    }
}

impl MarkerScan {
    fn read_sof(&mut self, payload: &[u8]) {
        // precision, height, width
        if payload.len() >= 5 && self.size.is_none() {
            let height = u16::from_be_bytes([payload[1], payload[2]]);
            let width = u16::from_be_bytes([payload[3], payload[4]]);
            self.size = Some(Size::new(width as u32, height as u32));
        }
    }

    fn read_app1(&mut self, payload: Vec<u8>) {
        if let Some(tiff) = payload.strip_prefix(EXIF_SIGNATURE) {
            if self.exif.is_none() {
                self.exif = Some(tiff.to_vec());
            }
        } else if let Some(packet) = payload.strip_prefix(XMP_SIGNATURE) {
            if self.xmp.is_none() {
                self.xmp = Some(packet.to_vec());
            }
        } else if let Some(chunk) = payload.strip_prefix(EXTENDED_XMP_SIGNATURE) {
            self.details.extended_xmp_segments += 1;
            self.read_extended_xmp(chunk);
        } else {
            debug!(len = payload.len(), "ignoring unrecognised APP1 segment");
        }
    }

    fn read_extended_xmp(&mut self, chunk: &[u8]) {
        if chunk.len() < EXTENDED_XMP_HEADER_LEN {
            debug!(len = chunk.len(), "extended XMP segment too short");
            return;
        }
        let (guid, rest) = chunk.split_at(32);
        let full_len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let offset = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let data = &rest[8..];

        if full_len > self.max_extended_xmp_len {
            warn!(
                full_len,
                max = self.max_extended_xmp_len,
                "extended XMP packet too large, ignoring chunk"
            );
            return;
        }
        let end = match offset.checked_add(data.len()) {
            Some(end) if end <= full_len => end,
            _ => {
                warn!(offset, len = data.len(), full_len, "extended XMP chunk out of bounds");
                return;
            }
        };

        let index = match self.extended_xmp.iter().position(|e| e.guid[..] == *guid) {
            Some(index) => index,
            None => {
                let mut key = [0u8; 32];
                key.copy_from_slice(guid);
                self.extended_xmp.push(ExtendedXmp {
                    guid: key,
                    packet: vec![0; full_len],
                    received: 0,
                });
                self.extended_xmp.len() - 1
            }
        };
        let entry = &mut self.extended_xmp[index];
        if entry.packet.len() != full_len {
            warn!(
                expected = entry.packet.len(),
                full_len, "extended XMP chunks disagree on packet length"
            );
            return;
        }
        entry.packet[offset..end].copy_from_slice(data);
        entry.received += data.len();
    }

    /// Main packet trimmed to `rdf:RDF`, with any complete extended packets
    /// merged in.
    fn assemble_xmp(&mut self) -> Option<Vec<u8>> {
        let main = self.xmp.take();
        let mut merged = main.as_deref().and_then(|packet| {
            let trimmed = xmp::trim_to_rdf(packet);
            if trimmed.is_none() {
                debug!(len = packet.len(), "JPEG XMP packet has no rdf:RDF element");
            }
            trimmed
        });

        let wanted = main.as_deref().and_then(xmp::extended_xmp_guid);
        for extension in &self.extended_xmp {
            if wanted.is_some_and(|guid| guid.as_bytes() != &extension.guid[..]) {
                debug!("skipping extended XMP not referenced by the main packet");
                continue;
            }
            if !extension.is_complete() {
                warn!(
                    received = extension.received,
                    full_len = extension.packet.len(),
                    "extended XMP packet incomplete, dropping it"
                );
                continue;
            }
            merged = match merged {
                Some(base) => match xmp::merge_rdf(&base, &extension.packet) {
                    Some(combined) => Some(combined),
                    None => {
                        debug!("extended XMP packet has no rdf:RDF element");
                        Some(base)
                    }
                },
                None => xmp::trim_to_rdf(&extension.packet),
            };
        }
        merged
    }

    fn read_app2(&mut self, payload: &[u8]) {
        // signature, then one byte each of chunk sequence number and count
        let Some(rest) = payload.strip_prefix(ICC_SIGNATURE) else {
            return;
        };
        if rest.len() < 2 {
            return;
        }
        self.icc_profile
            .get_or_insert_with(Vec::new)
            .extend_from_slice(&rest[2..]);
        self.icc_chunks += 1;
    }

    fn read_app13(&mut self, payload: &[u8]) {
        if self.iptc.is_some() {
            return;
        }
        if let Some(resources) = payload.strip_prefix(PHOTOSHOP_SIGNATURE) {
            self.iptc = find_image_resource(resources, IPTC_RESOURCE_ID).map(<[u8]>::to_vec);
        }
    }

    fn read_app14(&mut self, payload: &[u8]) {
        if !payload.starts_with(ADOBE_SIGNATURE) {
            return;
        }
        self.details.has_adobe_segment = true;
        self.details.adobe_color_transform = payload
            .get(ADOBE_TRANSFORM_OFFSET)
            .map(|&code| AdobeColorTransform::from(code));
    }
}

/// Find one resource in a run of Photoshop `8BIM` image resource blocks.
fn find_image_resource(mut data: &[u8], wanted: u16) -> Option<&[u8]> {
    while data.len() >= 12 && data.starts_with(b"8BIM") {
        let id = u16::from_be_bytes([data[4], data[5]]);
        // Pascal name, padded to an even length including its length byte
        let name_len = data[6] as usize;
        let name_total = (name_len + 1 + 1) & !1;
        let size_at = 6 + name_total;
        let size_bytes = data.get(size_at..size_at + 4)?;
        let size = u32::from_be_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]])
            as usize;
        let body_at = size_at + 4;
        let body = data.get(body_at..body_at.checked_add(size)?)?;
        if id == wanted {
            return Some(body);
        }
        let next = body_at + size + (size & 1);
        data = data.get(next..)?;
    }
    None
}
