//! JPEG2000 (JP2) box and codestream parser.
//!
//! Top-level boxes are walked by their length fields, collecting UUID
//! metadata boxes and the `jp2h` header, until the contiguous codestream box
//! (`jp2c`). Inside the codestream the main header is read marker by marker
//! up to the first marker this parser does not know (normally SOT).
//!
//! Files whose box lengths do not add up are still read: the parser falls
//! back to scanning for the `jp2c` tag with a sliding window.

use std::io::{Read, Seek};

use tracing::{debug, warn};

use super::{xmp, FormatDetails, Jp2Details, MetadataRecord};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::format::{SourceFormat, JP2_SIGNATURE};
use crate::geometry::Size;
use crate::pyramid::MAX_DECOMPOSITION_LEVELS;
use crate::scan::SegmentReader;

const BOX_CODESTREAM: &[u8; 4] = b"jp2c";
const BOX_HEADER: &[u8; 4] = b"jp2h";
const BOX_IMAGE_HEADER: &[u8; 4] = b"ihdr";
const BOX_COLOUR: &[u8; 4] = b"colr";
const BOX_UUID: &[u8; 4] = b"uuid";

const EXIF_UUID: &[u8; 16] = b"JpgTiffExif->JP2";
const XMP_UUID: [u8; 16] = [
    0xBE, 0x7A, 0xCF, 0xCB, 0x97, 0xA9, 0x42, 0xE8, 0x9C, 0x71, 0x99, 0x94, 0x91, 0xE3, 0xAF, 0xAC,
];
const IPTC_UUID: [u8; 16] = [
    0x33, 0xC7, 0xA4, 0xD2, 0xB8, 0x1D, 0x47, 0x23, 0xA0, 0xBA, 0xF1, 0xA3, 0xE0, 0x97, 0xAD, 0x38,
];
const EXIF_PREFIX: &[u8] = b"Exif\0\0";

/// Colour specification methods that carry an embedded ICC profile.
const COLR_RESTRICTED_ICC: u8 = 2;
const COLR_ANY_ICC: u8 = 3;

const SOC: u16 = 0xFF4F;
const SIZ: u16 = 0xFF51;
const COD: u16 = 0xFF52;
const COC: u16 = 0xFF53;
const TLM: u16 = 0xFF55;
const PLM: u16 = 0xFF57;
const QCD: u16 = 0xFF5C;
const QCC: u16 = 0xFF5D;
const RGN: u16 = 0xFF5E;
const POC: u16 = 0xFF5F;
const PPM: u16 = 0xFF60;
const CRG: u16 = 0xFF63;
const COM: u16 = 0xFF64;

/// Parse JP2 metadata with the default configuration.
pub fn parse_jp2<R: Read + Seek>(stream: R) -> Result<MetadataRecord, EngineError> {
    parse_jp2_with(stream, &EngineConfig::default())
}

/// Parse JP2 metadata.
///
/// None of the `EngineConfig` settings apply to JP2; the parameter keeps the
/// signature in line with the GIF and JPEG parsers.
///
/// # Errors
///
/// Returns `EngineError::InvalidSignature` if the stream does not start with
/// the JP2 signature box, `EngineError::MalformedSegment` if there is no
/// codestream or its main header is unusable, and
/// `EngineError::TruncatedStream` if a codestream segment runs past the end.
pub fn parse_jp2_with<R: Read + Seek>(
    stream: R,
    _config: &EngineConfig,
) -> Result<MetadataRecord, EngineError> {
    let mut reader = SegmentReader::new(stream);

    let signature: [u8; 12] = reader.read_array()?;
    if signature != JP2_SIGNATURE {
        return Err(EngineError::invalid_signature(SourceFormat::Jp2, &signature));
    }

    let mut boxes = BoxScan::default();
    let codestream_at = match boxes.walk(&mut reader) {
        Ok(Some(offset)) => offset,
        Ok(None) => {
            debug!("no codestream box in box walk, scanning for jp2c");
            find_codestream(&mut reader)?
        }
        Err(e @ (EngineError::TruncatedStream { .. } | EngineError::MalformedSegment { .. })) => {
            warn!(error = %e, "inconsistent JP2 box structure, scanning for jp2c");
            find_codestream(&mut reader)?
        }
        Err(e) => return Err(e),
    };

    reader.seek_to(codestream_at)?;
    let mut header = CodestreamHeader::default();
    header.read(&mut reader)?;
    let details = header.into_details()?;

    let mut record = MetadataRecord::new(SourceFormat::Jp2, FormatDetails::Jp2(details));
    record.size = Some(details.image_size);
    record.icc_profile = boxes.icc_profile;
    record.xmp = boxes.xmp;
    record.exif = boxes.exif;
    record.iptc = boxes.iptc;
    record.resolve_orientation();

    debug!(
        size = %details.image_size,
        header_size = ?boxes.header_size,
        tile = %details.tile_size,
        components = details.num_components,
        bits = details.component_bits,
        levels = details.decomposition_levels,
        has_icc = record.icc_profile.is_some(),
        has_exif = record.exif.is_some(),
        has_xmp = record.xmp.is_some(),
        "parsed JP2 metadata"
    );
    Ok(record)
}

#[derive(Default)]
struct BoxScan {
    exif: Option<Vec<u8>>,
    xmp: Option<Vec<u8>>,
    iptc: Option<Vec<u8>>,
    icc_profile: Option<Vec<u8>>,
    /// Size declared by the `ihdr` box.
    header_size: Option<Size>,
}

impl BoxScan {
    /// Walk top-level boxes from the current position.
    ///
    /// Returns the offset of the codestream, or `None` if the boxes ran out
    /// without one.
    fn walk<R: Read + Seek>(
        &mut self,
        reader: &mut SegmentReader<R>,
    ) -> Result<Option<u64>, EngineError> {
        loop {
            if reader.remaining()? == 0 {
                return Ok(None);
            }
            let start = reader.position()?;
            let lbox = reader.read_u32_be()?;
            let tbox: [u8; 4] = reader.read_array()?;
            let (header_len, box_len) = match lbox {
                0 => (8, reader.stream_len()? - start),
                1 => (16, reader.read_u64_be()?),
                n => (8, n as u64),
            };
            if box_len < header_len {
                return Err(EngineError::malformed(
                    SourceFormat::Jp2,
                    format!(
                        "box {} at offset {} has length {}",
                        String::from_utf8_lossy(&tbox),
                        start,
                        box_len
                    ),
                ));
            }
            let content_len = box_len - header_len;

            match &tbox {
                BOX_CODESTREAM => return Ok(Some(reader.position()?)),
                BOX_UUID => {
                    let content = read_content(reader, content_len)?;
                    self.read_uuid(&content);
                }
                BOX_HEADER => {
                    let content = read_content(reader, content_len)?;
                    self.read_header(&content);
                }
                _ => reader.skip(content_len)?,
            }
        }
    }

    fn read_uuid(&mut self, content: &[u8]) {
        if content.len() < 16 {
            return;
        }
        let (uuid, data) = content.split_at(16);
        if uuid == EXIF_UUID {
            let tiff = data.strip_prefix(EXIF_PREFIX).unwrap_or(data);
            self.exif = Some(tiff.to_vec());
        } else if uuid == XMP_UUID {
            self.xmp = xmp::trim_to_rdf(data);
            if self.xmp.is_none() {
                debug!(len = data.len(), "JP2 XMP box has no rdf:RDF element");
            }
        } else if uuid == IPTC_UUID {
            self.iptc = Some(data.to_vec());
        }
    }

    /// Read the sub-boxes of the `jp2h` superbox.
    fn read_header(&mut self, mut content: &[u8]) {
        while content.len() >= 8 {
            let lbox = u32::from_be_bytes([content[0], content[1], content[2], content[3]]) as usize;
            let len = if lbox == 0 { content.len() } else { lbox };
            let Some(body) = content.get(8..len) else {
                debug!(lbox, "truncated box inside jp2h");
                return;
            };
            match &content[4..8] {
                t if t == BOX_IMAGE_HEADER && body.len() >= 8 => {
                    let height = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                    let width = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
                    self.header_size = Some(Size::new(width, height));
                }
                t if t == BOX_COLOUR && body.len() > 3 => {
                    let method = body[0];
                    if (method == COLR_RESTRICTED_ICC || method == COLR_ANY_ICC)
                        && self.icc_profile.is_none()
                    {
                        self.icc_profile = Some(body[3..].to_vec());
                    }
                }
                _ => {}
            }
            content = &content[len..];
        }
    }
}

fn read_content<R: Read + Seek>(
    reader: &mut SegmentReader<R>,
    len: u64,
) -> Result<Vec<u8>, EngineError> {
    let remaining = reader.remaining()?;
    if len > remaining {
        return Err(EngineError::TruncatedStream {
            offset: reader.position()?,
            needed: len,
        });
    }
    let len = usize::try_from(len)
        .map_err(|_| EngineError::malformed(SourceFormat::Jp2, "box too large for memory"))?;
    reader.read_exact(len)
}

/// Slide a 4-byte window from the end of the signature box until it reads
/// `jp2c`; returns the offset just past the tag.
fn find_codestream<R: Read + Seek>(reader: &mut SegmentReader<R>) -> Result<u64, EngineError> {
    reader.seek_to(JP2_SIGNATURE.len() as u64)?;
    let mut window = [0u8; 4];
    let mut filled = 0;
    for _ in 0..reader.remaining()? {
        window.rotate_left(1);
        window[3] = reader.read_u8()?;
        filled += 1;
        if filled >= 4 && &window == BOX_CODESTREAM {
            return reader.position();
        }
    }
    Err(EngineError::malformed(
        SourceFormat::Jp2,
        "no contiguous codestream box",
    ))
}

#[derive(Default)]
struct CodestreamHeader {
    size: Option<Size>,
    tile_size: Size,
    num_components: u16,
    component_bits: u8,
    decomposition_levels: u8,
}

impl CodestreamHeader {
    fn read<R: Read + Seek>(&mut self, reader: &mut SegmentReader<R>) -> Result<(), EngineError> {
        let soc = reader.read_u16_be()?;
        if soc != SOC {
            return Err(EngineError::malformed(
                SourceFormat::Jp2,
                format!("codestream starts with 0x{:04X}, not SOC", soc),
            ));
        }

        loop {
            let marker = reader.read_u16_be()?;
            match marker {
                SIZ => {
                    let payload = read_segment(reader)?;
                    self.read_siz(&payload)?;
                }
                COD => {
                    let payload = read_segment(reader)?;
                    self.read_cod(&payload)?;
                }
                COC => {
                    let payload = read_segment(reader)?;
                    self.read_coc(&payload)?;
                }
                RGN | QCD | QCC | POC | TLM | PLM | PPM | CRG | COM => {
                    let len = segment_length(reader)?;
                    reader.skip(len as u64)?;
                }
                other => {
                    debug!(
                        marker = format_args!("0x{:04X}", other),
                        "end of codestream main header"
                    );
                    return Ok(());
                }
            }
        }
    }

    fn read_siz(&mut self, p: &[u8]) -> Result<(), EngineError> {
        if p.len() < 37 {
            return Err(EngineError::malformed(
                SourceFormat::Jp2,
                format!("SIZ segment too short ({} bytes)", p.len()),
            ));
        }
        let u32_at = |i: usize| u32::from_be_bytes([p[i], p[i + 1], p[i + 2], p[i + 3]]);
        let width = u32_at(2).saturating_sub(u32_at(10));
        let height = u32_at(6).saturating_sub(u32_at(14));
        let tile_width = u32_at(18);
        let tile_height = u32_at(22);

        let size = Size::new(width, height);
        self.size = Some(size);
        self.tile_size = Size::new(
            clip_tile(tile_width, width),
            clip_tile(tile_height, height),
        );
        self.num_components = u16::from_be_bytes([p[34], p[35]]);
        self.component_bits = (p[36] & 0x7F) + 1;
        Ok(())
    }

    fn read_cod(&mut self, p: &[u8]) -> Result<(), EngineError> {
        // Scod, progression order, layers (2), MCT, then SPcod
        let levels = *p.get(5).ok_or_else(|| {
            EngineError::malformed(SourceFormat::Jp2, "COD segment too short")
        })?;
        self.set_decomposition_levels(levels, "COD")
    }

    fn read_coc(&mut self, p: &[u8]) -> Result<(), EngineError> {
        // Ccoc is two bytes once there are more than 256 components
        let at = if self.num_components >= 257 { 3 } else { 2 };
        let levels = *p.get(at).ok_or_else(|| {
            EngineError::malformed(SourceFormat::Jp2, "COC segment too short")
        })?;
        self.set_decomposition_levels(levels, "COC")
    }

    fn set_decomposition_levels(&mut self, levels: u8, segment: &str) -> Result<(), EngineError> {
        if levels > MAX_DECOMPOSITION_LEVELS {
            return Err(EngineError::malformed(
                SourceFormat::Jp2,
                format!(
                    "{} declares {} decomposition levels (at most {})",
                    segment, levels, MAX_DECOMPOSITION_LEVELS
                ),
            ));
        }
        self.decomposition_levels = levels;
        Ok(())
    }

    fn into_details(self) -> Result<Jp2Details, EngineError> {
        let image_size = self
            .size
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EngineError::malformed(SourceFormat::Jp2, "codestream has no SIZ segment"))?;
        Ok(Jp2Details {
            image_size,
            tile_size: self.tile_size,
            num_components: self.num_components,
            component_bits: self.component_bits,
            decomposition_levels: self.decomposition_levels,
        })
    }
}

fn clip_tile(tile: u32, full: u32) -> u32 {
    if tile == 0 {
        full
    } else {
        tile.min(full)
    }
}

/// Segment length minus the two length bytes.
fn segment_length<R: Read + Seek>(reader: &mut SegmentReader<R>) -> Result<u16, EngineError> {
    let offset = reader.position()?;
    let len = reader.read_u16_be()?;
    len.checked_sub(2).ok_or_else(|| {
        EngineError::malformed(
            SourceFormat::Jp2,
            format!("segment at offset {} has length {}", offset, len),
        )
    })
}

fn read_segment<R: Read + Seek>(reader: &mut SegmentReader<R>) -> Result<Vec<u8>, EngineError> {
    let len = segment_length(reader)?;
    reader.read_exact(len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Orientation;
    use std::io::Cursor;

    fn jp2_box(tbox: &[u8; 4], content: &[u8]) -> Vec<u8> {
        let mut bytes = ((content.len() + 8) as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(tbox);
        bytes.extend_from_slice(content);
        bytes
    }

    fn file_type() -> Vec<u8> {
        jp2_box(b"ftyp", b"jp2 \0\0\0\0jp2 ")
    }

    fn siz(width: u32, height: u32, tile: u32, components: u16) -> Vec<u8> {
        let mut p = vec![0x00, 0x00]; // Rsiz
        for v in [width, height, 0, 0, tile, tile, 0, 0] {
            p.extend_from_slice(&v.to_be_bytes());
        }
        p.extend_from_slice(&components.to_be_bytes());
        for _ in 0..components {
            p.extend_from_slice(&[0x07, 0x01, 0x01]);
        }
        segment(SIZ, &p)
    }

    fn cod(levels: u8) -> Vec<u8> {
        segment(COD, &[0x00, 0x00, 0x00, 0x01, 0x00, levels, 0x04, 0x04, 0x00, 0x01])
    }

    fn segment(marker: u16, payload: &[u8]) -> Vec<u8> {
        let mut bytes = marker.to_be_bytes().to_vec();
        bytes.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    fn codestream(segments: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = SOC.to_be_bytes().to_vec();
        for s in segments {
            bytes.extend_from_slice(s);
        }
        // SOT: first tile-part, ends the main header
        bytes.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A]);
        bytes
    }

    fn jp2(boxes: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = JP2_SIGNATURE.to_vec();
        for b in boxes {
            bytes.extend_from_slice(b);
        }
        bytes
    }

    fn parse(bytes: Vec<u8>) -> MetadataRecord {
        parse_jp2(Cursor::new(bytes)).unwrap()
    }

    fn details(record: &MetadataRecord) -> Jp2Details {
        match record.details {
            FormatDetails::Jp2(d) => d,
            _ => panic!("expected JP2 details"),
        }
    }

    #[test]
    fn test_siz_and_cod() {
        let cs = codestream(&[siz(6400, 5600, 512, 3), cod(5)]);
        let record = parse(jp2(&[file_type(), jp2_box(b"jp2c", &cs)]));
        assert_eq!(record.format, SourceFormat::Jp2);
        assert_eq!(record.size, Some(Size::new(6400, 5600)));
        let d = details(&record);
        assert_eq!(d.tile_size, Size::new(512, 512));
        assert_eq!(d.num_components, 3);
        assert_eq!(d.component_bits, 8);
        assert_eq!(d.decomposition_levels, 5);
        assert_eq!(d.image_descriptor().unwrap().num_levels(), 6);
    }

    #[test]
    fn test_coc_overrides_cod() {
        let coc = segment(COC, &[0x00, 0x00, 0x03, 0x04, 0x04, 0x00, 0x01]);
        let cs = codestream(&[siz(100, 100, 100, 1), cod(5), coc]);
        let d = details(&parse(jp2(&[jp2_box(b"jp2c", &cs)])));
        assert_eq!(d.decomposition_levels, 3);
    }

    #[test]
    fn test_decomposition_levels_out_of_range() {
        let cs = codestream(&[siz(64, 64, 64, 1), cod(200)]);
        let result = parse_jp2(Cursor::new(jp2(&[jp2_box(b"jp2c", &cs)])));
        assert!(matches!(
            result,
            Err(EngineError::MalformedSegment {
                format: SourceFormat::Jp2,
                ..
            })
        ));

        let coc = segment(COC, &[0x00, 0x00, 33, 0x04, 0x04, 0x00, 0x01]);
        let cs = codestream(&[siz(64, 64, 64, 1), cod(5), coc]);
        let result = parse_jp2(Cursor::new(jp2(&[jp2_box(b"jp2c", &cs)])));
        assert!(matches!(result, Err(EngineError::MalformedSegment { .. })));

        let cs = codestream(&[siz(64, 64, 64, 1), cod(32)]);
        let d = details(&parse(jp2(&[jp2_box(b"jp2c", &cs)])));
        assert_eq!(d.image_descriptor().unwrap().num_levels(), 33);
    }

    #[test]
    fn test_skipped_segments() {
        let qcd = segment(QCD, &[0x22, 0x77, 0x1E, 0x76, 0xEA]);
        let com = segment(COM, b"\x00\x01Kakadu");
        let cs = codestream(&[siz(640, 480, 0, 1), qcd, com, cod(2)]);
        let d = details(&parse(jp2(&[jp2_box(b"jp2c", &cs)])));
        assert_eq!(d.decomposition_levels, 2);
        assert_eq!(d.tile_size, Size::new(640, 480));
    }

    #[test]
    fn test_image_offset_subtracted() {
        let mut p = vec![0x00, 0x00];
        for v in [1100u32, 900, 100, 50, 1100, 900, 0, 0] {
            p.extend_from_slice(&v.to_be_bytes());
        }
        p.extend_from_slice(&[0x00, 0x01, 0x8F, 0x01, 0x01]);
        let cs = codestream(&[segment(SIZ, &p)]);
        let record = parse(jp2(&[jp2_box(b"jp2c", &cs)]));
        assert_eq!(record.size, Some(Size::new(1000, 850)));
        // Signed flag is masked off
        assert_eq!(details(&record).component_bits, 16);
    }

    #[test]
    fn test_uuid_and_header_boxes() {
        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&480u32.to_be_bytes());
        ihdr.extend_from_slice(&640u32.to_be_bytes());
        ihdr.extend_from_slice(&[0x00, 0x03, 0x07, 0x07, 0x00, 0x00]);
        let icc = b"fake icc profile bytes".to_vec();
        let mut colr = vec![COLR_RESTRICTED_ICC, 0x00, 0x00];
        colr.extend_from_slice(&icc);
        let mut header = jp2_box(b"ihdr", &ihdr);
        header.extend(jp2_box(b"colr", &colr));

        let mut xmp = XMP_UUID.to_vec();
        xmp.extend_from_slice(b"<x:xmpmeta><rdf:RDF tiff:Orientation=\"8\"></rdf:RDF></x:xmpmeta>");
        let mut iptc = IPTC_UUID.to_vec();
        iptc.extend_from_slice(&[0x1C, 0x02, 0x00]);

        let cs = codestream(&[siz(640, 480, 640, 3), cod(4)]);
        let record = parse(jp2(&[
            file_type(),
            jp2_box(b"jp2h", &header),
            jp2_box(b"uuid", &xmp),
            jp2_box(b"uuid", &iptc),
            jp2_box(b"jp2c", &cs),
        ]));
        assert_eq!(record.icc_profile, Some(icc));
        assert_eq!(
            record.xmp_str(),
            Some("<rdf:RDF tiff:Orientation=\"8\"></rdf:RDF>")
        );
        assert_eq!(record.iptc, Some(vec![0x1C, 0x02, 0x00]));
        assert_eq!(record.orientation, Some(Orientation::Rotate270CW));
    }

    #[test]
    fn test_exif_uuid_box() {
        let mut exif = EXIF_UUID.to_vec();
        exif.extend_from_slice(EXIF_PREFIX);
        exif.extend(crate::metadata::orientation::tests::tiff_with_orientation(3));
        let cs = codestream(&[siz(10, 10, 10, 1), cod(0)]);
        let record = parse(jp2(&[jp2_box(b"uuid", &exif), jp2_box(b"jp2c", &cs)]));
        assert!(record.exif.as_ref().is_some_and(|e| e.starts_with(b"II*")));
        assert_eq!(record.orientation, Some(Orientation::Rotate180));
    }

    #[test]
    fn test_extended_length_and_open_ended_codestream() {
        let mut xl = 24u64.to_be_bytes().to_vec();
        xl.extend_from_slice(&[0xAB; 8]);
        let mut boxed = vec![0x00, 0x00, 0x00, 0x01];
        boxed.extend_from_slice(b"free");
        boxed.extend(xl);

        let cs = codestream(&[siz(32, 16, 32, 1), cod(1)]);
        let mut open = vec![0x00, 0x00, 0x00, 0x00];
        open.extend_from_slice(b"jp2c");
        open.extend(cs);

        let record = parse(jp2(&[boxed, open]));
        assert_eq!(record.size, Some(Size::new(32, 16)));
    }

    #[test]
    fn test_inconsistent_boxes_fall_back_to_scan() {
        // A box that claims to be far longer than the file
        let mut broken = 0x7FFF_FFFFu32.to_be_bytes().to_vec();
        broken.extend_from_slice(b"uuid");
        broken.extend_from_slice(&[0u8; 20]);
        let cs = codestream(&[siz(200, 100, 200, 1), cod(3)]);
        let record = parse(jp2(&[broken, jp2_box(b"jp2c", &cs)]));
        assert_eq!(record.size, Some(Size::new(200, 100)));
        assert_eq!(details(&record).decomposition_levels, 3);
    }

    #[test]
    fn test_missing_codestream() {
        let result = parse_jp2(Cursor::new(jp2(&[file_type()])));
        assert!(matches!(
            result,
            Err(EngineError::MalformedSegment {
                format: SourceFormat::Jp2,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_signature() {
        let mut bytes = JP2_SIGNATURE.to_vec();
        bytes[4] = b'X';
        assert!(matches!(
            parse_jp2(Cursor::new(bytes)),
            Err(EngineError::InvalidSignature {
                format: SourceFormat::Jp2,
                ..
            })
        ));
    }

    #[test]
    fn test_truncated_siz() {
        let mut cs = SOC.to_be_bytes().to_vec();
        cs.extend_from_slice(&[0xFF, 0x51, 0x00, 0x29, 0x00, 0x00]);
        let result = parse_jp2(Cursor::new(jp2(&[jp2_box(b"jp2c", &cs)])));
        assert!(matches!(result, Err(EngineError::TruncatedStream { .. })));
    }
}
