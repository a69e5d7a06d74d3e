//! XMP packet helpers.
//!
//! Packets are kept as raw bytes; only the `rdf:RDF` element is retained.
//! The TIFF orientation and the extended-XMP GUID are the only properties
//! ever interpreted.

use super::Orientation;

const RDF_START: &[u8] = b"<rdf:RDF";
const RDF_END: &[u8] = b"</rdf:RDF>";
const ORIENTATION_PROPERTY: &str = "tiff:Orientation";
const EXTENDED_XMP_PROPERTY: &str = "xmpNote:HasExtendedXMP";

/// Cut a packet down to its `<rdf:RDF` ... `</rdf:RDF>` element, inclusive.
///
/// Returns `None` if either end tag is missing.
pub fn trim_to_rdf(packet: &[u8]) -> Option<Vec<u8>> {
    let start = find(packet, RDF_START)?;
    let end = rfind(&packet[start..], RDF_END)? + start + RDF_END.len();
    Some(packet[start..end].to_vec())
}

/// Look up `tiff:Orientation` in an XMP packet.
///
/// Both the attribute form (`tiff:Orientation="6"`) and the element form
/// (`<tiff:Orientation>6</tiff:Orientation>`) are recognised.
pub fn orientation_from_xmp(xmp: &[u8]) -> Option<Orientation> {
    let text = std::str::from_utf8(xmp).ok()?;
    property_value(text, ORIENTATION_PROPERTY)?
        .trim()
        .parse::<u32>()
        .ok()
        .and_then(Orientation::from_exif)
}

/// GUID of the extended packet a main packet points at through
/// `xmpNote:HasExtendedXMP`.
pub fn extended_xmp_guid(xmp: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(xmp).ok()?;
    property_value(text, EXTENDED_XMP_PROPERTY).map(str::trim)
}

/// Splice the contents of `extension`'s `rdf:RDF` element into `main`
/// just before its closing tag.
///
/// `main` must already be trimmed to its `rdf:RDF` element. Returns `None`
/// if either packet lacks one.
pub fn merge_rdf(main: &[u8], extension: &[u8]) -> Option<Vec<u8>> {
    let body = rdf_body(extension)?;
    let close = rfind(main, RDF_END)?;
    let mut merged = Vec::with_capacity(main.len() + body.len());
    merged.extend_from_slice(&main[..close]);
    merged.extend_from_slice(body);
    merged.extend_from_slice(&main[close..]);
    Some(merged)
}

/// Everything between the `<rdf:RDF ...>` start tag and `</rdf:RDF>`.
fn rdf_body(packet: &[u8]) -> Option<&[u8]> {
    let start = find(packet, RDF_START)?;
    let open_end = start + packet[start..].iter().position(|&b| b == b'>')? + 1;
    let close = rfind(&packet[open_end..], RDF_END)? + open_end;
    Some(&packet[open_end..close])
}

/// First value of a property, in attribute or element form.
fn property_value<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let mut rest = text;
    while let Some(pos) = rest.find(name) {
        let after = &rest[pos + name.len()..];
        if let Some(value) = attribute_value(after).or_else(|| element_value(after)) {
            return Some(value);
        }
        rest = after;
    }
    None
}

fn attribute_value(after: &str) -> Option<&str> {
    let after = after.trim_start().strip_prefix('=')?.trim_start();
    let quote = after.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let body = &after[1..];
    body.find(quote).map(|end| &body[..end])
}

fn element_value(after: &str) -> Option<&str> {
    let body = after.strip_prefix('>')?;
    body.find('<').map(|end| &body[..end])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
