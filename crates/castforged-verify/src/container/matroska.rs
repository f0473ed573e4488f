//! Matroska / WebM (EBML) structure check.
//!
//! A finished Matroska file carries an EBML header naming a known DocType
//! followed by a Segment whose size was patched in when the muxer closed
//! the file. Live muxers write the Segment with the reserved "unknown"
//! size first, so an unknown size means the capture never finalized.

use std::io::{Read, Seek};
use std::time::Duration;

use super::{header_duration, ContainerInfo, Source};
use crate::error::{Result, VerifyError};

pub mod ids {
    pub const EBML: u32 = 0x1A45_DFA3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const SEGMENT: u32 = 0x1853_8067;
    pub const INFO: u32 = 0x1549_A966;
    pub const TIMECODE_SCALE: u32 = 0x2A_D7B1;
    pub const DURATION: u32 = 0x4489;
    pub const CLUSTER: u32 = 0x1F43_B675;
}

const KNOWN_DOC_TYPES: &[&str] = &["matroska", "webm"];

const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// Segment children looked at before giving up on finding `Info`.
const MAX_SEGMENT_CHILDREN: usize = 32;

/// An element header: ID, payload size (`None` when unknown) and where the
/// payload starts.
#[derive(Debug, Clone, Copy)]
struct Element {
    id: u32,
    size: Option<u64>,
    data_offset: u64,
}

impl Element {
    fn end(&self) -> Option<u64> {
        self.size.map(|size| self.data_offset + size)
    }
}

fn vint_len(first: u8) -> Option<usize> {
    match first.leading_zeros() {
        n @ 0..=7 => Some(n as usize + 1),
        _ => None,
    }
}

fn read_id<R: Read + Seek>(source: &mut Source<'_, R>, offset: u64) -> Result<(u32, u64)> {
    let mut first = [0u8; 1];
    source.read_at(offset, &mut first)?;
    let len = match vint_len(first[0]) {
        Some(len @ 1..=4) => len,
        _ => return Err(VerifyError::corrupt(format!("invalid element ID at offset {offset}"))),
    };
    let mut buf = [0u8; 4];
    source.read_at(offset, &mut buf[..len])?;
    let id = buf[..len].iter().fold(0u32, |acc, b| (acc << 8) | *b as u32);
    Ok((id, offset + len as u64))
}

fn read_size<R: Read + Seek>(source: &mut Source<'_, R>, offset: u64) -> Result<(Option<u64>, u64)> {
    let mut first = [0u8; 1];
    source.read_at(offset, &mut first)?;
    let len = vint_len(first[0])
        .ok_or_else(|| VerifyError::corrupt(format!("invalid element size at offset {offset}")))?;
    let mut buf = [0u8; 8];
    source.read_at(offset, &mut buf[..len])?;

    let marker = 1u8 << (8 - len);
    let mut value = (buf[0] & (marker.wrapping_sub(1))) as u64;
    for b in &buf[1..len] {
        value = (value << 8) | *b as u64;
    }
    let all_ones = (1u64 << (7 * len)) - 1;
    let size = if value == all_ones { None } else { Some(value) };
    Ok((size, offset + len as u64))
}

fn read_element<R: Read + Seek>(source: &mut Source<'_, R>, offset: u64) -> Result<Element> {
    let (id, after_id) = read_id(source, offset)?;
    let (size, data_offset) = read_size(source, after_id)?;
    Ok(Element { id, size, data_offset })
}

fn read_payload<R: Read + Seek>(source: &mut Source<'_, R>, element: &Element, limit: u64) -> Result<Vec<u8>> {
    let size = element
        .size
        .ok_or_else(|| VerifyError::corrupt(format!("element {:#X} has unknown size", element.id)))?;
    if size > limit {
        return Err(VerifyError::corrupt(format!("element {:#X} is implausibly large ({size} bytes)", element.id)));
    }
    let mut buf = vec![0u8; size as usize];
    source.read_at(element.data_offset, &mut buf)?;
    Ok(buf)
}

/// Children of a sized master element, bounded by `max` entries.
fn children<R: Read + Seek>(source: &mut Source<'_, R>, parent: &Element, max: usize) -> Result<Vec<Element>> {
    let Some(end) = parent.end() else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    let mut pos = parent.data_offset;
    while pos < end && out.len() < max {
        let child = read_element(source, pos)?;
        let Some(child_end) = child.end() else {
            out.push(child);
            break;
        };
        if child_end > end {
            return Err(VerifyError::corrupt(format!(
                "element {:#X} overruns its parent {:#X}",
                child.id, parent.id
            )));
        }
        out.push(child);
        pos = child_end;
    }
    Ok(out)
}

pub(crate) fn scan<R: Read + Seek>(source: &mut Source<'_, R>) -> Result<ContainerInfo> {
    let header = read_element(source, 0)?;
    if header.id != ids::EBML {
        return Err(VerifyError::corrupt("missing EBML header"));
    }
    let header_end = header
        .end()
        .ok_or_else(|| VerifyError::corrupt("EBML header has unknown size"))?;
    if header_end > source.size() {
        return Err(VerifyError::truncated("file ends inside the EBML header"));
    }

    let doc_type = match children(source, &header, 16)?.into_iter().find(|e| e.id == ids::DOC_TYPE) {
        Some(element) => {
            let raw = read_payload(source, &element, 64)?;
            String::from_utf8_lossy(&raw).trim_end_matches('\0').to_string()
        }
        None => "matroska".to_string(),
    };
    if !KNOWN_DOC_TYPES.contains(&doc_type.as_str()) {
        return Err(VerifyError::corrupt(format!("unsupported DocType {doc_type:?}")));
    }

    let segment = read_element(source, header_end)?;
    if segment.id != ids::SEGMENT {
        return Err(VerifyError::corrupt(format!("expected Segment after EBML header, found {:#X}", segment.id)));
    }
    let Some(segment_end) = segment.end() else {
        return Err(VerifyError::missing_index("Segment size was never finalized"));
    };
    if segment_end > source.size() {
        return Err(VerifyError::truncated(format!(
            "Segment claims {segment_end} bytes but file is {} bytes",
            source.size()
        )));
    }

    let duration = segment_duration(source, &segment)?;
    Ok(ContainerInfo { duration })
}

fn segment_duration<R: Read + Seek>(source: &mut Source<'_, R>, segment: &Element) -> Result<Option<Duration>> {
    let info = children(source, segment, MAX_SEGMENT_CHILDREN)?
        .into_iter()
        .take_while(|e| e.id != ids::CLUSTER)
        .find(|e| e.id == ids::INFO);
    let Some(info) = info else {
        return Ok(None);
    };

    let mut scale = DEFAULT_TIMECODE_SCALE;
    let mut raw_duration = None;
    for child in children(source, &info, 32)? {
        match child.id {
            ids::TIMECODE_SCALE => {
                let payload = read_payload(source, &child, 8)?;
                scale = payload.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
            }
            ids::DURATION => {
                let payload = read_payload(source, &child, 8)?;
                raw_duration = match payload.len() {
                    4 => Some(f32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as f64),
                    8 => {
                        let mut b = [0u8; 8];
                        b.copy_from_slice(&payload);
                        Some(f64::from_be_bytes(b))
                    }
                    _ => None,
                };
            }
            _ => {}
        }
    }

    raw_duration
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| header_duration(d * scale as f64 / 1e9, "segment"))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use std::io::Cursor;

    fn run(bytes: Vec<u8>) -> Result<ContainerInfo> {
        let size = bytes.len() as u64;
        let mut cursor = Cursor::new(bytes);
        scan(&mut Source::new(&mut cursor, size))
    }

    #[test]
    fn finalized_file_reports_duration() {
        let info = run(fixtures::matroska(Duration::from_millis(90_500))).unwrap();
        assert_eq!(info.duration, Some(Duration::from_millis(90_500)));
    }

    #[test]
    fn unknown_segment_size_is_unfinalized() {
        let err = run(fixtures::matroska_unknown_size(Duration::from_secs(5))).unwrap_err();
        assert!(matches!(err, VerifyError::MissingIndex(ref m) if m.contains("never finalized")), "{err}");
    }

    #[test]
    fn cut_short_is_truncated() {
        let mut bytes = fixtures::matroska(Duration::from_secs(5));
        bytes.truncate(bytes.len() - 100);
        assert!(matches!(run(bytes), Err(VerifyError::Truncated(_))));
    }

    #[test]
    fn webm_doc_type_is_accepted() {
        assert!(run(fixtures::ebml_with_doc_type("webm")).is_ok());
    }

    #[test]
    fn unknown_doc_type_is_corrupt() {
        let err = run(fixtures::ebml_with_doc_type("quicktime")).unwrap_err();
        assert!(matches!(err, VerifyError::Corrupt(ref m) if m.contains("quicktime")), "{err}");
    }

    #[test]
    fn missing_header_is_corrupt() {
        assert!(matches!(run(fixtures::mp4(Duration::from_secs(1))), Err(VerifyError::Corrupt(_))));
    }

    #[test]
    fn absurd_duration_is_corrupt() {
        let err = run(fixtures::matroska_with_duration_ticks(1e300)).unwrap_err();
        assert!(matches!(err, VerifyError::Corrupt(ref m) if m.contains("out of range")), "{err}");
    }

    #[test]
    fn decodes_size_vints() {
        let bytes = vec![0x81, 0x40, 0x02, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let size = bytes.len() as u64;
        let mut cursor = Cursor::new(bytes);
        let mut source = Source::new(&mut cursor, size);
        assert_eq!(read_size(&mut source, 0).unwrap(), (Some(1), 1));
        assert_eq!(read_size(&mut source, 1).unwrap(), (Some(2), 3));
        assert_eq!(read_size(&mut source, 3).unwrap(), (None, 11));
    }
}
