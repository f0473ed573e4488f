//! FLV tag stream check.
//!
//! FLV has no index. Each tag is followed by a `PreviousTagSize` field, so
//! the last four bytes of a cleanly closed file point back at the header of
//! the final tag. A capture killed mid-write leaves a partial tag there
//! instead.

use std::io::{Read, Seek};
use std::time::Duration;

use super::{ContainerInfo, Source};
use crate::error::{Result, VerifyError};

const HEADER_LEN: u64 = 9;
const TAG_HEADER_LEN: u64 = 11;

const TAG_AUDIO: u8 = 8;
const TAG_VIDEO: u8 = 9;
const TAG_SCRIPT: u8 = 18;

#[derive(Debug, Clone, Copy)]
struct TagHeader {
    tag_type: u8,
    data_size: u32,
    timestamp_ms: u32,
}

impl TagHeader {
    fn parse(buf: &[u8; TAG_HEADER_LEN as usize]) -> Self {
        Self {
            tag_type: buf[0] & 0x1F,
            data_size: u32::from_be_bytes([0, buf[1], buf[2], buf[3]]),
            timestamp_ms: u32::from_be_bytes([buf[7], buf[4], buf[5], buf[6]]),
        }
    }

    fn is_known_type(&self) -> bool {
        matches!(self.tag_type, TAG_AUDIO | TAG_VIDEO | TAG_SCRIPT)
    }
}

fn read_u32<R: Read + Seek>(source: &mut Source<'_, R>, offset: u64) -> Result<u32> {
    let mut buf = [0u8; 4];
    source.read_at(offset, &mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_tag<R: Read + Seek>(source: &mut Source<'_, R>, offset: u64) -> Result<TagHeader> {
    let mut buf = [0u8; TAG_HEADER_LEN as usize];
    source.read_at(offset, &mut buf)?;
    Ok(TagHeader::parse(&buf))
}

pub(crate) fn scan<R: Read + Seek>(source: &mut Source<'_, R>) -> Result<ContainerInfo> {
    let mut header = [0u8; HEADER_LEN as usize];
    source.read_at(0, &mut header)?;
    if &header[0..3] != b"FLV" {
        return Err(VerifyError::corrupt("missing FLV signature"));
    }
    if header[3] != 1 {
        return Err(VerifyError::corrupt(format!("unsupported FLV version {}", header[3])));
    }
    let data_offset = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as u64;
    if data_offset < HEADER_LEN {
        return Err(VerifyError::corrupt(format!("header claims data offset {data_offset}")));
    }

    if read_u32(source, data_offset)? != 0 {
        return Err(VerifyError::corrupt("first PreviousTagSize is not zero"));
    }

    let first_tag = data_offset + 4;
    let size = source.size();
    if size <= first_tag {
        return Err(VerifyError::truncated("file contains no tags"));
    }

    let first = read_tag(source, first_tag)?;
    if !first.is_known_type() {
        return Err(VerifyError::corrupt(format!("unknown tag type {} at offset {first_tag}", first.tag_type)));
    }
    let first_end = first_tag + TAG_HEADER_LEN + first.data_size as u64 + 4;
    if first_end > size {
        return Err(VerifyError::truncated("file ends inside the first tag"));
    }

    let last = last_tag(source, first_tag, size)?;
    let duration = (last.timestamp_ms > 0).then(|| Duration::from_millis(last.timestamp_ms as u64));
    Ok(ContainerInfo { duration })
}

/// Follow the trailing `PreviousTagSize` back to the final tag header.
fn last_tag<R: Read + Seek>(source: &mut Source<'_, R>, first_tag: u64, size: u64) -> Result<TagHeader> {
    let previous = read_u32(source, size - 4)? as u64;
    if previous < TAG_HEADER_LEN || previous + 4 > size - first_tag {
        return Err(VerifyError::truncated(format!(
            "trailing PreviousTagSize {previous} does not point at a tag"
        )));
    }

    let tag_start = size - 4 - previous;
    let tag = read_tag(source, tag_start)?;
    if !tag.is_known_type() || TAG_HEADER_LEN + tag.data_size as u64 != previous {
        return Err(VerifyError::truncated(format!(
            "final tag at offset {tag_start} is incomplete"
        )));
    }
    Ok(tag)
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
    fn closed_file_reports_last_timestamp() {
        let info = run(fixtures::flv(Duration::from_millis(45_000))).unwrap();
        assert_eq!(info.duration, Some(Duration::from_millis(45_000)));
    }

    #[test]
    fn partial_final_tag_is_truncated() {
        let mut bytes = fixtures::flv(Duration::from_secs(10));
        bytes.truncate(bytes.len() - 120);
        assert!(matches!(run(bytes), Err(VerifyError::Truncated(_))));
    }

    #[test]
    fn header_only_is_truncated() {
        let bytes = fixtures::flv(Duration::from_secs(1))[..13].to_vec();
        let err = run(bytes).unwrap_err();
        assert!(matches!(err, VerifyError::Truncated(ref m) if m.contains("no tags")), "{err}");
    }

    #[test]
    fn bad_signature_is_corrupt() {
        let mut bytes = fixtures::flv(Duration::from_secs(1));
        bytes[0] = b'X';
        assert!(matches!(run(bytes), Err(VerifyError::Corrupt(_))));
    }

    #[test]
    fn unknown_first_tag_is_corrupt() {
        let mut bytes = fixtures::flv(Duration::from_secs(1));
        bytes[13] = 0x03;
        assert!(matches!(run(bytes), Err(VerifyError::Corrupt(_))));
    }

    #[test]
    fn timestamp_uses_extended_byte() {
        let mut buf = [0u8; 11];
        buf[0] = TAG_VIDEO;
        buf[4..7].copy_from_slice(&[0x00, 0x00, 0x01]);
        buf[7] = 0x01;
        assert_eq!(TagHeader::parse(&buf).timestamp_ms, 0x0100_0001);
    }
}
