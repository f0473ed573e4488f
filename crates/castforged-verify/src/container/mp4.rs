//! MP4/MOV top-level box walk.
//!
//! Only box headers are read, plus the few bytes of `mvhd` that carry the
//! duration. A recording interrupted before the muxer wrote `moov` has no
//! sample index and cannot be played, so a missing `moov` counts as
//! truncation.

use std::io::{Read, Seek};
use std::time::Duration;

use super::{header_duration, ContainerInfo, Source};
use crate::error::{Result, VerifyError};

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const STYP: Self = Self(*b"styp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MOOF: Self = Self(*b"moof");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const FREE: Self = Self(*b"free");
    pub const SKIP: Self = Self(*b"skip");
    pub const WIDE: Self = Self(*b"wide");

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }

    fn is_printable(&self) -> bool {
        self.0.iter().all(|b| (0x20..=0x7E).contains(b))
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Box types a well-formed file may start with.
const LEADING_BOXES: [BoxType; 8] = [
    BoxType::FTYP,
    BoxType::STYP,
    BoxType::MOOV,
    BoxType::MDAT,
    BoxType::FREE,
    BoxType::SKIP,
    BoxType::WIDE,
    BoxType::MOOF,
];

/// Whether `code` names a box that can open an MP4 file.
pub fn is_top_level_box(code: &[u8]) -> bool {
    code.len() == 4 && LEADING_BOXES.iter().any(|t| t.0 == code)
}

/// Parsed box header.
#[derive(Debug, Clone)]
struct BoxHeader {
    box_type: BoxType,
    /// Box size including header.
    size: u64,
    /// File offset where box data starts (after header).
    data_offset: u64,
    /// Size of the header (8 or 16 bytes).
    header_len: u64,
}

impl BoxHeader {
    fn data_size(&self) -> u64 {
        self.size - self.header_len
    }
}

fn read_header<R: Read + Seek>(source: &mut Source<'_, R>, pos: u64, end: u64) -> Result<BoxHeader> {
    if end - pos < 8 {
        return Err(VerifyError::truncated(format!(
            "partial box header at offset {pos} ({} bytes left)",
            end - pos
        )));
    }

    let mut header = [0u8; 8];
    source.read_at(pos, &mut header)?;
    let declared = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
    let box_type = BoxType([header[4], header[5], header[6], header[7]]);

    if !box_type.is_printable() {
        return Err(VerifyError::corrupt(format!(
            "invalid box type {:02x?} at offset {pos}",
            box_type.0
        )));
    }

    let (size, header_len) = match declared {
        // 64-bit extended size
        1 => {
            let mut ext = [0u8; 8];
            if end - pos < 16 {
                return Err(VerifyError::truncated(format!(
                    "partial extended header for {box_type} at offset {pos}"
                )));
            }
            source.read_at(pos + 8, &mut ext)?;
            (u64::from_be_bytes(ext), 16)
        }
        // Box extends to end of file
        0 => (end - pos, 8),
        n => (n, 8),
    };

    if size < header_len {
        return Err(VerifyError::corrupt(format!(
            "{box_type} box at offset {pos} declares {size} bytes, smaller than its header"
        )));
    }

    Ok(BoxHeader {
        box_type,
        size,
        data_offset: pos + header_len,
        header_len,
    })
}

pub(crate) fn scan<R: Read + Seek>(source: &mut Source<'_, R>) -> Result<ContainerInfo> {
    let end = source.size();
    let mut pos = 0u64;
    let mut moov: Option<BoxHeader> = None;
    let mut first = true;

    while pos < end {
        let header = read_header(source, pos, end)?;

        if first && !LEADING_BOXES.contains(&header.box_type) {
            return Err(VerifyError::corrupt(format!(
                "file starts with {} instead of ftyp",
                header.box_type
            )));
        }
        first = false;

        let remaining = end - pos;
        if header.size > remaining {
            return Err(VerifyError::truncated(format!(
                "{} box at offset {} declares {} bytes but only {} remain",
                header.box_type, pos, header.size, remaining
            )));
        }

        if header.box_type == BoxType::MOOV {
            moov = Some(header.clone());
        }

        pos += header.size;
    }

    let Some(moov) = moov else {
        return Err(VerifyError::missing_index("no moov box; the index was never written"));
    };

    let duration = movie_duration(source, &moov)?;
    Ok(ContainerInfo { duration })
}

/// Find `mvhd` among the children of `moov` and read its duration.
fn movie_duration<R: Read + Seek>(source: &mut Source<'_, R>, moov: &BoxHeader) -> Result<Option<Duration>> {
    let end = moov.data_offset + moov.data_size();
    let mut pos = moov.data_offset;

    while pos < end {
        let child = read_header(source, pos, end)?;
        if child.size > end - pos {
            return Err(VerifyError::corrupt(format!(
                "{} box overruns its moov parent",
                child.box_type
            )));
        }
        if child.box_type == BoxType::MVHD {
            return read_mvhd(source, &child);
        }
        pos += child.size;
    }

    Ok(None)
}

fn read_mvhd<R: Read + Seek>(source: &mut Source<'_, R>, mvhd: &BoxHeader) -> Result<Option<Duration>> {
    let mut data = vec![0u8; mvhd.data_size().min(32) as usize];
    source.read_at(mvhd.data_offset, &mut data)?;

    let (timescale, duration) = match data.first() {
        Some(0) if data.len() >= 20 => (
            u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            u32::from_be_bytes([data[16], data[17], data[18], data[19]]) as u64,
        ),
        Some(1) if data.len() >= 32 => (
            u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
            u64::from_be_bytes([
                data[24], data[25], data[26], data[27], data[28], data[29], data[30], data[31],
            ]),
        ),
        _ => return Err(VerifyError::corrupt("mvhd box is too short")),
    };

    // All-ones means "unknown"; zero is what fragmented files write.
    if timescale == 0 || duration == 0 || duration == u32::MAX as u64 || duration == u64::MAX {
        return Ok(None);
    }

    header_duration(duration as f64 / timescale as f64, "mvhd").map(Some)
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
    fn complete_file_reports_duration() {
        let info = run(fixtures::mp4(Duration::from_secs(42))).unwrap();
        assert_eq!(info.duration, Some(Duration::from_secs(42)));
    }

    #[test]
    fn missing_moov_is_reported() {
        assert!(matches!(run(fixtures::mp4_without_moov()), Err(VerifyError::MissingIndex(_))));
    }

    #[test]
    fn box_overrunning_eof_is_truncated() {
        let err = run(fixtures::mp4_cut_short(Duration::from_secs(5))).unwrap_err();
        assert!(matches!(err, VerifyError::Truncated(ref m) if m.contains("mdat")), "{err}");
    }

    #[test]
    fn unexpected_first_box_is_corrupt() {
        let mut bytes = fixtures::mp4(Duration::from_secs(1));
        bytes[4..8].copy_from_slice(b"junk");
        assert!(matches!(run(bytes), Err(VerifyError::Corrupt(_))));
    }

    #[test]
    fn undersized_box_is_corrupt() {
        let mut bytes = fixtures::mp4(Duration::from_secs(1));
        bytes[0..4].copy_from_slice(&4u32.to_be_bytes());
        assert!(matches!(run(bytes), Err(VerifyError::Corrupt(_))));
    }

    #[test]
    fn trailing_partial_header_is_truncated() {
        let mut bytes = fixtures::mp4(Duration::from_secs(1));
        bytes.extend_from_slice(&[0, 0, 0]);
        assert!(matches!(run(bytes), Err(VerifyError::Truncated(_))));
    }

    #[test]
    fn absurd_mvhd_duration_is_corrupt() {
        let err = run(fixtures::mp4_with_mvhd_v1(1, 0xFFFF_FFFF_FFFF_FFF0)).unwrap_err();
        assert!(matches!(err, VerifyError::Corrupt(ref m) if m.contains("mvhd")), "{err}");
    }

    #[test]
    fn mvhd_v1_duration_is_read() {
        let info = run(fixtures::mp4_with_mvhd_v1(90_000, 90_000 * 75)).unwrap();
        assert_eq!(info.duration, Some(Duration::from_secs(75)));
    }

    #[test]
    fn recognises_leading_boxes() {
        assert!(is_top_level_box(b"ftyp"));
        assert!(is_top_level_box(b"moof"));
        assert!(!is_top_level_box(b"trak"));
        assert!(!is_top_level_box(b"ftypx"));
    }
}
