//! Container format detection and structural scanning

pub mod flv;
pub mod matroska;
pub mod mp4;
pub mod mpegts;

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VerifyError};

/// Supported container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    /// MPEG-4 Part 14 (.mp4, .m4v, .mov)
    Mp4,
    /// MPEG transport stream (.ts)
    MpegTs,
    /// Matroska (.mkv, .webm)
    Matroska,
    /// Flash Video (.flv)
    Flv,
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Container::Mp4 => write!(f, "MP4"),
            Container::MpegTs => write!(f, "MPEG-TS"),
            Container::Matroska => write!(f, "Matroska"),
            Container::Flv => write!(f, "FLV"),
        }
    }
}

impl std::str::FromStr for Container {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" | "m4v" | "mov" => Ok(Container::Mp4),
            "ts" | "mpegts" | "mpeg-ts" => Ok(Container::MpegTs),
            "mkv" | "matroska" | "webm" => Ok(Container::Matroska),
            "flv" => Ok(Container::Flv),
            other => Err(format!("unknown container format: {other}")),
        }
    }
}

/// What a successful scan learned about the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerInfo {
    pub duration: Option<Duration>,
}

/// Detect container format from leading magic bytes.
///
/// Returns `None` when nothing matches; callers fall back to a caller hint
/// or the file extension.
pub fn detect_container_from_reader<R: Read + Seek>(reader: &mut R) -> std::io::Result<Option<Container>> {
    let mut magic = [0u8; 12];
    let n = read_up_to(reader, &mut magic)?;
    reader.rewind()?;
    let magic = &magic[..n];

    if magic.len() >= 4 && magic[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return Ok(Some(Container::Matroska));
    }

    if magic.len() >= 8 && mp4::is_top_level_box(&magic[4..8]) {
        return Ok(Some(Container::Mp4));
    }

    if magic.len() >= 3 && &magic[0..3] == b"FLV" {
        return Ok(Some(Container::Flv));
    }

    if magic.first() == Some(&mpegts::SYNC_BYTE) {
        return Ok(Some(Container::MpegTs));
    }

    Ok(None)
}

/// Get container type from file extension (fallback)
pub fn container_from_extension(path: &Path) -> Option<Container> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "mkv" | "webm" | "mka" => Some(Container::Matroska),
        "mp4" | "m4v" | "m4a" | "mov" => Some(Container::Mp4),
        "ts" | "mts" => Some(Container::MpegTs),
        "flv" => Some(Container::Flv),
        _ => None,
    }
}

/// Run the structural scan for `container`.
pub fn scan<R: Read + Seek>(container: Container, reader: &mut R, size: u64) -> Result<ContainerInfo> {
    let mut source = Source::new(reader, size);
    match container {
        Container::Mp4 => mp4::scan(&mut source),
        Container::MpegTs => mpegts::scan(&mut source),
        Container::Matroska => matroska::scan(&mut source),
        Container::Flv => flv::scan(&mut source),
    }
}

/// Positioned reads over a file of known size.
/// Convert a duration read from a header, rejecting values no recording
/// could carry.
pub(crate) fn header_duration(secs: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| VerifyError::corrupt(format!("{what} duration of {secs}s is out of range")))
}

pub(crate) struct Source<'a, R> {
    reader: &'a mut R,
    size: u64,
}

impl<'a, R: Read + Seek> Source<'a, R> {
    pub fn new(reader: &'a mut R, size: u64) -> Self {
        Self { reader, size }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Fill `buf` from `offset`; running past EOF means the file is truncated.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if offset.saturating_add(buf.len() as u64) > self.size {
            return Err(VerifyError::truncated(format!(
                "need {} bytes at offset {} but file is {} bytes",
                buf.len(),
                offset,
                self.size
            )));
        }
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                VerifyError::truncated(format!("unexpected end of file at offset {offset}"))
            } else {
                VerifyError::Io(e)
            }
        })
    }
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn detects_magic() {
        let cases: [(&[u8], Option<Container>); 6] = [
            (&[0x1A, 0x45, 0xDF, 0xA3, 0x9F], Some(Container::Matroska)),
            (b"\x00\x00\x00\x18ftypisom", Some(Container::Mp4)),
            (b"\x00\x00\x00\x08mdat", Some(Container::Mp4)),
            (b"FLV\x01\x05", Some(Container::Flv)),
            (&[0x47, 0x40, 0x00, 0x10], Some(Container::MpegTs)),
            (b"hello world!", None),
        ];
        for (bytes, expected) in cases {
            let mut cursor = Cursor::new(bytes.to_vec());
            assert_eq!(detect_container_from_reader(&mut cursor).unwrap(), expected);
            assert_eq!(cursor.position(), 0);
        }
    }

    #[test]
    fn extension_fallback() {
        assert_eq!(container_from_extension(Path::new("a.TS")), Some(Container::MpegTs));
        assert_eq!(container_from_extension(Path::new("a.webm")), Some(Container::Matroska));
        assert_eq!(container_from_extension(Path::new("a.txt")), None);
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("mpegts".parse::<Container>().unwrap(), Container::MpegTs);
        assert_eq!("MKV".parse::<Container>().unwrap(), Container::Matroska);
        assert!("avi".parse::<Container>().is_err());
    }

    #[test]
    fn read_past_end_is_truncation() {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        let mut source = Source::new(&mut cursor, 10);
        let mut buf = [0u8; 4];
        assert!(source.read_at(6, &mut buf).is_ok());
        assert!(matches!(source.read_at(8, &mut buf), Err(VerifyError::Truncated(_))));
    }
}
