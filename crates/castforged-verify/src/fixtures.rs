//! Builders for minimal, structurally valid container files.
//!
//! Each builder produces just enough structure for the scanners in this
//! crate (and comfortably more than the default minimum size). Enabled for
//! unit tests and, through the `fixtures` feature, for integration tests in
//! other crates.

use std::time::Duration;

/// Payload bytes used to pad fixtures past the minimum size check.
const PADDING: usize = 4096;

fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn mvhd(duration: Duration) -> Vec<u8> {
    let mut body = vec![0u8; 100];
    body[12..16].copy_from_slice(&1000u32.to_be_bytes());
    body[16..20].copy_from_slice(&(duration.as_millis() as u32).to_be_bytes());
    mp4_box(b"mvhd", &body)
}

/// `ftyp` + `moov(mvhd)` + `mdat`.
pub fn mp4(duration: Duration) -> Vec<u8> {
    let mut out = mp4_box(b"ftyp", b"isom\0\0\x02\0isomiso2mp41");
    out.extend(mp4_box(b"moov", &mvhd(duration)));
    out.extend(mp4_box(b"mdat", &vec![0u8; PADDING]));
    out
}

/// `ftyp` + `mdat` with no index, as left by a muxer killed mid-capture.
pub fn mp4_without_moov() -> Vec<u8> {
    let mut out = mp4_box(b"ftyp", b"isom\0\0\x02\0isomiso2mp41");
    out.extend(mp4_box(b"mdat", &vec![0u8; PADDING]));
    out
}

/// `ftyp` + `moov(mvhd v1)` + `mdat` with raw 64-bit header values.
pub fn mp4_with_mvhd_v1(timescale: u32, duration: u64) -> Vec<u8> {
    let mut body = vec![0u8; 112];
    body[0] = 1;
    body[20..24].copy_from_slice(&timescale.to_be_bytes());
    body[24..32].copy_from_slice(&duration.to_be_bytes());
    let mut out = mp4_box(b"ftyp", b"isom\0\0\x02\0isomiso2mp41");
    out.extend(mp4_box(b"moov", &mp4_box(b"mvhd", &body)));
    out.extend(mp4_box(b"mdat", &vec![0u8; PADDING]));
    out
}

/// A complete MP4 cut off partway through its trailing `mdat`.
pub fn mp4_cut_short(duration: Duration) -> Vec<u8> {
    let mut out = mp4(duration);
    out.truncate(out.len() - PADDING / 2);
    out
}

const TS_PACKET: usize = 188;
const PCR_PID: u16 = 0x100;

fn ts_packet(pid: u16, pcr: Option<u64>) -> [u8; TS_PACKET] {
    let mut p = [0xFFu8; TS_PACKET];
    p[0] = 0x47;
    p[1] = ((pid >> 8) & 0x1F) as u8;
    p[2] = (pid & 0xFF) as u8;
    match pcr {
        Some(pcr) => {
            let base = pcr / 300;
            let ext = pcr % 300;
            p[3] = 0x30;
            p[4] = 7;
            p[5] = 0x10;
            p[6] = (base >> 25) as u8;
            p[7] = (base >> 17) as u8;
            p[8] = (base >> 9) as u8;
            p[9] = (base >> 1) as u8;
            p[10] = (((base & 1) as u8) << 7) | 0x7E | ((ext >> 8) & 1) as u8;
            p[11] = (ext & 0xFF) as u8;
        }
        None => p[3] = 0x10,
    }
    p
}

/// Transport stream whose first and last packets carry PCRs `duration` apart.
pub fn mpegts(duration: Duration) -> Vec<u8> {
    let start = 10 * 27_000_000u64;
    let end = start + (duration.as_secs_f64() * 27_000_000.0) as u64;
    let mut out = Vec::new();
    out.extend_from_slice(&ts_packet(PCR_PID, Some(start)));
    for _ in 0..30 {
        out.extend_from_slice(&ts_packet(PCR_PID, None));
    }
    out.extend_from_slice(&ts_packet(PCR_PID, Some(end)));
    out
}

fn ebml_element(id: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.push(0x01);
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes()[1..]);
    out.extend_from_slice(payload);
    out
}

fn ebml_header(doc_type: &str) -> Vec<u8> {
    let mut body = ebml_element(&[0x42, 0x86], &[1]);
    body.extend(ebml_element(&[0x42, 0x82], doc_type.as_bytes()));
    ebml_element(&[0x1A, 0x45, 0xDF, 0xA3], &body)
}

fn segment_body(duration: Duration) -> Vec<u8> {
    segment_body_with_ticks(duration.as_millis() as f64)
}

fn segment_body_with_ticks(ticks: f64) -> Vec<u8> {
    let mut info = ebml_element(&[0x2A, 0xD7, 0xB1], &1_000_000u32.to_be_bytes());
    info.extend(ebml_element(&[0x44, 0x89], &ticks.to_be_bytes()));
    let mut body = ebml_element(&[0x15, 0x49, 0xA9, 0x66], &info);
    body.extend(ebml_element(&[0xEC], &vec![0u8; PADDING]));
    body
}

/// EBML header + Segment(Info, Void) with a known segment size.
pub fn matroska(duration: Duration) -> Vec<u8> {
    let mut out = ebml_header("matroska");
    out.extend(ebml_element(&[0x18, 0x53, 0x80, 0x67], &segment_body(duration)));
    out
}

/// Matroska whose Info/Duration float is `ticks` at millisecond scale.
pub fn matroska_with_duration_ticks(ticks: f64) -> Vec<u8> {
    let mut out = ebml_header("matroska");
    out.extend(ebml_element(&[0x18, 0x53, 0x80, 0x67], &segment_body_with_ticks(ticks)));
    out
}

/// Matroska whose segment size was never patched in by the muxer.
pub fn matroska_unknown_size(duration: Duration) -> Vec<u8> {
    let mut out = ebml_header("matroska");
    out.extend_from_slice(&[0x18, 0x53, 0x80, 0x67, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    out.extend(segment_body(duration));
    out
}

/// EBML file with a DocType no player understands.
pub fn ebml_with_doc_type(doc_type: &str) -> Vec<u8> {
    let mut out = ebml_header(doc_type);
    out.extend(ebml_element(&[0x18, 0x53, 0x80, 0x67], &segment_body(Duration::from_secs(1))));
    out
}

fn flv_tag(tag_type: u8, timestamp_ms: u32, data_len: usize) -> Vec<u8> {
    let mut out = vec![tag_type];
    out.extend_from_slice(&(data_len as u32).to_be_bytes()[1..]);
    out.extend_from_slice(&timestamp_ms.to_be_bytes()[1..]);
    out.push((timestamp_ms >> 24) as u8);
    out.extend_from_slice(&[0, 0, 0]);
    out.extend(std::iter::repeat(0u8).take(data_len));
    out.extend_from_slice(&((11 + data_len) as u32).to_be_bytes());
    out
}

/// FLV header + ten video tags, the last stamped at `duration`.
pub fn flv(duration: Duration) -> Vec<u8> {
    let mut out = b"FLV\x01\x05".to_vec();
    out.extend_from_slice(&9u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    let total = duration.as_millis() as u32;
    for i in 0..10u32 {
        out.extend(flv_tag(9, total * i / 9, 200));
    }
    out
}

/// Bytes that match no container.
pub fn garbage() -> Vec<u8> {
    (0..PADDING).map(|i| (i * 31 % 251) as u8 | 0x80).collect()
}
