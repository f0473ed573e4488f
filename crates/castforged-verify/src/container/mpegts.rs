//! MPEG transport stream framing check.
//!
//! A transport stream has no index, so completeness is judged from framing:
//! every 188-byte packet starts with the sync byte and the file ends on a
//! packet boundary. Duration comes from the first and last program clock
//! references, looking only at a bounded window of packets at each end.

use std::io::{Read, Seek};
use std::time::Duration;

use super::{ContainerInfo, Source};
use crate::error::{Result, VerifyError};

pub const SYNC_BYTE: u8 = 0x47;
pub const PACKET_SIZE: u64 = 188;

/// Packets inspected at each end of the file when looking for PCRs.
const PCR_WINDOW: u64 = 64;

const PCR_HZ: f64 = 27_000_000.0;

pub(crate) fn scan<R: Read + Seek>(source: &mut Source<'_, R>) -> Result<ContainerInfo> {
    let size = source.size();
    let packets = size / PACKET_SIZE;

    if packets == 0 {
        return Err(VerifyError::truncated(format!(
            "{size} bytes is less than one {PACKET_SIZE}-byte packet"
        )));
    }

    for index in 0..packets.min(3) {
        if read_sync(source, index)? != SYNC_BYTE {
            return Err(VerifyError::corrupt(format!("sync byte missing at packet {index}")));
        }
    }

    let tail = size % PACKET_SIZE;
    if tail != 0 {
        return Err(VerifyError::truncated(format!(
            "file ends with a partial packet ({tail} of {PACKET_SIZE} bytes)"
        )));
    }

    if read_sync(source, packets - 1)? != SYNC_BYTE {
        return Err(VerifyError::truncated("final packet lost sync"));
    }

    let duration = pcr_span(source, packets)?;
    Ok(ContainerInfo { duration })
}

fn read_sync<R: Read + Seek>(source: &mut Source<'_, R>, index: u64) -> Result<u8> {
    let mut byte = [0u8; 1];
    source.read_at(index * PACKET_SIZE, &mut byte)?;
    Ok(byte[0])
}

fn read_packet<R: Read + Seek>(source: &mut Source<'_, R>, index: u64) -> Result<[u8; PACKET_SIZE as usize]> {
    let mut packet = [0u8; PACKET_SIZE as usize];
    source.read_at(index * PACKET_SIZE, &mut packet)?;
    Ok(packet)
}

/// PID and 27 MHz program clock reference carried by a packet, if any.
fn packet_pcr(packet: &[u8; PACKET_SIZE as usize]) -> Option<(u16, u64)> {
    if packet[0] != SYNC_BYTE {
        return None;
    }
    let pid = (((packet[1] & 0x1F) as u16) << 8) | packet[2] as u16;
    let has_adaptation = packet[3] & 0x20 != 0;
    if !has_adaptation || packet[4] < 7 || packet[5] & 0x10 == 0 {
        return None;
    }

    let base = ((packet[6] as u64) << 25)
        | ((packet[7] as u64) << 17)
        | ((packet[8] as u64) << 9)
        | ((packet[9] as u64) << 1)
        | ((packet[10] as u64) >> 7);
    let ext = (((packet[10] & 0x01) as u64) << 8) | packet[11] as u64;
    Some((pid, base * 300 + ext))
}

fn pcr_span<R: Read + Seek>(source: &mut Source<'_, R>, packets: u64) -> Result<Option<Duration>> {
    let mut first = None;
    for index in 0..packets.min(PCR_WINDOW) {
        if let Some(found) = packet_pcr(&read_packet(source, index)?) {
            first = Some((index, found));
            break;
        }
    }
    let Some((first_index, (pid, first_pcr))) = first else {
        return Ok(None);
    };

    let window_start = packets.saturating_sub(PCR_WINDOW).max(first_index + 1);
    for index in (window_start..packets).rev() {
        match packet_pcr(&read_packet(source, index)?) {
            Some((p, last_pcr)) if p == pid && last_pcr > first_pcr => {
                return Ok(Some(Duration::from_secs_f64((last_pcr - first_pcr) as f64 / PCR_HZ)));
            }
            _ => {}
        }
    }

    Ok(None)
}
