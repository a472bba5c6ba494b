//! Packet framing
//!
//! ```text
//! type: u8 | flags: u8 | len: u32 LE | [crc: u32 LE] | payload
//! ```
//!
//! Flag bit 0 marks a CRC. Every non-empty payload carries one.

use std::io::{self, Read, Write};

use xxhash_rust::xxh64::xxh64;

use crate::error::{Error, Result};

const FLAG_CRC: u8 = 0x01;

/// Upper bound on a single payload; anything larger is treated as corruption
pub const MAX_PAYLOAD: u32 = 64 << 20;

/// Packet types. Codes of 128 and above may be skipped by older readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Invalid = 0,
    TargetStart = 1,
    BucketHeader = 2,
    BucketEntries = 3,
    BucketEnd = 4,
    TargetEnd = 5,
    Skip = 128,
}

impl PacketType {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Invalid,
            1 => Self::TargetStart,
            2 => Self::BucketHeader,
            3 => Self::BucketEntries,
            4 => Self::BucketEnd,
            5 => Self::TargetEnd,
            128 => Self::Skip,
            _ => return None,
        })
    }
}

pub const fn is_skippable(code: u8) -> bool {
    code >= 128
}

/// xxh64 of the payload, folded to 32 bits
pub fn checksum(payload: &[u8]) -> u32 {
    let h = xxh64(payload, 0);
    (h as u32) ^ ((h >> 32) as u32)
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub code: u8,
    pub payload: Vec<u8>,
}

pub fn write_packet<W: Write>(w: &mut W, kind: PacketType, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD)
        .ok_or_else(|| Error::CorruptSnapshot(format!("payload of {} bytes is too large", payload.len())))?;

    let flags = if payload.is_empty() { 0 } else { FLAG_CRC };
    w.write_all(&[kind as u8, flags])?;
    w.write_all(&len.to_le_bytes())?;
    if flags & FLAG_CRC != 0 {
        w.write_all(&checksum(payload).to_le_bytes())?;
    }
    w.write_all(payload)?;
    Ok(())
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn truncated(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::CorruptSnapshot("truncated packet".into())
    } else {
        Error::Io(err)
    }
}

/// Read one frame; `None` at a clean end of stream
pub fn read_packet<R: Read>(r: &mut R) -> Result<Option<Packet>> {
    let mut code = [0u8; 1];
    loop {
        match r.read(&mut code) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }

    let mut flags = [0u8; 1];
    r.read_exact(&mut flags).map_err(truncated)?;
    let len = read_u32(r).map_err(truncated)?;
    if len > MAX_PAYLOAD {
        return Err(Error::CorruptSnapshot(format!("packet length {len} exceeds limit")));
    }
    let crc = if flags[0] & FLAG_CRC != 0 {
        Some(read_u32(r).map_err(truncated)?)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).map_err(truncated)?;

    if let Some(expected) = crc {
        let actual = checksum(&payload);
        if actual != expected {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
    }

    Ok(Some(Packet {
        code: code[0],
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let mut buf = Vec::new();
        write_packet(&mut buf, PacketType::BucketEnd, &[]).unwrap();
        assert_eq!(buf, vec![4, 0, 0, 0, 0, 0]);

        let mut buf = Vec::new();
        write_packet(&mut buf, PacketType::TargetStart, b"abc").unwrap();
        assert_eq!(buf[0], 1);
        assert_eq!(buf[1], FLAG_CRC);
        assert_eq!(&buf[2..6], &3u32.to_le_bytes());
        assert_eq!(&buf[6..10], &checksum(b"abc").to_le_bytes());
        assert_eq!(&buf[10..], b"abc");
    }

    #[test]
    fn test_read_back() {
        let mut buf = Vec::new();
        write_packet(&mut buf, PacketType::BucketHeader, b"{}").unwrap();
        write_packet(&mut buf, PacketType::TargetEnd, &[]).unwrap();

        let mut r = buf.as_slice();
        let first = read_packet(&mut r).unwrap().unwrap();
        assert_eq!(first.code, PacketType::BucketHeader as u8);
        assert_eq!(first.payload, b"{}");
        let second = read_packet(&mut r).unwrap().unwrap();
        assert_eq!(second.code, PacketType::TargetEnd as u8);
        assert!(read_packet(&mut r).unwrap().is_none());
    }

    #[test]
    fn test_every_payload_bit_flip_detected() {
        let payload = b"snapshot payload".to_vec();
        let mut clean = Vec::new();
        write_packet(&mut clean, PacketType::TargetStart, &payload).unwrap();
        let header_len = clean.len() - payload.len();

        for bit in 0..payload.len() * 8 {
            let mut corrupt = clean.clone();
            corrupt[header_len + bit / 8] ^= 1 << (bit % 8);
            let err = read_packet(&mut corrupt.as_slice()).unwrap_err();
            assert!(matches!(err, Error::ChecksumMismatch { .. }), "bit {bit}");
        }
    }

    #[test]
    fn test_truncated_packet() {
        let mut buf = Vec::new();
        write_packet(&mut buf, PacketType::TargetStart, b"abcdef").unwrap();
        buf.truncate(buf.len() - 2);
        let err = read_packet(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, Error::CorruptSnapshot(_)));
    }

    #[test]
    fn test_skippable_codes() {
        assert!(is_skippable(PacketType::Skip as u8));
        assert!(is_skippable(200));
        assert!(!is_skippable(PacketType::BucketEntries as u8));
        assert_eq!(PacketType::from_code(42), None);
    }
}
