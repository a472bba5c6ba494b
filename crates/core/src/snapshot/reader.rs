//! Snapshot decoder

use std::io::Read;

use super::packet::{Packet, PacketType, is_skippable, read_packet};
use super::{MAX_BLOCK_SIZE, SNAPSHOT_MAGIC, SNAPSHOT_SERIALIZE_VERSION};
use super::{SnapshotBucket, SnapshotEntry, SnapshotTarget};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InTarget,
    InBucket,
}

/// Reads a snapshot stream written by [`SnapshotWriter`](super::SnapshotWriter)
pub struct SnapshotReader<R: Read> {
    input: R,
    version: u8,
    state: State,
}

impl<R: Read> SnapshotReader<R> {
    /// Validate the stream header
    pub fn new(mut input: R) -> Result<Self> {
        let mut header = [0u8; 5];
        input.read_exact(&mut header).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::CorruptSnapshot("missing header".into())
            } else {
                Error::Io(err)
            }
        })?;
        if header[..4] != SNAPSHOT_MAGIC {
            return Err(Error::CorruptSnapshot("header signature mismatch".into()));
        }
        let version = header[4];
        if version == 0 || version > SNAPSHOT_SERIALIZE_VERSION {
            return Err(Error::CorruptSnapshot(format!(
                "unsupported snapshot version {version}"
            )));
        }
        Ok(Self {
            input,
            version,
            state: State::Idle,
        })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Next packet of a known type, skipping forward-compatible extensions
    fn next_packet(&mut self) -> Result<Option<(PacketType, Vec<u8>)>> {
        loop {
            let Some(Packet { code, payload }) = read_packet(&mut self.input)? else {
                return Ok(None);
            };
            match PacketType::from_code(code) {
                Some(PacketType::Invalid) => {
                    return Err(Error::CorruptSnapshot("invalid packet type".into()));
                }
                Some(PacketType::Skip) => continue,
                Some(kind) => return Ok(Some((kind, payload))),
                None if is_skippable(code) => {
                    tracing::debug!(code, "skipping unknown snapshot packet");
                    continue;
                }
                None => {
                    return Err(Error::CorruptSnapshot(format!("unknown packet type {code}")));
                }
            }
        }
    }

    fn unexpected(kind: Option<PacketType>, want: &str) -> Error {
        match kind {
            Some(kind) => Error::CorruptSnapshot(format!("unexpected packet {kind:?}, want {want}")),
            None => Error::CorruptSnapshot(format!("unexpected end of stream, want {want}")),
        }
    }

    /// Start of the next target; `None` at the end of the stream
    pub fn read_target(&mut self) -> Result<Option<SnapshotTarget>> {
        if self.state != State::Idle {
            return Err(Error::General("snapshot reader: previous target not finished".into()));
        }
        match self.next_packet()? {
            None => Ok(None),
            Some((PacketType::TargetStart, payload)) => {
                let target = serde_json::from_slice(&payload)
                    .map_err(|e| Error::CorruptSnapshot(format!("target header: {e}")))?;
                self.state = State::InTarget;
                Ok(Some(target))
            }
            Some((kind, _)) => Err(Self::unexpected(Some(kind), "TargetStart")),
        }
    }

    /// Next bucket header in the current target; `None` once the target ends
    pub fn read_bucket(&mut self) -> Result<Option<SnapshotBucket>> {
        if self.state != State::InTarget {
            return Err(Error::General("snapshot reader: not inside a target".into()));
        }
        match self.next_packet()? {
            Some((PacketType::BucketHeader, payload)) => {
                let bucket = serde_json::from_slice(&payload)
                    .map_err(|e| Error::CorruptSnapshot(format!("bucket header: {e}")))?;
                self.state = State::InBucket;
                Ok(Some(bucket))
            }
            Some((PacketType::TargetEnd, _)) => {
                self.state = State::Idle;
                Ok(None)
            }
            other => Err(Self::unexpected(other.map(|(k, _)| k), "BucketHeader or TargetEnd")),
        }
    }

    /// Next block of entries in the current bucket; `None` once the bucket ends
    pub fn read_entries(&mut self) -> Result<Option<Vec<SnapshotEntry>>> {
        if self.state != State::InBucket {
            return Err(Error::General("snapshot reader: not inside a bucket".into()));
        }
        match self.next_packet()? {
            Some((PacketType::BucketEntries, payload)) => decode_block(&payload).map(Some),
            Some((PacketType::BucketEnd, _)) => {
                self.state = State::InTarget;
                Ok(None)
            }
            other => Err(Self::unexpected(other.map(|(k, _)| k), "BucketEntries or BucketEnd")),
        }
    }

    /// Discard the rest of the current bucket without decompressing it
    pub fn skip_bucket_entries(&mut self) -> Result<()> {
        if self.state != State::InBucket {
            return Err(Error::General("snapshot reader: not inside a bucket".into()));
        }
        loop {
            match self.next_packet()? {
                Some((PacketType::BucketEntries, _)) => continue,
                Some((PacketType::BucketEnd, _)) => {
                    self.state = State::InTarget;
                    return Ok(());
                }
                other => {
                    return Err(Self::unexpected(other.map(|(k, _)| k), "BucketEntries or BucketEnd"));
                }
            }
        }
    }

    /// Advance to the bucket called `name` in the current target
    pub fn find_bucket(&mut self, name: &str) -> Result<Option<SnapshotBucket>> {
        while let Some(bucket) = self.read_bucket()? {
            if bucket.name == name {
                return Ok(Some(bucket));
            }
            self.skip_bucket_entries()?;
        }
        Ok(None)
    }
}

fn decode_block(payload: &[u8]) -> Result<Vec<SnapshotEntry>> {
    let block = zstd::bulk::decompress(payload, MAX_BLOCK_SIZE)
        .map_err(|e| Error::CorruptSnapshot(format!("entry block: {e}")))?;
    let mut entries = Vec::new();
    let mut rest = block.as_slice();
    while !rest.is_empty() {
        let Some((len, tail)) = rest.split_first_chunk::<4>() else {
            return Err(Error::CorruptSnapshot("truncated entry length".into()));
        };
        let len = u32::from_le_bytes(*len) as usize;
        if tail.len() < len {
            return Err(Error::CorruptSnapshot("truncated entry".into()));
        }
        let (record, tail) = tail.split_at(len);
        let entry = serde_json::from_slice(record)
            .map_err(|e| Error::CorruptSnapshot(format!("entry: {e}")))?;
        entries.push(entry);
        rest = tail;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotWriter;
    use crate::snapshot::packet::write_packet;

    fn entry(key: &str, size: i64) -> SnapshotEntry {
        SnapshotEntry {
            key: key.into(),
            size,
            etag: Some(format!("etag-{key}")),
            modified: Some("2024-01-02T03:04:05Z".parse().unwrap()),
            is_latest: true,
            ..Default::default()
        }
    }

    fn sample() -> (Vec<u8>, Vec<SnapshotEntry>, Vec<SnapshotEntry>) {
        let photos: Vec<_> = (0..5).map(|i| entry(&format!("img/{i}.jpg"), i * 10)).collect();
        let docs = vec![
            entry("a.txt", 1),
            SnapshotEntry {
                key: "old.txt".into(),
                version_id: Some("v1".into()),
                is_delete_marker: true,
                is_latest: false,
                ..Default::default()
            },
        ];

        let mut writer = SnapshotWriter::new(Vec::new()).unwrap();
        writer
            .add_target(&SnapshotTarget {
                alias: "myminio".into(),
                endpoint: "http://localhost:9000".into(),
                region: "us-east-1".into(),
                ..Default::default()
            })
            .unwrap();
        for (name, entries) in [("photos", &photos), ("docs", &docs)] {
            let mut bucket = writer
                .start_bucket(&SnapshotBucket {
                    name: name.into(),
                    ..Default::default()
                })
                .unwrap();
            for e in entries {
                bucket.push(e).unwrap();
            }
            bucket.finish().unwrap();
        }
        writer.finish_target().unwrap();
        (writer.into_inner().unwrap(), photos, docs)
    }

    fn collect_bucket<R: Read>(reader: &mut SnapshotReader<R>) -> Vec<SnapshotEntry> {
        let mut all = Vec::new();
        while let Some(block) = reader.read_entries().unwrap() {
            all.extend(block);
        }
        all
    }

    #[test]
    fn test_entries_read_back_unchanged() {
        let (bytes, photos, docs) = sample();
        let mut reader = SnapshotReader::new(bytes.as_slice()).unwrap();
        assert_eq!(reader.version(), 1);

        let target = reader.read_target().unwrap().unwrap();
        assert_eq!(target.alias, "myminio");

        let bucket = reader.read_bucket().unwrap().unwrap();
        assert_eq!(bucket.name, "photos");
        assert_eq!(collect_bucket(&mut reader), photos);

        let bucket = reader.read_bucket().unwrap().unwrap();
        assert_eq!(bucket.name, "docs");
        assert_eq!(collect_bucket(&mut reader), docs);

        assert!(reader.read_bucket().unwrap().is_none());
        assert!(reader.read_target().unwrap().is_none());
    }

    #[test]
    fn test_find_bucket_skips_others() {
        let (bytes, _, docs) = sample();
        let mut reader = SnapshotReader::new(bytes.as_slice()).unwrap();
        reader.read_target().unwrap();
        let bucket = reader.find_bucket("docs").unwrap().unwrap();
        assert_eq!(bucket.name, "docs");
        assert_eq!(collect_bucket(&mut reader), docs);
        assert!(reader.find_bucket("missing").unwrap().is_none());
    }

    #[test]
    fn test_large_bucket_spans_blocks() {
        let mut writer = SnapshotWriter::new(Vec::new()).unwrap();
        writer.add_target(&SnapshotTarget::default()).unwrap();
        let mut bucket = writer
            .start_bucket(&SnapshotBucket {
                name: "big".into(),
                ..Default::default()
            })
            .unwrap();
        let long_key = "k".repeat(900);
        for i in 0..2000 {
            bucket.push(&entry(&format!("{long_key}{i}"), i)).unwrap();
        }
        assert_eq!(bucket.finish().unwrap(), 2000);
        writer.finish_target().unwrap();
        let bytes = writer.into_inner().unwrap();

        let mut reader = SnapshotReader::new(bytes.as_slice()).unwrap();
        reader.read_target().unwrap();
        reader.read_bucket().unwrap();
        let mut blocks = 0;
        let mut total = 0;
        while let Some(block) = reader.read_entries().unwrap() {
            blocks += 1;
            total += block.len();
        }
        assert!(blocks >= 2);
        assert_eq!(total, 2000);
    }

    #[test]
    fn test_skippable_packets_ignored() {
        let mut bytes = SNAPSHOT_MAGIC.to_vec();
        bytes.push(SNAPSHOT_SERIALIZE_VERSION);
        write_packet(&mut bytes, PacketType::Skip, b"padding").unwrap();
        write_packet(&mut bytes, PacketType::TargetStart, br#"{"alias":"x"}"#).unwrap();
        bytes.extend_from_slice(&[200, 0, 0, 0, 0, 0]);
        write_packet(&mut bytes, PacketType::TargetEnd, &[]).unwrap();

        let mut reader = SnapshotReader::new(bytes.as_slice()).unwrap();
        let target = reader.read_target().unwrap().unwrap();
        assert_eq!(target.alias, "x");
        assert_eq!(target.endpoint, "");
        assert!(reader.read_bucket().unwrap().is_none());
    }

    #[test]
    fn test_unknown_required_packet_rejected() {
        let mut bytes = SNAPSHOT_MAGIC.to_vec();
        bytes.push(SNAPSHOT_SERIALIZE_VERSION);
        bytes.extend_from_slice(&[42, 0, 0, 0, 0, 0]);
        let mut reader = SnapshotReader::new(bytes.as_slice()).unwrap();
        let err = reader.read_target().unwrap_err();
        assert!(err.to_string().contains("unknown packet type 42"));
    }

    #[test]
    fn test_bad_header() {
        assert!(SnapshotReader::new(&b"nope!"[..]).is_err());
        let mut bytes = SNAPSHOT_MAGIC.to_vec();
        bytes.push(9);
        let err = SnapshotReader::new(bytes.as_slice()).err().unwrap();
        assert!(err.to_string().contains("unsupported snapshot version 9"));
    }

    /// (offset, code, payload offset) of every frame after the header
    fn frames(bytes: &[u8]) -> Vec<(usize, u8, usize)> {
        let mut out = Vec::new();
        let mut pos = 5;
        while pos < bytes.len() {
            let code = bytes[pos];
            let flags = bytes[pos + 1];
            let len = u32::from_le_bytes(bytes[pos + 2..pos + 6].try_into().unwrap()) as usize;
            let payload = pos + 6 + if flags & 1 != 0 { 4 } else { 0 };
            out.push((pos, code, payload));
            pos = payload + len;
        }
        out
    }

    #[test]
    fn test_corrupt_entry_block_detected() {
        let (mut bytes, _, _) = sample();
        let (_, _, payload) = frames(&bytes)
            .into_iter()
            .find(|(_, code, _)| *code == PacketType::BucketEntries as u8)
            .unwrap();
        bytes[payload + 3] ^= 0x10;

        let mut reader = SnapshotReader::new(bytes.as_slice()).unwrap();
        reader.read_target().unwrap();
        reader.read_bucket().unwrap();
        let err = reader.read_entries().unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_oversized_entry_block_rejected() {
        let (bytes, _, _) = sample();
        let (pos, _, payload) = frames(&bytes)
            .into_iter()
            .find(|(_, code, _)| *code == PacketType::BucketEntries as u8)
            .unwrap();
        let len = u32::from_le_bytes(bytes[pos + 2..pos + 6].try_into().unwrap()) as usize;

        // a few KiB of zstd that expands far past any real block
        let inflated = zstd::bulk::compress(&vec![0u8; 4 * MAX_BLOCK_SIZE], 3).unwrap();
        assert!(inflated.len() < 64 * 1024);
        let mut forged = bytes[..pos].to_vec();
        write_packet(&mut forged, PacketType::BucketEntries, &inflated).unwrap();
        forged.extend_from_slice(&bytes[payload + len..]);

        let mut reader = SnapshotReader::new(forged.as_slice()).unwrap();
        reader.read_target().unwrap();
        reader.read_bucket().unwrap();
        let err = reader.read_entries().unwrap_err();
        assert!(matches!(err, Error::CorruptSnapshot(_)));
    }

    #[test]
    fn test_truncated_stream() {
        let (bytes, _, _) = sample();
        let cut = &bytes[..bytes.len() - 1];
        let mut reader = SnapshotReader::new(cut).unwrap();
        reader.read_target().unwrap();
        reader.find_bucket("docs").unwrap();
        let err = loop {
            match reader.read_entries() {
                Ok(Some(_)) => continue,
                Ok(None) => match reader.read_bucket() {
                    Ok(_) => continue,
                    Err(err) => break err,
                },
                Err(err) => break err,
            }
        };
        assert!(matches!(err, Error::CorruptSnapshot(_)));
    }
}
