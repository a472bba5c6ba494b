//! Snapshot encoder

use std::io::Write;

use super::packet::{PacketType, write_packet};
use super::{BUCKET_BLOCK_SIZE, MAX_ENTRY_SIZE, SNAPSHOT_MAGIC, SNAPSHOT_SERIALIZE_VERSION};
use super::{SnapshotBucket, SnapshotEntry, SnapshotTarget};
use crate::error::{Error, Result};

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InTarget,
    InBucket,
}

/// Writes a snapshot stream
///
/// Targets bracket buckets; buckets are written through a [`BucketWriter`]
/// that borrows the writer, so two buckets can never be open at once.
pub struct SnapshotWriter<W: Write> {
    out: W,
    state: State,
}

impl<W: Write> SnapshotWriter<W> {
    /// Write the stream header
    pub fn new(mut out: W) -> Result<Self> {
        out.write_all(&SNAPSHOT_MAGIC)?;
        out.write_all(&[SNAPSHOT_SERIALIZE_VERSION])?;
        Ok(Self {
            out,
            state: State::Idle,
        })
    }

    fn expect(&self, want: State, action: &str) -> Result<()> {
        if self.state != want {
            return Err(Error::General(format!(
                "snapshot writer: cannot {action} while {:?}",
                self.state
            )));
        }
        Ok(())
    }

    pub fn add_target(&mut self, target: &SnapshotTarget) -> Result<()> {
        self.expect(State::Idle, "start a target")?;
        let payload = serde_json::to_vec(target)?;
        write_packet(&mut self.out, PacketType::TargetStart, &payload)?;
        self.state = State::InTarget;
        Ok(())
    }

    pub fn start_bucket(&mut self, bucket: &SnapshotBucket) -> Result<BucketWriter<'_, W>> {
        self.expect(State::InTarget, "start a bucket")?;
        let payload = serde_json::to_vec(bucket)?;
        write_packet(&mut self.out, PacketType::BucketHeader, &payload)?;
        self.state = State::InBucket;
        Ok(BucketWriter {
            parent: self,
            block: Vec::with_capacity(BUCKET_BLOCK_SIZE + 1024),
            count: 0,
        })
    }

    pub fn finish_target(&mut self) -> Result<()> {
        self.expect(State::InTarget, "finish a target")?;
        write_packet(&mut self.out, PacketType::TargetEnd, &[])?;
        self.out.flush()?;
        self.state = State::Idle;
        Ok(())
    }

    /// Flush and return the underlying writer
    pub fn into_inner(mut self) -> Result<W> {
        self.expect(State::Idle, "close the snapshot")?;
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Entries for one open bucket
///
/// Entries are buffered into ~1 MiB blocks of length-prefixed JSON records and
/// compressed with zstd. Call [`finish`](Self::finish) to close the bucket.
pub struct BucketWriter<'a, W: Write> {
    parent: &'a mut SnapshotWriter<W>,
    block: Vec<u8>,
    count: u64,
}

impl<W: Write> BucketWriter<'_, W> {
    pub fn push(&mut self, entry: &SnapshotEntry) -> Result<()> {
        let record = serde_json::to_vec(entry)?;
        if record.len() > MAX_ENTRY_SIZE {
            return Err(Error::General(format!(
                "snapshot entry for {} too large ({} bytes)",
                entry.key,
                record.len()
            )));
        }
        let len = record.len() as u32;
        self.block.extend_from_slice(&len.to_le_bytes());
        self.block.extend_from_slice(&record);
        self.count += 1;
        if self.block.len() >= BUCKET_BLOCK_SIZE {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Entries pushed so far
    pub fn count(&self) -> u64 {
        self.count
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let compressed = zstd::bulk::compress(&self.block, ZSTD_LEVEL)?;
        write_packet(&mut self.parent.out, PacketType::BucketEntries, &compressed)?;
        self.block.clear();
        Ok(())
    }

    /// Flush remaining entries and close the bucket
    pub fn finish(mut self) -> Result<u64> {
        self.flush_block()?;
        write_packet(&mut self.parent.out, PacketType::BucketEnd, &[])?;
        self.parent.state = State::InTarget;
        Ok(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SnapshotTarget {
        SnapshotTarget {
            alias: "myminio".into(),
            endpoint: "http://localhost:9000".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_header() {
        let writer = SnapshotWriter::new(Vec::new()).unwrap();
        let out = writer.into_inner().unwrap();
        assert_eq!(out, vec![0x73, 0x4b, 0xe5, 0x6c, 1]);
    }

    #[test]
    fn test_order_enforced() {
        let mut writer = SnapshotWriter::new(Vec::new()).unwrap();
        assert!(writer.start_bucket(&SnapshotBucket::default()).is_err());
        assert!(writer.finish_target().is_err());

        writer.add_target(&target()).unwrap();
        assert!(writer.add_target(&target()).is_err());

        // dropped without finish: the bucket stays open
        drop(writer.start_bucket(&SnapshotBucket::default()).unwrap());
        assert!(writer.finish_target().is_err());
    }

    #[test]
    fn test_unfinished_target_cannot_close() {
        let mut writer = SnapshotWriter::new(Vec::new()).unwrap();
        writer.add_target(&target()).unwrap();
        assert!(writer.into_inner().is_err());
    }

    #[test]
    fn test_oversized_entry_refused() {
        let mut writer = SnapshotWriter::new(Vec::new()).unwrap();
        writer.add_target(&target()).unwrap();
        let mut bucket = writer.start_bucket(&SnapshotBucket::default()).unwrap();
        let huge = SnapshotEntry {
            key: "k".repeat(MAX_ENTRY_SIZE),
            ..Default::default()
        };
        assert!(bucket.push(&huge).is_err());
        assert_eq!(bucket.count(), 0);
    }
}
