//! Bucket snapshots
//!
//! A snapshot is a point-in-time listing of one or more buckets stored as a
//! versioned stream of CRC-guarded packets:
//!
//! ```text
//! magic(73 4b e5 6c) version
//! TargetStart
//!   BucketHeader BucketEntries* BucketEnd
//!   ...
//! TargetEnd
//! ```
//!
//! Header payloads are JSON. New optional fields must carry `#[serde(default)]`
//! so older snapshots keep decoding; renaming or retyping a field requires a
//! version bump.

mod packet;
mod reader;
mod writer;

use std::io::Write;

use futures::StreamExt;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::alias::{Alias, ResolvedUrl};
use crate::client::ObjectClient;
use crate::content::{ClientContent, ListOptions};
use crate::error::{Error, Result};
use crate::url::ClientUrl;

pub use packet::{PacketType, checksum, is_skippable};
pub use reader::SnapshotReader;
pub use writer::{BucketWriter, SnapshotWriter};

/// Stream signature
pub const SNAPSHOT_MAGIC: [u8; 4] = [0x73, 0x4b, 0xe5, 0x6c];

/// Current stream version
pub const SNAPSHOT_SERIALIZE_VERSION: u8 = 1;

/// Uncompressed size at which an entries block is flushed
pub const BUCKET_BLOCK_SIZE: usize = 1 << 20;

/// Largest single entry record a block may hold
pub const MAX_ENTRY_SIZE: usize = BUCKET_BLOCK_SIZE;

/// Decompressed size above which an entries block is rejected
pub const MAX_BLOCK_SIZE: usize = BUCKET_BLOCK_SIZE + 4 + MAX_ENTRY_SIZE;

/// File extension for snapshot files
pub const SNAPSHOT_EXTENSION: &str = "snap";

/// Where a snapshot was taken. Credentials are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotTarget {
    pub alias: String,
    pub endpoint: String,
    pub region: String,
    pub bucket_lookup: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<Timestamp>,
}

impl SnapshotTarget {
    pub fn from_alias(alias: &Alias) -> Self {
        Self {
            alias: alias.name.clone(),
            endpoint: alias.endpoint.clone(),
            region: alias.region.clone(),
            bucket_lookup: alias.bucket_lookup.clone(),
            created: Some(Timestamp::now()),
        }
    }
}

/// Per-bucket header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotBucket {
    pub name: String,
    /// Whether object versions were captured
    pub versions: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<Timestamp>,
}

/// One object or version in a bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotEntry {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    pub is_delete_marker: bool,
    pub is_latest: bool,
}

impl SnapshotEntry {
    /// Entry for a listing item, keyed relative to its bucket
    pub fn from_content(content: &ClientContent) -> Self {
        let (_, key) = content.url.bucket_and_key();
        Self {
            key: key.to_string(),
            version_id: content.version_id.clone(),
            size: content.size,
            modified: content.modified,
            etag: content.etag.clone(),
            storage_class: content.storage_class.clone(),
            is_delete_marker: content.is_delete_marker,
            is_latest: content.is_latest,
        }
    }
}

/// Totals from [`capture`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureSummary {
    pub buckets: u64,
    pub entries: u64,
    pub bytes: u64,
}

/// Record every bucket under `url` (an alias root or a single bucket)
///
/// Listing errors abort the capture; a partial snapshot is never finished.
pub async fn capture<W: Write>(
    client: &dyn ObjectClient,
    url: &ResolvedUrl,
    host: &Alias,
    versions: bool,
    out: &mut SnapshotWriter<W>,
) -> Result<CaptureSummary> {
    if url.is_local() {
        return Err(Error::InvalidArgument(format!(
            "snapshots need an alias path, got local path {url}"
        )));
    }
    let (bucket, key) = url.url.bucket_and_key();
    if !key.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "snapshots cover whole buckets, got {url}"
        )));
    }

    let buckets: Vec<String> = if bucket.is_empty() {
        let mut names = Vec::new();
        let mut listing = client.list(&url.url, ListOptions::default());
        while let Some(item) = listing.next().await {
            let item = item?;
            names.push(item.url.bucket_and_key().0.to_string());
        }
        names
    } else {
        vec![bucket.to_string()]
    };

    out.add_target(&SnapshotTarget::from_alias(host))?;
    let mut summary = CaptureSummary::default();
    let options = ListOptions {
        recursive: true,
        include_versions: versions,
        ..Default::default()
    };

    for name in buckets {
        let bucket_url = ClientUrl::object(
            url.url.scheme.clone(),
            url.url.host.clone(),
            &format!("{name}/"),
        );
        tracing::debug!(bucket = %name, "capturing bucket");
        let mut writer = out.start_bucket(&SnapshotBucket {
            name: name.clone(),
            versions,
            created: Some(Timestamp::now()),
        })?;
        let mut listing = client.list(&bucket_url, options);
        while let Some(item) = listing.next().await {
            let item = item?;
            if item.is_dir() {
                continue;
            }
            summary.bytes += item.size.max(0) as u64;
            writer.push(&SnapshotEntry::from_content(&item))?;
        }
        summary.entries += writer.finish()?;
        summary.buckets += 1;
    }

    out.finish_target()?;
    Ok(summary)
}
