//! ObjectClient trait definition
//!
//! This trait is the capability set shared by the local filesystem client and
//! the S3 adapter. The transfer engine only ever talks to `dyn ObjectClient`,
//! which keeps it independent of any specific S3 SDK.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;

use crate::content::{ClientContent, ListOptions};
use crate::encryption::Sse;
use crate::error::{Error, Result};
use crate::limit::BandwidthLimiter;
use crate::url::{ClientUrl, UrlKind};

/// Options for stat operations
#[derive(Debug, Clone, Default)]
pub struct StatOptions {
    pub sse: Option<Sse>,
    pub version_id: Option<String>,
}

/// Options for get operations
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub sse: Option<Sse>,
    pub version_id: Option<String>,
}

/// Options for put operations
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub sse: Option<Sse>,
    pub storage_class: Option<String>,
}

/// Options for server-side copy
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    pub source_sse: Option<Sse>,
    pub target_sse: Option<Sse>,
    /// Source size, used for reporting
    pub size: u64,
}

/// Options for remove operations
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Remove every version instead of placing a delete marker
    pub include_versions: bool,
    /// Bypass governance-mode object retention
    pub bypass_governance: bool,
}

/// Result of one queued removal
#[derive(Debug)]
pub enum RemoveOutcome {
    /// Target was removed
    Removed(ClientUrl),
    /// Target could not be removed; the stream continues
    Failed(ClientUrl, Error),
    /// The stream ended early on a fatal error
    Aborted(Error),
}

impl RemoveOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RemoveOutcome::Removed(_))
    }
}

/// Capacity of the per-client removal channels
pub const REMOVE_CHANNEL_CAPACITY: usize = 1000;

/// Read size for local files and the chunking unit of in-memory bodies
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Object data as a lazy sequence of chunks
pub type ByteChunks = BoxStream<'static, Result<Vec<u8>>>;

/// An object body of known length
///
/// Bodies are consumed chunk by chunk, so an object never has to fit in
/// memory on its way from one client to another.
pub struct ObjectBody {
    pub size: u64,
    pub chunks: ByteChunks,
}

impl ObjectBody {
    pub fn new(size: u64, chunks: ByteChunks) -> Self {
        Self { size, chunks }
    }

    /// Body over data already in memory
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        let chunks: Vec<Result<Vec<u8>>> = data.chunks(CHUNK_SIZE).map(|c| Ok(c.to_vec())).collect();
        Self::new(size, stream::iter(chunks).boxed())
    }

    /// Charge every chunk against `limiter` before handing it on
    pub fn throttled(self, limiter: Arc<BandwidthLimiter>) -> Self {
        let chunks = self
            .chunks
            .then(move |chunk| {
                let limiter = limiter.clone();
                async move {
                    if let Ok(data) = &chunk {
                        limiter.consume(data.len() as u64).await;
                    }
                    chunk
                }
            })
            .boxed();
        Self::new(self.size, chunks)
    }

    /// Read the whole body into memory
    pub async fn into_bytes(mut self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(usize::try_from(self.size).unwrap_or(0));
        while let Some(chunk) = self.chunks.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody").field("size", &self.size).finish_non_exhaustive()
    }
}

/// Trait for local and remote storage operations
///
/// Implemented by [`FsClient`](crate::FsClient) and by the S3 adapter; mocked in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Which kind of URL this client serves
    fn kind(&self) -> UrlKind;

    /// List entries under `url`
    ///
    /// A URL ending in a separator (or a bucket root) lists the contents of that
    /// directory; any other URL lists every entry whose path starts with it.
    /// The stream is lazy; dropping it stops the listing.
    fn list(&self, url: &ClientUrl, options: ListOptions)
    -> BoxStream<'static, Result<ClientContent>>;

    /// Metadata for a single entry
    async fn stat(&self, url: &ClientUrl, options: &StatOptions) -> Result<ClientContent>;

    /// Open an object for reading
    async fn get(&self, url: &ClientUrl, options: &GetOptions) -> Result<ObjectBody>;

    /// Write an object from `body`, returning the number of bytes written
    async fn put(&self, url: &ClientUrl, body: ObjectBody, options: &PutOptions) -> Result<u64>;

    /// Copy within this client without moving data through the caller
    async fn copy(
        &self,
        source: &ClientUrl,
        target: &ClientUrl,
        options: &CopyOptions,
    ) -> Result<u64>;

    /// Remove every URL received on `targets`
    ///
    /// Per-item failures are reported in-band. A fatal error produces one
    /// `Aborted` outcome and closes the stream.
    fn remove(
        &self,
        targets: mpsc::Receiver<ClientUrl>,
        options: RemoveOptions,
    ) -> mpsc::Receiver<RemoveOutcome>;

    /// A shareable URL for `url`, valid for `expires`
    async fn get_url(&self, url: &ClientUrl, expires: std::time::Duration) -> Result<String>;
}

/// Adapt a channel receiver into a stream
pub fn receiver_stream<T: Send + 'static>(rx: mpsc::Receiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}
