//! Local filesystem client
//!
//! Walks run on the blocking pool and feed a bounded channel, so a listing
//! never gets more than a channel's worth ahead of its consumer.

use std::fs::Metadata;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use jiff::Timestamp;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::client::{
    CHUNK_SIZE, CopyOptions, GetOptions, ObjectBody, ObjectClient, PutOptions,
    REMOVE_CHANNEL_CAPACITY, RemoveOptions, RemoveOutcome, StatOptions, receiver_stream,
};
use crate::content::{ClientContent, DirOpt, ListOptions};
use crate::error::{Error, Result};
use crate::url::{ClientUrl, UrlKind};

const LIST_CHANNEL_CAPACITY: usize = 256;

/// Client for local paths
#[derive(Debug, Clone, Default)]
pub struct FsClient;

impl FsClient {
    pub fn new() -> Self {
        Self
    }
}

fn map_io(err: io::Error, path: &str) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::NotFound(path.to_string()),
        _ => Error::Io(io::Error::new(err.kind(), format!("{path}: {err}"))),
    }
}

fn modified(md: &Metadata) -> Option<Timestamp> {
    md.modified().ok().and_then(|t| Timestamp::try_from(t).ok())
}

fn content_for(path: String, md: &Metadata) -> ClientContent {
    let url = ClientUrl::local(path);
    let content = if md.is_dir() {
        ClientContent::dir(url)
    } else {
        ClientContent::file(url, md.len() as i64)
    };
    match modified(md) {
        Some(ts) => content.with_modified(ts),
        None => content,
    }
}

/// Directory entries sorted by name; soft errors drop the entry
fn read_sorted(dir: &str) -> io::Result<Vec<(String, Metadata)>> {
    let read_path = if dir.is_empty() { "." } else { dir };
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(read_path)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if Error::is_soft_fs_error(&err) => continue,
            Err(err) => return Err(err),
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let link_md = match entry.metadata() {
            Ok(md) => md,
            Err(err) if Error::is_soft_fs_error(&err) => {
                tracing::debug!(name = %name, error = %err, "skipping vanished entry");
                continue;
            }
            Err(err) => return Err(err),
        };
        let md = if link_md.file_type().is_symlink() {
            match std::fs::metadata(entry.path()) {
                Ok(md) => md,
                Err(err) if Error::is_soft_fs_error(&err) => {
                    tracing::debug!(name = %name, error = %err, "skipping broken symlink");
                    continue;
                }
                Err(err) => return Err(err),
            }
        } else {
            link_md.clone()
        };
        if link_md.file_type().is_symlink() && md.is_dir() {
            tracing::debug!(name = %name, "not following symlinked directory");
            continue;
        }
        entries.push((name, md));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

struct Walker {
    separator: char,
    options: ListOptions,
    tx: mpsc::Sender<Result<ClientContent>>,
}

impl Walker {
    /// Send one item; false once the consumer is gone
    fn send(&self, item: Result<ClientContent>) -> bool {
        self.tx.blocking_send(item).is_ok()
    }

    fn run(&self, url: &ClientUrl) {
        let path = url.path.as_str();
        let (dir, name_prefix) = if path.is_empty() || url.ends_with_separator() {
            (path, "")
        } else {
            match path.rfind(self.separator) {
                Some(idx) => (&path[..=idx], &path[idx + 1..]),
                None => ("", path),
            }
        };

        let entries = match read_sorted(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound && !name_prefix.is_empty() => {
                return;
            }
            Err(err) => {
                self.send(Err(map_io(err, path)));
                return;
            }
        };

        for (name, md) in entries {
            if !name.starts_with(name_prefix) {
                continue;
            }
            if !self.visit(format!("{dir}{name}"), &md) {
                return;
            }
        }
    }

    fn visit(&self, path: String, md: &Metadata) -> bool {
        if !md.is_dir() {
            return self.send(Ok(content_for(path, md)));
        }
        if !self.options.recursive {
            return self.send(Ok(content_for(path, md)));
        }
        if self.options.dir_opt == DirOpt::First && !self.send(Ok(content_for(path.clone(), md))) {
            return false;
        }

        match read_sorted(&path) {
            Ok(children) => {
                for (name, child) in children {
                    let child_path = format!("{path}{}{name}", self.separator);
                    if !self.visit(child_path, &child) {
                        return false;
                    }
                }
            }
            Err(err) if Error::is_soft_fs_error(&err) => {
                tracing::debug!(path = %path, error = %err, "directory vanished during walk");
            }
            Err(err) => {
                if !self.send(Err(map_io(err, &path))) {
                    return false;
                }
            }
        }

        if self.options.dir_opt == DirOpt::Last {
            return self.send(Ok(content_for(path, md)));
        }
        true
    }
}

#[async_trait]
impl ObjectClient for FsClient {
    fn kind(&self) -> UrlKind {
        UrlKind::Local
    }

    fn list(&self, url: &ClientUrl, options: ListOptions) -> BoxStream<'static, Result<ClientContent>> {
        let (tx, rx) = mpsc::channel(LIST_CHANNEL_CAPACITY);
        let url = url.clone();
        tokio::task::spawn_blocking(move || {
            let walker = Walker {
                separator: url.separator,
                options,
                tx,
            };
            walker.run(&url);
        });
        receiver_stream(rx)
    }

    async fn stat(&self, url: &ClientUrl, _options: &StatOptions) -> Result<ClientContent> {
        let md = tokio::fs::metadata(&url.path)
            .await
            .map_err(|e| map_io(e, &url.path))?;
        Ok(content_for(url.path.clone(), &md))
    }

    async fn get(&self, url: &ClientUrl, _options: &GetOptions) -> Result<ObjectBody> {
        let file = tokio::fs::File::open(&url.path)
            .await
            .map_err(|e| map_io(e, &url.path))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| map_io(e, &url.path))?
            .len();
        let path = url.path.clone();
        let chunks = stream::try_unfold(file, move |mut file| {
            let path = path.clone();
            async move {
                let mut buf = vec![0u8; CHUNK_SIZE];
                let n = file.read(&mut buf).await.map_err(|e| map_io(e, &path))?;
                if n == 0 {
                    return Ok::<_, Error>(None);
                }
                buf.truncate(n);
                Ok(Some((buf, file)))
            }
        });
        Ok(ObjectBody::new(size, chunks.boxed()))
    }

    async fn put(&self, url: &ClientUrl, mut body: ObjectBody, _options: &PutOptions) -> Result<u64> {
        if url.ends_with_separator() {
            return Err(Error::InvalidPath(format!(
                "cannot write an object to directory path {}",
                url.path
            )));
        }
        if let Some(parent) = Path::new(&url.path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| map_io(e, &url.path))?;
            }
        }
        let mut file = tokio::fs::File::create(&url.path)
            .await
            .map_err(|e| map_io(e, &url.path))?;
        let mut written = 0u64;
        while let Some(chunk) = body.chunks.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| map_io(e, &url.path))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| map_io(e, &url.path))?;
        Ok(written)
    }

    async fn copy(
        &self,
        source: &ClientUrl,
        target: &ClientUrl,
        _options: &CopyOptions,
    ) -> Result<u64> {
        if let Some(parent) = Path::new(&target.path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| map_io(e, &target.path))?;
            }
        }
        tokio::fs::copy(&source.path, &target.path)
            .await
            .map_err(|e| map_io(e, &source.path))
    }

    fn remove(
        &self,
        mut targets: mpsc::Receiver<ClientUrl>,
        _options: RemoveOptions,
    ) -> mpsc::Receiver<RemoveOutcome> {
        let (tx, rx) = mpsc::channel(REMOVE_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(url) = targets.recv().await {
                let trimmed = url.path.trim_end_matches(url.separator);
                let path = if trimmed.is_empty() { url.path.as_str() } else { trimmed };
                let result = match tokio::fs::symlink_metadata(path).await {
                    Ok(md) if md.is_dir() => tokio::fs::remove_dir(path).await,
                    Ok(_) => tokio::fs::remove_file(path).await,
                    Err(err) => Err(err),
                };
                let outcome = match result {
                    Ok(()) => RemoveOutcome::Removed(url),
                    Err(err) => {
                        let err = map_io(err, &url.path);
                        RemoveOutcome::Failed(url, err)
                    }
                };
                if tx.send(outcome).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    async fn get_url(&self, url: &ClientUrl, _expires: std::time::Duration) -> Result<String> {
        Err(Error::UnsupportedFeature(format!(
            "share URL for local path {}",
            url.path
        )))
    }
}
