//! Batched removal across aliases
//!
//! [`RemoveManager`] keeps one removal channel per alias, created on first
//! use. Every channel feeds the client's batch remover; a reader task per
//! alias forwards outcomes to a single results channel. [`RemoveManager::close`]
//! drops all senders and joins every reader, so each added URL has its outcome
//! forwarded exactly once before `close` returns.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use jiff::Timestamp;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::alias::ResolvedUrl;
use crate::cache::ClientCache;
use crate::client::{
    ObjectClient, REMOVE_CHANNEL_CAPACITY, RemoveOptions, RemoveOutcome, StatOptions,
    receiver_stream,
};
use crate::content::{ClientContent, ListOptions};
use crate::error::{Error, Result};
use crate::filter::AgeFilter;
use crate::transfer::{TransferEvent, TransferSummary};
use crate::url::{ClientUrl, UrlKind};
use tokio_util::sync::CancellationToken;

/// An outcome tagged with the alias it came from
#[derive(Debug)]
pub struct RemoveResult {
    pub alias: String,
    pub outcome: RemoveOutcome,
}

impl RemoveResult {
    /// The removed or failed target as the user would type it
    pub fn display_path(&self) -> Option<String> {
        match &self.outcome {
            RemoveOutcome::Removed(url) | RemoveOutcome::Failed(url, _) => Some(
                ResolvedUrl {
                    alias: self.alias.clone(),
                    url: url.clone(),
                }
                .display_path(),
            ),
            RemoveOutcome::Aborted(_) => None,
        }
    }
}

/// Counts gathered while closing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemoveSummary {
    pub removed: u64,
    pub failed: u64,
    pub aborted: u64,
}

impl RemoveSummary {
    fn merge(&mut self, other: RemoveSummary) {
        self.removed += other.removed;
        self.failed += other.failed;
        self.aborted += other.aborted;
    }
}

struct State {
    closed: bool,
    senders: HashMap<String, mpsc::Sender<ClientUrl>>,
    readers: JoinSet<RemoveSummary>,
}

/// Per-alias batched removal
pub struct RemoveManager {
    cache: Arc<ClientCache>,
    options: RemoveOptions,
    results: mpsc::UnboundedSender<RemoveResult>,
    state: Mutex<State>,
}

impl RemoveManager {
    /// Create a manager and the receiver its outcomes arrive on
    pub fn new(
        cache: Arc<ClientCache>,
        options: RemoveOptions,
    ) -> (Self, mpsc::UnboundedReceiver<RemoveResult>) {
        let (results, rx) = mpsc::unbounded_channel();
        let manager = Self {
            cache,
            options,
            results,
            state: Mutex::new(State {
                closed: false,
                senders: HashMap::new(),
                readers: JoinSet::new(),
            }),
        };
        (manager, rx)
    }

    /// Queue one URL for removal
    pub async fn add(&self, target: &ResolvedUrl) -> Result<()> {
        let sender = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(Error::General("remove manager is closed".into()));
            }
            match state.senders.get(&target.alias) {
                Some(sender) => sender.clone(),
                None => {
                    let client = self.cache.client_for(target).await?;
                    let (sender, queue) = mpsc::channel(REMOVE_CHANNEL_CAPACITY);
                    let outcomes = client.remove(queue, self.options);
                    state
                        .readers
                        .spawn(forward(target.alias.clone(), outcomes, self.results.clone()));
                    state.senders.insert(target.alias.clone(), sender.clone());
                    tracing::debug!(alias = %target.alias, "remover started");
                    sender
                }
            }
        };

        sender
            .send(target.url.clone())
            .await
            .map_err(|_| Error::General(format!("remover for {} has stopped", target.display_path())))
    }

    /// Reader tasks not yet joined
    pub async fn active_readers(&self) -> usize {
        self.state.lock().await.readers.len()
    }

    /// Close every channel and wait for all outcomes to be forwarded
    pub async fn close(&self) -> RemoveSummary {
        let mut readers = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.senders.clear();
            std::mem::take(&mut state.readers)
        };

        let mut summary = RemoveSummary::default();
        while let Some(joined) = readers.join_next().await {
            match joined {
                Ok(counts) => summary.merge(counts),
                Err(err) => tracing::warn!(error = %err, "remove reader failed"),
            }
        }
        summary
    }
}

async fn forward(
    alias: String,
    mut outcomes: mpsc::Receiver<RemoveOutcome>,
    results: mpsc::UnboundedSender<RemoveResult>,
) -> RemoveSummary {
    let mut summary = RemoveSummary::default();
    while let Some(outcome) = outcomes.recv().await {
        match &outcome {
            RemoveOutcome::Removed(_) => summary.removed += 1,
            RemoveOutcome::Failed(..) => summary.failed += 1,
            RemoveOutcome::Aborted(err) => {
                tracing::warn!(alias = %alias, error = %err, "removal aborted");
                summary.aborted += 1;
            }
        }
        if results
            .send(RemoveResult {
                alias: alias.clone(),
                outcome,
            })
            .is_err()
        {
            tracing::debug!(alias = %alias, "remove results receiver dropped");
        }
    }
    summary
}

/// Options for [`remove_walk`]
#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    pub recursive: bool,
    pub age: AgeFilter,
    pub now: Timestamp,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            age: AgeFilter::default(),
            now: Timestamp::now(),
        }
    }
}

struct Frame {
    dir: Option<ClientContent>,
    listing: BoxStream<'static, Result<ClientContent>>,
    complete: bool,
}

/// Depth-first walk yielding everything under `root` that should be removed
///
/// Each level is listed without recursion, so prefix matching and the age
/// filter apply before descending. Local directories follow their contents
/// and are only yielded when every child was; `root_entry` is yielded last
/// under the same rule.
pub fn remove_walk(
    client: Arc<dyn ObjectClient>,
    root: ClientUrl,
    root_entry: Option<ClientContent>,
    options: WalkOptions,
) -> BoxStream<'static, Result<ClientContent>> {
    let (tx, rx) = mpsc::channel(REMOVE_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let list_options = ListOptions::default();
        let mut stack = vec![Frame {
            dir: root_entry,
            listing: client.list(&root, list_options),
            complete: true,
        }];

        while let Some(frame) = stack.last_mut() {
            match frame.listing.next().await {
                Some(Err(err)) => {
                    frame.complete = false;
                    let fatal = err.is_fatal();
                    if tx.send(Err(err)).await.is_err() || fatal {
                        return;
                    }
                }
                Some(Ok(entry)) if entry.is_dir() => {
                    if options.recursive {
                        let listing = client.list(&entry.url, list_options);
                        stack.push(Frame {
                            dir: Some(entry),
                            listing,
                            complete: true,
                        });
                    } else {
                        frame.complete = false;
                    }
                }
                Some(Ok(entry)) => {
                    if let Some(reason) = options.age.check(&entry, options.now) {
                        tracing::debug!(url = %entry.url, ?reason, "not removing");
                        frame.complete = false;
                        continue;
                    }
                    if tx.send(Ok(entry)).await.is_err() {
                        return;
                    }
                }
                None => {
                    let Some(done) = stack.pop() else { break };
                    if !done.complete {
                        if let Some(parent) = stack.last_mut() {
                            parent.complete = false;
                        }
                        continue;
                    }
                    // object stores have no directory entries to delete
                    if let Some(dir) = done.dir.filter(|d| d.url.kind == UrlKind::Local) {
                        if tx.send(Ok(dir)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });
    receiver_stream(rx)
}

/// Flags for an `rm` invocation
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveRequest {
    pub recursive: bool,
    pub force: bool,
    /// Allow removing every bucket of an alias
    pub dangerous: bool,
    /// Treat targets as raw key prefixes
    pub prefix: bool,
    pub dry_run: bool,
    pub options: RemoveOptions,
    pub age: AgeFilter,
}

impl RemoveRequest {
    /// Argument checks that must pass before anything is removed
    pub fn validate(&self, targets: &[ResolvedUrl]) -> Result<()> {
        if targets.is_empty() {
            return Err(Error::InvalidArgument("no target given".into()));
        }
        if self.recursive && !self.force {
            return Err(Error::InvalidArgument(
                "removing recursively requires --force".into(),
            ));
        }
        if let Some(root) = targets.iter().find(|t| t.url.is_alias_root()) {
            if !self.dangerous {
                return Err(Error::InvalidArgument(format!(
                    "removing every bucket under {root} requires --dangerous"
                )));
            }
            if !self.recursive {
                return Err(Error::InvalidArgument(format!(
                    "removing {root} requires --recursive"
                )));
            }
        }
        Ok(())
    }
}

/// Remove `targets`, reporting each result through `on_event`
///
/// Guard violations are returned before any I/O; everything after that is
/// reported per item.
pub async fn remove_targets<F>(
    cache: Arc<ClientCache>,
    targets: &[String],
    request: RemoveRequest,
    now: Timestamp,
    cancel: CancellationToken,
    mut on_event: F,
) -> Result<TransferSummary>
where
    F: FnMut(&TransferEvent),
{
    let targets = targets
        .iter()
        .map(|t| cache.resolve(t))
        .collect::<Result<Vec<_>>>()?;
    request.validate(&targets)?;

    let (manager, mut results) = RemoveManager::new(cache.clone(), request.options);
    let mut summary = TransferSummary::default();
    let mut emit = |event: TransferEvent, summary: &mut TransferSummary| {
        summary.record(&event);
        on_event(&event);
    };

    for target in &targets {
        if cancel.is_cancelled() {
            break;
        }
        let client = match cache.client_for(target).await {
            Ok(client) => client,
            Err(err) => {
                emit(failed(target, &err), &mut summary);
                continue;
            }
        };

        let walk_root = match plan_target(client.as_ref(), target, &request).await {
            Ok(Planned::Single(content)) => {
                if let Some(reason) = request.age.check(&content, now) {
                    tracing::debug!(target = %target, ?reason, "not removing");
                    emit(
                        TransferEvent::Skipped {
                            source: target.display_path(),
                            reason,
                        },
                        &mut summary,
                    );
                } else {
                    queue(&manager, target.with_url(content.url), request.dry_run, &mut |e| {
                        emit(e, &mut summary)
                    })
                    .await;
                }
                continue;
            }
            Ok(Planned::Walk(root, entry)) => (root, entry),
            Ok(Planned::Missing) => continue,
            Err(err) => {
                emit(failed(target, &err), &mut summary);
                continue;
            }
        };

        let options = WalkOptions {
            recursive: request.recursive,
            age: request.age,
            now,
        };
        let mut walk = remove_walk(client, walk_root.0, walk_root.1, options);
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = walk.next() => item,
            };
            let Some(item) = item else { break };
            match item {
                Ok(entry) => {
                    queue(&manager, target.with_url(entry.url), request.dry_run, &mut |e| {
                        emit(e, &mut summary)
                    })
                    .await;
                }
                Err(err) => emit(failed(target, &err), &mut summary),
            }
            while let Ok(result) = results.try_recv() {
                emit(removal_event(result), &mut summary);
            }
        }
    }

    let counts = manager.close().await;
    drop(manager);
    tracing::debug!(?counts, "removals settled");
    while let Some(result) = results.recv().await {
        emit(removal_event(result), &mut summary);
    }
    summary.cancelled = cancel.is_cancelled();
    Ok(summary)
}

enum Planned {
    Single(ClientContent),
    Walk(ClientUrl, Option<ClientContent>),
    /// Missing target under --force
    Missing,
}

async fn plan_target(
    client: &dyn ObjectClient,
    target: &ResolvedUrl,
    request: &RemoveRequest,
) -> Result<Planned> {
    if request.prefix {
        return Ok(Planned::Walk(target.url.clone(), None));
    }
    let whole_bucket = target.url.is_bucket_root() || target.url.is_alias_root();
    if whole_bucket && (request.recursive || request.force) {
        return Ok(Planned::Walk(target.url.as_dir(), None));
    }
    let content = match client.stat(&target.url, &StatOptions::default()).await {
        Ok(content) => content,
        Err(Error::NotFound(_)) if request.force => {
            tracing::debug!(target = %target, "missing target ignored");
            return Ok(Planned::Missing);
        }
        Err(err) => return Err(err),
    };
    if !content.is_dir() {
        return Ok(Planned::Single(content));
    }
    let root = target.url.as_dir();
    if !request.recursive {
        if !request.force {
            return Err(Error::InvalidArgument(format!(
                "{target} is a directory; use --force to remove its files or --recursive --force to remove it"
            )));
        }
        // files directly inside; the directory itself and its subfolders stay
        return Ok(Planned::Walk(root, None));
    }
    let entry = (root.kind == UrlKind::Local).then_some(content);
    Ok(Planned::Walk(root, entry))
}

async fn queue(
    manager: &RemoveManager,
    url: ResolvedUrl,
    dry_run: bool,
    emit: &mut impl FnMut(TransferEvent),
) {
    if dry_run {
        emit(TransferEvent::PlannedRemoval {
            target: url.display_path(),
        });
        return;
    }
    if let Err(err) = manager.add(&url).await {
        emit(failed(&url, &err));
    }
}

fn failed(target: &ResolvedUrl, err: &Error) -> TransferEvent {
    TransferEvent::Failed {
        source: target.display_path(),
        target: None,
        error: err.to_string(),
    }
}

/// Event for a forwarded removal outcome
pub fn removal_event(result: RemoveResult) -> TransferEvent {
    let path = result.display_path();
    match result.outcome {
        RemoveOutcome::Removed(_) => TransferEvent::Removed {
            target: path.unwrap_or_default(),
        },
        RemoveOutcome::Failed(_, err) => TransferEvent::Failed {
            source: path.unwrap_or_default(),
            target: None,
            error: err.to_string(),
        },
        RemoveOutcome::Aborted(err) => TransferEvent::Failed {
            source: result.alias,
            target: None,
            error: format!("removal aborted: {err}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::{Alias, AliasResolver};
    use crate::cache::ClientFactory;
    use crate::fs::FsClient;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NoRemote;

    #[async_trait]
    impl ClientFactory for NoRemote {
        async fn connect(&self, alias: &Alias) -> Result<Arc<dyn ObjectClient>> {
            Err(Error::Network(format!("{} unreachable", alias.name)))
        }
    }

    fn cache() -> Arc<ClientCache> {
        let resolver = AliasResolver::new([Alias::new("remote", "http://localhost:1", "a", "b")]);
        Arc::new(ClientCache::new(resolver, Arc::new(NoRemote)))
    }

    #[tokio::test]
    async fn test_local_removals_all_reported() {
        let temp = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for i in 0..20 {
            let path = temp.path().join(format!("f{i}"));
            std::fs::write(&path, b"x").unwrap();
            paths.push(path.display().to_string());
        }
        paths.push(temp.path().join("missing").display().to_string());

        let (manager, mut results) = RemoveManager::new(cache(), RemoveOptions::default());
        for path in &paths {
            manager.add(&ResolvedUrl::local(path.clone())).await.unwrap();
        }
        assert_eq!(manager.active_readers().await, 1);

        let summary = manager.close().await;
        assert_eq!(manager.active_readers().await, 0);
        assert_eq!(summary.removed, 20);
        assert_eq!(summary.failed, 1);

        let mut seen = Vec::new();
        while let Some(result) = results.recv().await {
            seen.push(result.display_path().unwrap());
        }
        seen.sort();
        let mut expected = paths.clone();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_add_after_close_fails() {
        let (manager, _results) = RemoveManager::new(cache(), RemoveOptions::default());
        manager.close().await;
        assert!(manager.add(&ResolvedUrl::local("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_alias_is_reported_by_add() {
        let (manager, _results) = RemoveManager::new(cache(), RemoveOptions::default());
        let target = cache().resolve("remote/bucket/key").unwrap();
        let err = manager.add(&target).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert_eq!(manager.active_readers().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_emits_directories_after_contents() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        std::fs::create_dir_all(root.join("a/b")).unwrap();
        std::fs::write(root.join("a/b/f1"), b"1").unwrap();
        std::fs::write(root.join("a/f2"), b"2").unwrap();
        std::fs::write(root.join("f3"), b"3").unwrap();

        let client: Arc<dyn ObjectClient> = Arc::new(FsClient::new());
        let root_url = ClientUrl::local(format!("{}/", root.display()));
        let root_entry = client
            .stat(&root_url, &Default::default())
            .await
            .unwrap();
        let options = WalkOptions {
            recursive: true,
            ..Default::default()
        };
        let paths: Vec<String> = remove_walk(client, root_url, Some(root_entry), options)
            .map(|c| c.unwrap().url.path)
            .collect()
            .await;

        let rel: Vec<String> = paths
            .iter()
            .map(|p| p.strip_prefix(&temp.path().display().to_string()).unwrap().to_string())
            .collect();
        assert_eq!(
            rel,
            vec!["/tree/a/b/f1", "/tree/a/b/", "/tree/a/f2", "/tree/a/", "/tree/f3", "/tree/"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_keeps_directories_with_filtered_children() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        std::fs::create_dir_all(root.join("keep")).unwrap();
        std::fs::write(root.join("keep/new"), b"1").unwrap();

        let client: Arc<dyn ObjectClient> = Arc::new(FsClient::new());
        let root_url = ClientUrl::local(format!("{}/", root.display()));
        let options = WalkOptions {
            recursive: true,
            age: AgeFilter::new(Some(crate::duration::parse_duration("1h").unwrap()), None),
            now: Timestamp::now(),
        };
        let found: Vec<_> = remove_walk(client, root_url, None, options).collect().await;
        assert!(found.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_non_recursive_skips_directories() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("d")).unwrap();
        std::fs::write(temp.path().join("f"), b"1").unwrap();

        let client: Arc<dyn ObjectClient> = Arc::new(FsClient::new());
        let root_url = ClientUrl::local(format!("{}/", temp.path().display()));
        let found: Vec<_> = remove_walk(client, root_url, None, WalkOptions::default())
            .map(|c| c.unwrap().url.base_name().to_string())
            .collect()
            .await;
        assert_eq!(found, vec!["f"]);
    }

    fn request(recursive: bool, force: bool) -> RemoveRequest {
        RemoveRequest {
            recursive,
            force,
            ..Default::default()
        }
    }

    #[test]
    fn test_guards() {
        let local = [ResolvedUrl::local("x")];
        let err = request(true, false).validate(&local).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert!(request(false, false).validate(&local).is_ok());
        assert!(request(false, false).validate(&[]).is_err());

        let root = [cache().resolve("remote").unwrap()];
        let err = request(true, true).validate(&root).unwrap_err();
        assert!(err.to_string().contains("--dangerous"));
        let dangerous = RemoveRequest {
            dangerous: true,
            ..request(true, true)
        };
        assert!(dangerous.validate(&root).is_ok());
    }

    async fn rm(targets: &[String], request: RemoveRequest) -> (TransferSummary, Vec<TransferEvent>) {
        let mut events = Vec::new();
        let summary = remove_targets(
            cache(),
            targets,
            request,
            Timestamp::now(),
            CancellationToken::new(),
            |e| events.push(e.clone()),
        )
        .await
        .unwrap();
        (summary, events)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remove_tree_including_directory() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a"), b"1").unwrap();
        std::fs::write(root.join("sub/b"), b"2").unwrap();

        let (summary, _) = rm(&[root.display().to_string()], request(true, true)).await;
        assert_eq!(summary.removed, 4);
        assert_eq!(summary.failed, 0);
        assert!(!root.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_target_needs_force() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope").display().to_string();

        let (summary, events) = rm(std::slice::from_ref(&missing), request(false, false)).await;
        assert_eq!(summary.failed, 1);
        assert!(events[0].is_failure());

        let (summary, events) = rm(&[missing], request(false, true)).await;
        assert!(summary.is_success());
        assert!(events.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_without_recursive_fails() {
        let temp = TempDir::new().unwrap();
        let (summary, _) = rm(&[temp.path().display().to_string()], request(false, false)).await;
        assert_eq!(summary.failed, 1);
        assert!(temp.path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_force_without_recursive_clears_top_level_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("dir");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a"), b"1").unwrap();
        std::fs::write(root.join("b"), b"2").unwrap();
        std::fs::write(root.join("sub/c"), b"3").unwrap();

        let target = format!("{}/", root.display());
        let (summary, _) = rm(&[target], request(false, true)).await;
        assert_eq!(summary.removed, 2);
        assert_eq!(summary.failed, 0);
        assert!(!root.join("a").exists());
        assert!(root.join("sub/c").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dry_run_removes_nothing() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f");
        std::fs::write(&file, b"1").unwrap();
        let dry = RemoveRequest {
            dry_run: true,
            ..request(false, false)
        };
        let (_, events) = rm(&[file.display().to_string()], dry).await;
        assert!(matches!(events[0], TransferEvent::PlannedRemoval { .. }));
        assert!(file.exists());
    }
}
