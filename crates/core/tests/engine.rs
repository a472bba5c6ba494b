//! End-to-end engine tests against an in-memory object store

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use jiff::{SignedDuration, Timestamp};
use stow_core::client::REMOVE_CHANNEL_CAPACITY;
use stow_core::remove::{RemoveRequest, remove_targets};
use stow_core::{
    AgeFilter, Alias, AliasResolver, ClientCache, ClientContent, ClientFactory, ClientUrl,
    CopyOptions, Error, GetOptions, ListOptions, ObjectBody, ObjectClient, PutOptions, RemoveManager,
    RemoveOptions, RemoveOutcome, Result, SessionHeader, SessionStore, StatOptions,
    TransferEngine, TransferEvent, TransferMode, TransferOptions, UrlKind, parse_duration,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct Object {
    data: Vec<u8>,
    modified: Timestamp,
}

/// Objects keyed by `bucket/key`
#[derive(Default)]
struct MemStore {
    objects: Mutex<BTreeMap<String, Object>>,
    puts: Mutex<HashMap<String, usize>>,
    /// Fail every put once this many have succeeded
    fail_after: Mutex<Option<usize>>,
    succeeded: AtomicUsize,
}

impl MemStore {
    fn insert(&self, path: &str, data: &[u8], modified: Timestamp) {
        self.objects.lock().unwrap().insert(
            path.to_string(),
            Object {
                data: data.to_vec(),
                modified,
            },
        );
    }

    fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    fn url(base: &ClientUrl, path: &str) -> ClientUrl {
        ClientUrl::object(base.scheme.clone(), base.host.clone(), path)
    }
}

struct MemClient(Arc<MemStore>);

#[async_trait]
impl ObjectClient for MemClient {
    fn kind(&self) -> UrlKind {
        UrlKind::Object
    }

    fn list(&self, url: &ClientUrl, options: ListOptions) -> BoxStream<'static, Result<ClientContent>> {
        let path = url.path.trim_start_matches('/').to_string();
        let objects = self.0.objects.lock().unwrap().clone();
        let mut entries = Vec::new();
        let mut dirs = BTreeSet::new();
        for (key, object) in objects.range(path.clone()..) {
            if !key.starts_with(&path) {
                break;
            }
            let rest = &key[path.len()..];
            match rest.find('/') {
                Some(idx) if !options.recursive => {
                    let dir = format!("{path}{}", &rest[..=idx]);
                    if dirs.insert(dir.clone()) {
                        entries.push(Ok(ClientContent::dir(MemStore::url(url, &dir))));
                    }
                }
                _ => entries.push(Ok(ClientContent::file(
                    MemStore::url(url, key),
                    object.data.len() as i64,
                )
                .with_modified(object.modified))),
            }
        }
        stream::iter(entries).boxed()
    }

    async fn stat(&self, url: &ClientUrl, _options: &StatOptions) -> Result<ClientContent> {
        let path = url.path.trim_start_matches('/');
        let objects = self.0.objects.lock().unwrap();
        if let Some(object) = objects.get(path) {
            return Ok(ClientContent::file(url.clone(), object.data.len() as i64)
                .with_modified(object.modified));
        }
        let dir = format!("{}/", path.trim_end_matches('/'));
        if url.is_bucket_root() || objects.keys().any(|k| k.starts_with(&dir)) {
            return Ok(ClientContent::dir(url.clone()));
        }
        Err(Error::NotFound(url.path.clone()))
    }

    async fn get(&self, url: &ClientUrl, _options: &GetOptions) -> Result<ObjectBody> {
        let path = url.path.trim_start_matches('/');
        let data = self
            .0
            .objects
            .lock()
            .unwrap()
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(url.path.clone()))?;
        Ok(ObjectBody::from_bytes(data))
    }

    async fn put(&self, url: &ClientUrl, body: ObjectBody, _options: &PutOptions) -> Result<u64> {
        if let Some(limit) = *self.0.fail_after.lock().unwrap() {
            if self.0.succeeded.load(Ordering::SeqCst) >= limit {
                return Err(Error::Network("connection reset".into()));
            }
        }
        let path = url.path.trim_start_matches('/').to_string();
        *self.0.puts.lock().unwrap().entry(path.clone()).or_default() += 1;
        let data = body.into_bytes().await?;
        self.0.succeeded.fetch_add(1, Ordering::SeqCst);
        let len = data.len() as u64;
        self.0.insert(&path, &data, Timestamp::now());
        Ok(len)
    }

    async fn copy(&self, source: &ClientUrl, target: &ClientUrl, _options: &CopyOptions) -> Result<u64> {
        let data = self.get(source, &GetOptions::default()).await?;
        self.put(target, data, &PutOptions::default()).await
    }

    fn remove(
        &self,
        mut targets: mpsc::Receiver<ClientUrl>,
        _options: RemoveOptions,
    ) -> mpsc::Receiver<RemoveOutcome> {
        let store = self.0.clone();
        let (tx, rx) = mpsc::channel(REMOVE_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(url) = targets.recv().await {
                let path = url.path.trim_start_matches('/').to_string();
                let removed = store.objects.lock().unwrap().remove(&path);
                let outcome = match removed {
                    Some(_) => RemoveOutcome::Removed(url),
                    None => RemoveOutcome::Failed(url.clone(), Error::NotFound(url.path.clone())),
                };
                if tx.send(outcome).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    async fn get_url(&self, url: &ClientUrl, _expires: std::time::Duration) -> Result<String> {
        Ok(format!("mem://{}", url.path))
    }
}

struct MemFactory(Arc<MemStore>);

#[async_trait]
impl ClientFactory for MemFactory {
    async fn connect(&self, _alias: &Alias) -> Result<Arc<dyn ObjectClient>> {
        Ok(Arc::new(MemClient(self.0.clone())))
    }
}

fn setup() -> (Arc<MemStore>, Arc<ClientCache>) {
    let store = Arc::new(MemStore::default());
    let resolver = AliasResolver::new([Alias::new("mem", "http://localhost:9000", "ak", "sk")]);
    let cache = Arc::new(ClientCache::new(resolver, Arc::new(MemFactory(store.clone()))));
    (store, cache)
}

fn source_tree() -> TempDir {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    std::fs::create_dir_all(src.join("nested")).unwrap();
    for name in ["one.txt", "two.txt", "three.txt"] {
        std::fs::write(src.join(name), name.as_bytes()).unwrap();
    }
    std::fs::write(src.join("nested/four.txt"), b"four").unwrap();
    std::fs::write(src.join("nested/five.txt"), b"five").unwrap();
    temp
}

#[cfg(unix)]
#[tokio::test]
async fn test_recursive_copy_to_prefix() {
    let temp = source_tree();
    let (store, cache) = setup();
    let engine = TransferEngine::new(cache, CancellationToken::new());
    let options = TransferOptions {
        recursive: true,
        parallel: 3,
        ..Default::default()
    };

    let mut events = Vec::new();
    let summary = engine
        .copy(
            TransferMode::Copy,
            &[format!("{}/src/", temp.path().display())],
            "mem/bucket/prefix/",
            options,
            None,
            |e| events.push(e.clone()),
        )
        .await
        .unwrap();

    let copied: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, TransferEvent::Copied { .. }))
        .collect();
    assert_eq!(copied.len(), 5);
    assert_eq!(summary.copied, 5);
    assert!(summary.is_success());
    assert_eq!(
        store.keys(),
        vec![
            "bucket/prefix/nested/five.txt",
            "bucket/prefix/nested/four.txt",
            "bucket/prefix/one.txt",
            "bucket/prefix/three.txt",
            "bucket/prefix/two.txt",
        ]
    );
}

#[tokio::test]
async fn test_rm_older_than_removes_only_old_objects() {
    let (store, cache) = setup();
    let now = Timestamp::now();
    store.insert("bucket/old", b"x", now - SignedDuration::from_hours(72));
    store.insert("bucket/fresh", b"y", now - SignedDuration::from_hours(1));

    let request = RemoveRequest {
        recursive: true,
        force: true,
        age: AgeFilter::new(Some(parse_duration("48h").unwrap()), None),
        ..Default::default()
    };
    let mut events = Vec::new();
    let summary = remove_targets(
        cache,
        &["mem/bucket/".to_string()],
        request,
        now,
        CancellationToken::new(),
        |e| events.push(e.clone()),
    )
    .await
    .unwrap();

    let removed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Removed { target } => Some(target.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(removed, vec!["mem/bucket/old"]);
    assert_eq!(summary.removed, 1);
    assert_eq!(store.keys(), vec!["bucket/fresh"]);
}

#[tokio::test]
async fn test_rm_force_older_than_on_bucket_keeps_prefixes() {
    let (store, cache) = setup();
    let now = Timestamp::now();
    store.insert("bucket/old", b"x", now - SignedDuration::from_hours(72));
    store.insert("bucket/fresh", b"y", now - SignedDuration::from_hours(1));
    store.insert("bucket/logs/ancient", b"z", now - SignedDuration::from_hours(500));

    let request = RemoveRequest {
        force: true,
        age: AgeFilter::new(Some(parse_duration("48h").unwrap()), None),
        ..Default::default()
    };
    let summary = remove_targets(
        cache,
        &["mem/bucket/".to_string()],
        request,
        now,
        CancellationToken::new(),
        |_| {},
    )
    .await
    .unwrap();

    assert_eq!(summary.removed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(store.keys(), vec!["bucket/fresh", "bucket/logs/ancient"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_resumed_session_copies_each_unit_once() {
    let temp = source_tree();
    let sessions = TempDir::new().unwrap();
    let (store, cache) = setup();
    let store_dir = SessionStore::new(sessions.path());
    let args = vec![
        format!("{}/src/", temp.path().display()),
        "mem/bucket/".to_string(),
    ];
    let id = SessionStore::session_id("cp", &args);
    let options = || TransferOptions {
        recursive: true,
        parallel: 1,
        ..Default::default()
    };

    // first run dies after two uploads
    *store.fail_after.lock().unwrap() = Some(2);
    let session = store_dir
        .create(&id, SessionHeader::new("cp", args.clone(), "/"))
        .unwrap();
    let engine = TransferEngine::new(cache.clone(), CancellationToken::new());
    let first = engine
        .copy(TransferMode::Copy, &args[..1], &args[1], options(), Some(session), |_| {})
        .await
        .unwrap();
    assert_eq!(first.copied, 2);
    assert_eq!(first.failed, 3);
    assert!(store_dir.exists(&id));

    // second run resumes
    *store.fail_after.lock().unwrap() = None;
    let session = store_dir.load(&id).unwrap();
    assert_eq!(session.completed_count(), 2);
    let second = engine
        .copy(TransferMode::Copy, &args[..1], &args[1], options(), Some(session), |_| {})
        .await
        .unwrap();
    assert_eq!(second.copied, 3);
    assert_eq!(second.skipped, 2);
    assert!(second.is_success());
    assert!(!store_dir.exists(&id));

    let puts = store.puts.lock().unwrap();
    assert_eq!(puts.len(), 5);
    assert!(puts.values().all(|&n| n == 1));
}

#[tokio::test]
async fn test_remove_manager_reports_every_item_once() {
    let (store, cache) = setup();
    let now = Timestamp::now();
    for i in 0..50 {
        store.insert(&format!("b1/k{i}"), b"x", now);
        store.insert(&format!("b2/k{i}"), b"x", now);
    }

    let (manager, mut results) = RemoveManager::new(cache.clone(), RemoveOptions::default());
    for i in 0..50 {
        for bucket in ["b1", "b2"] {
            let url = cache.resolve(&format!("mem/{bucket}/k{i}")).unwrap();
            manager.add(&url).await.unwrap();
        }
    }
    let missing = cache.resolve("mem/b1/missing").unwrap();
    manager.add(&missing).await.unwrap();

    let summary = manager.close().await;
    assert_eq!(manager.active_readers().await, 0);
    assert_eq!(summary.removed, 100);
    assert_eq!(summary.failed, 1);

    let mut seen = BTreeMap::new();
    while let Ok(result) = results.try_recv() {
        *seen.entry(result.display_path().unwrap()).or_insert(0) += 1;
    }
    assert_eq!(seen.len(), 101);
    assert!(seen.values().all(|&n| n == 1));
    assert!(store.keys().is_empty());
}
