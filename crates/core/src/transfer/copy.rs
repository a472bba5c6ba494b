//! Copy and move runs
//!
//! A planner task walks the sources and feeds a bounded unit queue; a
//! [`WorkerPool`] drains it and reports outcomes on a results channel. The
//! caller's task consumes results, so session checkpoints and move removals
//! have a single writer.

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use jiff::Timestamp;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::message::{TransferEvent, TransferSummary};
use super::plan::{
    CopyType, CopyUnit, guess_copy_type, plan_entry, plan_file, source_is_dir, walk_root,
};
use super::pool::{WorkerPool, default_parallelism};
use crate::alias::ResolvedUrl;
use crate::cache::ClientCache;
use crate::client::{CopyOptions, GetOptions, PutOptions, RemoveOptions};
use crate::content::{ClientContent, ListOptions};
use crate::encryption::EncryptionKeys;
use crate::error::{Error, Result};
use crate::filter::{EntryFilter, SkipReason};
use crate::limit::BandwidthLimiter;
use crate::remove::{RemoveManager, removal_event};
use crate::session::{Session, SessionTotals};

const UNIT_QUEUE_CAPACITY: usize = 1000;
const RESULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    Copy,
    /// Copy, then remove each source once its copy is confirmed
    Move,
}

/// Settings shared by cp, mv and mirror
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub recursive: bool,
    pub filter: EntryFilter,
    pub encryption: Arc<EncryptionKeys>,
    pub parallel: usize,
    pub dry_run: bool,
    /// Upload cap in bytes per second
    pub limit_upload: Option<u64>,
    /// Download cap in bytes per second
    pub limit_download: Option<u64>,
    pub storage_class: Option<String>,
    /// Reference time for age filters
    pub now: Timestamp,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            filter: EntryFilter::default(),
            encryption: Arc::new(EncryptionKeys::default()),
            parallel: default_parallelism(),
            dry_run: false,
            limit_upload: None,
            limit_download: None,
            storage_class: None,
            now: Timestamp::now(),
        }
    }
}

pub(super) enum Outcome {
    Done { unit: CopyUnit, bytes: u64 },
    Failed { unit: CopyUnit, error: Error },
    Event(TransferEvent),
    Remove(ResolvedUrl),
}

struct Worker {
    cache: Arc<ClientCache>,
    encryption: Arc<EncryptionKeys>,
    upload: Option<Arc<BandwidthLimiter>>,
    download: Option<Arc<BandwidthLimiter>>,
    storage_class: Option<String>,
    cancel: CancellationToken,
    results: mpsc::Sender<Outcome>,
}

impl Worker {
    async fn run(&self, unit: CopyUnit) {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = self.transfer(&unit) => result,
        };
        let outcome = match result {
            Ok(bytes) => Outcome::Done { unit, bytes },
            Err(error) => {
                tracing::debug!(source = %unit.source, error = %error, "transfer failed");
                Outcome::Failed { unit, error }
            }
        };
        if self.results.send(outcome).await.is_err() {
            tracing::debug!("results receiver dropped");
        }
    }

    async fn transfer(&self, unit: &CopyUnit) -> Result<u64> {
        let source_client = self.cache.client_for(&unit.source).await?;
        let source_sse = self.encryption.lookup(&unit.source);
        let target_sse = self.encryption.lookup(&unit.target);

        if unit.source.alias == unit.target.alias {
            let options = CopyOptions {
                source_sse,
                target_sse,
                size: unit.size.max(0) as u64,
            };
            return source_client
                .copy(&unit.source.url, &unit.target.url, &options)
                .await;
        }

        let target_client = self.cache.client_for(&unit.target).await?;
        let get = GetOptions {
            sse: source_sse,
            version_id: None,
        };
        let mut body = source_client.get(&unit.source.url, &get).await?;
        if let Some(limiter) = self.download.as_ref().filter(|_| !unit.source.is_local()) {
            body = body.throttled(limiter.clone());
        }
        if let Some(limiter) = self.upload.as_ref().filter(|_| !unit.target.is_local()) {
            body = body.throttled(limiter.clone());
        }
        let put = PutOptions {
            sse: target_sse,
            storage_class: self.storage_class.clone(),
        };
        target_client.put(&unit.target.url, body, &put).await
    }
}

/// Walks sources and schedules units
pub(super) struct Planner {
    pub(super) cache: Arc<ClientCache>,
    pub(super) filter: EntryFilter,
    pub(super) encryption: Arc<EncryptionKeys>,
    pub(super) completed: HashSet<String>,
    pub(super) mode: TransferMode,
    pub(super) recursive: bool,
    pub(super) dry_run: bool,
    pub(super) now: Timestamp,
    pub(super) cancel: CancellationToken,
    pub(super) units: mpsc::Sender<CopyUnit>,
    pub(super) results: mpsc::Sender<Outcome>,
}

impl Planner {
    /// Report an event; false once the run is over
    pub(super) async fn event(&self, event: TransferEvent) -> bool {
        self.results.send(Outcome::Event(event)).await.is_ok()
    }

    pub(super) async fn fail(
        &self,
        source: &ResolvedUrl,
        target: Option<&ResolvedUrl>,
        error: Error,
    ) -> bool {
        self.event(TransferEvent::Failed {
            source: source.display_path(),
            target: target.map(ResolvedUrl::display_path),
            error: error.to_string(),
        })
        .await
    }

    /// Queue a unit unless an earlier run of the session confirmed it
    pub(super) async fn schedule(&self, unit: CopyUnit) -> bool {
        if self.completed.contains(&unit.key()) {
            if self.mode == TransferMode::Move
                && self.results.send(Outcome::Remove(unit.source.clone())).await.is_err()
            {
                return false;
            }
            return self
                .event(TransferEvent::Skipped {
                    source: unit.key(),
                    reason: SkipReason::Completed,
                })
                .await;
        }
        if self.dry_run {
            return self
                .event(TransferEvent::Planned {
                    source: unit.source.display_path(),
                    target: unit.target.display_path(),
                    size: unit.size,
                })
                .await;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.units.send(unit) => sent.is_ok(),
        }
    }

    /// Filter then schedule one entry
    pub(super) async fn offer(&self, entry: &ClientContent, relative: &str, unit: CopyUnit) -> bool {
        if let Some(reason) = self.filter.check(entry, relative, self.now) {
            return self
                .event(TransferEvent::Skipped {
                    source: unit.key(),
                    reason,
                })
                .await;
        }
        self.schedule(unit).await
    }

    async fn single(&self, unit: CopyUnit) -> bool {
        let mut entry = ClientContent::file(unit.source.url.clone(), unit.size);
        entry.modified = unit.modified;
        let relative = unit.source.url.base_name().to_string();
        self.offer(&entry, &relative, unit).await
    }

    /// Plan one source as a tree (type C); a plain file is copied into `target`
    async fn tree(&self, source: &ResolvedUrl, target: &ResolvedUrl) -> bool {
        let client = match self.cache.client_for(source).await {
            Ok(client) => client,
            Err(err) => return self.fail(source, None, err).await,
        };
        let sse = self.encryption.lookup(source);
        match source_is_dir(client.as_ref(), source, sse.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                return match plan_file(client.as_ref(), source, target, true, sse).await {
                    Ok(unit) => self.single(unit).await,
                    Err(err) => self.fail(source, Some(target), err).await,
                };
            }
            Err(err) => return self.fail(source, None, err).await,
        }
        if !self.recursive {
            let err = Error::SourceIsDir(source.display_path());
            return self.fail(source, Some(target), err).await;
        }

        let root = walk_root(&source.url);
        let mut listing = client.list(&source.url.as_dir(), ListOptions::recursive());
        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                item = listing.next() => item,
            };
            let Some(item) = item else { break };
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    let fatal = err.is_fatal();
                    if !self.fail(source, None, err).await || fatal {
                        return false;
                    }
                    continue;
                }
            };
            if entry.is_dir() {
                continue;
            }
            let Some((relative, unit)) = plan_entry(source, &root, &entry, target) else {
                continue;
            };
            if !self.offer(&entry, &relative, unit).await {
                return false;
            }
        }
        true
    }

    async fn run(self, copy_type: CopyType, sources: Vec<ResolvedUrl>, target: ResolvedUrl, first: Option<CopyUnit>) {
        if let Some(unit) = first {
            self.single(unit).await;
            return;
        }
        for source in &sources {
            if !self.tree(source, &target).await {
                break;
            }
        }
        tracing::debug!(copy_type = %copy_type.letter(), sources = sources.len(), "planning finished");
    }
}

/// Runs copy, move and mirror operations against a shared client cache
pub struct TransferEngine {
    pub(super) cache: Arc<ClientCache>,
    pub(super) cancel: CancellationToken,
}

impl TransferEngine {
    pub fn new(cache: Arc<ClientCache>, cancel: CancellationToken) -> Self {
        Self { cache, cancel }
    }

    pub fn cache(&self) -> &Arc<ClientCache> {
        &self.cache
    }

    /// Copy or move `sources` to `target`
    ///
    /// Configuration and single-file planning errors are returned before any
    /// data moves; per-unit failures arrive as [`TransferEvent::Failed`]. An
    /// active session is deleted on full success and saved otherwise.
    pub async fn copy<F>(
        &self,
        mode: TransferMode,
        sources: &[String],
        target: &str,
        options: TransferOptions,
        session: Option<Session>,
        on_event: F,
    ) -> Result<TransferSummary>
    where
        F: FnMut(&TransferEvent),
    {
        let target = self.cache.resolve(target)?;
        let sources = sources
            .iter()
            .map(|s| self.cache.resolve(s))
            .collect::<Result<Vec<_>>>()?;
        let copy_type = guess_copy_type(&self.cache, &sources, &target, options.recursive).await?;

        let first = match (copy_type, sources.as_slice()) {
            (CopyType::FileToFile | CopyType::FileToDir, [source]) => {
                let client = self.cache.client_for(source).await?;
                let into_dir = copy_type == CopyType::FileToDir;
                let sse = options.encryption.lookup(source);
                Some(plan_file(client.as_ref(), source, &target, into_dir, sse).await?)
            }
            _ => None,
        };

        let completed = session
            .as_ref()
            .map(|s| s.completed().clone())
            .unwrap_or_default();
        let (units, queue) = mpsc::channel(UNIT_QUEUE_CAPACITY);
        let (results, outcomes) = mpsc::channel(RESULT_QUEUE_CAPACITY);
        let planner = Planner {
            cache: self.cache.clone(),
            filter: options.filter.clone(),
            encryption: options.encryption.clone(),
            completed,
            mode,
            recursive: options.recursive,
            dry_run: options.dry_run,
            now: options.now,
            cancel: self.cancel.clone(),
            units,
            results: results.clone(),
        };
        let plan_task = tokio::spawn(planner.run(copy_type, sources, target, first));

        self.execute(mode, &options, queue, results, outcomes, plan_task, session, on_event)
            .await
    }

    /// Start workers, drain outcomes and settle removals and the session
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn execute<F>(
        &self,
        mode: TransferMode,
        options: &TransferOptions,
        queue: mpsc::Receiver<CopyUnit>,
        results: mpsc::Sender<Outcome>,
        mut outcomes: mpsc::Receiver<Outcome>,
        plan_task: tokio::task::JoinHandle<()>,
        mut session: Option<Session>,
        mut on_event: F,
    ) -> Result<TransferSummary>
    where
        F: FnMut(&TransferEvent),
    {
        let worker = Arc::new(Worker {
            cache: self.cache.clone(),
            encryption: options.encryption.clone(),
            upload: options.limit_upload.map(|r| Arc::new(BandwidthLimiter::new(r))),
            download: options.limit_download.map(|r| Arc::new(BandwidthLimiter::new(r))),
            storage_class: options.storage_class.clone(),
            cancel: self.cancel.clone(),
            results,
        });
        let pool = WorkerPool::spawn(options.parallel, queue, self.cancel.clone(), move |unit| {
            let worker = worker.clone();
            async move { worker.run(unit).await }
        });

        let remover = (!options.dry_run)
            .then(|| RemoveManager::new(self.cache.clone(), RemoveOptions::default()));
        let mut summary = TransferSummary::default();
        let mut emit = |event: TransferEvent, summary: &mut TransferSummary| {
            summary.record(&event);
            on_event(&event);
        };

        while let Some(outcome) = outcomes.recv().await {
            match outcome {
                Outcome::Done { unit, bytes } => {
                    let mut checkpoint_error = None;
                    if let Some(session) = session.as_mut() {
                        checkpoint_error = session.mark_complete(&unit.key()).err();
                    }
                    emit(
                        TransferEvent::Copied {
                            source: unit.source.display_path(),
                            target: unit.target.display_path(),
                            size: bytes,
                        },
                        &mut summary,
                    );
                    if let Some(err) = checkpoint_error {
                        tracing::warn!(error = %err, "cannot record session progress");
                        emit(failed(&unit.source, None, &err), &mut summary);
                    } else if mode == TransferMode::Move {
                        if let Some((manager, _)) = &remover {
                            if let Err(err) = manager.add(&unit.source).await {
                                emit(failed(&unit.source, None, &err), &mut summary);
                            }
                        }
                    }
                }
                Outcome::Failed { unit, error } => {
                    emit(failed(&unit.source, Some(&unit.target), &error), &mut summary);
                }
                Outcome::Event(event) => emit(event, &mut summary),
                Outcome::Remove(url) => match &remover {
                    Some((manager, _)) => {
                        if let Err(err) = manager.add(&url).await {
                            emit(failed(&url, None, &err), &mut summary);
                        }
                    }
                    None => emit(
                        TransferEvent::PlannedRemoval {
                            target: url.display_path(),
                        },
                        &mut summary,
                    ),
                },
            }
        }

        if let Err(err) = plan_task.await {
            tracing::warn!(error = %err, "planner task failed");
        }
        pool.join().await;

        if let Some((manager, mut removed)) = remover {
            let counts = manager.close().await;
            drop(manager);
            tracing::debug!(?counts, "removals settled");
            while let Some(result) = removed.recv().await {
                emit(removal_event(result), &mut summary);
            }
        }

        summary.cancelled = self.cancel.is_cancelled();
        if let Some(mut session) = session {
            if summary.is_success() && !options.dry_run {
                session.delete()?;
            } else {
                let previous = session.header().totals.bytes;
                session.header_mut().totals = SessionTotals {
                    objects: session.completed_count() as u64,
                    bytes: previous + summary.bytes,
                };
                session.save()?;
                tracing::info!(id = session.id(), "session kept for resume");
            }
        }
        Ok(summary)
    }
}

fn failed(source: &ResolvedUrl, target: Option<&ResolvedUrl>, error: &Error) -> TransferEvent {
    TransferEvent::Failed {
        source: source.display_path(),
        target: target.map(ResolvedUrl::display_path),
        error: error.to_string(),
    }
}
