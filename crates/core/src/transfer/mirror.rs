//! Directory synchronization
//!
//! The target tree is listed once into a map; the source walk then decides
//! per entry whether to copy, skip or report a conflict. Whatever is left in
//! the map afterwards exists only on the target.

use std::collections::{BTreeMap, HashSet};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;

use super::copy::{Outcome, Planner, TransferEngine, TransferMode, TransferOptions};
use super::diff::index_tree;
use super::message::{TransferEvent, TransferSummary};
use super::plan::{plan_entry, source_is_dir};
use crate::alias::ResolvedUrl;
use crate::content::{ClientContent, ListOptions};
use crate::error::{Error, Result};
use crate::filter::SkipReason;

/// Mirror-only switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MirrorOptions {
    /// Replace target objects whose size differs from the source
    pub overwrite: bool,
    /// Remove target objects that no longer exist in the source
    pub remove: bool,
}

impl Planner {
    async fn target_index(&self, target: &ResolvedUrl) -> Option<BTreeMap<String, ClientContent>> {
        let client = match self.cache.client_for(target).await {
            Ok(client) => client,
            Err(err) => {
                self.fail(target, None, err).await;
                return None;
            }
        };
        match index_tree(client.as_ref(), &target.url.as_dir()).await {
            Ok(index) => Some(index),
            Err(err) => {
                self.fail(target, None, err).await;
                None
            }
        }
    }

    async fn mirror(self, source: ResolvedUrl, target: ResolvedUrl, options: MirrorOptions) {
        let Some(mut index) = self.target_index(&target).await else {
            return;
        };
        tracing::debug!(target = %target, existing = index.len(), "target indexed");

        let client = match self.cache.client_for(&source).await {
            Ok(client) => client,
            Err(err) => {
                self.fail(&source, None, err).await;
                return;
            }
        };
        let root = source.url.as_dir();
        let mut listing = client.list(&root, ListOptions::recursive());
        let mut incomplete = false;
        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                item = listing.next() => item,
            };
            let Some(item) = item else { break };
            let entry = match item {
                Ok(entry) if entry.is_dir() => continue,
                Ok(entry) => entry,
                Err(err) => {
                    let fatal = err.is_fatal();
                    incomplete = true;
                    if !self.fail(&source, None, err).await || fatal {
                        return;
                    }
                    continue;
                }
            };
            let Some((relative, unit)) = plan_entry(&source, &root.path, &entry, &target) else {
                continue;
            };
            let existing = index.remove(&relative);
            if let Some(reason) = self.filter.check(&entry, &relative, self.now) {
                if !self.event(TransferEvent::Skipped { source: unit.key(), reason }).await {
                    return;
                }
                continue;
            }
            let keep_going = match existing {
                None => self.schedule(unit).await,
                Some(current) if current.size == entry.size => {
                    self.event(TransferEvent::Skipped {
                        source: unit.key(),
                        reason: SkipReason::Unchanged,
                    })
                    .await
                }
                Some(_) if options.overwrite => self.schedule(unit).await,
                Some(_) => {
                    let conflict = Error::Conflict(format!(
                        "{} differs from source; use --overwrite to replace it",
                        unit.target
                    ));
                    self.fail(&unit.source, Some(&unit.target), conflict).await
                }
            };
            if !keep_going {
                return;
            }
        }

        if !options.remove {
            return;
        }
        // an entry missing from a partial listing is not an extra
        if incomplete {
            let err = Error::General(format!(
                "{source} could not be listed completely; nothing removed from {target}"
            ));
            self.fail(&source, Some(&target), err).await;
            return;
        }
        for (relative, extra) in index {
            if self.filter.exclude.is_excluded(&relative) {
                continue;
            }
            let url = target.with_url(extra.url);
            if self.results.send(Outcome::Remove(url)).await.is_err() {
                return;
            }
        }
    }
}

impl TransferEngine {
    /// Make the target tree match the source tree
    pub async fn mirror<F>(
        &self,
        source: &str,
        target: &str,
        options: TransferOptions,
        mirror: MirrorOptions,
        on_event: F,
    ) -> Result<TransferSummary>
    where
        F: FnMut(&TransferEvent),
    {
        let source = self.cache.resolve(source)?;
        let target = self.cache.resolve(target)?;
        let client = self.cache.client_for(&source).await?;
        if !source_is_dir(client.as_ref(), &source, options.encryption.lookup(&source)).await? {
            return Err(Error::InvalidSource(format!(
                "{source} is not a directory or bucket"
            )));
        }
        if dir_path(&source) == dir_path(&target) {
            return Err(Error::SourceTargetSame(source.display_path()));
        }

        let (units, queue) = mpsc::channel(1000);
        let (results, outcomes) = mpsc::channel(1000);
        let planner = Planner {
            cache: self.cache.clone(),
            filter: options.filter.clone(),
            encryption: options.encryption.clone(),
            completed: HashSet::new(),
            mode: TransferMode::Copy,
            recursive: true,
            dry_run: options.dry_run,
            now: options.now,
            cancel: self.cancel.clone(),
            units,
            results: results.clone(),
        };
        let plan_task = tokio::spawn(planner.mirror(source, target, mirror));
        self.execute(
            TransferMode::Copy,
            &options,
            queue,
            results,
            outcomes,
            plan_task,
            None,
            on_event,
        )
        .await
    }
}

fn dir_path(url: &ResolvedUrl) -> String {
    url.with_url(url.url.as_dir()).display_path()
}
