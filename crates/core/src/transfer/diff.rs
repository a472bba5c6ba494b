//! Tree comparison
//!
//! The second tree is indexed by relative path, the same way mirror indexes
//! its target; the first tree is then walked against that index.

use std::collections::BTreeMap;

use futures::StreamExt;
use serde::Serialize;

use crate::alias::ResolvedUrl;
use crate::cache::ClientCache;
use crate::client::{ObjectClient, StatOptions};
use crate::content::{ClientContent, ListOptions};
use crate::error::{Error, Result};
use crate::url::ClientUrl;

/// How the two sides differ at one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffKind {
    OnlyInFirst,
    OnlyInSecond,
    /// A file on one side, a directory on the other
    Type,
    Size,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub first: String,
    pub second: String,
    #[serde(rename = "diff")]
    pub kind: DiffKind,
}

/// Files under `root` keyed by their path relative to it
///
/// A root that does not exist yet indexes as empty.
pub(super) async fn index_tree(
    client: &dyn ObjectClient,
    root: &ClientUrl,
) -> Result<BTreeMap<String, ClientContent>> {
    let mut index = BTreeMap::new();
    let mut listing = client.list(root, ListOptions::recursive());
    while let Some(item) = listing.next().await {
        match item {
            Ok(entry) if entry.is_dir() => {}
            Ok(entry) => {
                if let Some(relative) = entry.url.relative_to(&root.path) {
                    index.insert(relative, entry);
                }
            }
            Err(Error::NotFound(_)) => break,
            Err(err) => return Err(err),
        }
    }
    Ok(index)
}

async fn stat(cache: &ClientCache, url: &ResolvedUrl) -> Result<(ClientContent, bool)> {
    let client = cache.client_for(url).await?;
    if url.url.is_bucket_root() || url.url.is_alias_root() {
        return Ok((ClientContent::dir(url.url.clone()), true));
    }
    let content = client.stat(&url.url, &StatOptions::default()).await?;
    let is_dir = content.is_dir();
    Ok((content, is_dir))
}

/// Compare two files or two trees, calling `on_diff` for every difference
///
/// Returns the number of differences found. A listing error on either side
/// aborts the comparison, since a partial listing would report false extras.
pub async fn diff<F>(cache: &ClientCache, first: &str, second: &str, mut on_diff: F) -> Result<u64>
where
    F: FnMut(&DiffEntry),
{
    let first = cache.resolve(first)?;
    let second = cache.resolve(second)?;
    let (first_content, first_dir) = stat(cache, &first).await?;
    let (second_content, second_dir) = stat(cache, &second).await?;

    let mut found = 0;
    let mut report = |first: &ResolvedUrl, second: &ResolvedUrl, kind| {
        found += 1;
        on_diff(&DiffEntry {
            first: first.display_path(),
            second: second.display_path(),
            kind,
        });
    };

    if first_dir != second_dir {
        report(&first, &second, DiffKind::Type);
        return Ok(found);
    }
    if !first_dir {
        if first_content.size != second_content.size {
            report(&first, &second, DiffKind::Size);
        }
        return Ok(found);
    }

    let first_root = first.url.as_dir();
    let second_root = second.url.as_dir();
    let second_client = cache.client_for(&second).await?;
    let mut index = index_tree(second_client.as_ref(), &second_root).await?;
    tracing::debug!(second = %second, entries = index.len(), "comparison index built");

    let first_client = cache.client_for(&first).await?;
    let mut listing = first_client.list(&first_root, ListOptions::recursive());
    while let Some(item) = listing.next().await {
        let entry = item?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.url.relative_to(&first_root.path) else {
            continue;
        };
        let left = first.with_url(entry.url.clone());
        let right = second.with_url(second_root.join(&relative));
        match index.remove(&relative) {
            None => report(&left, &right, DiffKind::OnlyInFirst),
            Some(other) if other.size != entry.size => report(&left, &right, DiffKind::Size),
            Some(_) => {}
        }
    }
    for (relative, extra) in index {
        let left = first.with_url(first_root.join(&relative));
        report(&left, &second.with_url(extra.url), DiffKind::OnlyInSecond);
    }
    Ok(found)
}
