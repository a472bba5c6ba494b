//! Presigned download URLs

use std::time::Duration as StdDuration;

use futures::StreamExt;
use jiff::Timestamp;
use serde::Serialize;

use crate::cache::ClientCache;
use crate::client::StatOptions;
use crate::content::ListOptions;
use crate::duration::Duration;
use crate::error::{Error, Result};

/// Expiry used when none is given
pub const DEFAULT_SHARE_EXPIRY: StdDuration = StdDuration::from_secs(7 * 24 * 60 * 60);

pub const MIN_SHARE_EXPIRY: StdDuration = StdDuration::from_secs(1);

/// Longest validity a SigV4 presigned URL accepts
pub const MAX_SHARE_EXPIRY: StdDuration = DEFAULT_SHARE_EXPIRY;

/// One shared object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedUrl {
    pub object: String,
    pub url: String,
    /// Validity in seconds
    pub expiry: u64,
    pub expires_at: Timestamp,
}

/// Validate a requested expiry, defaulting to seven days
pub fn share_expiry(requested: Option<Duration>) -> Result<StdDuration> {
    let Some(requested) = requested else {
        return Ok(DEFAULT_SHARE_EXPIRY);
    };
    let expiry = requested
        .to_std()
        .ok_or_else(|| Error::Duration(format!("expiry {requested} is negative")))?;
    if expiry < MIN_SHARE_EXPIRY {
        return Err(Error::InvalidArgument(format!(
            "expiry {requested} is too short; use at least 1s"
        )));
    }
    if expiry > MAX_SHARE_EXPIRY {
        return Err(Error::InvalidArgument(format!(
            "expiry {requested} is too long; use at most 7d"
        )));
    }
    Ok(expiry)
}

/// Presign a GET for `target`, or for every object under it with `recursive`
///
/// Returns the number of URLs produced.
pub async fn share_download<F>(
    cache: &ClientCache,
    target: &str,
    recursive: bool,
    expiry: StdDuration,
    now: Timestamp,
    mut on_url: F,
) -> Result<u64>
where
    F: FnMut(&SharedUrl),
{
    let target = cache.resolve(target)?;
    if target.is_local() {
        return Err(Error::UnsupportedFeature(format!(
            "{target} is a local path; only objects can be shared"
        )));
    }
    let expires_at = now
        .checked_add(expiry)
        .map_err(|e| Error::Duration(e.to_string()))?;
    let client = cache.client_for(&target).await?;

    let whole_bucket = target.url.is_bucket_root() || target.url.is_alias_root();
    let is_dir = whole_bucket
        || client
            .stat(&target.url, &StatOptions::default())
            .await?
            .is_dir();
    if !is_dir {
        let url = client.get_url(&target.url, expiry).await?;
        on_url(&SharedUrl {
            object: target.display_path(),
            url,
            expiry: expiry.as_secs(),
            expires_at,
        });
        return Ok(1);
    }
    if !recursive {
        return Err(Error::SourceIsDir(target.display_path()));
    }

    let mut shared = 0;
    let mut listing = client.list(&target.url.as_dir(), ListOptions::recursive());
    while let Some(item) = listing.next().await {
        let entry = item?;
        if entry.is_dir() || entry.is_delete_marker {
            continue;
        }
        let url = client.get_url(&entry.url, expiry).await?;
        on_url(&SharedUrl {
            object: target.with_url(entry.url).display_path(),
            url,
            expiry: expiry.as_secs(),
            expires_at,
        });
        shared += 1;
    }
    tracing::debug!(target = %target, shared, "download URLs generated");
    Ok(shared)
}
