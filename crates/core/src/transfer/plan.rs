//! Copy topology and target paths
//!
//! Every unit gets its target before any data moves. Shapes:
//!
//! | type | source            | target                    |
//! |------|-------------------|---------------------------|
//! | A    | one file          | that exact path           |
//! | B    | one file          | directory + basename      |
//! | C    | directory tree    | directory + relative path |
//! | D    | several sources   | directory (each as B/C)   |

use jiff::Timestamp;
use serde::Serialize;

use crate::alias::ResolvedUrl;
use crate::cache::ClientCache;
use crate::client::{ObjectClient, StatOptions};
use crate::content::ClientContent;
use crate::encryption::Sse;
use crate::error::{Error, Result};
use crate::url::ClientUrl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CopyType {
    /// A: file to file
    FileToFile,
    /// B: file into a directory
    FileToDir,
    /// C: directory tree into a directory
    DirToDir,
    /// D: several sources into a directory
    MultiSource,
}

impl CopyType {
    pub fn letter(self) -> char {
        match self {
            CopyType::FileToFile => 'A',
            CopyType::FileToDir => 'B',
            CopyType::DirToDir => 'C',
            CopyType::MultiSource => 'D',
        }
    }
}

/// Classify a copy from the shape of its arguments
///
/// Only a directory source makes a tree copy, and only with `recursive`;
/// a file stays a file copy whatever the flags say.
pub fn classify_copy(
    source_is_dir: bool,
    target_is_dir: bool,
    sources: usize,
    recursive: bool,
) -> Result<CopyType> {
    match sources {
        0 => Err(Error::InvalidArgument("no source given".into())),
        1 if source_is_dir && recursive => Ok(CopyType::DirToDir),
        1 if source_is_dir => Err(Error::SourceIsDir("source".into())),
        1 if target_is_dir => Ok(CopyType::FileToDir),
        1 => Ok(CopyType::FileToFile),
        _ if target_is_dir => Ok(CopyType::MultiSource),
        n => Err(Error::InvalidArgument(format!(
            "{n} sources need a directory target; end the target with '/'"
        ))),
    }
}

/// A target is a directory when it says so, is a bucket, or already is one
pub async fn target_is_dir(client: &dyn ObjectClient, target: &ResolvedUrl) -> Result<bool> {
    let url = &target.url;
    if url.ends_with_separator() || url.is_bucket_root() || url.is_alias_root() {
        return Ok(true);
    }
    match client.stat(url, &StatOptions::default()).await {
        Ok(content) => Ok(content.is_dir()),
        Err(Error::NotFound(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Whether a source is a directory; a missing source is not
pub async fn source_is_dir(
    client: &dyn ObjectClient,
    source: &ResolvedUrl,
    sse: Option<Sse>,
) -> Result<bool> {
    if source.url.is_bucket_root() || source.url.is_alias_root() {
        return Ok(true);
    }
    let options = StatOptions {
        sse,
        version_id: None,
    };
    match client.stat(&source.url, &options).await {
        Ok(content) => Ok(content.is_dir()),
        Err(Error::NotFound(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Stat sources and target as needed and classify
pub async fn guess_copy_type(
    cache: &ClientCache,
    sources: &[ResolvedUrl],
    target: &ResolvedUrl,
    recursive: bool,
) -> Result<CopyType> {
    let target_client = cache.client_for(target).await?;
    let target_dir = target_is_dir(target_client.as_ref(), target).await?;
    let source_dir = match sources {
        [source] => {
            let client = cache.client_for(source).await?;
            source_is_dir(client.as_ref(), source, None).await?
        }
        _ => false,
    };
    let copy_type = match classify_copy(source_dir, target_dir, sources.len(), recursive) {
        Err(Error::SourceIsDir(_)) => return Err(Error::SourceIsDir(sources[0].display_path())),
        other => other?,
    };
    tracing::debug!(copy_type = %copy_type.letter(), target_dir, source_dir, "classified copy");
    Ok(copy_type)
}

/// One planned transfer
#[derive(Debug, Clone, PartialEq)]
pub struct CopyUnit {
    pub source: ResolvedUrl,
    pub target: ResolvedUrl,
    pub size: i64,
    pub modified: Option<Timestamp>,
}

impl CopyUnit {
    /// Session key: the source as the user would name it
    pub fn key(&self) -> String {
        self.source.display_path()
    }
}

/// Plan a single-file copy (types A and B)
pub async fn plan_file(
    client: &dyn ObjectClient,
    source: &ResolvedUrl,
    target: &ResolvedUrl,
    into_dir: bool,
    sse: Option<Sse>,
) -> Result<CopyUnit> {
    let options = StatOptions {
        sse,
        version_id: None,
    };
    let content = match client.stat(&source.url, &options).await {
        Ok(content) => content,
        Err(Error::NotFound(_)) => {
            return Err(Error::InvalidSource(format!("{source} does not exist")));
        }
        Err(err) => return Err(err),
    };
    if content.is_dir() {
        return Err(Error::SourceIsDir(source.display_path()));
    }
    let target = if into_dir {
        target.with_url(target.url.as_dir().join(source.url.base_name()))
    } else {
        target.clone()
    };
    if target == *source {
        return Err(Error::SourceTargetSame(source.display_path()));
    }
    Ok(CopyUnit {
        source: source.clone(),
        target,
        size: content.size,
        modified: content.modified,
    })
}

/// Root against which entries of a tree walk are made relative
///
/// `src/` copies its contents; `src` copies the directory itself, so the
/// root is its parent.
pub fn walk_root(source: &ClientUrl) -> String {
    if source.ends_with_separator() {
        return source.path.clone();
    }
    match source.path.rfind(source.separator) {
        Some(idx) => source.path[..=idx].to_string(),
        None => String::new(),
    }
}

/// Unit for an entry of a tree walk, with its `/`-separated relative path
pub fn plan_entry(
    source: &ResolvedUrl,
    root: &str,
    entry: &ClientContent,
    target: &ResolvedUrl,
) -> Option<(String, CopyUnit)> {
    let relative = entry.url.relative_to(root)?;
    if relative.is_empty() {
        return None;
    }
    let unit = CopyUnit {
        source: source.with_url(entry.url.clone()),
        target: target.with_url(target.url.as_dir().join(&relative)),
        size: entry.size,
        modified: entry.modified,
    };
    Some((relative, unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockObjectClient;
    use crate::content::ClientContent;

    fn remote(path: &str) -> ResolvedUrl {
        ResolvedUrl {
            alias: "m".into(),
            url: ClientUrl::object("http", "localhost:9000", path),
        }
    }

    #[test]
    fn test_classify_dir_source() {
        for target_dir in [false, true] {
            assert_eq!(
                classify_copy(true, target_dir, 1, true).unwrap(),
                CopyType::DirToDir
            );
            assert!(matches!(
                classify_copy(true, target_dir, 1, false),
                Err(Error::SourceIsDir(_))
            ));
        }
    }

    #[test]
    fn test_classify_single_file_ignores_recursive() {
        for recursive in [false, true] {
            assert_eq!(
                classify_copy(false, false, 1, recursive).unwrap(),
                CopyType::FileToFile
            );
            assert_eq!(
                classify_copy(false, true, 1, recursive).unwrap(),
                CopyType::FileToDir
            );
        }
    }

    #[test]
    fn test_classify_many_sources() {
        assert_eq!(classify_copy(false, true, 3, false).unwrap(), CopyType::MultiSource);
        let err = classify_copy(false, false, 2, true).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(classify_copy(false, true, 0, false).is_err());
    }

    #[test]
    fn test_walk_root() {
        assert_eq!(walk_root(&ClientUrl::local("src/")), "src/");
        assert_eq!(walk_root(&ClientUrl::local("data/src")), "data/");
        assert_eq!(walk_root(&ClientUrl::local("src")), "");
        assert_eq!(walk_root(&ClientUrl::object("http", "h", "bucket")), "/");
    }

    #[test]
    fn test_plan_entry_mirrors_relative_path() {
        let source = ResolvedUrl::local("src/");
        let target = remote("bucket/prefix/");
        let entry = ClientContent::file(ClientUrl::local("src/sub/c.txt"), 3);
        let (relative, unit) = plan_entry(&source, "src/", &entry, &target).unwrap();
        assert_eq!(relative, "sub/c.txt");
        assert_eq!(unit.target.display_path(), "m/bucket/prefix/sub/c.txt");
        assert_eq!(unit.key(), "src/sub/c.txt");

        let outside = ClientContent::file(ClientUrl::local("other/x"), 1);
        assert!(plan_entry(&source, "src/", &outside, &target).is_none());
    }

    #[tokio::test]
    async fn test_plan_file_into_directory() {
        let mut client = MockObjectClient::new();
        client
            .expect_stat()
            .returning(|url, _| Ok(ClientContent::file(url.clone(), 7)));
        let unit = plan_file(&client, &remote("b/dir/a.txt"), &remote("b/out"), true, None)
            .await
            .unwrap();
        assert_eq!(unit.target.display_path(), "m/b/out/a.txt");
        assert_eq!(unit.size, 7);
    }

    #[tokio::test]
    async fn test_plan_file_errors() {
        let mut client = MockObjectClient::new();
        client.expect_stat().returning(|url, _| {
            if url.path.ends_with("missing") {
                Err(Error::NotFound(url.path.clone()))
            } else if url.path.ends_with("dir") {
                Ok(ClientContent::dir(url.clone()))
            } else {
                Ok(ClientContent::file(url.clone(), 1))
            }
        });

        let err = plan_file(&client, &remote("b/missing"), &remote("b/t"), false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSource(_)));

        let err = plan_file(&client, &remote("b/dir"), &remote("b/t/"), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceIsDir(_)));

        let err = plan_file(&client, &remote("b/same"), &remote("b/same"), false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceTargetSame(_)));
    }

    #[tokio::test]
    async fn test_target_is_dir_shortcuts() {
        let client = MockObjectClient::new();
        assert!(target_is_dir(&client, &remote("bucket")).await.unwrap());
        assert!(target_is_dir(&client, &remote("bucket/dir/")).await.unwrap());

        let mut client = MockObjectClient::new();
        client
            .expect_stat()
            .returning(|url, _| Err(Error::NotFound(url.path.clone())));
        assert!(!target_is_dir(&client, &remote("bucket/new")).await.unwrap());
    }
}
