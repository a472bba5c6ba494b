//! snapshot commands - Record and inspect bucket listings
//!
//! A snapshot is a compressed point-in-time listing of one bucket or of every
//! bucket under an alias, stored as `<config dir>/snapshots/NAME.snap`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Subcommand};
use serde::Serialize;
use stow_core::snapshot::{
    SNAPSHOT_EXTENSION, SnapshotBucket, SnapshotEntry, SnapshotReader, SnapshotTarget,
    SnapshotWriter, capture,
};
use stow_core::{ConfigManager, Error};

use super::{Context, fail};
use crate::exit_code::ExitCode;
use crate::output::Formatter;

#[derive(Subcommand, Debug)]
pub enum SnapshotCommands {
    /// Record the listing of a bucket, or of every bucket of an alias
    Create(CreateArgs),

    /// List stored snapshots
    List,

    /// Show the buckets of a snapshot, or the entries of one bucket
    Show(ShowArgs),

    /// Delete a stored snapshot
    Remove(RemoveArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Snapshot name
    pub name: String,

    /// alias or alias/bucket to record
    pub path: String,

    /// Record every object version
    #[arg(long)]
    pub versions: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Snapshot name
    pub name: String,

    /// Bucket whose entries to show
    pub bucket: Option<String>,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Snapshot name
    pub name: String,
}

#[derive(Debug, Serialize)]
struct SnapshotInfo {
    name: String,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<String>,
}

#[derive(Debug, Serialize)]
struct BucketInfo {
    name: String,
    versions: bool,
    entries: u64,
    bytes: u64,
}

#[derive(Debug, Serialize)]
struct ShowOutput {
    target: SnapshotTarget,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    buckets: Vec<BucketInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bucket: Option<SnapshotBucket>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    entries: Vec<SnapshotEntry>,
}

/// Execute a snapshot subcommand
pub async fn execute(cmd: SnapshotCommands, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();
    let result = match cmd {
        SnapshotCommands::Create(args) => create(args, ctx, &formatter).await,
        SnapshotCommands::List => list(ctx, &formatter),
        SnapshotCommands::Show(args) => show(args, ctx, &formatter),
        SnapshotCommands::Remove(args) => remove(args, ctx, &formatter),
    };
    match result {
        Ok(code) => code,
        Err(err) => fail(&formatter, err),
    }
}

/// Path of a named snapshot; names are plain file stems
fn snapshot_path(config: &ConfigManager, name: &str) -> stow_core::Result<PathBuf> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.starts_with('.');
    if !valid {
        return Err(Error::InvalidArgument(format!(
            "invalid snapshot name '{name}'"
        )));
    }
    Ok(config
        .snapshot_dir()
        .join(format!("{name}.{SNAPSHOT_EXTENSION}")))
}

fn open(path: &Path, name: &str) -> anyhow::Result<SnapshotReader<BufReader<File>>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!("snapshot {name}")).into());
        }
        Err(err) => return Err(Error::Io(err).into()),
    };
    let reader = SnapshotReader::new(BufReader::new(file))
        .with_context(|| format!("reading snapshot {name}"))?;
    Ok(reader)
}

async fn create(args: CreateArgs, ctx: &Context, formatter: &Formatter) -> anyhow::Result<ExitCode> {
    let config = ctx.config_manager()?;
    let path = snapshot_path(&config, &args.name)?;
    let cache = ctx.client_cache(&config)?;
    let url = cache.resolve(&args.path)?;
    if url.is_local() {
        return Err(Error::InvalidArgument(format!(
            "{} is not an alias path",
            args.path
        ))
        .into());
    }
    let host = cache.resolver().host_config(&url.alias)?.clone();
    let client = cache.client_for(&url).await?;

    let dir = config.snapshot_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating {}", dir.display()))?;
    let partial = path.with_extension(format!("{SNAPSHOT_EXTENSION}.partial"));
    let file = File::create(&partial).with_context(|| format!("creating {}", partial.display()))?;

    let written = async {
        let mut writer = SnapshotWriter::new(BufWriter::new(file))?;
        let summary = capture(client.as_ref(), &url, &host, args.versions, &mut writer).await?;
        let mut out = writer.into_inner()?;
        out.flush()?;
        stow_core::Result::Ok(summary)
    }
    .await;
    let summary = match written {
        Ok(summary) => summary,
        Err(err) => {
            // never leave a half-written snapshot behind
            let _ = std::fs::remove_file(&partial);
            return Err(anyhow::Error::new(err).context(format!("capturing {}", args.path)));
        }
    };
    std::fs::rename(&partial, &path).with_context(|| format!("saving {}", path.display()))?;

    if formatter.is_json() {
        formatter.json(&serde_json::json!({
            "name": args.name,
            "path": path.display().to_string(),
            "buckets": summary.buckets,
            "entries": summary.entries,
            "bytes": summary.bytes,
        }));
    } else {
        formatter.success(&format!(
            "Snapshot '{}' recorded: {} bucket(s), {} object(s), {}",
            args.name,
            summary.buckets,
            summary.entries,
            formatter.size(summary.bytes)
        ));
    }
    Ok(ExitCode::Success)
}

fn list(ctx: &Context, formatter: &Formatter) -> anyhow::Result<ExitCode> {
    let config = ctx.config_manager()?;
    let dir = config.snapshot_dir();
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries.collect::<std::io::Result<Vec<_>>>()?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(anyhow::Error::new(err).context(format!("reading {}", dir.display()))),
    };

    let mut snapshots = Vec::new();
    for entry in entries {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        // an unreadable snapshot is still listed so it can be removed
        let target = open(&path, &name)
            .ok()
            .and_then(|mut reader| reader.read_target().ok().flatten());
        snapshots.push(SnapshotInfo {
            name,
            size,
            alias: target.as_ref().map(|t| t.alias.clone()),
            endpoint: target.as_ref().map(|t| t.endpoint.clone()),
            created: target.and_then(|t| t.created).map(|c| c.to_string()),
        });
    }
    snapshots.sort_by(|a, b| a.name.cmp(&b.name));

    if formatter.is_json() {
        formatter.json(&snapshots);
    } else if snapshots.is_empty() {
        formatter.println("No snapshots recorded.");
    } else {
        let rows = snapshots
            .iter()
            .map(|s| {
                vec![
                    s.name.clone(),
                    s.alias.clone().unwrap_or_else(|| "?".into()),
                    s.created.clone().unwrap_or_default(),
                    formatter.size(s.size),
                ]
            })
            .collect();
        formatter.println(&formatter.table(&["Name", "Alias", "Created", "Size"], rows).to_string());
    }
    Ok(ExitCode::Success)
}

fn show(args: ShowArgs, ctx: &Context, formatter: &Formatter) -> anyhow::Result<ExitCode> {
    let config = ctx.config_manager()?;
    let path = snapshot_path(&config, &args.name)?;
    let mut reader = open(&path, &args.name)?;
    let target = reader
        .read_target()?
        .ok_or_else(|| Error::CorruptSnapshot("snapshot has no target".into()))?;

    let mut output = ShowOutput {
        target,
        buckets: Vec::new(),
        bucket: None,
        entries: Vec::new(),
    };
    match &args.bucket {
        Some(name) => {
            let bucket = reader
                .find_bucket(name)?
                .ok_or_else(|| Error::NotFound(format!("bucket {name} in snapshot {}", args.name)))?;
            while let Some(block) = reader.read_entries()? {
                output.entries.extend(block);
            }
            output.bucket = Some(bucket);
        }
        None => {
            while let Some(bucket) = reader.read_bucket()? {
                let mut info = BucketInfo {
                    name: bucket.name,
                    versions: bucket.versions,
                    entries: 0,
                    bytes: 0,
                };
                while let Some(block) = reader.read_entries()? {
                    info.entries += block.len() as u64;
                    info.bytes += block.iter().map(|e| e.size.max(0) as u64).sum::<u64>();
                }
                output.buckets.push(info);
            }
        }
    }

    if formatter.is_json() {
        formatter.json(&output);
        return Ok(ExitCode::Success);
    }

    formatter.println(&format!(
        "Snapshot '{}' of {} ({})",
        args.name, output.target.alias, output.target.endpoint
    ));
    let table = if output.bucket.is_some() {
        let rows = output
            .entries
            .iter()
            .map(|e| {
                vec![
                    e.key.clone(),
                    if e.is_delete_marker {
                        "delete marker".to_string()
                    } else {
                        formatter.size(e.size.max(0) as u64)
                    },
                    e.modified.map(|m| m.to_string()).unwrap_or_default(),
                    e.version_id.clone().unwrap_or_default(),
                ]
            })
            .collect();
        formatter.table(&["Key", "Size", "Modified", "Version"], rows)
    } else {
        let rows = output
            .buckets
            .iter()
            .map(|b| {
                vec![
                    b.name.clone(),
                    b.entries.to_string(),
                    formatter.size(b.bytes),
                    if b.versions { "yes" } else { "no" }.to_string(),
                ]
            })
            .collect();
        formatter.table(&["Bucket", "Objects", "Size", "Versions"], rows)
    };
    formatter.println(&table.to_string());
    Ok(ExitCode::Success)
}

fn remove(args: RemoveArgs, ctx: &Context, formatter: &Formatter) -> anyhow::Result<ExitCode> {
    let config = ctx.config_manager()?;
    let path = snapshot_path(&config, &args.name)?;
    match std::fs::remove_file(&path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!("snapshot {}", args.name)).into());
        }
        Err(err) => return Err(anyhow::Error::new(err).context(format!("removing {}", path.display()))),
    }

    if formatter.is_json() {
        formatter.json(&serde_json::json!({ "name": args.name, "removed": true }));
    } else {
        formatter.success(&format!("Snapshot '{}' removed.", args.name));
    }
    Ok(ExitCode::Success)
}
