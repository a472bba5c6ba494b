//! Flags shared by cp, mv and mirror, and the run loop behind them

use std::sync::Arc;

use anyhow::Context as _;
use clap::Args;
use jiff::Timestamp;
use stow_core::transfer::default_parallelism;
use stow_core::{
    AgeFilter, ClientCache, ConfigManager, Duration, EncryptFlags, EncryptionKeys, EntryFilter,
    Error, ExcludeFilter, Session, SessionHeader, SessionStore, TransferEngine, TransferMode,
    TransferOptions, parse_duration, parse_size,
};

use super::Context;
use crate::exit_code::ExitCode;
use crate::output::Reporter;

/// `--older-than` / `--newer-than` / `--exclude`
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct FilterArgs {
    /// Only act on entries at least this old (e.g. 7d, 1h30m)
    #[arg(long, visible_alias = "older", value_name = "DURATION", value_parser = parse_duration)]
    pub older_than: Option<Duration>,

    /// Only act on entries younger than this
    #[arg(long, visible_alias = "newer", value_name = "DURATION", value_parser = parse_duration)]
    pub newer_than: Option<Duration>,

    /// Skip entries whose relative path or name matches GLOB (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,
}

impl FilterArgs {
    pub fn build(&self) -> stow_core::Result<EntryFilter> {
        Ok(EntryFilter {
            age: AgeFilter::new(self.older_than, self.newer_than),
            exclude: ExcludeFilter::new(&self.exclude)?,
        })
    }
}

/// Server-side encryption flags
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct EncryptArgs {
    /// SSE-C key for a prefix: alias/prefix=KEY (comma-separated list allowed)
    #[arg(long, value_name = "PREFIX=KEY")]
    pub encrypt_key: Vec<String>,

    /// SSE-KMS key id for a prefix: alias/prefix=KEYID
    #[arg(long, value_name = "PREFIX=KEYID")]
    pub encrypt_kms: Vec<String>,

    /// Server-managed encryption for a prefix: alias/prefix
    #[arg(long, value_name = "PREFIX")]
    pub encrypt: Vec<String>,
}

impl EncryptArgs {
    /// Validate every key against the command's path arguments
    pub fn build(&self, paths: &[String], cache: &ClientCache) -> stow_core::Result<EncryptionKeys> {
        let flags = EncryptFlags {
            customer: self.encrypt_key.clone(),
            kms: self.encrypt_kms.clone(),
            s3: self.encrypt.clone(),
        }
        .with_env_fallback();
        EncryptionKeys::parse(&flags, paths, cache.resolver())
    }
}

/// Execution tuning shared by transfer commands
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct RunArgs {
    /// Print what would be transferred without doing it
    #[arg(long)]
    pub dry_run: bool,

    /// Number of concurrent transfers (default: number of CPUs)
    #[arg(long, value_name = "N")]
    pub parallel: Option<usize>,

    /// Cap upload bandwidth, e.g. 10MiB (per second)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub limit_upload: Option<u64>,

    /// Cap download bandwidth, e.g. 10MiB (per second)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub limit_download: Option<u64>,

    /// Storage class for uploaded objects
    #[arg(long, value_name = "CLASS")]
    pub storage_class: Option<String>,
}

impl RunArgs {
    /// Worker count: flag, then the configured default, then CPU count
    pub fn parallelism(&self, config: &ConfigManager) -> usize {
        let configured = config
            .load()
            .map(|c| c.defaults.parallel)
            .unwrap_or_default();
        match self.parallel {
            Some(n) if n > 0 => n,
            _ if configured > 0 => configured,
            _ => default_parallelism(),
        }
    }
}

/// Assemble engine options from parsed flags
pub fn transfer_options(
    recursive: bool,
    filter: &FilterArgs,
    encrypt: &EncryptArgs,
    run: &RunArgs,
    paths: &[String],
    config: &ConfigManager,
    cache: &Arc<ClientCache>,
) -> anyhow::Result<TransferOptions> {
    let filter = filter.build().context("invalid --exclude pattern")?;
    let encryption = encrypt
        .build(paths, cache)
        .context("invalid encryption flags")?;
    Ok(TransferOptions {
        recursive,
        filter,
        encryption: Arc::new(encryption),
        parallel: run.parallelism(config),
        dry_run: run.dry_run,
        limit_upload: run.limit_upload,
        limit_download: run.limit_download,
        storage_class: run.storage_class.clone(),
        now: Timestamp::now(),
    })
}

const FLAG_RECURSIVE: &str = "recursive";
const FLAG_OLDER: &str = "older-than";
const FLAG_NEWER: &str = "newer-than";
const FLAG_EXCLUDE: &str = "exclude";
const FLAG_ENCRYPT_KEY: &str = "encrypt-key";
const FLAG_ENCRYPT_KMS: &str = "encrypt-kms";
const FLAG_ENCRYPT: &str = "encrypt";
const FLAG_PARALLEL: &str = "parallel";
const FLAG_LIMIT_UPLOAD: &str = "limit-upload";
const FLAG_LIMIT_DOWNLOAD: &str = "limit-download";
const FLAG_STORAGE_CLASS: &str = "storage-class";

/// Everything a cp or mv invocation needs to run again
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferRequest {
    pub paths: Vec<String>,
    pub recursive: bool,
    pub filter: FilterArgs,
    pub encrypt: EncryptArgs,
    pub run: RunArgs,
}

impl TransferRequest {
    /// Session header recording this request
    pub fn to_header(&self, command: &str, working_dir: &str) -> SessionHeader {
        let mut header = SessionHeader::new(command, self.paths.clone(), working_dir);
        header.bool_flags.insert(FLAG_RECURSIVE.into(), self.recursive);

        let mut put = |name: &str, values: Vec<String>| {
            if !values.is_empty() {
                header.string_flags.insert(name.to_string(), values);
            }
        };
        put(FLAG_OLDER, self.filter.older_than.iter().map(ToString::to_string).collect());
        put(FLAG_NEWER, self.filter.newer_than.iter().map(ToString::to_string).collect());
        put(FLAG_EXCLUDE, self.filter.exclude.clone());
        put(FLAG_ENCRYPT_KEY, self.encrypt.encrypt_key.clone());
        put(FLAG_ENCRYPT_KMS, self.encrypt.encrypt_kms.clone());
        put(FLAG_ENCRYPT, self.encrypt.encrypt.clone());
        put(FLAG_PARALLEL, self.run.parallel.iter().map(ToString::to_string).collect());
        put(FLAG_LIMIT_UPLOAD, self.run.limit_upload.iter().map(ToString::to_string).collect());
        put(FLAG_LIMIT_DOWNLOAD, self.run.limit_download.iter().map(ToString::to_string).collect());
        put(FLAG_STORAGE_CLASS, self.run.storage_class.iter().cloned().collect());
        header
    }

    /// Rebuild the request recorded in a session header
    pub fn from_header(header: &SessionHeader) -> stow_core::Result<Self> {
        let number = |name: &str| -> stow_core::Result<Option<u64>> {
            header
                .value(name)
                .map(|v| {
                    v.parse::<u64>().map_err(|e| Error::CorruptSession {
                        id: String::new(),
                        reason: format!("{name}={v}: {e}"),
                    })
                })
                .transpose()
        };

        Ok(Self {
            paths: header.args.clone(),
            recursive: header.flag(FLAG_RECURSIVE),
            filter: FilterArgs {
                older_than: header.value(FLAG_OLDER).map(parse_duration).transpose()?,
                newer_than: header.value(FLAG_NEWER).map(parse_duration).transpose()?,
                exclude: header.values(FLAG_EXCLUDE).to_vec(),
            },
            encrypt: EncryptArgs {
                encrypt_key: header.values(FLAG_ENCRYPT_KEY).to_vec(),
                encrypt_kms: header.values(FLAG_ENCRYPT_KMS).to_vec(),
                encrypt: header.values(FLAG_ENCRYPT).to_vec(),
            },
            run: RunArgs {
                dry_run: false,
                parallel: number(FLAG_PARALLEL)?.map(|n| n as usize),
                limit_upload: number(FLAG_LIMIT_UPLOAD)?,
                limit_download: number(FLAG_LIMIT_DOWNLOAD)?,
                storage_class: header.value(FLAG_STORAGE_CLASS).map(str::to_string),
            },
        })
    }
}

/// Open the session for a `--continue` run, resuming one left by an earlier attempt
pub fn open_session(
    config: &ConfigManager,
    command: &str,
    request: &TransferRequest,
) -> anyhow::Result<Session> {
    let store = SessionStore::from_config(config);
    let working_dir = std::env::current_dir()
        .context("cannot determine the working directory")?
        .display()
        .to_string();
    let header = request.to_header(command, &working_dir);
    let id = header.session_id();

    if store.exists(&id) {
        let session = store
            .load(&id)
            .with_context(|| format!("cannot resume session {id}; remove it with `stow session clear {id}`"))?;
        tracing::info!(id = %id, done = session.completed_count(), "resuming session");
        return Ok(session);
    }
    let session = store.create(&id, header)?;
    Ok(session)
}

/// Run a cp or mv request to completion
pub async fn run_request(
    ctx: &Context,
    mode: TransferMode,
    config: &ConfigManager,
    request: TransferRequest,
    session: Option<Session>,
) -> anyhow::Result<ExitCode> {
    let cache = ctx.client_cache(config)?;
    let options = transfer_options(
        request.recursive,
        &request.filter,
        &request.encrypt,
        &request.run,
        &request.paths,
        config,
        &cache,
    )?;
    let Some((target, sources)) = request.paths.split_last() else {
        return Err(Error::InvalidArgument("no target given".into()).into());
    };

    let session_id = session.as_ref().map(|s| s.id().to_string());
    let label = match mode {
        TransferMode::Copy => "copying",
        TransferMode::Move => "moving",
    };
    let reporter = Reporter::new(ctx.output, label, options.dry_run);
    let engine = TransferEngine::new(cache, ctx.cancel.clone());
    let summary = engine
        .copy(mode, sources, target, options, session, |event| reporter.event(event))
        .await?;
    reporter.finish(&summary);

    if let Some(id) = session_id {
        if !summary.is_success() {
            reporter.formatter().warning(&format!(
                "session {id} kept; resume with `stow session resume {id}`"
            ));
        }
    }
    Ok(ExitCode::from_summary(&summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TransferRequest {
        TransferRequest {
            paths: vec!["/data/src/".into(), "s3/bucket/backup/".into()],
            recursive: true,
            filter: FilterArgs {
                older_than: Some(parse_duration("7d").unwrap()),
                newer_than: None,
                exclude: vec!["*.tmp".into(), ".git/*".into()],
            },
            encrypt: EncryptArgs {
                encrypt: vec!["s3/bucket".into()],
                ..Default::default()
            },
            run: RunArgs {
                dry_run: false,
                parallel: Some(8),
                limit_upload: Some(1 << 20),
                limit_download: None,
                storage_class: Some("STANDARD_IA".into()),
            },
        }
    }

    #[test]
    fn test_request_survives_session_header() {
        let original = request();
        let header = original.to_header("cp", "/home/user");
        assert_eq!(header.command, "cp");
        assert_eq!(header.working_dir, "/home/user");
        assert_eq!(header.value(FLAG_OLDER), Some("7d"));
        assert!(!header.string_flags.contains_key(FLAG_NEWER));

        let restored = TransferRequest::from_header(&header).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_dry_run_is_not_recorded() {
        let mut original = request();
        original.run.dry_run = true;
        let restored = TransferRequest::from_header(&original.to_header("mv", "/")).unwrap();
        assert!(!restored.run.dry_run);
    }

    #[test]
    fn test_session_id_follows_flags() {
        let original = request();
        let id = original.to_header("cp", "/home/user").session_id();

        let mut flat = original.clone();
        flat.recursive = false;
        assert_ne!(id, flat.to_header("cp", "/home/user").session_id());

        let mut slower = original.clone();
        slower.run.limit_upload = Some(1 << 10);
        assert_ne!(id, slower.to_header("cp", "/home/user").session_id());

        let mut rehearsal = original.clone();
        rehearsal.run.dry_run = true;
        assert_eq!(id, rehearsal.to_header("cp", "/home/user").session_id());
    }

    #[test]
    fn test_bad_number_in_header_is_corrupt() {
        let mut header = request().to_header("cp", "/");
        header
            .string_flags
            .insert(FLAG_PARALLEL.into(), vec!["many".into()]);
        let err = TransferRequest::from_header(&header).unwrap_err();
        assert!(matches!(err, stow_core::Error::CorruptSession { .. }));
    }

    #[test]
    fn test_filter_args_build() {
        let filter = FilterArgs {
            exclude: vec!["[".into()],
            ..Default::default()
        };
        assert!(filter.build().is_err());
        assert!(FilterArgs::default().build().is_ok());
    }
}
