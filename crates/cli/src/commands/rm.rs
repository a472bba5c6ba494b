//! rm command - Remove files and objects
//!
//! Removals are queued per alias and sent in batches. Directories of local
//! trees are removed after their contents.

use clap::Args;
use jiff::Timestamp;
use stow_core::remove::{RemoveRequest, remove_targets};
use stow_core::{AgeFilter, Duration, RemoveOptions, parse_duration};

use super::{Context, fail};
use crate::exit_code::ExitCode;
use crate::output::Reporter;

/// Remove files, objects and prefixes
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Path(s) to remove (local path or alias/bucket/key)
    #[arg(required = true, value_name = "TARGET")]
    pub targets: Vec<String>,

    /// Remove directories and prefixes with everything under them
    #[arg(short, long)]
    pub recursive: bool,

    /// Allow recursive removal and ignore missing targets. Without
    /// --recursive a directory target loses only the files directly inside it
    #[arg(long)]
    pub force: bool,

    /// Allow removing every bucket's contents under an alias
    #[arg(long)]
    pub dangerous: bool,

    /// Treat each target as a raw key prefix
    #[arg(long)]
    pub prefix: bool,

    /// Only show what would be removed
    #[arg(long)]
    pub dry_run: bool,

    /// Remove every version of each object, not just the latest
    #[arg(long)]
    pub versions: bool,

    /// Bypass governance-mode retention
    #[arg(long)]
    pub bypass: bool,

    /// Only remove entries at least this old
    #[arg(long, visible_alias = "older", value_name = "DURATION", value_parser = parse_duration)]
    pub older_than: Option<Duration>,

    /// Only remove entries younger than this
    #[arg(long, visible_alias = "newer", value_name = "DURATION", value_parser = parse_duration)]
    pub newer_than: Option<Duration>,
}

impl RmArgs {
    fn request(&self) -> RemoveRequest {
        RemoveRequest {
            recursive: self.recursive,
            force: self.force,
            dangerous: self.dangerous,
            prefix: self.prefix,
            dry_run: self.dry_run,
            options: RemoveOptions {
                include_versions: self.versions,
                bypass_governance: self.bypass,
            },
            age: AgeFilter::new(self.older_than, self.newer_than),
        }
    }
}

/// Execute the rm command
pub async fn execute(args: RmArgs, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();
    match run(args, ctx).await {
        Ok(code) => code,
        Err(err) => fail(&formatter, err),
    }
}

async fn run(args: RmArgs, ctx: &Context) -> anyhow::Result<ExitCode> {
    let config = ctx.config_manager()?;
    let cache = ctx.client_cache(&config)?;
    let reporter = Reporter::new(ctx.output, "removing", args.dry_run);
    let summary = remove_targets(
        cache,
        &args.targets,
        args.request(),
        Timestamp::now(),
        ctx.cancel.clone(),
        |event| reporter.event(event),
    )
    .await?;
    reporter.finish(&summary);
    Ok(ExitCode::from_summary(&summary))
}
