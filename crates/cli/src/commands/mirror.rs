//! mirror command - Make a target tree match a source tree
//!
//! Copies entries missing from the target, skips entries of equal size and
//! reports the rest as conflicts unless `--overwrite` is given. With `--remove`
//! target entries absent from the source are deleted.

use clap::Args;
use stow_core::{MirrorOptions, TransferEngine};

use super::transfer::{EncryptArgs, FilterArgs, RunArgs, transfer_options};
use super::{Context, fail};
use crate::exit_code::ExitCode;
use crate::output::Reporter;

/// Arguments for the mirror command
#[derive(Args, Debug)]
pub struct MirrorArgs {
    /// Source directory, bucket or prefix
    pub source: String,

    /// Target directory, bucket or prefix
    pub target: String,

    /// Replace target entries whose size differs from the source
    #[arg(long)]
    pub overwrite: bool,

    /// Remove target entries that do not exist in the source
    #[arg(long)]
    pub remove: bool,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub encrypt: EncryptArgs,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Execute the mirror command
pub async fn execute(args: MirrorArgs, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();
    match run(args, ctx).await {
        Ok(code) => code,
        Err(err) => fail(&formatter, err),
    }
}

async fn run(args: MirrorArgs, ctx: &Context) -> anyhow::Result<ExitCode> {
    let config = ctx.config_manager()?;
    let cache = ctx.client_cache(&config)?;
    let paths = vec![args.source.clone(), args.target.clone()];
    let options = transfer_options(
        true,
        &args.filter,
        &args.encrypt,
        &args.run,
        &paths,
        &config,
        &cache,
    )?;
    let mirror = MirrorOptions {
        overwrite: args.overwrite,
        remove: args.remove,
    };

    let reporter = Reporter::new(ctx.output, "mirroring", options.dry_run);
    let engine = TransferEngine::new(cache, ctx.cancel.clone());
    let summary = engine
        .mirror(&args.source, &args.target, options, mirror, |event| {
            reporter.event(event)
        })
        .await?;
    reporter.finish(&summary);
    Ok(ExitCode::from_summary(&summary))
}
