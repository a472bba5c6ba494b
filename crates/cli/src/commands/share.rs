//! share commands - Presigned URLs for objects

use clap::{Args, Subcommand};
use jiff::Timestamp;
use stow_core::{Duration, SharedUrl, parse_duration, share_download, share_expiry};

use super::{Context, fail};
use crate::exit_code::ExitCode;
use crate::output::Formatter;

#[derive(Subcommand, Debug)]
pub enum ShareCommands {
    /// Generate download URLs for an object, or every object under a prefix
    Download(DownloadArgs),
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Object or prefix to share (alias/bucket/key)
    pub target: String,

    /// How long the URL stays valid, 1s to 7d
    #[arg(value_name = "EXPIRY", value_parser = parse_duration)]
    pub expiry: Option<Duration>,

    /// Share every object under a bucket or prefix
    #[arg(short, long)]
    pub recursive: bool,
}

/// Execute a share subcommand
pub async fn execute(cmd: ShareCommands, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();
    let result = match cmd {
        ShareCommands::Download(args) => download(args, ctx, &formatter).await,
    };
    match result {
        Ok(code) => code,
        Err(err) => fail(&formatter, err),
    }
}

fn describe(shared: &SharedUrl) -> String {
    format!(
        "{}\n  expires {} ({}s)\n  {}",
        shared.object, shared.expires_at, shared.expiry, shared.url
    )
}

async fn download(args: DownloadArgs, ctx: &Context, formatter: &Formatter) -> anyhow::Result<ExitCode> {
    let expiry = share_expiry(args.expiry)?;
    let config = ctx.config_manager()?;
    let cache = ctx.client_cache(&config)?;
    let count = share_download(&cache, &args.target, args.recursive, expiry, Timestamp::now(), |shared| {
        if formatter.is_json() {
            formatter.json_line(shared);
        } else {
            formatter.println(&describe(shared));
        }
    })
    .await?;
    tracing::debug!(count, "share complete");
    Ok(ExitCode::Success)
}
