//! diff command - List differences between two files or trees
//!
//! Entries are compared by name, type and size. Contents are not read.

use clap::Args;
use stow_core::{DiffEntry, DiffKind};

use super::{Context, fail};
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Arguments for the diff command
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// First file, directory, bucket or prefix
    pub first: String,

    /// Second file, directory, bucket or prefix
    pub second: String,
}

/// Execute the diff command
pub async fn execute(args: DiffArgs, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();
    match run(args, ctx, &formatter).await {
        Ok(code) => code,
        Err(err) => fail(&formatter, err),
    }
}

fn describe(entry: &DiffEntry) -> String {
    match entry.kind {
        DiffKind::OnlyInFirst => format!("< {}", entry.first),
        DiffKind::OnlyInSecond => format!("> {}", entry.second),
        DiffKind::Type => format!("! {} and {} differ in type", entry.first, entry.second),
        DiffKind::Size => format!("! {} and {} differ in size", entry.first, entry.second),
    }
}

async fn run(args: DiffArgs, ctx: &Context, formatter: &Formatter) -> anyhow::Result<ExitCode> {
    let config = ctx.config_manager()?;
    let cache = ctx.client_cache(&config)?;
    let found = stow_core::transfer::diff(&cache, &args.first, &args.second, |entry| {
        if formatter.is_json() {
            formatter.json_line(entry);
        } else {
            formatter.println(&describe(entry));
        }
    })
    .await?;
    tracing::debug!(found, "comparison finished");
    Ok(ExitCode::Success)
}
