//! cp command - Copy files and objects
//!
//! Copies between local paths and aliases in any direction. Copies within one
//! alias are done server-side.

use clap::Args;
use stow_core::{Error, TransferMode};

use super::transfer::{self, EncryptArgs, FilterArgs, RunArgs, TransferRequest};
use super::{Context, fail};
use crate::exit_code::ExitCode;

/// Arguments shared by `cp` and `mv`
#[derive(Args, Debug)]
pub struct CpArgs {
    /// Source path(s) followed by the target
    #[arg(required = true, num_args = 2.., value_name = "PATH")]
    pub paths: Vec<String>,

    /// Copy directories and prefixes recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Record progress so an interrupted run can be resumed
    #[arg(short = 'c', long = "continue")]
    pub resume: bool,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub encrypt: EncryptArgs,

    #[command(flatten)]
    pub run: RunArgs,
}

impl CpArgs {
    fn into_request(self) -> (TransferRequest, bool) {
        let request = TransferRequest {
            paths: self.paths,
            recursive: self.recursive,
            filter: self.filter,
            encrypt: self.encrypt,
            run: self.run,
        };
        (request, self.resume)
    }
}

/// Execute the cp command
pub async fn execute(args: CpArgs, ctx: &Context) -> ExitCode {
    run(TransferMode::Copy, "cp", args, ctx).await
}

/// Shared by cp and mv
pub(super) async fn run(mode: TransferMode, command: &str, args: CpArgs, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();
    match run_inner(mode, command, args, ctx).await {
        Ok(code) => code,
        Err(err) => fail(&formatter, err),
    }
}

async fn run_inner(
    mode: TransferMode,
    command: &str,
    args: CpArgs,
    ctx: &Context,
) -> anyhow::Result<ExitCode> {
    let (mut request, resume) = args.into_request();
    if resume && request.run.dry_run {
        return Err(Error::InvalidArgument("--continue cannot be combined with --dry-run".into()).into());
    }

    let config = ctx.config_manager()?;
    let session = if resume {
        let session = transfer::open_session(&config, command, &request)?;
        // a resumed session runs with the flags it was started with
        request = TransferRequest::from_header(session.header())?;
        Some(session)
    } else {
        None
    };
    transfer::run_request(ctx, mode, &config, request, session).await
}

#[cfg(test)]
mod tests {
    use super::super::Cli;
    use super::super::Commands;
    use clap::Parser;

    fn parse(args: &[&str]) -> super::CpArgs {
        match Cli::try_parse_from(args).unwrap().command {
            Commands::Cp(args) | Commands::Mv(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cp_flags() {
        let args = parse(&[
            "stow",
            "cp",
            "-r",
            "--older-than",
            "7d",
            "--exclude",
            "*.log",
            "--limit-upload",
            "1MiB",
            "--continue",
            "src/",
            "s3/bucket/",
        ]);
        assert!(args.recursive);
        assert!(args.resume);
        assert_eq!(args.paths, vec!["src/", "s3/bucket/"]);
        assert_eq!(args.filter.older_than.unwrap().to_string(), "7d");
        assert_eq!(args.filter.exclude, vec!["*.log"]);
        assert_eq!(args.run.limit_upload, Some(1 << 20));
    }

    #[test]
    fn test_cp_older_alias() {
        let args = parse(&["stow", "mv", "--older", "1h", "a", "b"]);
        assert_eq!(args.filter.older_than.unwrap().to_string(), "1h");
    }

    #[test]
    fn test_cp_needs_source_and_target() {
        assert!(Cli::try_parse_from(["stow", "cp", "only-one"]).is_err());
    }

    #[test]
    fn test_cp_rejects_bad_duration() {
        assert!(Cli::try_parse_from(["stow", "cp", "--older-than", "7x", "a", "b"]).is_err());
    }
}
