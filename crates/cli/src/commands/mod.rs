//! CLI command definitions and execution
//!
//! Each subcommand lives in its own module with an `Args` struct and an
//! `execute` function returning an [`ExitCode`].

use std::sync::Arc;

use clap::{Parser, Subcommand};
use stow_core::{AliasResolver, ClientCache, ConfigManager};
use stow_s3::S3ClientFactory;
use tokio_util::sync::CancellationToken;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

mod alias;
mod completions;
mod cp;
mod diff;
mod mirror;
mod mv;
mod rm;
mod session;
mod share;
mod snapshot;
mod transfer;

/// stow - copy, move, mirror and remove objects on S3-compatible storage
///
/// Paths are local filesystem paths or `alias/bucket/key` references to a
/// configured alias.
#[derive(Parser, Debug)]
#[command(name = "stow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Disable progress display
    #[arg(long, global = true, default_value = "false")]
    pub no_progress: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage storage service aliases
    #[command(subcommand)]
    Alias(alias::AliasCommands),

    /// Copy files and objects
    Cp(cp::CpArgs),

    /// Move files and objects (copy, then remove the source)
    Mv(cp::CpArgs),

    /// Make a target directory or prefix match a source
    Mirror(mirror::MirrorArgs),

    /// Remove files, objects and buckets' contents
    Rm(rm::RmArgs),

    /// List differences between two files or trees
    Diff(diff::DiffArgs),

    /// Generate presigned URLs for objects
    #[command(subcommand)]
    Share(share::ShareCommands),

    /// Record and inspect bucket listings
    #[command(subcommand)]
    Snapshot(snapshot::SnapshotCommands),

    /// Manage resumable cp/mv sessions
    #[command(subcommand)]
    Session(session::SessionCommands),

    /// Generate shell completion scripts
    Completions(completions::CompletionsArgs),
}

/// State shared by every command of one invocation
#[derive(Debug, Clone)]
pub struct Context {
    pub output: OutputConfig,
    pub cancel: CancellationToken,
}

impl Context {
    pub fn formatter(&self) -> Formatter {
        Formatter::new(self.output)
    }

    pub fn config_manager(&self) -> stow_core::Result<ConfigManager> {
        ConfigManager::new()
    }

    /// Client cache over the configured aliases
    pub fn client_cache(&self, config: &ConfigManager) -> stow_core::Result<Arc<ClientCache>> {
        let resolver = AliasResolver::from_config(config)?;
        Ok(Arc::new(ClientCache::new(resolver, Arc::new(S3ClientFactory))))
    }
}

/// Print an error with its context chain and pick the exit code
pub(crate) fn fail(formatter: &Formatter, err: anyhow::Error) -> ExitCode {
    formatter.error(&format!("{err:#}"));
    match err.downcast_ref::<stow_core::Error>() {
        Some(err) => ExitCode::from(err),
        None => ExitCode::GeneralError,
    }
}

/// Execute the CLI command and return an exit code
pub async fn execute(cli: Cli, cancel: CancellationToken) -> ExitCode {
    let ctx = Context {
        output: OutputConfig {
            json: cli.json,
            no_color: cli.no_color,
            no_progress: cli.no_progress,
            quiet: cli.quiet,
        },
        cancel,
    };

    match cli.command {
        Commands::Alias(cmd) => alias::execute(cmd, &ctx).await,
        Commands::Cp(args) => cp::execute(args, &ctx).await,
        Commands::Mv(args) => mv::execute(args, &ctx).await,
        Commands::Mirror(args) => mirror::execute(args, &ctx).await,
        Commands::Rm(args) => rm::execute(args, &ctx).await,
        Commands::Diff(args) => diff::execute(args, &ctx).await,
        Commands::Share(cmd) => share::execute(cmd, &ctx).await,
        Commands::Snapshot(cmd) => snapshot::execute(cmd, &ctx).await,
        Commands::Session(cmd) => session::execute(cmd, &ctx).await,
        Commands::Completions(args) => completions::execute(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["stow", "rm", "--json", "-q", "a/b/c"]).unwrap();
        assert!(cli.json);
        assert!(cli.quiet);
        assert!(matches!(cli.command, Commands::Rm(_)));
    }

    #[test]
    fn test_fail_maps_core_errors() {
        let formatter = Formatter::new(OutputConfig {
            quiet: true,
            no_color: true,
            ..Default::default()
        });
        let err = anyhow::Error::new(stow_core::Error::AliasNotFound("x".into()))
            .context("resolving x/bucket");
        assert_eq!(fail(&formatter, err), ExitCode::NotFound);
        assert_eq!(
            fail(&formatter, anyhow::anyhow!("plain failure")),
            ExitCode::GeneralError
        );
    }
}
