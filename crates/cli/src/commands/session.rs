//! session commands - Manage resumable cp/mv sessions
//!
//! Sessions are created by `cp --continue` / `mv --continue` and deleted when
//! the run completes without failures.

use anyhow::Context as _;
use clap::{Args, Subcommand};
use serde::Serialize;
use stow_core::{Error, SessionStore, TransferMode};

use super::transfer::{self, TransferRequest};
use super::{Context, fail};
use crate::exit_code::ExitCode;
use crate::output::Formatter;

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// List saved sessions
    List,

    /// Resume an interrupted session
    Resume(ResumeArgs),

    /// Delete a session, or every session with --all
    Clear(ClearArgs),
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Session id
    pub id: String,
}

#[derive(Args, Debug)]
pub struct ClearArgs {
    /// Session id
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub id: Option<String>,

    /// Delete every session
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Serialize)]
struct SessionInfo {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<String>,
    objects: u64,
    bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Execute a session subcommand
pub async fn execute(cmd: SessionCommands, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();
    let result = match cmd {
        SessionCommands::List => list(ctx, &formatter),
        SessionCommands::Resume(args) => resume(args, ctx).await,
        SessionCommands::Clear(args) => clear(args, ctx, &formatter),
    };
    match result {
        Ok(code) => code,
        Err(err) => fail(&formatter, err),
    }
}

fn list(ctx: &Context, formatter: &Formatter) -> anyhow::Result<ExitCode> {
    let config = ctx.config_manager()?;
    let store = SessionStore::from_config(&config);
    let sessions: Vec<SessionInfo> = store
        .list()?
        .into_iter()
        .map(|(id, header)| match header {
            Ok(header) => SessionInfo {
                id,
                command: Some(header.command),
                args: header.args,
                created: Some(header.created.to_string()),
                objects: header.totals.objects,
                bytes: header.totals.bytes,
                error: None,
            },
            Err(err) => SessionInfo {
                id,
                command: None,
                args: Vec::new(),
                created: None,
                objects: 0,
                bytes: 0,
                error: Some(err.to_string()),
            },
        })
        .collect();

    if formatter.is_json() {
        formatter.json(&sessions);
    } else if sessions.is_empty() {
        formatter.println("No saved sessions.");
    } else {
        let rows = sessions
            .iter()
            .map(|s| {
                let command = match (&s.command, &s.error) {
                    (Some(command), _) => format!("{command} {}", s.args.join(" ")),
                    (None, Some(error)) => format!("unreadable: {error}"),
                    (None, None) => String::new(),
                };
                vec![
                    s.id.clone(),
                    command,
                    s.created.clone().unwrap_or_default(),
                    format!("{} ({})", s.objects, formatter.size(s.bytes)),
                ]
            })
            .collect();
        formatter.println(&formatter.table(&["ID", "Command", "Created", "Done"], rows).to_string());
    }
    Ok(ExitCode::Success)
}

async fn resume(args: ResumeArgs, ctx: &Context) -> anyhow::Result<ExitCode> {
    let config = ctx.config_manager()?;
    let store = SessionStore::from_config(&config);
    let session = store.load(&args.id).with_context(|| {
        format!(
            "cannot resume session {}; remove it with `stow session clear {}`",
            args.id, args.id
        )
    })?;

    let header = session.header();
    let mode = match header.command.as_str() {
        "cp" => TransferMode::Copy,
        "mv" => TransferMode::Move,
        other => {
            return Err(Error::CorruptSession {
                id: args.id.clone(),
                reason: format!("unknown command '{other}'"),
            }
            .into());
        }
    };
    let request = TransferRequest::from_header(header)?;
    // local paths in the session are relative to where it was started
    std::env::set_current_dir(&header.working_dir)
        .with_context(|| format!("cannot enter {}", header.working_dir))?;
    tracing::info!(id = %args.id, done = session.completed_count(), "resuming session");

    transfer::run_request(ctx, mode, &config, request, Some(session)).await
}

fn clear(args: ClearArgs, ctx: &Context, formatter: &Formatter) -> anyhow::Result<ExitCode> {
    let config = ctx.config_manager()?;
    let store = SessionStore::from_config(&config);

    let removed = match &args.id {
        Some(id) if !args.all => {
            store.remove(id)?;
            vec![id.clone()]
        }
        _ => {
            let ids: Vec<String> = store.list()?.into_iter().map(|(id, _)| id).collect();
            store.clear_all()?;
            ids
        }
    };

    if formatter.is_json() {
        formatter.json(&serde_json::json!({ "removed": removed }));
    } else if removed.is_empty() {
        formatter.println("No saved sessions.");
    } else {
        formatter.success(&format!("Removed {} session(s).", removed.len()));
    }
    Ok(ExitCode::Success)
}

#[cfg(test)]
mod tests {
    use super::super::{Cli, Commands};
    use super::*;
    use clap::Parser;

    #[test]
    fn test_clear_needs_id_or_all() {
        assert!(Cli::try_parse_from(["stow", "session", "clear"]).is_err());
        assert!(Cli::try_parse_from(["stow", "session", "clear", "abc", "--all"]).is_err());

        let cli = Cli::try_parse_from(["stow", "session", "clear", "--all"]).unwrap();
        let Commands::Session(SessionCommands::Clear(args)) = cli.command else {
            panic!("expected session clear");
        };
        assert!(args.all);
        assert!(args.id.is_none());
    }
}
