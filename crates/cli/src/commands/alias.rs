//! alias commands - Manage storage endpoints
//!
//! An alias names an S3-compatible endpoint and its credentials. Paths of the
//! form `alias/bucket/key` resolve through it.

use clap::{Args, Subcommand};
use serde::Serialize;
use stow_core::{Alias, AliasManager, Error};

use super::{Context, fail};
use crate::exit_code::ExitCode;
use crate::output::Formatter;

const SIGNATURES: &[&str] = &["v4", "v2"];
const BUCKET_LOOKUPS: &[&str] = &["auto", "path", "dns"];

#[derive(Subcommand, Debug)]
pub enum AliasCommands {
    /// Add or update an alias
    Set(SetArgs),

    /// List configured aliases
    List(ListArgs),

    /// Remove an alias
    Remove(RemoveArgs),
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Alias name, used as the first path component
    pub name: String,

    /// Endpoint URL (e.g. http://localhost:9000)
    pub endpoint: String,

    /// Access key ID
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,

    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    /// Signature version
    #[arg(long, default_value = "v4")]
    pub signature: String,

    /// Bucket addressing: auto, path or dns
    #[arg(long, default_value = "auto")]
    pub bucket_lookup: String,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Show region and bucket lookup as well
    #[arg(short, long)]
    pub long: bool,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    pub name: String,
}

/// Alias without credentials
#[derive(Debug, Serialize)]
struct AliasInfo {
    name: String,
    endpoint: String,
    region: String,
    bucket_lookup: String,
}

impl From<&Alias> for AliasInfo {
    fn from(alias: &Alias) -> Self {
        Self {
            name: alias.name.clone(),
            endpoint: alias.endpoint.clone(),
            region: alias.region.clone(),
            bucket_lookup: alias.bucket_lookup.clone(),
        }
    }
}

/// Execute an alias subcommand
pub async fn execute(cmd: AliasCommands, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();
    let result = AliasManager::new().map_err(anyhow::Error::from).and_then(|manager| match cmd {
        AliasCommands::Set(args) => set(args, &manager, &formatter),
        AliasCommands::List(args) => list(args, &manager, &formatter),
        AliasCommands::Remove(args) => remove(args, &manager, &formatter),
    });
    match result {
        Ok(code) => code,
        Err(err) => fail(&formatter, err),
    }
}

/// Build an alias from `alias set` arguments
fn validate(args: SetArgs) -> stow_core::Result<Alias> {
    if args.name.is_empty() || args.name.contains(['/', '\\']) {
        return Err(Error::InvalidArgument(format!(
            "invalid alias name '{}'",
            args.name
        )));
    }
    if !args.endpoint.contains("://") {
        return Err(Error::InvalidArgument(format!(
            "endpoint '{}' must include a scheme such as https://",
            args.endpoint
        )));
    }
    url::Url::parse(&args.endpoint)?;
    if !SIGNATURES.contains(&args.signature.as_str()) {
        return Err(Error::InvalidArgument(format!(
            "signature must be one of {}",
            SIGNATURES.join(", ")
        )));
    }
    if !BUCKET_LOOKUPS.contains(&args.bucket_lookup.as_str()) {
        return Err(Error::InvalidArgument(format!(
            "bucket lookup must be one of {}",
            BUCKET_LOOKUPS.join(", ")
        )));
    }

    let mut alias = Alias::new(&args.name, &args.endpoint, &args.access_key, &args.secret_key);
    alias.region = args.region;
    alias.signature = args.signature;
    alias.bucket_lookup = args.bucket_lookup;
    Ok(alias)
}

fn set(args: SetArgs, manager: &AliasManager, formatter: &Formatter) -> anyhow::Result<ExitCode> {
    let alias = validate(args)?;
    let name = alias.name.clone();
    manager.set(alias)?;
    tracing::debug!(alias = %name, "alias saved");

    if formatter.is_json() {
        formatter.json(&serde_json::json!({ "alias": name, "configured": true }));
    } else {
        formatter.success(&format!("Alias '{name}' configured."));
    }
    Ok(ExitCode::Success)
}

fn list(args: ListArgs, manager: &AliasManager, formatter: &Formatter) -> anyhow::Result<ExitCode> {
    let aliases: Vec<AliasInfo> = manager.list()?.iter().map(AliasInfo::from).collect();

    if formatter.is_json() {
        formatter.json(&serde_json::json!({ "aliases": aliases }));
    } else if aliases.is_empty() {
        formatter.println("No aliases configured.");
    } else if args.long {
        let rows = aliases
            .iter()
            .map(|a| {
                vec![
                    a.name.clone(),
                    a.endpoint.clone(),
                    a.region.clone(),
                    a.bucket_lookup.clone(),
                ]
            })
            .collect();
        formatter.println(
            &formatter
                .table(&["Alias", "Endpoint", "Region", "Lookup"], rows)
                .to_string(),
        );
    } else {
        for alias in &aliases {
            formatter.println(&format!("{:<12} {}", alias.name, alias.endpoint));
        }
    }
    Ok(ExitCode::Success)
}

fn remove(args: RemoveArgs, manager: &AliasManager, formatter: &Formatter) -> anyhow::Result<ExitCode> {
    manager.remove(&args.name)?;
    if formatter.is_json() {
        formatter.json(&serde_json::json!({ "alias": args.name, "removed": true }));
    } else {
        formatter.success(&format!("Alias '{}' removed.", args.name));
    }
    Ok(ExitCode::Success)
}
