//! Aliases and argument expansion
//!
//! An alias binds a short name to an endpoint and its credentials.
//! [`AliasResolver`] turns `alias/bucket/key` arguments into client URLs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::ConfigManager;
use crate::error::{Error, Result};
use crate::url::{ClientUrl, is_valid_alias_name};

/// Connection tuning applied to every request through an alias
///
/// Missing keys in `config.toml` fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transport {
    /// Attempts per request, the first one included
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
        }
    }
}

impl Transport {
    fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn initial_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.max_backoff_ms)
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.read_timeout_ms)
    }
}

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_SIGNATURE: &str = "v4";
pub const DEFAULT_BUCKET_LOOKUP: &str = "auto";

/// A named endpoint with its credentials, as stored in `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,

    #[serde(default = "region_or_default")]
    pub region: String,

    /// `v4` or `v2`
    #[serde(default = "signature_or_default")]
    pub signature: String,

    /// `auto` and `path` address buckets by path, `dns` by virtual host
    #[serde(default = "bucket_lookup_or_default")]
    pub bucket_lookup: String,

    #[serde(default, skip_serializing_if = "Transport::is_default")]
    pub transport: Transport,
}

fn region_or_default() -> String {
    DEFAULT_REGION.into()
}

fn signature_or_default() -> String {
    DEFAULT_SIGNATURE.into()
}

fn bucket_lookup_or_default() -> String {
    DEFAULT_BUCKET_LOOKUP.into()
}

impl Alias {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region_or_default(),
            signature: signature_or_default(),
            bucket_lookup: bucket_lookup_or_default(),
            transport: Transport::default(),
        }
    }

    /// Whether buckets are addressed as virtual hosts
    pub fn virtual_host_style(&self) -> bool {
        self.bucket_lookup == "dns"
    }
}

/// Adds, lists and removes the aliases in `config.toml`
pub struct AliasManager {
    config: ConfigManager,
}

impl AliasManager {
    pub fn new() -> Result<Self> {
        Ok(Self::with_config_manager(ConfigManager::new()?))
    }

    pub fn with_config_manager(config: ConfigManager) -> Self {
        Self { config }
    }

    /// Aliases in the order they were first added
    pub fn list(&self) -> Result<Vec<Alias>> {
        Ok(self.config.load()?.aliases)
    }

    pub fn get(&self, name: &str) -> Result<Alias> {
        self.list()?
            .into_iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::AliasNotFound(name.to_string()))
    }

    /// Store `alias`, replacing one with the same name in place
    pub fn set(&self, alias: Alias) -> Result<()> {
        if !is_valid_alias_name(&alias.name) {
            return Err(Error::InvalidArgument(format!(
                "invalid alias name '{}': use letters, digits, '-' or '_'",
                alias.name
            )));
        }
        url::Url::parse(&alias.endpoint)?;

        let mut config = self.config.load()?;
        match config.aliases.iter_mut().find(|a| a.name == alias.name) {
            Some(slot) => *slot = alias,
            None => config.aliases.push(alias),
        }
        self.config.save(&config)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut config = self.config.load()?;
        let Some(pos) = config.aliases.iter().position(|a| a.name == name) else {
            return Err(Error::AliasNotFound(name.to_string()));
        };
        config.aliases.remove(pos);
        self.config.save(&config)
    }
}

/// An argument after alias expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    /// Alias name; empty for local paths
    pub alias: String,
    /// Expanded client URL
    pub url: ClientUrl,
}

impl ResolvedUrl {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            alias: String::new(),
            url: ClientUrl::local(path),
        }
    }

    pub fn is_local(&self) -> bool {
        self.alias.is_empty()
    }

    /// Same alias, different URL
    pub fn with_url(&self, url: ClientUrl) -> Self {
        Self {
            alias: self.alias.clone(),
            url,
        }
    }

    /// User-facing form: `alias/bucket/key` for remote URLs, the path for local ones
    pub fn display_path(&self) -> String {
        if self.is_local() {
            self.url.path.clone()
        } else {
            format!("{}{}", self.alias, self.url.path)
        }
    }
}

impl std::fmt::Display for ResolvedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_path())
    }
}

/// Expands user arguments against the configured aliases
///
/// Aliases are loaded once; lookups never touch the disk.
#[derive(Debug, Clone, Default)]
pub struct AliasResolver {
    aliases: HashMap<String, Alias>,
}

impl AliasResolver {
    pub fn new(aliases: impl IntoIterator<Item = Alias>) -> Self {
        Self {
            aliases: aliases.into_iter().map(|a| (a.name.clone(), a)).collect(),
        }
    }

    /// Load aliases from the configuration file
    pub fn from_config(config_manager: &ConfigManager) -> Result<Self> {
        Ok(Self::new(config_manager.load()?.aliases))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    /// Host configuration for an alias
    pub fn host_config(&self, name: &str) -> Result<&Alias> {
        self.aliases
            .get(name)
            .ok_or_else(|| Error::AliasNotFound(name.to_string()))
    }

    /// Expand `arg` into an alias and client URL
    ///
    /// The first path component is looked up as an alias. Arguments that look
    /// like a bare URL are rejected; everything else is a local path.
    pub fn expand(&self, arg: &str) -> Result<ResolvedUrl> {
        if arg.is_empty() {
            return Err(Error::InvalidPath("Path cannot be empty".into()));
        }

        let (first, rest) = match arg.find(['/', '\\']) {
            Some(pos) => (&arg[..pos], &arg[pos..]),
            None => (arg, ""),
        };

        if let Some(alias) = self.aliases.get(first) {
            let endpoint = url::Url::parse(&alias.endpoint)?;
            let host = match (endpoint.host_str(), endpoint.port()) {
                (Some(host), Some(port)) => format!("{host}:{port}"),
                (Some(host), None) => host.to_string(),
                (None, _) => {
                    return Err(Error::Config(format!(
                        "alias '{}' has an endpoint without a host: {}",
                        alias.name, alias.endpoint
                    )));
                }
            };
            return Ok(ResolvedUrl {
                alias: alias.name.clone(),
                url: ClientUrl::object(endpoint.scheme(), host, rest),
            });
        }

        if arg.contains("://") {
            return Err(Error::InvalidAliasedUrl(arg.to_string()));
        }

        Ok(ResolvedUrl::local(arg))
    }
}
