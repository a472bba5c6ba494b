//! Configuration directory and `config.toml`
//!
//! Everything stow persists lives under one directory, `~/.config/stow` unless
//! `STOW_CONFIG_DIR` points elsewhere:
//!
//! - `config.toml`: aliases and transfer defaults
//! - `session/`: resumable copy/move sessions
//! - `snapshots/`: bucket snapshot files
//!
//! `schema_version` guards the TOML layout. Older files are upgraded on load,
//! newer ones are refused.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::alias::Alias;
use crate::error::{Error, Result};

/// Layout version written to `config.toml`
pub const SCHEMA_VERSION: u32 = 1;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "STOW_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";
const SESSION_DIR: &str = "session";
const SNAPSHOT_DIR: &str = "snapshots";

/// Contents of `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub schema_version: u32,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub aliases: Vec<Alias>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            defaults: Defaults::default(),
            aliases: Vec::new(),
        }
    }
}

/// Values used when a transfer command does not set them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Concurrent transfers; 0 picks the number of CPUs
    pub parallel: usize,
}

/// The stow configuration directory
pub fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::config_dir()
        .map(|base| base.join("stow"))
        .ok_or_else(|| Error::Config("cannot determine the user configuration directory".into()))
}

/// Reads and writes `config.toml` and locates its sibling directories
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager for `config.toml` in [`config_dir`]
    pub fn new() -> Result<Self> {
        Ok(Self::with_path(config_dir()?.join(CONFIG_FILE)))
    }

    /// Manager for an explicit file; sessions and snapshots go next to it
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn base_dir(&self) -> &Path {
        self.config_path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn session_dir(&self) -> PathBuf {
        self.base_dir().join(SESSION_DIR)
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.base_dir().join(SNAPSHOT_DIR)
    }

    /// Load `config.toml`, or defaults when there is none yet
    pub fn load(&self) -> Result<Config> {
        let content = match std::fs::read_to_string(&self.config_path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.config_path.display(), "no config file, using defaults");
                return Ok(Config::default());
            }
            Err(err) => return Err(err.into()),
        };
        let config: Config = toml::from_str(&content)?;

        match config.schema_version {
            v if v == SCHEMA_VERSION => Ok(config),
            v if v > SCHEMA_VERSION => Err(Error::Config(format!(
                "{} has schema version {v}, newer than the supported {SCHEMA_VERSION}; upgrade stow",
                self.config_path.display()
            ))),
            _ => Ok(upgrade(config)),
        }
    }

    /// Write `config.toml` readable by the owner only
    ///
    /// The file is written beside the target and renamed over it, so readers
    /// never see a partial config.
    pub fn save(&self, config: &Config) -> Result<()> {
        let dir = self.base_dir();
        std::fs::create_dir_all(dir)?;
        let content = toml::to_string_pretty(config)?;

        let staging = self.config_path.with_extension("toml.tmp");
        let mut file = std::fs::File::create(&staging)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&staging, &self.config_path)?;
        Ok(())
    }
}

/// Bring an older layout up to [`SCHEMA_VERSION`]
fn upgrade(mut config: Config) -> Config {
    tracing::info!(
        from = config.schema_version,
        to = SCHEMA_VERSION,
        "upgrading configuration"
    );
    config.schema_version = SCHEMA_VERSION;
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (ConfigManager, TempDir) {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join(CONFIG_FILE));
        (manager, temp)
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let (manager, _temp) = manager();
        let config = manager.load().unwrap();
        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert_eq!(config.defaults, Defaults::default());
        assert!(config.aliases.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let (manager, _temp) = manager();
        let mut config = Config::default();
        config.defaults.parallel = 4;
        config
            .aliases
            .push(Alias::new("local", "http://localhost:9000", "ak", "sk"));
        manager.save(&config).unwrap();

        let loaded = manager.load().unwrap();
        assert_eq!(loaded.defaults.parallel, 4);
        assert_eq!(loaded.aliases[0].name, "local");
        assert!(!manager.config_path().with_extension("toml.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let (manager, _temp) = manager();
        manager.save(&Config::default()).unwrap();
        let mode = std::fs::metadata(manager.config_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_sibling_directories() {
        let (manager, temp) = manager();
        assert_eq!(manager.session_dir(), temp.path().join("session"));
        assert_eq!(manager.snapshot_dir(), temp.path().join("snapshots"));
    }

    #[test]
    fn test_unknown_defaults_are_ignored() {
        let (manager, _temp) = manager();
        std::fs::write(
            manager.config_path(),
            "schema_version = 1\n[defaults]\nparallel = 2\noutput = \"json\"\n",
        )
        .unwrap();
        assert_eq!(manager.load().unwrap().defaults.parallel, 2);
    }

    #[test]
    fn test_older_schema_is_upgraded() {
        let (manager, _temp) = manager();
        std::fs::write(manager.config_path(), "schema_version = 0\n").unwrap();
        assert_eq!(manager.load().unwrap().schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let (manager, _temp) = manager();
        std::fs::write(
            manager.config_path(),
            format!("schema_version = {}\n", SCHEMA_VERSION + 1),
        )
        .unwrap();
        let err = manager.load().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("upgrade stow"));
    }
}
