//! Resumable copy/move sessions
//!
//! A session is two files under the session directory:
//!
//! - `<id>.json`: the header (command, arguments, flags, working directory)
//! - `<id>.data`: one JSON string per line, each a completed source URL
//!
//! The id is a hash of the command name and its arguments, so running the
//! same command again finds the same session. A final line without a newline
//! was never confirmed and is dropped on load; anything else that fails to
//! parse makes the session corrupt.

use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use crate::config::ConfigManager;
use crate::error::{Error, Result};

/// Version written to new session headers
pub const SESSION_VERSION: u32 = 1;

const HEADER_EXT: &str = "json";
const DATA_EXT: &str = "data";

/// Running totals recorded when a session is saved
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTotals {
    pub objects: u64,
    pub bytes: u64,
}

/// Persisted description of a copy or move invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub version: u32,
    pub created: Timestamp,
    /// Directory the command was started from; local paths are relative to it
    pub working_dir: String,
    /// "cp" or "mv"
    pub command: String,
    /// Source and target arguments
    pub args: Vec<String>,
    #[serde(default)]
    pub bool_flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub string_flags: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub totals: SessionTotals,
}

impl SessionHeader {
    pub fn new(command: impl Into<String>, args: Vec<String>, working_dir: impl Into<String>) -> Self {
        Self {
            version: SESSION_VERSION,
            created: Timestamp::now(),
            working_dir: working_dir.into(),
            command: command.into(),
            args,
            bool_flags: BTreeMap::new(),
            string_flags: BTreeMap::new(),
            totals: SessionTotals::default(),
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        self.bool_flags.get(name).copied().unwrap_or(false)
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.string_flags.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    /// Session id of the invocation this header records, flags included
    pub fn session_id(&self) -> String {
        let mut material = vec![self.working_dir.clone()];
        material.extend(self.args.iter().cloned());
        for (name, value) in &self.bool_flags {
            material.push(format!("--{name}={value}"));
        }
        for (name, values) in &self.string_flags {
            for value in values {
                material.push(format!("--{name}={value}"));
            }
        }
        SessionStore::session_id(&self.command, &material)
    }
}

/// Directory of sessions
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under the configuration directory
    pub fn from_config(config: &ConfigManager) -> Self {
        Self::new(config.session_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic id for a command and its arguments
    pub fn session_id(command: &str, args: &[String]) -> String {
        let mut material = Vec::with_capacity(64);
        material.extend_from_slice(command.as_bytes());
        for arg in args {
            material.push(0);
            material.extend_from_slice(arg.as_bytes());
        }
        format!("{:016x}", xxh64(&material, 0))
    }

    fn header_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{HEADER_EXT}"))
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{DATA_EXT}"))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.header_path(id).is_file()
    }

    /// Start a fresh session, replacing any previous files with the same id
    pub fn create(&self, id: &str, header: SessionHeader) -> Result<Session> {
        std::fs::create_dir_all(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))?;
        }

        write_header(&self.header_path(id), &header)?;
        let log = File::create(self.data_path(id))?;
        tracing::debug!(id = %id, "session created");
        Ok(Session {
            id: id.to_string(),
            header_path: self.header_path(id),
            data_path: self.data_path(id),
            header,
            completed: HashSet::new(),
            log,
        })
    }

    /// Restore a session from disk
    pub fn load(&self, id: &str) -> Result<Session> {
        let corrupt = |reason: String| Error::CorruptSession {
            id: id.to_string(),
            reason,
        };

        let header_path = self.header_path(id);
        let raw = match std::fs::read(&header_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("session {id}")));
            }
            Err(err) => return Err(err.into()),
        };
        let header: SessionHeader =
            serde_json::from_slice(&raw).map_err(|e| corrupt(format!("header: {e}")))?;
        if header.version != SESSION_VERSION {
            return Err(corrupt(format!(
                "version {} is not supported (expected {SESSION_VERSION})",
                header.version
            )));
        }

        let data_path = self.data_path(id);
        let data = match std::fs::read(&data_path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        let confirmed = data
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |pos| pos + 1);
        let mut completed = HashSet::new();
        for (n, line) in data[..confirmed].split(|b| *b == b'\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            let key: String = serde_json::from_slice(line)
                .map_err(|e| corrupt(format!("data line {}: {e}", n + 1)))?;
            completed.insert(key);
        }
        if confirmed < data.len() {
            tracing::debug!(id = %id, dropped = data.len() - confirmed, "dropping unconfirmed session record");
        }

        let log = OpenOptions::new().create(true).append(true).open(&data_path)?;
        log.set_len(confirmed as u64)?;

        Ok(Session {
            id: id.to_string(),
            header_path,
            data_path,
            header,
            completed,
            log,
        })
    }

    /// Every session on disk, sorted by id. Unreadable headers are reported in place.
    pub fn list(&self) -> Result<Vec<(String, Result<SessionHeader>)>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(HEADER_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let header = std::fs::read(&path)
                .map_err(Error::from)
                .and_then(|raw| {
                    serde_json::from_slice::<SessionHeader>(&raw).map_err(|e| Error::CorruptSession {
                        id: id.clone(),
                        reason: e.to_string(),
                    })
                });
            sessions.push((id, header));
        }
        sessions.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(sessions)
    }

    /// Delete a session's files
    pub fn remove(&self, id: &str) -> Result<()> {
        match std::fs::remove_file(self.header_path(id)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("session {id}")));
            }
            Err(err) => return Err(err.into()),
        }
        match std::fs::remove_file(self.data_path(id)) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    /// Delete every session, returning how many were removed
    pub fn clear_all(&self) -> Result<usize> {
        let ids: Vec<String> = self.list()?.into_iter().map(|(id, _)| id).collect();
        for id in &ids {
            self.remove(id)?;
        }
        Ok(ids.len())
    }
}

fn write_header(path: &Path, header: &SessionHeader) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_vec_pretty(header)?;
    std::fs::write(&tmp, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// An open session
#[derive(Debug)]
pub struct Session {
    id: String,
    header_path: PathBuf,
    data_path: PathBuf,
    header: SessionHeader,
    completed: HashSet<String>,
    log: File,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn header(&self) -> &SessionHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut SessionHeader {
        &mut self.header
    }

    pub fn is_complete(&self, key: &str) -> bool {
        self.completed.contains(key)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Keys confirmed so far
    pub fn completed(&self) -> &HashSet<String> {
        &self.completed
    }

    /// Record a confirmed unit; the record is flushed before returning
    pub fn mark_complete(&mut self, key: &str) -> Result<()> {
        if !self.completed.insert(key.to_string()) {
            return Ok(());
        }
        let mut line = serde_json::to_vec(key)?;
        line.push(b'\n');
        self.log.write_all(&line)?;
        self.log.flush()?;
        Ok(())
    }

    /// Persist the header
    pub fn save(&self) -> Result<()> {
        write_header(&self.header_path, &self.header)
    }

    /// Remove the session's files
    pub fn delete(self) -> Result<()> {
        drop(self.log);
        std::fs::remove_file(&self.header_path)?;
        match std::fs::remove_file(&self.data_path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => {
                tracing::debug!(id = %self.id, "session deleted");
                Ok(())
            }
        }
    }
}
