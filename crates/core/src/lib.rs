//! stow-core: transfer engine for the stow S3 CLI client
//!
//! This crate provides:
//! - Configuration, alias management and argument resolution
//! - The [`ObjectClient`] abstraction with a local filesystem implementation
//! - The cp / mv / mirror / diff engine and the batched remove manager
//! - Presigned download URLs
//! - Resumable sessions and bucket snapshots
//!
//! Nothing here depends on an S3 SDK; remote clients are supplied through
//! [`ClientFactory`].

pub mod alias;
pub mod cache;
pub mod client;
pub mod config;
pub mod content;
pub mod duration;
pub mod encryption;
pub mod error;
pub mod filter;
pub mod fs;
pub mod limit;
pub mod remove;
pub mod session;
pub mod share;
pub mod snapshot;
pub mod transfer;
pub mod url;

pub use alias::{Alias, AliasManager, AliasResolver, ResolvedUrl, Transport};
pub use cache::{ClientCache, ClientFactory};
pub use client::{
    CopyOptions, GetOptions, ObjectBody, ObjectClient, PutOptions, RemoveOptions, RemoveOutcome,
    StatOptions,
};
pub use config::{Config, ConfigManager};
pub use content::{ClientContent, ContentKind, DirOpt, ListOptions};
pub use duration::{Duration, parse_duration};
pub use encryption::{EncryptFlags, EncryptionKeys, Sse};
pub use error::{Error, Result};
pub use filter::{AgeFilter, EntryFilter, ExcludeFilter, SkipReason};
pub use fs::FsClient;
pub use limit::{BandwidthLimiter, parse_size};
pub use remove::{RemoveManager, RemoveResult, RemoveSummary, WalkOptions, remove_walk};
pub use session::{Session, SessionHeader, SessionStore};
pub use share::{SharedUrl, share_download, share_expiry};
pub use transfer::{
    CopyType, DiffEntry, DiffKind, MirrorOptions, TransferEngine, TransferEvent, TransferMode,
    TransferOptions, TransferSummary,
};
pub use self::url::{ClientUrl, UrlKind};
