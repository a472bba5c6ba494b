//! Copy, move, mirror and diff engine

mod copy;
pub mod diff;
pub mod message;
mod mirror;
pub mod plan;
pub mod pool;

pub use copy::{TransferEngine, TransferMode, TransferOptions};
pub use diff::{DiffEntry, DiffKind, diff};
pub use message::{TransferEvent, TransferSummary};
pub use mirror::MirrorOptions;
pub use plan::{CopyType, CopyUnit, classify_copy, guess_copy_type};
pub use pool::{WorkerPool, default_parallelism};
