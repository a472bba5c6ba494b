//! mv command - Move files and objects
//!
//! A copy whose sources are removed once their copy is confirmed.

use stow_core::TransferMode;

use super::Context;
use super::cp::{self, CpArgs};
use crate::exit_code::ExitCode;

/// Execute the mv command
pub async fn execute(args: CpArgs, ctx: &Context) -> ExitCode {
    cp::run(TransferMode::Move, "mv", args, ctx).await
}
