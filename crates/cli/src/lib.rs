//! stow CLI library
//!
//! Exposes the command tree, exit codes and output layer to the binary and
//! to tests.

pub mod commands;
pub mod exit_code;
pub mod output;
