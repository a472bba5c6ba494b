//! stow-s3: S3 adapter for the stow CLI
//!
//! Implements stow-core's [`ObjectClient`](stow_core::ObjectClient) on top of
//! aws-sdk-s3. This is the only crate that depends on the AWS SDK.

pub mod client;
pub mod factory;
mod multipart;
mod sse;

pub use client::S3Client;
pub use factory::S3ClientFactory;
