//! Client factory handed to the stow-core client cache

use std::sync::Arc;

use async_trait::async_trait;
use stow_core::{Alias, ClientFactory, Error, ObjectClient, Result};

use crate::client::S3Client;

/// Connects an [`S3Client`] for each alias on first use
#[derive(Debug, Default, Clone, Copy)]
pub struct S3ClientFactory;

#[async_trait]
impl ClientFactory for S3ClientFactory {
    async fn connect(&self, alias: &Alias) -> Result<Arc<dyn ObjectClient>> {
        if alias.signature != "v4" {
            return Err(Error::UnsupportedFeature(format!(
                "signature {} for alias {}; only v4 is supported",
                alias.signature, alias.name
            )));
        }
        let client = S3Client::new(alias).await?;
        tracing::debug!(alias = %alias.name, region = %alias.region, "s3 client ready");
        Ok(Arc::new(client))
    }
}
