//! Per-process client cache
//!
//! One remote client per alias, built on first use by a [`ClientFactory`].
//! Local paths share a single [`FsClient`]. Connecting one alias never waits
//! on another; callers racing for the same alias share one connect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::alias::{Alias, AliasResolver, ResolvedUrl};
use crate::client::ObjectClient;
use crate::error::Result;
use crate::fs::FsClient;

/// Builds remote clients from alias configuration
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, alias: &Alias) -> Result<Arc<dyn ObjectClient>>;
}

/// Resolves arguments and hands out clients
pub struct ClientCache {
    resolver: AliasResolver,
    factory: Arc<dyn ClientFactory>,
    fs: Arc<FsClient>,
    clients: Mutex<HashMap<String, Arc<OnceCell<Arc<dyn ObjectClient>>>>>,
}

impl ClientCache {
    pub fn new(resolver: AliasResolver, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            resolver,
            factory,
            fs: Arc::new(FsClient::new()),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &AliasResolver {
        &self.resolver
    }

    /// Expand a command-line argument
    pub fn resolve(&self, arg: &str) -> Result<ResolvedUrl> {
        self.resolver.expand(arg)
    }

    /// Client for an alias; the empty alias is the local filesystem
    pub async fn client(&self, alias: &str) -> Result<Arc<dyn ObjectClient>> {
        if alias.is_empty() {
            return Ok(self.fs.clone());
        }

        let host = self.resolver.host_config(alias)?;
        let slot = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(alias.to_string())
            .or_default()
            .clone();
        let client = slot
            .get_or_try_init(|| async {
                tracing::debug!(alias = %alias, endpoint = %host.endpoint, "connecting client");
                self.factory.connect(host).await
            })
            .await?;
        Ok(client.clone())
    }

    /// Client serving a resolved URL
    pub async fn client_for(&self, url: &ResolvedUrl) -> Result<Arc<dyn ObjectClient>> {
        self.client(&url.alias).await
    }
}
