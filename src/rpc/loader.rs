use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tracing::debug;

use super::loaderrpc;
use super::loaderrpc::loader_client::LoaderClient;
use crate::interp::RunContext;
use crate::program::PackageRef;
use crate::schema::PackageSchema;

/// The schema-loader surface the interpreter consumes.
#[async_trait]
pub trait SchemaLoader: Send + Sync {
    async fn load_package(&self, descriptor: &PackageRef) -> Result<Arc<PackageSchema>>;
}

pub struct GrpcLoader {
    client: LoaderClient<Channel>,
    ctx: Arc<RunContext>,
}

impl GrpcLoader {
    pub async fn connect(address: &str, ctx: Arc<RunContext>) -> Result<Self> {
        let endpoint = format!("http://{}", address);
        debug!("Connecting to schema loader at {}", endpoint);
        let channel = Channel::from_shared(endpoint)
            .context("Invalid loader endpoint")?
            .connect()
            .await
            .context("Failed to connect to schema loader")?;
        Ok(GrpcLoader {
            client: LoaderClient::new(channel),
            ctx,
        })
    }
}

#[async_trait]
impl SchemaLoader for GrpcLoader {
    async fn load_package(&self, descriptor: &PackageRef) -> Result<Arc<PackageSchema>> {
        let mut client = self.client.clone();
        let request = loaderrpc::PackageDescriptor {
            name: descriptor.name.clone(),
            version: descriptor.version.clone().unwrap_or_default(),
            download_url: descriptor.download_url.clone().unwrap_or_default(),
        };
        let response = tokio::select! {
            _ = self.ctx.cancelled() => bail!("Run cancelled"),
            res = client.load_package(request) => {
                res.map_err(|e| anyhow::anyhow!(
                    "LoadPackage RPC failed for {}: {}", descriptor.name, e
                ))?
            }
        };
        let inner = response.into_inner();
        let document: serde_json::Value = serde_json::from_slice(&inner.schema_json)
            .with_context(|| format!("Invalid schema document for package {}", descriptor.name))?;
        Ok(Arc::new(PackageSchema::parse(&document)?))
    }
}

/// Caching decorator over a schema loader. Shared across the run and
/// internally synchronized; repeat loads of a package hit the cache.
pub struct CachingLoader {
    inner: Arc<dyn SchemaLoader>,
    cache: Mutex<HashMap<(String, String), Arc<PackageSchema>>>,
}

impl CachingLoader {
    pub fn new(inner: Arc<dyn SchemaLoader>) -> Self {
        CachingLoader {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SchemaLoader for CachingLoader {
    async fn load_package(&self, descriptor: &PackageRef) -> Result<Arc<PackageSchema>> {
        let key = (
            descriptor.name.clone(),
            descriptor.version.clone().unwrap_or_default(),
        );
        let mut cache = self.cache.lock().await;
        if let Some(schema) = cache.get(&key) {
            return Ok(Arc::clone(schema));
        }
        let schema = self.inner.load_package(descriptor).await?;
        cache.insert(key, Arc::clone(&schema));
        Ok(schema)
    }
}
