use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tonic::transport::Channel;
use tracing::debug;

use super::enginerpc;
use super::enginerpc::engine_client::EngineClient;
use crate::interp::RunContext;

/// The deployment-engine surface the interpreter consumes.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Fail unless the running engine satisfies the given version range.
    async fn require_version(&self, range: &str) -> Result<()>;
}

pub struct GrpcEngine {
    client: EngineClient<Channel>,
    ctx: Arc<RunContext>,
}

impl GrpcEngine {
    pub async fn connect(address: &str, ctx: Arc<RunContext>) -> Result<Self> {
        let endpoint = format!("http://{}", address);
        debug!("Connecting to engine at {}", endpoint);
        let channel = Channel::from_shared(endpoint)
            .context("Invalid engine endpoint")?
            .connect()
            .await
            .context("Failed to connect to engine")?;
        Ok(GrpcEngine {
            client: EngineClient::new(channel),
            ctx,
        })
    }
}

#[async_trait]
impl Engine for GrpcEngine {
    async fn require_version(&self, range: &str) -> Result<()> {
        let mut client = self.client.clone();
        let request = enginerpc::VersionRequirement {
            range: range.to_string(),
        };
        tokio::select! {
            _ = self.ctx.cancelled() => bail!("Run cancelled"),
            res = client.require_version(request) => {
                // The engine's error is the run's error, verbatim.
                res.map_err(|status| anyhow::anyhow!("{}", status.message()))?
            }
        };
        Ok(())
    }
}
