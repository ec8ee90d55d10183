use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tonic::transport::Channel;
use tracing::debug;

use super::monitorrpc;
use super::monitorrpc::resource_monitor_client::ResourceMonitorClient;
use super::{decode_bag, encode_bag, encode_value_bag};
use crate::interp::RunContext;
use crate::value::PropertyValue;

/// Sentinel for a provider id that is not yet known. The monitor resolves
/// it once the provider resource finishes registering.
pub const UNKNOWN_ID: &str = "04da6b54-80e4-46f7-96ec-b56ff0331ba9";

/// An alias attached to a registration: either a complete URN or a spec
/// the engine completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alias {
    Urn(String),
    Spec {
        name: Option<String>,
        resource_type: Option<String>,
        parent_urn: Option<String>,
        no_parent: bool,
    },
}

/// A resource registration request, in the interpreter's own terms. The
/// gRPC client lowers this onto the wire message.
#[derive(Debug, Clone, Default)]
pub struct RegisterRequest {
    pub type_token: String,
    pub name: String,
    pub custom: bool,
    pub object: BTreeMap<String, PropertyValue>,
    pub parent: String,
    pub dependencies: Vec<String>,
    pub provider: String,
    pub providers: BTreeMap<String, String>,
    pub property_dependencies: BTreeMap<String, Vec<String>>,
    pub additional_secret_outputs: Vec<String>,
    pub ignore_changes: Vec<String>,
    pub replace_on_changes: Vec<String>,
    pub hide_diffs: Vec<String>,
    pub aliases: Vec<Alias>,
    pub import_id: String,
    pub protect: Option<bool>,
    pub retain_on_delete: Option<bool>,
    /// None means "not provided"; the wire request carries a defined flag.
    pub delete_before_replace: Option<bool>,
    pub replace_with: Vec<String>,
    pub replacement_trigger: Option<PropertyValue>,
    pub version: String,
    pub plugin_download_url: String,
    pub deleted_with: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterResult {
    Success,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct RegisterResponse {
    pub result: RegisterResult,
    pub urn: String,
    pub id: String,
    pub object: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, Clone)]
pub struct CheckFailure {
    pub property: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct CallResult {
    pub ret: BTreeMap<String, PropertyValue>,
    pub failures: Vec<CheckFailure>,
}

/// The resource-monitor surface the interpreter consumes.
#[async_trait]
pub trait Monitor: Send + Sync {
    async fn register_resource(&self, request: RegisterRequest) -> Result<RegisterResponse>;

    async fn register_resource_outputs(
        &self,
        urn: &str,
        outputs: BTreeMap<String, PropertyValue>,
    ) -> Result<()>;

    async fn invoke(
        &self,
        token: &str,
        args: BTreeMap<String, PropertyValue>,
        provider: Option<&str>,
    ) -> Result<CallResult>;

    async fn call(
        &self,
        token: &str,
        args: BTreeMap<String, PropertyValue>,
        provider: Option<&str>,
    ) -> Result<CallResult>;

    /// Tell the monitor the program is done and wait for it to wind down.
    async fn signal_and_wait_for_shutdown(&self) -> Result<()>;
}

/// gRPC-backed monitor client. The channel is shared; per-call clones are
/// cheap and multiplex over one HTTP/2 connection.
pub struct GrpcMonitor {
    client: ResourceMonitorClient<Channel>,
    ctx: Arc<RunContext>,
}

impl GrpcMonitor {
    pub async fn connect(address: &str, ctx: Arc<RunContext>) -> Result<Self> {
        let endpoint = format!("http://{}", address);
        debug!("Connecting to resource monitor at {}", endpoint);
        let channel = Channel::from_shared(endpoint)
            .context("Invalid monitor endpoint")?
            .connect()
            .await
            .context("Failed to connect to resource monitor")?;
        Ok(GrpcMonitor {
            client: ResourceMonitorClient::new(channel),
            ctx,
        })
    }

    fn lower_request(request: RegisterRequest) -> Result<monitorrpc::RegisterResourceRequest> {
        let object = encode_bag(&request.object)?;
        let replacement_trigger = request
            .replacement_trigger
            .as_ref()
            .map(encode_value_bag)
            .transpose()?;
        Ok(monitorrpc::RegisterResourceRequest {
            r#type: request.type_token,
            name: request.name,
            custom: request.custom,
            object: Some(object),
            parent: request.parent,
            dependencies: request.dependencies,
            provider: request.provider,
            providers: request.providers.into_iter().collect(),
            property_dependencies: request
                .property_dependencies
                .into_iter()
                .map(|(k, urns)| (k, monitorrpc::PropertyDependencies { urns }))
                .collect(),
            additional_secret_outputs: request.additional_secret_outputs,
            ignore_changes: request.ignore_changes,
            replace_on_changes: request.replace_on_changes,
            hide_diffs: request.hide_diffs,
            aliases: request
                .aliases
                .into_iter()
                .map(|alias| monitorrpc::Alias {
                    alias: Some(match alias {
                        Alias::Urn(urn) => monitorrpc::alias::Alias::Urn(urn),
                        Alias::Spec {
                            name,
                            resource_type,
                            parent_urn,
                            no_parent,
                        } => monitorrpc::alias::Alias::Spec(monitorrpc::alias::Spec {
                            name: name.unwrap_or_default(),
                            r#type: resource_type.unwrap_or_default(),
                            parent_urn: parent_urn.unwrap_or_default(),
                            no_parent,
                        }),
                    }),
                })
                .collect(),
            import_id: request.import_id,
            protect: request.protect,
            retain_on_delete: request.retain_on_delete,
            delete_before_replace: request.delete_before_replace.unwrap_or(false),
            delete_before_replace_defined: request.delete_before_replace.is_some(),
            replace_with: request.replace_with,
            replacement_trigger,
            version: request.version,
            plugin_download_url: request.plugin_download_url,
            deleted_with: request.deleted_with,
        })
    }
}

#[async_trait]
impl Monitor for GrpcMonitor {
    async fn register_resource(&self, request: RegisterRequest) -> Result<RegisterResponse> {
        let mut client = self.client.clone();
        let wire = Self::lower_request(request)?;
        let response = tokio::select! {
            _ = self.ctx.cancelled() => bail!("Run cancelled"),
            res = client.register_resource(wire) => {
                res.map_err(|e| anyhow::anyhow!("RegisterResource RPC failed: {}", e))?
            }
        };
        let inner = response.into_inner();
        let result =
            if inner.result == monitorrpc::register_resource_response::Result::Success as i32 {
                RegisterResult::Success
            } else {
                RegisterResult::Skipped
            };
        let object = inner
            .object
            .as_ref()
            .map(decode_bag)
            .transpose()?
            .unwrap_or_default();
        Ok(RegisterResponse {
            result,
            urn: inner.urn,
            id: inner.id,
            object,
        })
    }

    async fn register_resource_outputs(
        &self,
        urn: &str,
        outputs: BTreeMap<String, PropertyValue>,
    ) -> Result<()> {
        let mut client = self.client.clone();
        let request = monitorrpc::RegisterResourceOutputsRequest {
            urn: urn.to_string(),
            outputs: Some(encode_bag(&outputs)?),
        };
        tokio::select! {
            _ = self.ctx.cancelled() => bail!("Run cancelled"),
            res = client.register_resource_outputs(request) => {
                res.map_err(|e| anyhow::anyhow!("RegisterResourceOutputs RPC failed: {}", e))?
            }
        };
        Ok(())
    }

    async fn invoke(
        &self,
        token: &str,
        args: BTreeMap<String, PropertyValue>,
        provider: Option<&str>,
    ) -> Result<CallResult> {
        let mut client = self.client.clone();
        let request = monitorrpc::InvokeRequest {
            tok: token.to_string(),
            args: Some(encode_bag(&args)?),
            provider: provider.unwrap_or_default().to_string(),
        };
        let response = tokio::select! {
            _ = self.ctx.cancelled() => bail!("Run cancelled"),
            res = client.invoke(request) => {
                res.map_err(|e| anyhow::anyhow!("Invoke RPC failed for {}: {}", token, e))?
            }
        };
        let inner = response.into_inner();
        Ok(CallResult {
            ret: inner
                .r#return
                .as_ref()
                .map(decode_bag)
                .transpose()?
                .unwrap_or_default(),
            failures: inner
                .failures
                .into_iter()
                .map(|f| CheckFailure {
                    property: f.property,
                    reason: f.reason,
                })
                .collect(),
        })
    }

    async fn call(
        &self,
        token: &str,
        args: BTreeMap<String, PropertyValue>,
        provider: Option<&str>,
    ) -> Result<CallResult> {
        let mut client = self.client.clone();
        let request = monitorrpc::CallRequest {
            tok: token.to_string(),
            args: Some(encode_bag(&args)?),
            provider: provider.unwrap_or_default().to_string(),
        };
        let response = tokio::select! {
            _ = self.ctx.cancelled() => bail!("Run cancelled"),
            res = client.call(request) => {
                res.map_err(|e| anyhow::anyhow!("Call RPC failed for {}: {}", token, e))?
            }
        };
        let inner = response.into_inner();
        Ok(CallResult {
            ret: inner
                .r#return
                .as_ref()
                .map(decode_bag)
                .transpose()?
                .unwrap_or_default(),
            failures: inner
                .failures
                .into_iter()
                .map(|f| CheckFailure {
                    property: f.property,
                    reason: f.reason,
                })
                .collect(),
        })
    }

    async fn signal_and_wait_for_shutdown(&self) -> Result<()> {
        let mut client = self.client.clone();
        let result = tokio::select! {
            _ = self.ctx.cancelled() => bail!("Run cancelled"),
            res = client.signal_and_wait_for_shutdown(monitorrpc::Empty {}) => res,
        };
        match result {
            Ok(_) => Ok(()),
            // Older monitors predate the shutdown handshake.
            Err(status) if status.code() == tonic::Code::Unimplemented => {
                debug!("Monitor does not implement SignalAndWaitForShutdown");
                Ok(())
            }
            Err(status) => bail!("SignalAndWaitForShutdown RPC failed: {}", status),
        }
    }
}
