#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use nimbus::program::PackageRef;
use nimbus::rpc::{
    CallResult, Engine, Monitor, RegisterRequest, RegisterResponse, RegisterResult, SchemaLoader,
};
use nimbus::schema::PackageSchema;
use nimbus::value::PropertyValue;

/// In-memory monitor double. Registrations succeed, echo their inputs as
/// outputs, and record everything for assertions.
#[derive(Default)]
pub struct MockMonitor {
    pub requests: Mutex<Vec<RegisterRequest>>,
    pub outputs: Mutex<Vec<(String, BTreeMap<String, PropertyValue>)>>,
    pub invokes: Mutex<Vec<(String, BTreeMap<String, PropertyValue>, Option<String>)>>,
    pub calls: Mutex<Vec<(String, BTreeMap<String, PropertyValue>, Option<String>)>>,
    pub invoke_result: Mutex<CallResult>,
    pub shutdown_signalled: AtomicBool,
}

impl MockMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(MockMonitor::default())
    }

    pub fn urn_for(type_token: &str, name: &str) -> String {
        format!("urn:pulumi:stack::proj::{}::{}", type_token, name)
    }

    /// Names of registered resources, in registration order.
    pub fn registration_order(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn request_for(&self, name: &str) -> Option<RegisterRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.name == name)
            .cloned()
    }

    pub fn set_invoke_result(&self, result: CallResult) {
        *self.invoke_result.lock().unwrap() = result;
    }
}

#[async_trait]
impl Monitor for MockMonitor {
    async fn register_resource(&self, request: RegisterRequest) -> Result<RegisterResponse> {
        let urn = Self::urn_for(&request.type_token, &request.name);
        let id = format!("{}-id", request.name);
        let object = request.object.clone();
        self.requests.lock().unwrap().push(request);
        Ok(RegisterResponse {
            result: RegisterResult::Success,
            urn,
            id,
            object,
        })
    }

    async fn register_resource_outputs(
        &self,
        urn: &str,
        outputs: BTreeMap<String, PropertyValue>,
    ) -> Result<()> {
        self.outputs
            .lock()
            .unwrap()
            .push((urn.to_string(), outputs));
        Ok(())
    }

    async fn invoke(
        &self,
        token: &str,
        args: BTreeMap<String, PropertyValue>,
        provider: Option<&str>,
    ) -> Result<CallResult> {
        self.invokes.lock().unwrap().push((
            token.to_string(),
            args,
            provider.map(str::to_string),
        ));
        Ok(self.invoke_result.lock().unwrap().clone())
    }

    async fn call(
        &self,
        token: &str,
        args: BTreeMap<String, PropertyValue>,
        provider: Option<&str>,
    ) -> Result<CallResult> {
        self.calls.lock().unwrap().push((
            token.to_string(),
            args,
            provider.map(str::to_string),
        ));
        Ok(self.invoke_result.lock().unwrap().clone())
    }

    async fn signal_and_wait_for_shutdown(&self) -> Result<()> {
        self.shutdown_signalled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Engine double recording version requirements; optionally rejecting.
#[derive(Default)]
pub struct MockEngine {
    pub required: Mutex<Vec<String>>,
    pub reject_with: Mutex<Option<String>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(MockEngine::default())
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn require_version(&self, range: &str) -> Result<()> {
        self.required.lock().unwrap().push(range.to_string());
        if let Some(message) = self.reject_with.lock().unwrap().clone() {
            bail!(message);
        }
        Ok(())
    }
}

/// Loader double serving parsed schema documents by package name.
#[derive(Default)]
pub struct MockLoader {
    packages: Mutex<std::collections::HashMap<String, Arc<PackageSchema>>>,
}

impl MockLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(MockLoader::default())
    }

    pub fn add_package(&self, document: serde_json::Value) {
        let schema = PackageSchema::parse(&document).unwrap();
        self.packages
            .lock()
            .unwrap()
            .insert(schema.name.clone(), Arc::new(schema));
    }
}

#[async_trait]
impl SchemaLoader for MockLoader {
    async fn load_package(&self, descriptor: &PackageRef) -> Result<Arc<PackageSchema>> {
        match self.packages.lock().unwrap().get(&descriptor.name) {
            Some(schema) => Ok(Arc::clone(schema)),
            None => bail!("unknown package '{}'", descriptor.name),
        }
    }
}
