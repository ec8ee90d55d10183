use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::{eval_expr, Scope};
use crate::asset::{Archive, Asset, AssetOrArchive};
use crate::interp::RunInfo;
use crate::program::{Diagnostics, Expression, PackageRef};
use crate::rpc::{Monitor, SchemaLoader, UNKNOWN_ID};
use crate::schema::{canonicalize_token, package_of_token};
use crate::value::{from_wire, to_wire, to_wire_plain, Mark, PropertyValue, Value, ValueKind};

/// Helper names that follow the uniform rules for pure functions: any
/// unknown argument makes the result unknown, and argument marks carry
/// over to the result.
const PURE_HELPERS: &[&str] = &[
    "split",
    "join",
    "length",
    "element",
    "singleOrNone",
    "entries",
    "lookup",
    "toBase64",
    "fromBase64",
];

/// The built-in function library. Holds the run metadata the nullary
/// functions report and the clients `invoke`/`call` talk through.
pub struct Builtins {
    run_info: RunInfo,
    monitor: Option<Arc<dyn Monitor>>,
    loader: Option<Arc<dyn SchemaLoader>>,
}

impl Builtins {
    pub fn new(run_info: RunInfo) -> Self {
        Builtins {
            run_info,
            monitor: None,
            loader: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn SchemaLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Dispatch a function call. `try` and `can` receive their arguments
    /// unevaluated; everything else is eager.
    pub(crate) fn call<'a>(
        &'a self,
        name: &'a str,
        args: &'a [Expression],
        scope: &'a Scope,
    ) -> BoxFuture<'a, Result<Value, Diagnostics>> {
        Box::pin(async move {
            match name {
                "try" => return self.try_fn(args, scope).await,
                "can" => return self.can_fn(args, scope).await,
                _ => {}
            }
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(arg, scope, self).await?);
            }
            self.dispatch(name, values).await
        })
    }

    async fn dispatch(&self, name: &str, mut values: Vec<Value>) -> Result<Value, Diagnostics> {
        match name {
            "cwd" => self.run_string(&values, self.run_info.working_dir.display().to_string()),
            "rootDirectory" => {
                self.run_string(&values, self.run_info.root_directory.display().to_string())
            }
            "project" => self.run_string(&values, self.run_info.project.clone()),
            "stack" => self.run_string(&values, self.run_info.stack.clone()),
            "organization" => self.run_string(&values, self.run_info.organization.clone()),

            "secret" => {
                arity(name, &values, 1)?;
                Ok(values.pop().unwrap().mark_secret())
            }
            "unsecret" => {
                arity(name, &values, 1)?;
                Ok(values.pop().unwrap().unmark_secret())
            }

            "getOutput" => {
                arity(name, &values, 2)?;
                self.get_output(&values[0], &values[1])
            }

            "invoke" => self.invoke_fn(values).await,
            "call" => self.call_fn(values).await,

            "fileAsset" => {
                arity(name, &values, 1)?;
                let path = self.capsule_string(name, &values)?;
                match path {
                    Some(path) => Ok(Value::asset(Asset::file(&path, &self.run_info.working_dir))),
                    None => Ok(values.pop().unwrap()),
                }
            }
            "stringAsset" => {
                arity(name, &values, 1)?;
                match self.capsule_string(name, &values)? {
                    Some(text) => Ok(Value::asset(Asset::text(text))),
                    None => Ok(values.pop().unwrap()),
                }
            }
            "remoteAsset" => {
                arity(name, &values, 1)?;
                match self.capsule_string(name, &values)? {
                    Some(uri) => Ok(Value::asset(Asset::remote(uri))),
                    None => Ok(values.pop().unwrap()),
                }
            }
            "fileArchive" => {
                arity(name, &values, 1)?;
                match self.capsule_string(name, &values)? {
                    Some(path) => {
                        Ok(Value::archive(Archive::file(&path, &self.run_info.working_dir)))
                    }
                    None => Ok(values.pop().unwrap()),
                }
            }
            "remoteArchive" => {
                arity(name, &values, 1)?;
                match self.capsule_string(name, &values)? {
                    Some(uri) => Ok(Value::archive(Archive::remote(uri))),
                    None => Ok(values.pop().unwrap()),
                }
            }
            "assetArchive" => {
                arity(name, &values, 1)?;
                self.asset_archive(&values[0])
            }

            "__convert" => {
                arity(name, &values, 1)?;
                Ok(values.pop().unwrap())
            }

            "pulumiResourceType" => {
                arity(name, &values, 1)?;
                resource_attribute(&values[0], "__type")
            }
            "pulumiResourceName" => {
                arity(name, &values, 1)?;
                resource_attribute(&values[0], "__name")
            }

            _ if PURE_HELPERS.contains(&name) => {
                if values.iter().any(Value::is_unknown) {
                    return Ok(merge_arg_marks(Value::unknown(), &values));
                }
                let result = pure_helper(name, &values)?;
                Ok(merge_arg_marks(result, &values))
            }

            _ => Err(Diagnostics::error(format!("unknown function '{}'", name))),
        }
    }

    fn run_string(&self, values: &[Value], out: String) -> Result<Value, Diagnostics> {
        if !values.is_empty() {
            return Err(Diagnostics::error("function takes no arguments"));
        }
        Ok(Value::string(out))
    }

    /// Shared argument handling for the asset/archive constructors: a
    /// known string, or None when the argument is unknown (the capsule
    /// cannot be built yet and the unknown flows through).
    fn capsule_string(&self, name: &str, values: &[Value]) -> Result<Option<String>, Diagnostics> {
        let value = &values[0];
        if value.is_unknown() {
            return Ok(None);
        }
        value
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| Diagnostics::error(format!("{}: argument must be a string", name)))
    }

    // ─── try / can ──────────────────────────────────────────────────────────

    /// Lazily evaluate each argument in turn. The first that evaluates
    /// cleanly and is wholly known wins; a partially-unknown result short-
    /// circuits to unknown rather than skipping ahead.
    async fn try_fn(&self, args: &[Expression], scope: &Scope) -> Result<Value, Diagnostics> {
        if args.is_empty() {
            return Err(Diagnostics::error("try: at least one argument is required"));
        }
        let mut failures = Diagnostics::new();
        for arg in args {
            match eval_expr(arg, scope, self).await {
                Ok(value) if value.is_wholly_known() => return Ok(value),
                Ok(value) => return Ok(Value::unknown().with_marks(&value.marks)),
                Err(diagnostics) => failures.extend(diagnostics),
            }
        }
        let mut out = Diagnostics::error("try: no argument succeeded");
        out.extend(failures);
        Err(out)
    }

    async fn can_fn(&self, args: &[Expression], scope: &Scope) -> Result<Value, Diagnostics> {
        if args.len() != 1 {
            return Err(Diagnostics::error("can: exactly one argument is required"));
        }
        match eval_expr(&args[0], scope, self).await {
            Ok(value) if !value.is_wholly_known() => Ok(Value::unknown()),
            Ok(value) => {
                let result = Value::bool(true);
                if value.contains_secret() {
                    Ok(result.mark_secret())
                } else {
                    Ok(result)
                }
            }
            Err(_) => Ok(Value::bool(false)),
        }
    }

    // ─── getOutput ──────────────────────────────────────────────────────────

    /// Look up a named output on a stack-reference object. The reference
    /// has a fixed shape: optional `outputs` object and optional
    /// `secretOutputNames` list; absence means null, never an error.
    fn get_output(&self, reference: &Value, name: &Value) -> Result<Value, Diagnostics> {
        if reference.is_unknown() || name.is_unknown() {
            return Ok(merge_arg_marks(
                Value::unknown(),
                std::slice::from_ref(reference),
            ));
        }
        let name = name
            .as_str()
            .ok_or_else(|| Diagnostics::error("getOutput: name must be a string"))?;

        let outputs = reference.get("outputs");
        let container_secret = reference.is_secret()
            || outputs.map(Value::is_secret).unwrap_or(false);

        let mut value = outputs
            .and_then(|outputs| outputs.get(name))
            .cloned()
            .unwrap_or_else(Value::null);

        if container_secret {
            value = value.mark_secret();
        }

        let declared_secret = reference
            .get("secretOutputNames")
            .and_then(Value::as_sequence)
            .map(|names| names.iter().any(|n| n.as_str() == Some(name)))
            .unwrap_or(false);
        if declared_secret && !value.is_secret() {
            value = value.mark_secret();
        }

        Ok(value)
    }

    // ─── invoke ─────────────────────────────────────────────────────────────

    async fn invoke_fn(&self, mut values: Vec<Value>) -> Result<Value, Diagnostics> {
        if values.len() < 2 || values.len() > 3 {
            return Err(Diagnostics::error(
                "invoke: expected (token, args) with optional options",
            ));
        }
        let options = if values.len() == 3 {
            Some(values.pop().unwrap())
        } else {
            None
        };
        let args_value = values.pop().unwrap();
        let token_value = values.pop().unwrap();

        let token = token_value
            .as_str()
            .ok_or_else(|| Diagnostics::error("invoke: token must be a string"))?;
        let token = canonicalize_token(token);
        let args = args_value
            .as_entries()
            .ok_or_else(|| Diagnostics::error("invoke: arguments must be an object"))?;

        let loader = self.require_loader()?;
        let monitor = self.require_monitor()?;

        let package = loader
            .load_package(&PackageRef {
                name: package_of_token(&token).to_string(),
                version: None,
                download_url: None,
            })
            .await
            .map_err(|e| Diagnostics::error(e.to_string()))?;

        let (function_token, function_schema) = package
            .find_function(&token)
            .ok_or_else(|| Diagnostics::error(format!("unknown function '{}'", token)))?;

        let (dependency_urns, provider) = decode_call_options(options.as_ref())?;

        let wire_args: BTreeMap<String, PropertyValue> = args
            .iter()
            .map(|(k, v)| (k.clone(), to_wire_plain(v)))
            .collect();

        let result = monitor
            .invoke(&function_token, wire_args, provider.as_deref())
            .await
            .map_err(|e| Diagnostics::error(e.to_string()))?;
        if !result.failures.is_empty() {
            return Err(failures_diagnostic(&function_token, &result.failures));
        }

        let entries: BTreeMap<String, Value> = result
            .ret
            .iter()
            .map(|(k, v)| (k.clone(), from_wire(v)))
            .collect();

        let mut out = if function_schema.returns_object {
            Value::object(entries)
        } else if entries.len() == 1 {
            entries.into_values().next().unwrap()
        } else {
            return Err(Diagnostics::error(format!(
                "function '{}' must return exactly one property",
                function_token
            )));
        };
        for urn in dependency_urns {
            out = out.with_mark(Mark::Dependency(urn));
        }
        Ok(out)
    }

    // ─── call ───────────────────────────────────────────────────────────────

    async fn call_fn(&self, mut values: Vec<Value>) -> Result<Value, Diagnostics> {
        if values.len() < 3 || values.len() > 4 {
            return Err(Diagnostics::error(
                "call: expected (self, method, args) with optional options",
            ));
        }
        let options = if values.len() == 4 {
            Some(values.pop().unwrap())
        } else {
            None
        };
        let args_value = values.pop().unwrap();
        let method_value = values.pop().unwrap();
        let receiver = values.pop().unwrap();

        let type_token = known_string(&receiver, "__type")
            .ok_or_else(|| Diagnostics::error("call: receiver has no known '__type'"))?;
        let urn = known_string(&receiver, "urn")
            .ok_or_else(|| Diagnostics::error("call: receiver has no known 'urn'"))?;
        let id = known_string(&receiver, "id")
            .ok_or_else(|| Diagnostics::error("call: receiver has no known 'id'"))?;
        let method = method_value
            .as_str()
            .ok_or_else(|| Diagnostics::error("call: method must be a string"))?;
        let args = args_value
            .as_entries()
            .ok_or_else(|| Diagnostics::error("call: arguments must be an object"))?;

        let loader = self.require_loader()?;
        let monitor = self.require_monitor()?;

        let package = loader
            .load_package(&PackageRef {
                name: package_of_token(&type_token).to_string(),
                version: None,
                download_url: None,
            })
            .await
            .map_err(|e| Diagnostics::error(e.to_string()))?;

        let resource = package.find_resource(&type_token).ok_or_else(|| {
            Diagnostics::error(format!("unknown resource type '{}'", type_token))
        })?;
        let function_token = resource.methods.get(method).cloned().ok_or_else(|| {
            Diagnostics::error(format!("unknown method '{}' on {}", method, type_token))
        })?;

        let (dependency_urns, _) = decode_call_options(options.as_ref())?;

        // Output values are preserved on call arguments; the receiver
        // itself travels as a first-class resource reference.
        let mut wire_args: BTreeMap<String, PropertyValue> = args
            .iter()
            .map(|(k, v)| (k.clone(), to_wire(v)))
            .collect();
        wire_args.insert(
            "__self__".to_string(),
            PropertyValue::ResourceReference {
                urn,
                id: Some(id),
            },
        );

        let result = monitor
            .call(&function_token, wire_args, None)
            .await
            .map_err(|e| Diagnostics::error(e.to_string()))?;
        if !result.failures.is_empty() {
            return Err(failures_diagnostic(&function_token, &result.failures));
        }

        let entries: BTreeMap<String, Value> = result
            .ret
            .iter()
            .map(|(k, v)| (k.clone(), from_wire(v)))
            .collect();

        let returns_object = package
            .find_function(&function_token)
            .map(|(_, schema)| schema.returns_object)
            .unwrap_or(true);

        let mut out = if returns_object {
            Value::object(entries)
        } else if entries.len() == 1 {
            entries.into_values().next().unwrap()
        } else {
            return Err(Diagnostics::error(format!(
                "method '{}' must return exactly one property",
                function_token
            )));
        };
        for urn in dependency_urns {
            out = out.with_mark(Mark::Dependency(urn));
        }
        Ok(out)
    }

    // ─── assetArchive ───────────────────────────────────────────────────────

    fn asset_archive(&self, entries: &Value) -> Result<Value, Diagnostics> {
        if entries.is_unknown() {
            return Ok(entries.clone());
        }
        let entries = entries
            .as_entries()
            .ok_or_else(|| Diagnostics::error("assetArchive: argument must be a map"))?;
        let mut assets = BTreeMap::new();
        for (name, value) in entries {
            let entry = match &value.kind {
                ValueKind::Asset(asset) => AssetOrArchive::Asset(asset.clone()),
                ValueKind::Archive(archive) => AssetOrArchive::Archive(archive.clone()),
                _ => {
                    return Err(Diagnostics::error(format!(
                        "assetArchive: entry '{}' is neither an asset nor an archive",
                        name
                    )))
                }
            };
            assets.insert(name.clone(), entry);
        }
        Ok(Value::archive(Archive::assets(assets)))
    }

    fn require_monitor(&self) -> Result<&Arc<dyn Monitor>, Diagnostics> {
        self.monitor
            .as_ref()
            .ok_or_else(|| Diagnostics::error("resource monitor is not available"))
    }

    fn require_loader(&self) -> Result<&Arc<dyn SchemaLoader>, Diagnostics> {
        self.loader
            .as_ref()
            .ok_or_else(|| Diagnostics::error("schema loader is not available"))
    }
}

// ─── Option Decoding ─────────────────────────────────────────────────────────

/// Decode the options object shared by `invoke` and `call`: `dependsOn`
/// (resource objects with known URNs) and `provider` (a resource object
/// lowered to `urn::id`).
fn decode_call_options(
    options: Option<&Value>,
) -> Result<(Vec<String>, Option<String>), Diagnostics> {
    let mut dependency_urns = Vec::new();
    let mut provider = None;

    let Some(options) = options else {
        return Ok((dependency_urns, provider));
    };
    if options.is_null() {
        return Ok((dependency_urns, provider));
    }
    let entries = options
        .as_entries()
        .ok_or_else(|| Diagnostics::error("options must be an object"))?;

    if let Some(depends_on) = entries.get("dependsOn") {
        let resources = depends_on
            .as_sequence()
            .ok_or_else(|| Diagnostics::error("dependsOn must be a list of resources"))?;
        for resource in resources {
            let urn = known_string(resource, "urn").ok_or_else(|| {
                Diagnostics::error("dependsOn resource has no known 'urn'")
            })?;
            dependency_urns.push(urn);
        }
    }

    if let Some(value) = entries.get("provider") {
        provider = Some(provider_reference(value)?);
    }

    Ok((dependency_urns, provider))
}

/// Lower a provider resource object to the `urn::id` form the monitor
/// expects. A computed id falls back to the unknown-id sentinel.
pub(crate) fn provider_reference(provider: &Value) -> Result<String, Diagnostics> {
    let urn = known_string(provider, "urn")
        .ok_or_else(|| Diagnostics::error("provider resource has no known 'urn'"))?;
    let id = known_string(provider, "id").unwrap_or_else(|| UNKNOWN_ID.to_string());
    Ok(format!("{}::{}", urn, id))
}

fn known_string(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn resource_attribute(resource: &Value, key: &str) -> Result<Value, Diagnostics> {
    if resource.is_unknown() {
        return Ok(resource.clone());
    }
    resource
        .get(key)
        .map(|v| v.clone().with_marks(&resource.marks))
        .ok_or_else(|| Diagnostics::error(format!("value has no attribute '{}'", key)))
}

fn failures_diagnostic(
    token: &str,
    failures: &[crate::rpc::CheckFailure],
) -> Diagnostics {
    let bullets: Vec<String> = failures
        .iter()
        .map(|f| {
            if f.property.is_empty() {
                format!("- {}", f.reason)
            } else {
                format!("- {}: {}", f.property, f.reason)
            }
        })
        .collect();
    Diagnostics(vec![crate::program::Diagnostic::error(format!(
        "call of '{}' failed",
        token
    ))
    .with_detail(bullets.join("\n"))])
}

fn merge_arg_marks(mut value: Value, args: &[Value]) -> Value {
    for arg in args {
        value.marks.extend(arg.marks.iter().cloned());
    }
    value
}

// ─── Pure Helpers ────────────────────────────────────────────────────────────

fn pure_helper(name: &str, values: &[Value]) -> Result<Value, Diagnostics> {
    match name {
        "split" => {
            arity(name, values, 2)?;
            let separator = string_arg(name, &values[0], "separator")?;
            let subject = string_arg(name, &values[1], "string")?;
            Ok(Value::list(
                subject
                    .split(separator.as_str())
                    .map(Value::string)
                    .collect(),
            ))
        }
        "join" => {
            arity(name, values, 2)?;
            let separator = string_arg(name, &values[0], "separator")?;
            let items = values[1]
                .as_sequence()
                .ok_or_else(|| Diagnostics::error("join: second argument must be a list"))?;
            let parts: Result<Vec<String>, Diagnostics> = items
                .iter()
                .map(|item| match &item.kind {
                    ValueKind::String(s) => Ok(s.clone()),
                    ValueKind::Number(n) => Ok(n.to_string()),
                    ValueKind::Bool(b) => Ok(b.to_string()),
                    _ => Err(Diagnostics::error("join: elements must be primitive")),
                })
                .collect();
            Ok(Value::string(parts?.join(&separator)))
        }
        "length" => {
            arity(name, values, 1)?;
            let length = match &values[0].kind {
                ValueKind::String(s) => s.len(),
                ValueKind::List(items) | ValueKind::Tuple(items) => items.len(),
                ValueKind::Map(entries) | ValueKind::Object(entries) => entries.len(),
                _ => {
                    return Err(Diagnostics::error(
                        "length: argument must be a string, list, or map",
                    ))
                }
            };
            Ok(Value::number(length as f64))
        }
        "element" => {
            arity(name, values, 2)?;
            let items = values[0]
                .as_sequence()
                .ok_or_else(|| Diagnostics::error("element: first argument must be a list"))?;
            let index = values[1]
                .as_number()
                .ok_or_else(|| Diagnostics::error("element: index must be a number"))?;
            if items.is_empty() {
                return Err(Diagnostics::error("element: list is empty"));
            }
            // Standard wrap-around indexing
            Ok(items[(index as usize) % items.len()].clone())
        }
        "singleOrNone" => {
            arity(name, values, 1)?;
            let items = values[0].as_sequence().ok_or_else(|| {
                Diagnostics::error("singleOrNone: argument must be a list")
            })?;
            match items {
                [] => Ok(Value::null()),
                [single] => Ok(single.clone()),
                _ => Err(Diagnostics::error(
                    "singleOrNone: list has more than one element",
                )),
            }
        }
        "entries" => {
            arity(name, values, 1)?;
            let entries = values[0]
                .as_entries()
                .ok_or_else(|| Diagnostics::error("entries: argument must be a map"))?;
            Ok(Value::list(
                entries
                    .iter()
                    .map(|(key, value)| {
                        let mut entry = BTreeMap::new();
                        entry.insert("key".to_string(), Value::string(key.clone()));
                        entry.insert("value".to_string(), value.clone());
                        Value::object(entry)
                    })
                    .collect(),
            ))
        }
        "lookup" => {
            arity(name, values, 3)?;
            let entries = values[0]
                .as_entries()
                .ok_or_else(|| Diagnostics::error("lookup: first argument must be a map"))?;
            let key = string_arg(name, &values[1], "key")?;
            Ok(entries.get(&key).cloned().unwrap_or_else(|| values[2].clone()))
        }
        "toBase64" => {
            arity(name, values, 1)?;
            let subject = string_arg(name, &values[0], "string")?;
            Ok(Value::string(base64_encode(subject.as_bytes())))
        }
        "fromBase64" => {
            arity(name, values, 1)?;
            let subject = string_arg(name, &values[0], "string")?;
            let bytes = base64_decode(&subject)
                .ok_or_else(|| Diagnostics::error("fromBase64: invalid base64 input"))?;
            String::from_utf8(bytes)
                .map(Value::string)
                .map_err(|_| Diagnostics::error("fromBase64: decoded bytes are not UTF-8"))
        }
        _ => Err(Diagnostics::error(format!("unknown function '{}'", name))),
    }
}

fn arity(name: &str, values: &[Value], expected: usize) -> Result<(), Diagnostics> {
    if values.len() != expected {
        return Err(Diagnostics::error(format!(
            "{}: expected {} argument(s), got {}",
            name,
            expected,
            values.len()
        )));
    }
    Ok(())
}

fn string_arg(name: &str, value: &Value, what: &str) -> Result<String, Diagnostics> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Diagnostics::error(format!("{}: {} must be a string", name, what)))
}

// ─── Base64 ──────────────────────────────────────────────────────────────────

const BASE64_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4 / 3 + 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = if chunk.len() > 1 { chunk[1] as u32 } else { 0 };
        let b2 = if chunk.len() > 2 { chunk[2] as u32 } else { 0 };
        let n = (b0 << 16) | (b1 << 8) | b2;
        out.push(BASE64_CHARS[(n >> 18 & 63) as usize] as char);
        out.push(BASE64_CHARS[(n >> 12 & 63) as usize] as char);
        if chunk.len() > 1 {
            out.push(BASE64_CHARS[(n >> 6 & 63) as usize] as char);
        } else {
            out.push('=');
        }
        if chunk.len() > 2 {
            out.push(BASE64_CHARS[(n & 63) as usize] as char);
        } else {
            out.push('=');
        }
    }
    out
}

fn base64_decode(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 3 / 4);
    let mut accumulator: u32 = 0;
    let mut bits = 0;
    for byte in input.bytes() {
        if byte == b'=' || byte == b'\n' || byte == b'\r' {
            continue;
        }
        let value = BASE64_CHARS.iter().position(|&c| c == byte)? as u32;
        accumulator = (accumulator << 6) | value;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((accumulator >> bits) as u8);
        }
    }
    Some(out)
}
