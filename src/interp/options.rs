use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Result};

use crate::eval::builtins::provider_reference;
use crate::eval::Evaluator;
use crate::program::{Expression, ResourceOptions};
use crate::rpc::Alias;
use crate::value::{to_wire, PropertyValue, Value, ValueKind};

/// Resource options lowered onto registration-request fields.
#[derive(Debug, Clone, Default)]
pub struct TranslatedOptions {
    pub additional_secret_outputs: Vec<String>,
    pub ignore_changes: Vec<String>,
    pub replace_on_changes: Vec<String>,
    pub hide_diffs: Vec<String>,
    pub aliases: Vec<Alias>,
    pub depends_on: Vec<String>,
    pub import_id: String,
    pub protect: Option<bool>,
    pub retain_on_delete: Option<bool>,
    pub delete_before_replace: Option<bool>,
    pub replace_with: Vec<String>,
    pub replacement_trigger: Option<PropertyValue>,
    pub version: String,
    pub plugin_download_url: String,
    pub parent: Option<String>,
    pub provider: String,
    pub providers: BTreeMap<String, String>,
    pub deleted_with: String,
}

/// Evaluate and translate a resource's options. Each option expression is
/// evaluated independently; null and unknown results are skipped. Every
/// shape error is the node's error.
pub async fn translate(
    options: Option<&ResourceOptions>,
    evaluator: &Evaluator,
) -> Result<TranslatedOptions> {
    let mut translated = TranslatedOptions::default();
    let Some(options) = options else {
        return Ok(translated);
    };

    if let Some(value) = eval_option(&options.additional_secret_outputs, evaluator).await? {
        translated.additional_secret_outputs =
            string_list(&value, "additionalSecretOutputs")?;
    }
    if let Some(value) = eval_option(&options.ignore_changes, evaluator).await? {
        translated.ignore_changes = string_list(&value, "ignoreChanges")?;
    }
    if let Some(value) = eval_option(&options.replace_on_changes, evaluator).await? {
        translated.replace_on_changes = string_list(&value, "replaceOnChanges")?;
    }
    if let Some(value) = eval_option(&options.hide_diffs, evaluator).await? {
        translated.hide_diffs = string_list(&value, "hideDiffs")?;
    }
    if let Some(value) = eval_option(&options.aliases, evaluator).await? {
        translated.aliases = aliases(&value)?;
    }
    if let Some(value) = eval_option(&options.depends_on, evaluator).await? {
        translated.depends_on = resource_urns(&value, "dependsOn")?;
    }
    if let Some(value) = eval_option(&options.import_id, evaluator).await? {
        translated.import_id = string_option(&value, "importID")?;
    }
    if let Some(value) = eval_option(&options.protect, evaluator).await? {
        translated.protect = Some(bool_option(&value, "protect")?);
    }
    if let Some(value) = eval_option(&options.retain_on_delete, evaluator).await? {
        translated.retain_on_delete = Some(bool_option(&value, "retainOnDelete")?);
    }
    if let Some(value) = eval_option(&options.delete_before_replace, evaluator).await? {
        translated.delete_before_replace = Some(bool_option(&value, "deleteBeforeReplace")?);
    }
    if let Some(value) = eval_option(&options.replace_with, evaluator).await? {
        translated.replace_with = resource_urns(&value, "replaceWith")?;
    }
    if let Some(value) = eval_option(&options.replacement_trigger, evaluator).await? {
        // Marshalled verbatim, lineage and all
        translated.replacement_trigger = Some(to_wire(&value));
    }
    if let Some(value) = eval_option(&options.version, evaluator).await? {
        translated.version = string_option(&value, "version")?;
    }
    if let Some(value) = eval_option(&options.plugin_download_url, evaluator).await? {
        translated.plugin_download_url = string_option(&value, "pluginDownloadURL")?;
    }
    if let Some(value) = eval_option(&options.parent, evaluator).await? {
        translated.parent = Some(resource_urn(&value, "parent")?);
    }
    if let Some(value) = eval_option(&options.provider, evaluator).await? {
        translated.provider = provider_reference(&value).map_err(|e| anyhow!("{}", e))?;
    }
    if let Some(value) = eval_option(&options.providers, evaluator).await? {
        translated.providers = providers_map(&value)?;
    }
    if let Some(value) = eval_option(&options.deleted_with, evaluator).await? {
        translated.deleted_with = resource_urn(&value, "deletedWith")?;
    }

    Ok(translated)
}

/// Evaluate one option expression. None means the option was absent or its
/// value was null/unknown and the field keeps its default.
async fn eval_option(
    expr: &Option<Expression>,
    evaluator: &Evaluator,
) -> Result<Option<Value>> {
    let Some(expr) = expr else {
        return Ok(None);
    };
    let value = evaluator.eval(expr).await.map_err(|e| anyhow!("{}", e))?;
    if value.is_null() || value.is_unknown() {
        return Ok(None);
    }
    Ok(Some(value))
}

/// An array of strings; null and unknown elements are skipped, anything
/// else that is not a string fails.
fn string_list(value: &Value, option: &str) -> Result<Vec<String>> {
    let items = value
        .as_sequence()
        .ok_or_else(|| anyhow!("{}: expected a list", option))?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if item.is_null() || item.is_unknown() {
            continue;
        }
        match item.as_str() {
            Some(s) => out.push(s.to_string()),
            None => bail!("{}: expected a list of strings", option),
        }
    }
    Ok(out)
}

fn string_option(value: &Value, option: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{}: expected a string", option))
}

fn bool_option(value: &Value, option: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| anyhow!("{}: expected a boolean", option))
}

/// A resource object's URN.
fn resource_urn(value: &Value, option: &str) -> Result<String> {
    value
        .get("urn")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{}: resource has no known 'urn'", option))
}

fn resource_urns(value: &Value, option: &str) -> Result<Vec<String>> {
    let items = value
        .as_sequence()
        .ok_or_else(|| anyhow!("{}: expected a list of resources", option))?;
    items
        .iter()
        .map(|item| resource_urn(item, option))
        .collect()
}

/// Aliases: strings are complete URNs, objects are specs with optional
/// name/type and either a parent resource or an explicit no-parent flag.
fn aliases(value: &Value) -> Result<Vec<Alias>> {
    let items = value
        .as_sequence()
        .ok_or_else(|| anyhow!("aliases: expected a list"))?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if item.is_null() || item.is_unknown() {
            continue;
        }
        if let Some(urn) = item.as_str() {
            out.push(Alias::Urn(urn.to_string()));
            continue;
        }
        let entries = item
            .as_entries()
            .ok_or_else(|| anyhow!("aliases: elements must be strings or objects"))?;
        let name = entries
            .get("name")
            .map(|v| string_option(v, "aliases.name"))
            .transpose()?;
        let resource_type = entries
            .get("type")
            .map(|v| string_option(v, "aliases.type"))
            .transpose()?;
        let no_parent = entries
            .get("noParent")
            .map(|v| bool_option(v, "aliases.noParent"))
            .transpose()?
            .unwrap_or(false);
        let parent_urn = entries
            .get("parent")
            .map(|v| resource_urn(v, "aliases.parent"))
            .transpose()?;
        if no_parent && parent_urn.is_some() {
            bail!("aliases: 'noParent' and 'parent' are mutually exclusive");
        }
        out.push(Alias::Spec {
            name,
            resource_type,
            parent_urn,
            no_parent,
        });
    }
    Ok(out)
}

/// Providers: either a map of name → provider resource, or an array where
/// each name derives from the third segment of the provider's URN type.
fn providers_map(value: &Value) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    match &value.kind {
        ValueKind::Map(entries) | ValueKind::Object(entries) => {
            for (name, provider) in entries {
                out.insert(
                    name.clone(),
                    provider_reference(provider).map_err(|e| anyhow!("{}", e))?,
                );
            }
        }
        ValueKind::List(items) | ValueKind::Tuple(items) => {
            for provider in items {
                let urn = resource_urn(provider, "providers")?;
                let name = provider_package_from_urn(&urn).ok_or_else(|| {
                    anyhow!("providers: cannot derive a package name from '{}'", urn)
                })?;
                out.insert(
                    name,
                    provider_reference(provider).map_err(|e| anyhow!("{}", e))?,
                );
            }
        }
        _ => bail!("providers: expected a map or a list of provider resources"),
    }
    Ok(out)
}

/// The package name is the third token segment of the provider URN's type,
/// e.g. `urn:…::pulumi:providers:aws::name` → `aws`.
fn provider_package_from_urn(urn: &str) -> Option<String> {
    let segments: Vec<&str> = urn.split("::").collect();
    if segments.len() < 2 {
        return None;
    }
    let qualified_type = segments[segments.len() - 2];
    let leaf_type = qualified_type.rsplit('$').next().unwrap_or(qualified_type);
    leaf_type.split(':').nth(2).map(str::to_string)
}
