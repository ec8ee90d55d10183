use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tracing::debug;

use super::options;
use crate::eval::Evaluator;
use crate::program::{PackageRef, ResourceNode};
use crate::rpc::{Monitor, RegisterRequest, RegisterResult, SchemaLoader};
use crate::schema::{canonicalize_token, package_of_token};
use crate::value::{from_wire, to_wire_plain, Mark, PropertyValue, Value};

/// Register one resource with the monitor and bind its state object.
pub async fn register(
    node: &ResourceNode,
    evaluator: &Evaluator,
    monitor: &Arc<dyn Monitor>,
    loader: &Arc<dyn SchemaLoader>,
    stack_urn: &str,
) -> Result<()> {
    let token = canonicalize_token(&node.token);

    // 1. Evaluate all input attributes.
    let mut inputs: Vec<(String, Value)> = Vec::with_capacity(node.inputs.len());
    for (key, expr) in &node.inputs {
        let value = evaluator.eval(expr).await.map_err(|e| anyhow!("{}", e))?;
        inputs.push((key.clone(), value));
    }

    // 2. Collect per-property dependencies and the flattened list.
    let mut property_dependencies: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut dependencies: BTreeSet<String> = BTreeSet::new();
    for (key, value) in &inputs {
        let mut urns = BTreeSet::new();
        value.collect_dependencies(&mut urns);
        if !urns.is_empty() {
            dependencies.extend(urns.iter().cloned());
            property_dependencies.insert(key.clone(), urns.into_iter().collect());
        }
    }

    // 3. Resolve the schema; an unknown schema means a custom resource.
    let package_ref = node.package.clone().unwrap_or_else(|| PackageRef {
        name: package_of_token(&token).to_string(),
        version: None,
        download_url: None,
    });
    let package = match loader.load_package(&package_ref).await {
        Ok(package) => Some(package),
        Err(error) => {
            debug!(package = %package_ref.name, %error, "Schema unavailable");
            None
        }
    };
    let resource_schema = package.as_deref().and_then(|p| p.find_resource(&token));
    let custom = resource_schema
        .map(|schema| !schema.is_component)
        .unwrap_or(true);

    // 4. Translate options and overlay their dependency list.
    let translated = options::translate(node.options.as_ref(), evaluator).await?;
    dependencies.extend(translated.depends_on.iter().cloned());

    // 5. Marshal inputs. The object field carries secrets and unknowns but
    //    no output wrappers; lineage travels in property_dependencies.
    let object: BTreeMap<String, PropertyValue> = inputs
        .iter()
        .map(|(key, value)| (key.clone(), to_wire_plain(value)))
        .collect();

    let request = RegisterRequest {
        type_token: token.clone(),
        name: node.logical_name().to_string(),
        custom,
        object,
        parent: translated
            .parent
            .unwrap_or_else(|| stack_urn.to_string()),
        dependencies: dependencies.into_iter().collect(),
        provider: translated.provider,
        providers: translated.providers,
        property_dependencies,
        additional_secret_outputs: translated.additional_secret_outputs,
        ignore_changes: translated.ignore_changes,
        replace_on_changes: translated.replace_on_changes,
        hide_diffs: translated.hide_diffs,
        aliases: translated.aliases,
        import_id: translated.import_id,
        protect: translated.protect,
        retain_on_delete: translated.retain_on_delete,
        delete_before_replace: translated.delete_before_replace,
        replace_with: translated.replace_with,
        replacement_trigger: translated.replacement_trigger,
        version: translated.version,
        plugin_download_url: translated.plugin_download_url,
        deleted_with: translated.deleted_with,
    };

    // 6-7. Register and check the response.
    let response = monitor.register_resource(request).await?;
    if response.result != RegisterResult::Success || response.urn.is_empty() {
        bail!("Registration of '{}' did not succeed", node.name);
    }
    debug!(name = %node.name, urn = %response.urn, "Resource registered");

    // 8. Unmarshal outputs and overlay the synthetic keys. Schema-declared
    //    properties the provider did not return are present but unknown.
    let mut state: BTreeMap<String, Value> = response
        .object
        .iter()
        .map(|(key, value)| (key.clone(), from_wire(value)))
        .collect();
    state.insert("id".to_string(), Value::string(response.id.clone()));
    state.insert("urn".to_string(), Value::string(response.urn.clone()));
    state.insert("__type".to_string(), Value::string(token));
    state.insert(
        "__name".to_string(),
        Value::string(node.logical_name().to_string()),
    );
    if let Some(schema) = resource_schema {
        for property in &schema.outputs {
            state
                .entry(property.clone())
                .or_insert_with(Value::unknown);
        }
    }

    // 9. Bind the state object, carrying this resource's URN as lineage.
    let bound = Value::object(state).with_mark(Mark::Dependency(response.urn));
    evaluator
        .define(&node.name, bound)
        .await
        .map_err(|e| anyhow!("{}", e))?;

    Ok(())
}
