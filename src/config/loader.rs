use std::collections::HashMap;

use crate::eval::Evaluator;
use crate::program::{ConfigVariable, Diagnostic, Diagnostics, ModelType, Node, Program};
use crate::value::Value;

/// Bind every declared config variable into the evaluation context.
/// Diagnostics are collected across all variables and surfaced once.
pub async fn bind_config(
    program: &Program,
    project: &str,
    config: &HashMap<String, String>,
    secret_keys: &[String],
    evaluator: &Evaluator,
) -> Result<(), Diagnostics> {
    let mut diagnostics = Diagnostics::new();
    for node in &program.nodes {
        let Node::Config(variable) = node else {
            continue;
        };
        if let Err(errors) = bind_one(variable, project, config, secret_keys, evaluator).await {
            diagnostics.extend(errors);
        }
    }
    diagnostics.into_result()
}

async fn bind_one(
    variable: &ConfigVariable,
    project: &str,
    config: &HashMap<String, String>,
    secret_keys: &[String],
    evaluator: &Evaluator,
) -> Result<(), Diagnostics> {
    let logical = variable.logical_name();
    // Names may arrive already qualified with a namespace
    let key = if logical.contains(':') {
        logical.to_string()
    } else {
        format!("{}:{}", project, logical)
    };

    let value = match config.get(&key) {
        Some(raw) => parse_raw(raw, &variable.model_type).map_err(|mut diagnostics| {
            if let Some(range) = &variable.range {
                for d in &mut diagnostics.0 {
                    d.subject.get_or_insert_with(|| range.clone());
                }
            }
            diagnostics
        })?,
        None => match &variable.default {
            Some(default) => evaluator.eval(default).await?,
            None if variable.nullable => Value::null(),
            None => {
                let mut diagnostic = Diagnostic::error(format!(
                    "missing required configuration variable '{}'",
                    key
                ));
                if let Some(range) = &variable.range {
                    diagnostic = diagnostic.with_subject(range.clone());
                }
                return Err(diagnostic.into());
            }
        },
    };

    let value = if secret_keys.iter().any(|k| k == &key) {
        value.mark_secret()
    } else {
        value
    };

    evaluator.define(&variable.name, value).await
}

/// Parse a raw config string according to the declared model type.
/// Scalars parse strictly; complex types decode from JSON; `dynamic`
/// tries JSON and falls back to the verbatim string.
pub fn parse_raw(raw: &str, model_type: &ModelType) -> Result<Value, Diagnostics> {
    match model_type {
        ModelType::String => Ok(Value::string(raw)),
        ModelType::Bool => match raw {
            "true" => Ok(Value::bool(true)),
            "false" => Ok(Value::bool(false)),
            _ => Err(Diagnostics::error(format!(
                "expected 'true' or 'false', got '{}'",
                raw
            ))),
        },
        ModelType::Int => raw
            .parse::<i64>()
            .map(|n| Value::number(n as f64))
            .map_err(|_| Diagnostics::error(format!("expected an integer, got '{}'", raw))),
        ModelType::Number => raw
            .parse::<f64>()
            .map(Value::number)
            .map_err(|_| Diagnostics::error(format!("expected a number, got '{}'", raw))),
        ModelType::Dynamic => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(json) => Ok(dynamic_from_json(&json)),
            Err(_) => Ok(Value::string(raw)),
        },
        _ => {
            let json: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
                Diagnostics::error(format!("invalid JSON for configuration value: {}", e))
            })?;
            decode_json(&json, model_type)
        }
    }
}

/// Type-directed JSON decoding for complex config values.
fn decode_json(json: &serde_json::Value, model_type: &ModelType) -> Result<Value, Diagnostics> {
    match model_type {
        ModelType::String => json
            .as_str()
            .map(Value::string)
            .ok_or_else(|| type_mismatch("string", json)),
        ModelType::Bool => json
            .as_bool()
            .map(Value::bool)
            .ok_or_else(|| type_mismatch("boolean", json)),
        ModelType::Int => match json.as_f64() {
            Some(n) if n.fract() == 0.0 => Ok(Value::number(n)),
            _ => Err(type_mismatch("integer", json)),
        },
        ModelType::Number => json
            .as_f64()
            .map(Value::number)
            .ok_or_else(|| type_mismatch("number", json)),
        ModelType::List(element) => {
            let items = json
                .as_array()
                .ok_or_else(|| type_mismatch("list", json))?;
            Ok(Value::list(
                items
                    .iter()
                    .map(|item| decode_json(item, element))
                    .collect::<Result<_, _>>()?,
            ))
        }
        ModelType::Map(element) => {
            let entries = json
                .as_object()
                .ok_or_else(|| type_mismatch("map", json))?;
            Ok(Value::map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), decode_json(v, element)?)))
                    .collect::<Result<_, Diagnostics>>()?,
            ))
        }
        ModelType::Object(fields) => {
            let entries = json
                .as_object()
                .ok_or_else(|| type_mismatch("object", json))?;
            let mut decoded = std::collections::BTreeMap::new();
            for (name, field_type) in fields {
                let value = match entries.get(name) {
                    Some(field) => decode_json(field, field_type)?,
                    None => Value::null(),
                };
                decoded.insert(name.clone(), value);
            }
            Ok(Value::object(decoded))
        }
        ModelType::Tuple(elements) => {
            let items = json
                .as_array()
                .ok_or_else(|| type_mismatch("tuple", json))?;
            if items.len() != elements.len() {
                return Err(Diagnostics::error(format!(
                    "expected {} elements, got {}",
                    elements.len(),
                    items.len()
                )));
            }
            Ok(Value::tuple(
                items
                    .iter()
                    .zip(elements)
                    .map(|(item, element)| decode_json(item, element))
                    .collect::<Result<_, _>>()?,
            ))
        }
        ModelType::Union(alternatives) => {
            for alternative in alternatives {
                if let Ok(value) = decode_json(json, alternative) {
                    return Ok(value);
                }
            }
            Err(Diagnostics::error(
                "value matches no alternative of the union type",
            ))
        }
        ModelType::Dynamic => Ok(dynamic_from_json(json)),
    }
}

fn dynamic_from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::null(),
        serde_json::Value::Bool(b) => Value::bool(*b),
        serde_json::Value::Number(n) => Value::number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::string(s.clone()),
        serde_json::Value::Array(items) => {
            Value::sequence(items.iter().map(dynamic_from_json).collect())
        }
        serde_json::Value::Object(entries) => Value::object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), dynamic_from_json(v)))
                .collect(),
        ),
    }
}

fn type_mismatch(expected: &str, got: &serde_json::Value) -> Diagnostics {
    Diagnostics::error(format!("expected a {}, got {}", expected, got))
}
