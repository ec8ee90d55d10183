use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};

use crate::asset::{Archive, Asset, AssetOrArchive};

/// The wire form of a value: what travels inside property bags to and from
/// the resource monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<PropertyValue>),
    Object(BTreeMap<String, PropertyValue>),
    /// A value computed at deployment time, not yet known.
    Computed,
    Asset(Asset),
    Archive(Archive),
    /// A reference to a registered resource.
    ResourceReference { urn: String, id: Option<String> },
    /// A confidential value.
    Secret(Box<PropertyValue>),
    /// The canonical carrier of dependency lineage and knownness.
    Output(Box<OutputValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputValue {
    /// The payload; `Null` when `known` is false.
    pub element: PropertyValue,
    pub known: bool,
    pub secret: bool,
    pub dependencies: Vec<String>,
}

/// Reserved key marking the non-JSON variants in the self-describing
/// encoding. Plain objects that happen to contain it are escaped.
const KIND_KEY: &str = "$kind";

impl PropertyValue {
    /// Encode into the self-describing JSON form carried in property bags.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PropertyValue::Null => serde_json::Value::Null,
            PropertyValue::Bool(b) => serde_json::Value::Bool(*b),
            PropertyValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            PropertyValue::String(s) => serde_json::Value::String(s.clone()),
            PropertyValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(PropertyValue::to_json).collect())
            }
            PropertyValue::Object(entries) => {
                let map: serde_json::Map<String, serde_json::Value> = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                if map.contains_key(KIND_KEY) {
                    // Escape objects whose keys collide with the marker
                    serde_json::json!({ KIND_KEY: "object", "entries": map })
                } else {
                    serde_json::Value::Object(map)
                }
            }
            PropertyValue::Computed => serde_json::json!({ KIND_KEY: "computed" }),
            PropertyValue::Asset(asset) => asset_to_json(asset),
            PropertyValue::Archive(archive) => archive_to_json(archive),
            PropertyValue::ResourceReference { urn, id } => {
                let mut obj = serde_json::Map::new();
                obj.insert(KIND_KEY.into(), "ref".into());
                obj.insert("urn".into(), urn.clone().into());
                if let Some(id) = id {
                    obj.insert("id".into(), id.clone().into());
                }
                serde_json::Value::Object(obj)
            }
            PropertyValue::Secret(element) => {
                serde_json::json!({ KIND_KEY: "secret", "element": element.to_json() })
            }
            PropertyValue::Output(output) => {
                let mut obj = serde_json::Map::new();
                obj.insert(KIND_KEY.into(), "output".into());
                obj.insert("known".into(), output.known.into());
                obj.insert("secret".into(), output.secret.into());
                obj.insert(
                    "dependencies".into(),
                    serde_json::Value::Array(
                        output
                            .dependencies
                            .iter()
                            .map(|d| serde_json::Value::String(d.clone()))
                            .collect(),
                    ),
                );
                if output.known {
                    obj.insert("element".into(), output.element.to_json());
                }
                serde_json::Value::Object(obj)
            }
        }
    }

    /// Decode the self-describing JSON form. Fails on unrecognized markers;
    /// those indicate a protocol mismatch and are fatal.
    pub fn from_json(value: &serde_json::Value) -> Result<PropertyValue> {
        match value {
            serde_json::Value::Null => Ok(PropertyValue::Null),
            serde_json::Value::Bool(b) => Ok(PropertyValue::Bool(*b)),
            serde_json::Value::Number(n) => Ok(PropertyValue::Number(
                n.as_f64().context("Non-finite number in property bag")?,
            )),
            serde_json::Value::String(s) => Ok(PropertyValue::String(s.clone())),
            serde_json::Value::Array(items) => Ok(PropertyValue::Array(
                items
                    .iter()
                    .map(PropertyValue::from_json)
                    .collect::<Result<_>>()?,
            )),
            serde_json::Value::Object(map) => match map.get(KIND_KEY).and_then(|k| k.as_str()) {
                None => decode_plain_object(map),
                Some("object") => {
                    let entries = map
                        .get("entries")
                        .and_then(|e| e.as_object())
                        .context("Escaped object missing entries")?;
                    decode_plain_object(entries)
                }
                Some("computed") => Ok(PropertyValue::Computed),
                Some("secret") => {
                    let element = map.get("element").context("Secret missing element")?;
                    Ok(PropertyValue::Secret(Box::new(PropertyValue::from_json(
                        element,
                    )?)))
                }
                Some("output") => {
                    let known = map.get("known").and_then(|v| v.as_bool()).unwrap_or(false);
                    let secret = map.get("secret").and_then(|v| v.as_bool()).unwrap_or(false);
                    let dependencies = map
                        .get("dependencies")
                        .and_then(|v| v.as_array())
                        .map(|deps| {
                            deps.iter()
                                .filter_map(|d| d.as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default();
                    let element = if known {
                        map.get("element")
                            .map(PropertyValue::from_json)
                            .transpose()?
                            .unwrap_or(PropertyValue::Null)
                    } else {
                        PropertyValue::Null
                    };
                    Ok(PropertyValue::Output(Box::new(OutputValue {
                        element,
                        known,
                        secret,
                        dependencies,
                    })))
                }
                Some("ref") => Ok(PropertyValue::ResourceReference {
                    urn: map
                        .get("urn")
                        .and_then(|v| v.as_str())
                        .context("Resource reference missing urn")?
                        .to_string(),
                    id: map.get("id").and_then(|v| v.as_str()).map(str::to_string),
                }),
                Some("asset") => Ok(PropertyValue::Asset(asset_from_json(map)?)),
                Some("archive") => Ok(PropertyValue::Archive(archive_from_json(map)?)),
                Some(other) => bail!("Unsupported property-value marker: {}", other),
            },
        }
    }
}

fn decode_plain_object(
    map: &serde_json::Map<String, serde_json::Value>,
) -> Result<PropertyValue> {
    let entries = map
        .iter()
        .map(|(k, v)| Ok((k.clone(), PropertyValue::from_json(v)?)))
        .collect::<Result<BTreeMap<_, _>>>()?;
    Ok(PropertyValue::Object(entries))
}

// ─── Capsule Encoding ────────────────────────────────────────────────────────

fn asset_to_json(asset: &Asset) -> serde_json::Value {
    let hash = asset.content_hash().ok().flatten();
    let mut obj = serde_json::Map::new();
    obj.insert(KIND_KEY.into(), "asset".into());
    match asset {
        Asset::File { path } => {
            obj.insert("file".into(), path.to_string_lossy().into_owned().into());
        }
        Asset::Text { text } => {
            obj.insert("text".into(), text.clone().into());
        }
        Asset::Remote { uri } => {
            obj.insert("uri".into(), uri.clone().into());
        }
    }
    if let Some(hash) = hash {
        obj.insert("hash".into(), hash.into());
    }
    serde_json::Value::Object(obj)
}

fn asset_from_json(map: &serde_json::Map<String, serde_json::Value>) -> Result<Asset> {
    if let Some(path) = map.get("file").and_then(|v| v.as_str()) {
        Ok(Asset::File { path: path.into() })
    } else if let Some(text) = map.get("text").and_then(|v| v.as_str()) {
        Ok(Asset::Text { text: text.into() })
    } else if let Some(uri) = map.get("uri").and_then(|v| v.as_str()) {
        Ok(Asset::Remote { uri: uri.into() })
    } else {
        bail!("Asset with no file, text, or uri field")
    }
}

fn archive_to_json(archive: &Archive) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert(KIND_KEY.into(), "archive".into());
    match archive {
        Archive::File { path } => {
            obj.insert("file".into(), path.to_string_lossy().into_owned().into());
        }
        Archive::Remote { uri } => {
            obj.insert("uri".into(), uri.clone().into());
        }
        Archive::Assets(entries) => {
            let assets: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .map(|(name, entry)| {
                    let encoded = match entry {
                        AssetOrArchive::Asset(a) => asset_to_json(a),
                        AssetOrArchive::Archive(a) => archive_to_json(a),
                    };
                    (name.clone(), encoded)
                })
                .collect();
            obj.insert("assets".into(), serde_json::Value::Object(assets));
        }
    }
    serde_json::Value::Object(obj)
}

fn archive_from_json(map: &serde_json::Map<String, serde_json::Value>) -> Result<Archive> {
    if let Some(path) = map.get("file").and_then(|v| v.as_str()) {
        Ok(Archive::File { path: path.into() })
    } else if let Some(uri) = map.get("uri").and_then(|v| v.as_str()) {
        Ok(Archive::Remote { uri: uri.into() })
    } else if let Some(assets) = map.get("assets").and_then(|v| v.as_object()) {
        let entries = assets
            .iter()
            .map(|(name, encoded)| {
                let obj = encoded
                    .as_object()
                    .context("Archive entry is not an object")?;
                let entry = match obj.get(KIND_KEY).and_then(|k| k.as_str()) {
                    Some("asset") => AssetOrArchive::Asset(asset_from_json(obj)?),
                    Some("archive") => AssetOrArchive::Archive(archive_from_json(obj)?),
                    _ => bail!("Archive entry '{}' is neither asset nor archive", name),
                };
                Ok((name.clone(), entry))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Archive::Assets(entries))
    } else {
        bail!("Archive with no file, uri, or assets field")
    }
}
