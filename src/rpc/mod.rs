use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};

use crate::value::PropertyValue;

pub mod engine;
pub mod loader;
pub mod monitor;

pub use engine::{Engine, GrpcEngine};
pub use loader::{CachingLoader, GrpcLoader, SchemaLoader};
pub use monitor::{
    Alias, CallResult, CheckFailure, GrpcMonitor, Monitor, RegisterRequest, RegisterResponse,
    RegisterResult, UNKNOWN_ID,
};

/// Generated gRPC types for the resource-monitor protocol.
#[allow(clippy::all)]
pub mod monitorrpc {
    #![doc(hidden)]
    tonic::include_proto!("monitorrpc");
}

#[allow(clippy::all)]
pub mod enginerpc {
    #![doc(hidden)]
    tonic::include_proto!("enginerpc");
}

#[allow(clippy::all)]
pub mod loaderrpc {
    #![doc(hidden)]
    tonic::include_proto!("loaderrpc");
}

// ─── Property Bags ───────────────────────────────────────────────────────────

/// Encode a property map into a wire bag (msgpack of the self-describing
/// JSON form).
pub fn encode_bag(entries: &BTreeMap<String, PropertyValue>) -> Result<monitorrpc::PropertyBag> {
    let json = properties_to_json(entries);
    Ok(monitorrpc::PropertyBag {
        msgpack: rmp_serde::to_vec_named(&json).context("Failed to encode property bag")?,
        json: vec![],
    })
}

/// Encode a single property value into a wire bag.
pub fn encode_value_bag(value: &PropertyValue) -> Result<monitorrpc::PropertyBag> {
    Ok(monitorrpc::PropertyBag {
        msgpack: rmp_serde::to_vec_named(&value.to_json())
            .context("Failed to encode property bag")?,
        json: vec![],
    })
}

/// Decode a wire bag into a property map. An empty or null bag is an empty
/// map.
pub fn decode_bag(bag: &monitorrpc::PropertyBag) -> Result<BTreeMap<String, PropertyValue>> {
    let json = bag_to_json(bag)?;
    match json {
        serde_json::Value::Null => Ok(BTreeMap::new()),
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), PropertyValue::from_json(v)?)))
            .collect(),
        other => bail!("Property bag is not an object: {}", other),
    }
}

pub fn properties_to_json(entries: &BTreeMap<String, PropertyValue>) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = entries
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    serde_json::Value::Object(map)
}

fn bag_to_json(bag: &monitorrpc::PropertyBag) -> Result<serde_json::Value> {
    if !bag.msgpack.is_empty() {
        let raw: rmpv::Value = rmpv::decode::read_value(&mut &bag.msgpack[..])
            .context("Failed to decode msgpack property bag")?;
        Ok(rmpv_to_json(raw))
    } else if !bag.json.is_empty() {
        Ok(serde_json::from_slice(&bag.json)?)
    } else {
        Ok(serde_json::Value::Null)
    }
}

/// Convert rmpv::Value to serde_json::Value. Extension types have no
/// meaning in this protocol and decode to null.
fn rmpv_to_json(val: rmpv::Value) -> serde_json::Value {
    match val {
        rmpv::Value::Nil => serde_json::Value::Null,
        rmpv::Value::Boolean(b) => serde_json::Value::Bool(b),
        rmpv::Value::Integer(i) => {
            if let Some(n) = i.as_i64() {
                serde_json::Value::Number(n.into())
            } else if let Some(n) = i.as_u64() {
                serde_json::Value::Number(n.into())
            } else {
                serde_json::Value::Null
            }
        }
        rmpv::Value::F32(f) => serde_json::Number::from_f64(f as f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        rmpv::Value::F64(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        rmpv::Value::String(s) => {
            serde_json::Value::String(s.into_str().unwrap_or_default().to_string())
        }
        rmpv::Value::Binary(_) => serde_json::Value::Null,
        rmpv::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(rmpv_to_json).collect())
        }
        rmpv::Value::Map(entries) => {
            let mut map = serde_json::Map::new();
            for (k, v) in entries {
                let key = match k {
                    rmpv::Value::String(s) => s.into_str().unwrap_or_default().to_string(),
                    other => format!("{}", other),
                };
                map.insert(key, rmpv_to_json(v));
            }
            serde_json::Value::Object(map)
        }
        rmpv::Value::Ext(_, _) => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{OutputValue, PropertyValue};

    #[test]
    fn bag_round_trips_through_msgpack() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "password".to_string(),
            PropertyValue::Secret(Box::new(PropertyValue::String("hunter2".into()))),
        );
        entries.insert(
            "endpoint".to_string(),
            PropertyValue::Output(Box::new(OutputValue {
                element: PropertyValue::String("https://db".into()),
                known: true,
                secret: false,
                dependencies: vec!["urn:a".into()],
            })),
        );

        let bag = encode_bag(&entries).unwrap();
        assert!(!bag.msgpack.is_empty());
        let decoded = decode_bag(&bag).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn empty_bag_decodes_to_empty_map() {
        let bag = monitorrpc::PropertyBag {
            msgpack: vec![],
            json: vec![],
        };
        assert!(decode_bag(&bag).unwrap().is_empty());
    }
}
