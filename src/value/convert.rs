use std::collections::BTreeMap;

use super::property::{OutputValue, PropertyValue};
use super::{Mark, Value, ValueKind};

/// Convert a marked value to its wire form. Secret marks become a `secret`
/// wrapper; dependency marks become the dependency list of an `output`
/// wrapper. Wrapper order on the result: secret outside, output inside.
pub fn to_wire(value: &Value) -> PropertyValue {
    to_wire_impl(value, true)
}

/// Convert a marked value to its wire form without `output` wrappers.
/// Unknowns stay computed and secrets stay wrapped, but dependency lineage
/// is dropped; callers carry it out-of-band (the per-property dependency
/// map of a registration request).
pub fn to_wire_plain(value: &Value) -> PropertyValue {
    to_wire_impl(value, false)
}

fn to_wire_impl(value: &Value, keep_output_values: bool) -> PropertyValue {
    let payload = match &value.kind {
        ValueKind::Null => PropertyValue::Null,
        ValueKind::Bool(b) => PropertyValue::Bool(*b),
        ValueKind::Number(n) => PropertyValue::Number(*n),
        ValueKind::String(s) => PropertyValue::String(s.clone()),
        ValueKind::List(items) | ValueKind::Tuple(items) => PropertyValue::Array(
            items
                .iter()
                .map(|v| to_wire_impl(v, keep_output_values))
                .collect(),
        ),
        ValueKind::Map(entries) | ValueKind::Object(entries) => PropertyValue::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_wire_impl(v, keep_output_values)))
                .collect(),
        ),
        ValueKind::Unknown => PropertyValue::Computed,
        ValueKind::Asset(asset) => PropertyValue::Asset(asset.clone()),
        ValueKind::Archive(archive) => PropertyValue::Archive(archive.clone()),
    };

    let dependencies: Vec<String> = value
        .direct_dependencies()
        .map(str::to_string)
        .collect();
    let known = !matches!(payload, PropertyValue::Computed);

    let mut result = payload;
    if keep_output_values && !dependencies.is_empty() {
        result = PropertyValue::Output(Box::new(OutputValue {
            element: if known { result } else { PropertyValue::Null },
            known,
            secret: false,
            dependencies,
        }));
    }
    if value.marks.contains(&Mark::Secret) {
        result = PropertyValue::Secret(Box::new(result));
    }
    result
}

/// Convert a wire value back into a marked value. The inverse of `to_wire`
/// up to mark-set equality and list/tuple homogenization.
pub fn from_wire(property: &PropertyValue) -> Value {
    match property {
        PropertyValue::Null => Value::null(),
        PropertyValue::Bool(b) => Value::bool(*b),
        PropertyValue::Number(n) => Value::number(*n),
        PropertyValue::String(s) => Value::string(s.clone()),
        PropertyValue::Array(items) => homogenize(items.iter().map(from_wire).collect()),
        PropertyValue::Object(entries) => Value::object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), from_wire(v)))
                .collect(),
        ),
        PropertyValue::Computed => Value::unknown(),
        PropertyValue::Asset(asset) => Value::asset(asset.clone()),
        PropertyValue::Archive(archive) => Value::archive(archive.clone()),
        PropertyValue::ResourceReference { urn, id } => resource_reference_object(urn, id.as_deref()),
        PropertyValue::Secret(element) => from_wire(element).mark_secret(),
        PropertyValue::Output(output) => {
            let mut value = if output.known {
                from_wire(&output.element)
            } else {
                Value::unknown()
            };
            if output.secret {
                value = value.mark_secret();
            }
            for urn in &output.dependencies {
                value = value.with_mark(Mark::Dependency(urn.clone()));
            }
            value
        }
    }
}

/// An array of uniformly-typed elements becomes a list; anything else
/// becomes a tuple. An empty array is an empty list.
fn homogenize(items: Vec<Value>) -> Value {
    Value::sequence(items)
}

/// Decode a resource reference into the bound-object shape dependents
/// expect: urn, id, and the synthetic type/name keys recovered from the
/// URN.
fn resource_reference_object(urn: &str, id: Option<&str>) -> Value {
    let mut entries = BTreeMap::new();
    entries.insert("urn".to_string(), Value::string(urn));
    if let Some(id) = id {
        entries.insert("id".to_string(), Value::string(id));
    }
    let segments: Vec<&str> = urn.split("::").collect();
    if segments.len() >= 4 {
        let qualified_type = segments[segments.len() - 2];
        let leaf_type = qualified_type.rsplit('$').next().unwrap_or(qualified_type);
        entries.insert("__type".to_string(), Value::string(leaf_type));
        entries.insert(
            "__name".to_string(),
            Value::string(segments[segments.len() - 1]),
        );
    }
    Value::object(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_array_becomes_empty_list() {
        let v = from_wire(&PropertyValue::Array(vec![]));
        assert_eq!(v, Value::list(vec![]));
    }

    #[test]
    fn mixed_array_becomes_tuple() {
        let v = from_wire(&PropertyValue::Array(vec![
            PropertyValue::Number(1.0),
            PropertyValue::String("x".into()),
        ]));
        assert!(matches!(v.kind, ValueKind::Tuple(_)));
    }

    #[test]
    fn resource_reference_decodes_to_bound_object() {
        let v = from_wire(&PropertyValue::ResourceReference {
            urn: "urn:pulumi:dev::proj::aws:s3:Bucket::site".into(),
            id: Some("bucket-1".into()),
        });
        assert_eq!(v.get("urn").unwrap().as_str().unwrap().contains("Bucket"), true);
        assert_eq!(v.get("id").unwrap().as_str(), Some("bucket-1"));
        assert_eq!(v.get("__type").unwrap().as_str(), Some("aws:s3:Bucket"));
        assert_eq!(v.get("__name").unwrap().as_str(), Some("site"));
    }
}
