use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::asset::{Archive, Asset};

pub mod convert;
pub mod property;

pub use convert::{from_wire, to_wire, to_wire_plain};
pub use property::{OutputValue, PropertyValue};

/// An auxiliary tag attached to a value, carrying semantic information
/// orthogonal to the payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Mark {
    /// The value must be treated as confidential.
    Secret,
    /// The value was derived from the resource identified by this URN.
    Dependency(String),
}

/// The set of marks on a value. Ordered so that conversions and request
/// payloads are deterministic.
pub type MarkSet = BTreeSet<Mark>;

/// The evaluator's value algebra: a dynamic payload plus a set of marks.
/// Marks accumulate across combining operations and are stripped only by
/// `unsecret` or during conversion to the wire form.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Value {
    pub kind: ValueKind,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub marks: MarkSet,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum ValueKind {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Homogeneous sequence.
    List(Vec<Value>),
    /// Heterogeneous sequence.
    Tuple(Vec<Value>),
    /// Uniform string-keyed collection.
    Map(BTreeMap<String, Value>),
    /// Struct-like string-keyed collection.
    Object(BTreeMap<String, Value>),
    /// A value that is not yet known (computed at deployment time).
    Unknown,
    Asset(Asset),
    Archive(Archive),
}

impl Value {
    pub fn null() -> Self {
        Value::default()
    }

    pub fn bool(b: bool) -> Self {
        ValueKind::Bool(b).into()
    }

    pub fn number(n: f64) -> Self {
        ValueKind::Number(n).into()
    }

    pub fn string(s: impl Into<String>) -> Self {
        ValueKind::String(s.into()).into()
    }

    pub fn list(items: Vec<Value>) -> Self {
        ValueKind::List(items).into()
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        ValueKind::Tuple(items).into()
    }

    /// Build a sequence, homogenizing: uniformly-typed elements become a
    /// list, anything else a tuple. An empty sequence is an empty list.
    pub fn sequence(items: Vec<Value>) -> Self {
        let mut unified = ValueType::Dynamic;
        for item in &items {
            match ValueType::unify(&unified, &item.type_of()) {
                Some(t) => unified = t,
                None => return Value::tuple(items),
            }
        }
        Value::list(items)
    }

    pub fn map(entries: BTreeMap<String, Value>) -> Self {
        ValueKind::Map(entries).into()
    }

    pub fn object(entries: BTreeMap<String, Value>) -> Self {
        ValueKind::Object(entries).into()
    }

    pub fn unknown() -> Self {
        ValueKind::Unknown.into()
    }

    pub fn asset(asset: Asset) -> Self {
        ValueKind::Asset(asset).into()
    }

    pub fn archive(archive: Archive) -> Self {
        ValueKind::Archive(archive).into()
    }

    // ─── Marks ──────────────────────────────────────────────────────────────

    pub fn with_mark(mut self, mark: Mark) -> Self {
        self.marks.insert(mark);
        self
    }

    /// Merge another mark set into this value's marks.
    pub fn with_marks(mut self, marks: &MarkSet) -> Self {
        self.marks.extend(marks.iter().cloned());
        self
    }

    pub fn mark_secret(self) -> Self {
        self.with_mark(Mark::Secret)
    }

    /// Remove the secret mark if present; all other marks are preserved.
    pub fn unmark_secret(mut self) -> Self {
        self.marks.remove(&Mark::Secret);
        self
    }

    pub fn is_secret(&self) -> bool {
        self.marks.contains(&Mark::Secret)
    }

    /// True if this value or any nested value carries the secret mark.
    pub fn contains_secret(&self) -> bool {
        if self.is_secret() {
            return true;
        }
        match &self.kind {
            ValueKind::List(items) | ValueKind::Tuple(items) => {
                items.iter().any(Value::contains_secret)
            }
            ValueKind::Map(entries) | ValueKind::Object(entries) => {
                entries.values().any(Value::contains_secret)
            }
            _ => false,
        }
    }

    /// Dependency URNs on this value only (not nested values).
    pub fn direct_dependencies(&self) -> impl Iterator<Item = &str> {
        self.marks.iter().filter_map(|m| match m {
            Mark::Dependency(urn) => Some(urn.as_str()),
            Mark::Secret => None,
        })
    }

    /// Collect every dependency URN reachable from this value.
    pub fn collect_dependencies(&self, into: &mut BTreeSet<String>) {
        for urn in self.direct_dependencies() {
            into.insert(urn.to_string());
        }
        match &self.kind {
            ValueKind::List(items) | ValueKind::Tuple(items) => {
                for item in items {
                    item.collect_dependencies(into);
                }
            }
            ValueKind::Map(entries) | ValueKind::Object(entries) => {
                for value in entries.values() {
                    value.collect_dependencies(into);
                }
            }
            _ => {}
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ValueKind::Null)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.kind, ValueKind::Unknown)
    }

    /// True if no unknown value appears anywhere in this value.
    pub fn is_wholly_known(&self) -> bool {
        match &self.kind {
            ValueKind::Unknown => false,
            ValueKind::List(items) | ValueKind::Tuple(items) => {
                items.iter().all(Value::is_wholly_known)
            }
            ValueKind::Map(entries) | ValueKind::Object(entries) => {
                entries.values().all(Value::is_wholly_known)
            }
            _ => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            ValueKind::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.kind {
            ValueKind::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    /// Sequence elements, whether list or tuple.
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match &self.kind {
            ValueKind::List(items) | ValueKind::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// String-keyed entries, whether map or object.
    pub fn as_entries(&self) -> Option<&BTreeMap<String, Value>> {
        match &self.kind {
            ValueKind::Map(entries) | ValueKind::Object(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a key on a map or object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_entries().and_then(|entries| entries.get(key))
    }

    /// The dynamic type of this value, used for array homogenization.
    pub fn type_of(&self) -> ValueType {
        match &self.kind {
            ValueKind::Null | ValueKind::Unknown => ValueType::Dynamic,
            ValueKind::Bool(_) => ValueType::Bool,
            ValueKind::Number(_) => ValueType::Number,
            ValueKind::String(_) => ValueType::String,
            ValueKind::List(items) => {
                let element = items
                    .iter()
                    .map(Value::type_of)
                    .try_fold(ValueType::Dynamic, |acc, t| ValueType::unify(&acc, &t))
                    .unwrap_or(ValueType::Dynamic);
                ValueType::List(Box::new(element))
            }
            ValueKind::Tuple(items) => {
                ValueType::Tuple(items.iter().map(Value::type_of).collect())
            }
            ValueKind::Map(entries) => {
                let element = entries
                    .values()
                    .map(Value::type_of)
                    .try_fold(ValueType::Dynamic, |acc, t| ValueType::unify(&acc, &t))
                    .unwrap_or(ValueType::Dynamic);
                ValueType::Map(Box::new(element))
            }
            ValueKind::Object(entries) => ValueType::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.type_of()))
                    .collect(),
            ),
            ValueKind::Asset(_) => ValueType::Asset,
            ValueKind::Archive(_) => ValueType::Archive,
        }
    }
}

impl From<ValueKind> for Value {
    fn from(kind: ValueKind) -> Self {
        Value {
            kind,
            marks: MarkSet::new(),
        }
    }
}

/// The dynamic type of a value. `Dynamic` stands for types that carry no
/// information of their own (null, unknown) and unifies with anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Dynamic,
    Bool,
    Number,
    String,
    List(Box<ValueType>),
    Tuple(Vec<ValueType>),
    Map(Box<ValueType>),
    Object(BTreeMap<String, ValueType>),
    Asset,
    Archive,
}

impl ValueType {
    /// Unify two types, or None if they are incompatible.
    pub fn unify(a: &ValueType, b: &ValueType) -> Option<ValueType> {
        match (a, b) {
            (ValueType::Dynamic, other) | (other, ValueType::Dynamic) => Some(other.clone()),
            (ValueType::List(x), ValueType::List(y)) => {
                ValueType::unify(x, y).map(|t| ValueType::List(Box::new(t)))
            }
            (ValueType::Map(x), ValueType::Map(y)) => {
                ValueType::unify(x, y).map(|t| ValueType::Map(Box::new(t)))
            }
            _ if a == b => Some(a.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unify_dynamic_with_anything() {
        assert_eq!(
            ValueType::unify(&ValueType::Dynamic, &ValueType::Number),
            Some(ValueType::Number)
        );
        assert_eq!(
            ValueType::unify(&ValueType::String, &ValueType::Dynamic),
            Some(ValueType::String)
        );
    }

    #[test]
    fn unify_rejects_mismatched_scalars() {
        assert_eq!(ValueType::unify(&ValueType::Bool, &ValueType::Number), None);
    }

    #[test]
    fn nested_list_types_unify_elementwise() {
        let a = ValueType::List(Box::new(ValueType::Dynamic));
        let b = ValueType::List(Box::new(ValueType::Number));
        assert_eq!(
            ValueType::unify(&a, &b),
            Some(ValueType::List(Box::new(ValueType::Number)))
        );
    }

    #[test]
    fn marks_accumulate_and_unsecret_is_selective() {
        let v = Value::string("s")
            .mark_secret()
            .with_mark(Mark::Dependency("urn:a".into()));
        assert!(v.is_secret());
        let v = v.unmark_secret();
        assert!(!v.is_secret());
        assert_eq!(v.direct_dependencies().collect::<Vec<_>>(), vec!["urn:a"]);
    }
}
