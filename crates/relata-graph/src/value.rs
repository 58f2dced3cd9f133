//! Attribute input and output values.
//!
//! Incoming attributes are a mix of raw JSON and live handles: a relation key
//! may be assigned an id, a nested object, a model, a list of any of those, or
//! a whole collection.

use crate::collection::CollectionRef;
use crate::model::ModelRef;
use relata_schema::{ModelId, ParseFn};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Json(Value),
    Model(ModelRef),
    Models(Vec<AttrValue>),
    Collection(CollectionRef),
}

impl AttrValue {
    pub const NULL: AttrValue = AttrValue::Json(Value::Null);

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Value> for AttrValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<ModelRef> for AttrValue {
    fn from(value: ModelRef) -> Self {
        Self::Model(value)
    }
}

impl From<Option<ModelRef>> for AttrValue {
    fn from(value: Option<ModelRef>) -> Self {
        value.map_or(Self::NULL, Self::Model)
    }
}

impl From<Vec<ModelRef>> for AttrValue {
    fn from(value: Vec<ModelRef>) -> Self {
        Self::Models(value.into_iter().map(Self::Model).collect())
    }
}

impl From<CollectionRef> for AttrValue {
    fn from(value: CollectionRef) -> Self {
        Self::Collection(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Json(Value::String(value.to_string()))
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Json(Value::String(value))
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Json(Value::from(value))
    }
}

/// An ordered attribute set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attrs(Vec<(String, AttrValue)>);

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        let pos = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The plain JSON entries, as seen by discriminator lookup
    pub fn json_view(&self) -> Map<String, Value> {
        self.0
            .iter()
            .filter_map(|(k, v)| v.as_json().map(|v| (k.clone(), v.clone())))
            .collect()
    }

    pub(crate) fn id(&self, id_attribute: &str) -> Option<ModelId> {
        self.get(id_attribute)
            .and_then(AttrValue::as_json)
            .and_then(ModelId::from_value)
    }

    /// Run a parse hook over the JSON entries. Handle entries pass through
    /// untouched; a hook returning a non-object leaves the input as it was.
    pub(crate) fn parsed_with(self, parse: &ParseFn) -> Self {
        let (json, handles): (Vec<_>, Vec<_>) = self
            .0
            .into_iter()
            .partition(|(_, v)| matches!(v, AttrValue::Json(_)));
        let raw: Map<String, Value> = json
            .iter()
            .filter_map(|(k, v)| v.as_json().map(|v| (k.clone(), v.clone())))
            .collect();
        let mut parsed = match parse(Value::Object(raw)) {
            Value::Object(map) => Attrs::from(map),
            other => {
                tracing::warn!(result = %other, "parse hook returned a non-object; ignoring it");
                Attrs(json)
            }
        };
        for (k, v) in handles {
            parsed.insert(k, v);
        }
        parsed
    }
}

impl IntoIterator for Attrs {
    type Item = (String, AttrValue);
    type IntoIter = std::vec::IntoIter<(String, AttrValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Map<String, Value>> for Attrs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().map(|(k, v)| (k, AttrValue::Json(v))).collect())
    }
}

/// Non-object JSON carries no attributes
impl From<Value> for Attrs {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Attrs::from(map),
            Value::Null => Attrs::new(),
            other => {
                tracing::warn!(value = %other, "attributes must be a JSON object; ignoring");
                Attrs::new()
            }
        }
    }
}

impl<K: Into<String>> FromIterator<(K, AttrValue)> for Attrs {
    fn from_iter<I: IntoIterator<Item = (K, AttrValue)>>(iter: I) -> Self {
        let mut attrs = Attrs::new();
        for (k, v) in iter {
            attrs.insert(k, v);
        }
        attrs
    }
}

/// What `find_or_create` and `create` accept: a bare id or attributes
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Id(Value),
    Attrs(Attrs),
}

impl From<Value> for Lookup {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Attrs(Attrs::from(map)),
            other => Self::Id(other),
        }
    }
}

impl From<Attrs> for Lookup {
    fn from(value: Attrs) -> Self {
        Self::Attrs(value)
    }
}

impl From<&str> for Lookup {
    fn from(value: &str) -> Self {
        Self::Id(Value::String(value.to_string()))
    }
}

impl From<&ModelId> for Lookup {
    fn from(value: &ModelId) -> Self {
        Self::Id(Value::String(value.as_str().to_string()))
    }
}

/// A read view of one key on a model
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attr<'a> {
    Value(&'a Value),
    One(Option<ModelRef>),
    Many(CollectionRef),
}
