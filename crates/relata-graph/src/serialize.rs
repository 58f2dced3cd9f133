//! JSON projection of models, honoring each relation's `include_in_json`
//! and `key_destination`.

use crate::graph::Graph;
use crate::model::{Binding, BindingState, ModelRef};
use crate::Result;
use relata_schema::{IncludeInJson, ModelId};
use serde_json::{Map, Value};

impl Graph {
    /// Serialize a model and, for `Full` relations, its related models.
    ///
    /// A model already being serialized further up the current path is
    /// written as its id, so cyclic graphs terminate.
    pub fn to_json(&self, model: ModelRef) -> Result<Value> {
        let mut path = Vec::new();
        self.serialize_model(model, &mut path)
    }

    fn serialize_model(&self, model: ModelRef, path: &mut Vec<ModelRef>) -> Result<Value> {
        let data = self.model(model)?;
        path.push(model);

        let mut out: Map<String, Value> = data.attributes.clone();
        if self.config.emit_discriminator {
            if let Some((attribute, value)) = self.registry.discriminator_of(data.type_id) {
                out.entry(attribute.to_string())
                    .or_insert_with(|| Value::String(value.to_string()));
            }
        }

        for binding in &data.relations {
            let relation = binding.relation();
            if relation.key_destination != relation.key {
                out.remove(&relation.key);
            }
            let value = match &relation.include_in_json {
                IncludeInJson::Omit => {
                    out.remove(&relation.key_destination);
                    continue;
                }
                IncludeInJson::IdAttribute => self.related_ids(binding),
                IncludeInJson::Attribute(name) => self.related_attribute(binding, name),
                IncludeInJson::Full => match binding.state {
                    BindingState::One(Some(related)) => self.nested(related, path)?,
                    BindingState::One(None) => Value::Null,
                    BindingState::Many(collection) => Value::Array(
                        self.models(collection)
                            .iter()
                            .map(|m| self.nested(*m, path))
                            .collect::<Result<Vec<_>>>()?,
                    ),
                },
            };
            out.insert(relation.key_destination.clone(), value);
        }

        path.pop();
        Ok(Value::Object(out))
    }

    fn nested(&self, model: ModelRef, path: &mut Vec<ModelRef>) -> Result<Value> {
        if path.contains(&model) {
            return Ok(self.id_value(model).cloned().unwrap_or(Value::Null));
        }
        self.serialize_model(model, path)
    }

    /// Ids of the bound models plus ids assigned but not bound, in the
    /// order they were assigned
    fn related_ids(&self, binding: &Binding) -> Value {
        match binding.state {
            BindingState::One(Some(related)) => self.id_value(related).cloned().unwrap_or(Value::Null),
            BindingState::One(None) => binding.key_contents.first().cloned().unwrap_or(Value::Null),
            BindingState::Many(collection) => {
                let mut seen: Vec<ModelId> = Vec::new();
                let mut ids: Vec<Value> = Vec::new();
                let members = self.models(collection).iter().filter_map(|m| self.id_value(*m));
                for raw in binding.key_contents.iter().chain(members) {
                    let Some(id) = ModelId::from_value(raw) else {
                        continue;
                    };
                    if !seen.contains(&id) {
                        seen.push(id);
                        ids.push(raw.clone());
                    }
                }
                Value::Array(ids)
            }
        }
    }

    fn related_attribute(&self, binding: &Binding, name: &str) -> Value {
        let read = |m: ModelRef| self.attribute(m, name).cloned().unwrap_or(Value::Null);
        match binding.state {
            BindingState::One(related) => related.map_or(Value::Null, read),
            BindingState::Many(collection) => {
                Value::Array(self.models(collection).iter().copied().map(read).collect())
            }
        }
    }
}
