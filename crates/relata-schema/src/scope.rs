//! Named namespaces used to resolve type references given as strings.

use crate::id::TypeId;
use ahash::AHashMap;

/// A namespace of type names.
///
/// The registry keeps a built-in global scope holding every defined type;
/// additional scopes can alias types under other names and are searched
/// before it, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ModelScope {
    name: String,
    types: AHashMap<String, TypeId>,
}

impl ModelScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: AHashMap::new(),
        }
    }

    pub fn with(mut self, type_name: impl Into<String>, type_id: TypeId) -> Self {
        self.insert(type_name, type_id);
        self
    }

    pub fn insert(&mut self, type_name: impl Into<String>, type_id: TypeId) {
        self.types.insert(type_name.into(), type_id);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, type_name: &str) -> Option<TypeId> {
        self.types.get(type_name).copied()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
