//! Model handles and the per-model record kept in the graph arena.

use crate::arena::{Arena, Handle};
use crate::collection::{CollectionData, CollectionRef};
use relata_schema::{Relation, RelationKind, TypeId};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Handle to a live model instance.
///
/// Handles are plain copyable references into the graph; a handle outliving
/// its model reports [`crate::GraphError::StaleModel`] on use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelRef {
    index: u32,
    generation: u32,
}

impl Handle for ModelRef {
    fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    fn index(self) -> u32 {
        self.index
    }

    fn generation(self) -> u32 {
        self.generation
    }
}

/// Current value of one relation binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    One(Option<ModelRef>),
    /// Members live in the model's own relation collection
    Many(CollectionRef),
}

/// Per-model state of one relation: the descriptor, what is bound now, and
/// the raw ids last assigned to the key (kept so unresolved ids can still be
/// fetched and serialized).
#[derive(Debug, Clone)]
pub struct Binding {
    pub(crate) relation: Arc<Relation>,
    pub(crate) state: BindingState,
    pub(crate) key_contents: Vec<Value>,
}

impl Binding {
    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    pub fn key(&self) -> &str {
        &self.relation.key
    }

    pub fn kind(&self) -> RelationKind {
        self.relation.kind
    }

    pub fn state(&self) -> BindingState {
        self.state
    }

    pub fn related_model(&self) -> Option<ModelRef> {
        match self.state {
            BindingState::One(related) => related,
            BindingState::Many(_) => None,
        }
    }

    pub fn collection(&self) -> Option<CollectionRef> {
        match self.state {
            BindingState::Many(collection) => Some(collection),
            BindingState::One(_) => None,
        }
    }

    pub fn key_contents(&self) -> &[Value] {
        &self.key_contents
    }
}

/// Back-reference from a model to whatever currently holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Holder {
    One { owner: ModelRef, key: String },
    Collection(CollectionRef),
}

#[derive(Debug)]
pub(crate) struct ModelData {
    pub type_id: TypeId,
    pub attributes: Map<String, Value>,
    pub relations: Vec<Binding>,
    pub held_by: Vec<Holder>,
}

impl ModelData {
    pub fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            attributes: Map::new(),
            relations: Vec::new(),
            held_by: Vec::new(),
        }
    }

    pub fn binding(&self, key: &str) -> Option<&Binding> {
        self.relations.iter().find(|b| b.relation.key == key)
    }

    /// Bound models of every relation, keyed by relation key
    pub fn bound(&self, collections: &Arena<CollectionData>) -> Vec<(String, Vec<ModelRef>)> {
        self.relations
            .iter()
            .map(|b| {
                let related = match b.state {
                    BindingState::One(related) => related.into_iter().collect(),
                    BindingState::Many(c) => collections
                        .get(c)
                        .map(|data| data.models.clone())
                        .unwrap_or_default(),
                };
                (b.relation.key.clone(), related)
            })
            .collect()
    }
}
