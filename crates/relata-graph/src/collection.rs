//! Ordered model sets: relation collections owned by a model's to-many
//! binding, and free-standing collections created by callers.

use crate::arena::Handle;
use crate::model::ModelRef;
use relata_schema::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionRef {
    index: u32,
    generation: u32,
}

impl Handle for CollectionRef {
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

#[derive(Debug)]
pub(crate) struct CollectionData {
    pub model_type: TypeId,
    pub models: Vec<ModelRef>,
    /// Owning model and relation key, for relation collections
    pub owner: Option<(ModelRef, String)>,
}

impl CollectionData {
    pub fn new(model_type: TypeId, owner: Option<(ModelRef, String)>) -> Self {
        Self {
            model_type,
            models: Vec::new(),
            owner,
        }
    }

    pub fn contains(&self, model: ModelRef) -> bool {
        self.models.contains(&model)
    }

    pub fn remove(&mut self, model: ModelRef) -> bool {
        match self.models.iter().position(|m| *m == model) {
            Some(pos) => {
                self.models.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Stable reorder to follow `order`; members missing from it keep their
    /// relative position at the end.
    pub fn reorder(&mut self, order: &[ModelRef]) {
        self.models
            .sort_by_key(|m| order.iter().position(|o| o == m).unwrap_or(usize::MAX));
    }
}
