//! Identity map: at most one live instance per (hierarchy root, id).
//!
//! Every type in a hierarchy shares its root's id namespace, so a subtype
//! instance is found when asking for any of its ancestors.

use crate::model::ModelRef;
use ahash::AHashMap;
use relata_schema::{ModelId, TypeId};

#[derive(Debug, Default)]
pub(crate) struct IdentityStore {
    by_id: AHashMap<(TypeId, ModelId), ModelRef>,
    by_type: AHashMap<TypeId, Vec<ModelRef>>,
}

impl IdentityStore {
    pub fn resolve(&self, root: TypeId, id: &ModelId) -> Option<ModelRef> {
        self.by_id.get(&(root, id.clone())).copied()
    }

    /// Returns the instance already holding the id, if any; the map is
    /// left unchanged in that case.
    pub fn register(&mut self, root: TypeId, id: ModelId, model: ModelRef) -> Result<(), ModelRef> {
        match self.by_id.get(&(root, id.clone())) {
            Some(existing) if *existing != model => Err(*existing),
            _ => {
                self.by_id.insert((root, id), model);
                Ok(())
            }
        }
    }

    pub fn unregister(&mut self, root: TypeId, id: &ModelId, model: ModelRef) -> bool {
        let key = (root, id.clone());
        if self.by_id.get(&key) == Some(&model) {
            self.by_id.remove(&key);
            true
        } else {
            false
        }
    }

    pub fn is_registered(&self, root: TypeId, id: &ModelId, model: ModelRef) -> bool {
        self.resolve(root, id) == Some(model)
    }

    pub fn track(&mut self, root: TypeId, model: ModelRef) {
        let members = self.by_type.entry(root).or_default();
        if !members.contains(&model) {
            members.push(model);
        }
    }

    pub fn untrack(&mut self, root: TypeId, model: ModelRef) {
        if let Some(members) = self.by_type.get_mut(&root) {
            members.retain(|m| *m != model);
        }
    }

    pub fn instances(&self, root: TypeId) -> &[ModelRef] {
        self.by_type.get(&root).map(Vec::as_slice).unwrap_or(&[])
    }
}
