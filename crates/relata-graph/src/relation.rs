//! Relation engine.
//!
//! Every change to a binding goes through [`Graph::link`] or
//! [`Graph::unlink`], which update one side and then mirror the change onto
//! the related model's reverse binding. The `propagating` guard set records
//! which (model, key) pairs are mid-update, so the mirror of a mirror stops
//! instead of looping.

use crate::collection::CollectionRef;
use crate::event::GraphEvent;
use crate::graph::{FindOptions, Graph, SetOptions};
use crate::model::{BindingState, Holder, ModelRef};
use crate::value::{AttrValue, Attrs, Lookup};
use crate::Result;
use relata_schema::{ModelId, Relation, RelationKind, TypeId};
use serde_json::Value;

/// Why a binding is being cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cause {
    /// Plain removal; a to-one binding forgets the id too
    Detach,
    /// The related model is going away; a to-one binding keeps its id so the
    /// model can be fetched again
    Destroy,
}

#[derive(Debug, Clone, Copy)]
enum Mirror {
    Link,
    Unlink(Cause),
}

/// Models resolved from an assigned value, in source order and deduplicated
#[derive(Debug, Default)]
pub(crate) struct Resolved {
    pub models: Vec<ModelRef>,
    pub ids: Vec<Value>,
}

fn contains_id(list: &[Value], raw: &Value) -> bool {
    let Some(id) = ModelId::from_value(raw) else {
        return false;
    };
    list.iter().any(|v| ModelId::from_value(v).as_ref() == Some(&id))
}

impl Graph {
    // ========================================================================
    // Link / unlink
    // ========================================================================

    pub(crate) fn link(&mut self, owner: ModelRef, key: &str, target: ModelRef) -> Result<()> {
        let guard = (owner, key.to_string());
        let entered = self.propagating.insert(guard.clone());
        let result = self.link_unguarded(owner, key, target);
        if entered {
            self.propagating.remove(&guard);
        }
        result
    }

    pub(crate) fn unlink(&mut self, owner: ModelRef, key: &str, target: ModelRef, cause: Cause) -> Result<()> {
        let guard = (owner, key.to_string());
        let entered = self.propagating.insert(guard.clone());
        let result = self.unlink_unguarded(owner, key, target, cause);
        if entered {
            self.propagating.remove(&guard);
        }
        result
    }

    fn link_unguarded(&mut self, owner: ModelRef, key: &str, target: ModelRef) -> Result<()> {
        self.model(target)?;
        let target_id = self.id_value(target).cloned();
        let binding = self.binding(owner, key)?;
        let relation = binding.relation.clone();
        let state = binding.state;

        match state {
            BindingState::One(current) => {
                if current == Some(target) {
                    return Ok(());
                }
                let binding = self.binding_mut(owner, key)?;
                binding.state = BindingState::One(Some(target));
                binding.key_contents = target_id.into_iter().collect();

                let holder = Holder::One {
                    owner,
                    key: key.to_string(),
                };
                if let Some(previous) = current {
                    self.drop_holder(previous, &holder);
                }
                self.add_holder(target, holder);
                self.events.changed(owner, key);

                if let Some(previous) = current {
                    self.mirror(owner, &relation, previous, Mirror::Unlink(Cause::Detach))?;
                }
                self.mirror(owner, &relation, target, Mirror::Link)
            }
            BindingState::Many(collection) => {
                let data = self.collection_mut(collection)?;
                if data.contains(target) {
                    return Ok(());
                }
                data.models.push(target);
                if let Some(raw) = target_id {
                    let binding = self.binding_mut(owner, key)?;
                    if !contains_id(&binding.key_contents, &raw) {
                        binding.key_contents.push(raw);
                    }
                }
                self.add_holder(target, Holder::Collection(collection));
                self.events.push(GraphEvent::Added {
                    collection,
                    model: target,
                });
                self.events.push(GraphEvent::AddedRelated {
                    model: owner,
                    key: key.to_string(),
                    related: target,
                });
                self.mirror(owner, &relation, target, Mirror::Link)
            }
        }
    }

    fn unlink_unguarded(&mut self, owner: ModelRef, key: &str, target: ModelRef, cause: Cause) -> Result<()> {
        let binding = self.binding(owner, key)?;
        let relation = binding.relation.clone();
        let state = binding.state;

        match state {
            BindingState::One(current) => {
                if current != Some(target) {
                    return Ok(());
                }
                let binding = self.binding_mut(owner, key)?;
                binding.state = BindingState::One(None);
                if cause == Cause::Detach {
                    binding.key_contents.clear();
                }
                self.drop_holder(
                    target,
                    &Holder::One {
                        owner,
                        key: key.to_string(),
                    },
                );
                self.events.changed(owner, key);
            }
            BindingState::Many(collection) => {
                if !self.collection_mut(collection)?.remove(target) {
                    return Ok(());
                }
                if let Some(id) = self.id_of(target) {
                    self.binding_mut(owner, key)?
                        .key_contents
                        .retain(|v| ModelId::from_value(v).as_ref() != Some(&id));
                }
                self.drop_holder(target, &Holder::Collection(collection));
                self.events.push(GraphEvent::Removed {
                    collection,
                    model: target,
                });
                self.events.push(GraphEvent::RemovedRelated {
                    model: owner,
                    key: key.to_string(),
                    related: target,
                });
            }
        }
        self.mirror(owner, &relation, target, Mirror::Unlink(cause))
    }

    /// Apply the same change to `other`'s reverse binding, pointing at `owner`
    fn mirror(&mut self, owner: ModelRef, relation: &Relation, other: ModelRef, op: Mirror) -> Result<()> {
        let Some((reverse_key, _)) = &relation.reverse else {
            return Ok(());
        };
        if !self.models.contains(other) || self.propagating.contains(&(other, reverse_key.clone())) {
            return Ok(());
        }
        if self.model(other)?.binding(reverse_key).is_none() {
            tracing::debug!(key = %reverse_key, "related model has no reverse binding");
            return Ok(());
        }
        match op {
            Mirror::Link => self.link(other, reverse_key, owner),
            Mirror::Unlink(cause) => self.unlink(other, reverse_key, owner, cause),
        }
    }

    pub(crate) fn add_holder(&mut self, model: ModelRef, holder: Holder) {
        if let Some(data) = self.models.get_mut(model) {
            data.held_by.push(holder);
        }
    }

    pub(crate) fn drop_holder(&mut self, model: ModelRef, holder: &Holder) {
        if let Some(data) = self.models.get_mut(model) {
            if let Some(pos) = data.held_by.iter().position(|h| h == holder) {
                data.held_by.remove(pos);
            }
        }
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    pub(crate) fn assign_relation(
        &mut self,
        owner: ModelRef,
        relation: &Relation,
        value: AttrValue,
        options: SetOptions,
    ) -> Result<()> {
        let resolved = self.resolve_items(relation.related, value, options)?;
        match relation.kind {
            RelationKind::ToOne => {
                if resolved.models.len() > 1 {
                    tracing::warn!(
                        key = %relation.key,
                        count = resolved.models.len(),
                        "to-one relation given several models; keeping the first"
                    );
                }
                self.replace_one(owner, &relation.key, resolved.models.first().copied())?;
                self.binding_mut(owner, &relation.key)?.key_contents =
                    resolved.ids.into_iter().take(1).collect();
                Ok(())
            }
            RelationKind::ToMany => self.reconcile_many(owner, &relation.key, resolved, options.remove),
        }
    }

    pub(crate) fn replace_one(&mut self, owner: ModelRef, key: &str, target: Option<ModelRef>) -> Result<()> {
        let current = self.binding(owner, key)?.related_model();
        match (current, target) {
            (current, target) if current == target => Ok(()),
            (_, Some(target)) => self.link(owner, key, target),
            (Some(current), None) => self.unlink(owner, key, current, Cause::Detach),
            (None, None) => Ok(()),
        }
    }

    /// Make a to-many binding hold `resolved`. With `remove`, members not in
    /// it are dropped and the collection takes its order; otherwise new
    /// members are appended.
    pub(crate) fn reconcile_many(
        &mut self,
        owner: ModelRef,
        key: &str,
        resolved: Resolved,
        remove: bool,
    ) -> Result<()> {
        let BindingState::Many(collection) = self.binding(owner, key)?.state else {
            return Ok(());
        };
        if remove {
            let stale: Vec<ModelRef> = self
                .collection(collection)?
                .models
                .iter()
                .copied()
                .filter(|m| !resolved.models.contains(m))
                .collect();
            for model in stale {
                self.unlink(owner, key, model, Cause::Detach)?;
            }
        }
        for &model in &resolved.models {
            self.link(owner, key, model)?;
        }
        if remove {
            self.collection_mut(collection)?.reorder(&resolved.models);
            self.binding_mut(owner, key)?.key_contents = resolved.ids;
        }
        Ok(())
    }

    pub(crate) fn reconcile_plain(
        &mut self,
        collection: CollectionRef,
        models: &[ModelRef],
        remove: bool,
    ) -> Result<()> {
        if remove {
            let stale: Vec<ModelRef> = self
                .collection(collection)?
                .models
                .iter()
                .copied()
                .filter(|m| !models.contains(m))
                .collect();
            for model in stale {
                self.remove_from_plain(collection, model)?;
            }
        }
        for &model in models {
            self.add_to_plain(collection, model)?;
        }
        if remove {
            self.collection_mut(collection)?.reorder(models);
        }
        Ok(())
    }

    /// Turn an assigned value into models of `related`. Bare ids resolve to
    /// registered instances or new stubs; objects go through
    /// find-or-create; values of the wrong type are logged and skipped.
    pub(crate) fn resolve_items(
        &mut self,
        related: TypeId,
        value: AttrValue,
        options: SetOptions,
    ) -> Result<Resolved> {
        let items: Vec<AttrValue> = match value {
            AttrValue::Json(Value::Array(items)) => items.into_iter().map(AttrValue::Json).collect(),
            AttrValue::Models(items) => items,
            AttrValue::Collection(collection) => self
                .collection(collection)?
                .models
                .iter()
                .copied()
                .map(AttrValue::Model)
                .collect(),
            single => vec![single],
        };

        let mut resolved = Resolved::default();
        for item in items {
            let Some(model) = self.resolve_item(related, item, options)? else {
                continue;
            };
            if resolved.models.contains(&model) {
                continue;
            }
            if let Some(id) = self.id_value(model) {
                resolved.ids.push(id.clone());
            }
            resolved.models.push(model);
        }
        Ok(resolved)
    }

    fn resolve_item(&mut self, related: TypeId, item: AttrValue, options: SetOptions) -> Result<Option<ModelRef>> {
        match item {
            AttrValue::Json(Value::Null) => Ok(None),
            AttrValue::Json(raw @ (Value::String(_) | Value::Number(_))) => self.resolve_or_stub(related, raw),
            AttrValue::Json(Value::Object(map)) => {
                let attrs = Attrs::from(map);
                if let Some(id) = attrs.id(self.registry.id_attribute(related)) {
                    let taken = self.store.resolve(self.registry.root_of(related), &id).is_some();
                    if taken && self.resolve(related, &id).is_none() {
                        tracing::warn!(
                            id = %id,
                            expected = self.registry.name(related),
                            "nested object names an instance of an unrelated type; ignoring"
                        );
                        return Ok(None);
                    }
                }
                let find = FindOptions {
                    create: true,
                    merge: options.merge,
                    parse: false,
                };
                self.find_or_create_inner(related, Lookup::Attrs(attrs), find, options)
            }
            AttrValue::Model(model) => {
                let Some(actual) = self.type_of(model) else {
                    tracing::warn!(model = ?model, "destroyed model assigned to a relation; ignoring");
                    return Ok(None);
                };
                if self.registry.is_a(actual, related) {
                    Ok(Some(model))
                } else {
                    tracing::warn!(
                        expected = self.registry.name(related),
                        actual = self.registry.name(actual),
                        "related model has the wrong type; ignoring"
                    );
                    Ok(None)
                }
            }
            other => {
                tracing::warn!(value = ?other, "unsupported value for a relation; ignoring");
                Ok(None)
            }
        }
    }

    // ========================================================================
    // Fetch bookkeeping
    // ========================================================================

    /// Ids under a relation that still need loading: ids with no instance
    /// bound, plus bound stubs. With `refresh`, every id.
    pub fn ids_to_fetch(&self, model: ModelRef, key: &str, refresh: bool) -> Result<Vec<ModelId>> {
        let binding = self.binding(model, key)?;
        let wanted = |m: ModelRef| refresh || self.is_stub(m);
        let mut ids: Vec<ModelId> = Vec::new();
        let mut push = |id: ModelId| {
            if !ids.contains(&id) {
                ids.push(id);
            }
        };

        match binding.state {
            BindingState::One(Some(related)) => {
                if wanted(related) {
                    if let Some(id) = self.id_of(related) {
                        push(id);
                    }
                }
            }
            BindingState::One(None) => {
                if let Some(id) = binding.key_contents.first().and_then(ModelId::from_value) {
                    push(id);
                }
            }
            BindingState::Many(collection) => {
                let members = self.models(collection);
                for raw in &binding.key_contents {
                    let Some(id) = ModelId::from_value(raw) else {
                        continue;
                    };
                    let member = members
                        .iter()
                        .copied()
                        .find(|m| self.id_of(*m).as_ref() == Some(&id));
                    if member.map_or(true, wanted) {
                        push(id);
                    }
                }
                for &member in members {
                    if wanted(member) {
                        if let Some(id) = self.id_of(member) {
                            push(id);
                        }
                    }
                }
            }
        }
        Ok(ids)
    }

    /// Relation descriptor of a bound key
    pub fn relation_of(&self, model: ModelRef, key: &str) -> Result<&Relation> {
        self.binding(model, key).map(|b| b.relation())
    }
}

