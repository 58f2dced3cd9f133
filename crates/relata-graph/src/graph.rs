//! The graph: model storage, identity and the public mutation surface.

use crate::arena::Arena;
use crate::collection::{CollectionData, CollectionRef};
use crate::config::GraphConfig;
use crate::event::{EventQueue, GraphEvent};
use crate::model::{Binding, BindingState, Holder, ModelData, ModelRef};
use crate::relation::Cause;
use crate::store::IdentityStore;
use crate::value::{Attr, AttrValue, Attrs, Lookup};
use crate::{GraphError, Result};
use ahash::AHashSet;
use relata_schema::{ModelId, Relation, RelationKind, TypeId, TypeRegistry};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Options for [`Graph::find_or_create`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindOptions {
    /// Construct a new instance when none is registered
    pub create: bool,
    /// Apply the given attributes to an instance that already exists
    pub merge: bool,
    /// Run the type's parse hook over the top-level attributes first
    pub parse: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            create: true,
            merge: true,
            parse: false,
        }
    }
}

impl FindOptions {
    pub fn lookup_only() -> Self {
        Self {
            create: false,
            merge: false,
            parse: false,
        }
    }

    pub fn with_parse(mut self, parse: bool) -> Self {
        self.parse = parse;
        self
    }

    pub fn with_merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }
}

/// Options for attribute assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// To-many: drop members absent from the new value
    pub remove: bool,
    /// Nested objects naming existing instances update them
    pub merge: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            remove: true,
            merge: true,
        }
    }
}

impl SetOptions {
    /// Add to to-many relations without removing anything
    pub fn keep_existing() -> Self {
        Self {
            remove: false,
            merge: true,
        }
    }
}

#[derive(Debug)]
pub struct Graph {
    pub(crate) registry: TypeRegistry,
    pub(crate) config: GraphConfig,
    pub(crate) models: Arena<ModelData>,
    pub(crate) collections: Arena<CollectionData>,
    pub(crate) store: IdentityStore,
    pub(crate) events: EventQueue,
    /// (model, key) pairs with a link or unlink in progress
    pub(crate) propagating: AHashSet<(ModelRef, String)>,
    auto_fetch: Vec<(ModelRef, String)>,
    realized_generation: u64,
}

impl Graph {
    pub fn new(registry: TypeRegistry) -> Self {
        Self::with_config(registry, GraphConfig::default())
    }

    pub fn with_config(registry: TypeRegistry, config: GraphConfig) -> Self {
        let realized_generation = registry.generation();
        Self {
            registry,
            config,
            models: Arena::default(),
            collections: Arena::default(),
            store: IdentityStore::default(),
            events: EventQueue::default(),
            propagating: AHashSet::new(),
            auto_fetch: Vec::new(),
            realized_generation,
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Types may be declared after models exist; live models gain the
    /// relations that become resolvable on the next graph operation.
    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn on_event(&mut self, handler: impl Fn(&GraphEvent) + Send + Sync + 'static) {
        self.events.subscribe(Box::new(handler));
    }

    /// Resolve pending declarations now instead of on first use
    pub fn prepare(&mut self) -> Result<()> {
        self.ensure_schema()
    }

    /// Number of live models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.len() == 0
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// The registered instance of `type_id` (or a subtype) with this id
    pub fn resolve(&self, type_id: TypeId, id: &ModelId) -> Option<ModelRef> {
        let model = self.store.resolve(self.registry.root_of(type_id), id)?;
        self.type_of(model)
            .filter(|t| self.registry.is_a(*t, type_id))
            .map(|_| model)
    }

    /// Put a previously unregistered model back into the identity map.
    /// Returns `false` for a model without an id.
    pub fn register(&mut self, model: ModelRef) -> Result<bool> {
        let type_id = self.model(model)?.type_id;
        let root = self.registry.root_of(type_id);
        let Some(id) = self.id_of(model) else {
            return Ok(false);
        };
        self.store
            .register(root, id.clone(), model)
            .map_err(|_| self.duplicate(type_id, id))?;
        self.store.track(root, model);
        Ok(true)
    }

    /// Remove a model from the identity map and its type's instance list.
    /// Its relations stay bound.
    pub fn unregister(&mut self, model: ModelRef) -> Result<()> {
        let type_id = self.model(model)?.type_id;
        let root = self.registry.root_of(type_id);
        if let Some(id) = self.id_of(model) {
            self.store.unregister(root, &id, model);
        }
        self.store.untrack(root, model);
        Ok(())
    }

    pub fn is_registered(&self, model: ModelRef) -> bool {
        let Some(type_id) = self.type_of(model) else {
            return false;
        };
        self.id_of(model).is_some_and(|id| {
            self.store
                .is_registered(self.registry.root_of(type_id), &id, model)
        })
    }

    /// Tracked instances of `type_id` and its subtypes, in creation order
    pub fn instances_of(&self, type_id: TypeId) -> Vec<ModelRef> {
        self.store
            .instances(self.registry.root_of(type_id))
            .iter()
            .copied()
            .filter(|m| self.type_of(*m).is_some_and(|t| self.registry.is_a(t, type_id)))
            .collect()
    }

    /// Return the registered instance matching `lookup`, or construct one.
    ///
    /// A bare id only ever looks up. Attributes naming a registered id are
    /// merged into it (unless `merge` is off); otherwise a new instance of
    /// the subtype picked by the discriminator is built when `create` is on.
    pub fn find_or_create(
        &mut self,
        type_id: TypeId,
        lookup: impl Into<Lookup>,
        options: FindOptions,
    ) -> Result<Option<ModelRef>> {
        self.ensure_schema()?;
        self.begin();
        let result =
            self.find_or_create_inner(type_id, lookup.into(), options, SetOptions::default());
        self.finish(result)
    }

    pub fn find(&mut self, type_id: TypeId, lookup: impl Into<Lookup>) -> Result<Option<ModelRef>> {
        self.find_or_create(type_id, lookup, FindOptions::lookup_only())
    }

    /// Construct a new instance; fails with [`GraphError::DuplicateId`] when
    /// the id is taken.
    pub fn create(&mut self, type_id: TypeId, lookup: impl Into<Lookup>) -> Result<ModelRef> {
        self.ensure_schema()?;
        let attrs = match lookup.into() {
            Lookup::Attrs(attrs) => attrs,
            Lookup::Id(id) => Attrs::new().with(self.registry.id_attribute(type_id), id),
        };
        self.begin();
        let result = self.build(type_id, attrs, SetOptions::default());
        self.finish(result)
    }

    // ========================================================================
    // Model access
    // ========================================================================

    pub fn contains(&self, model: ModelRef) -> bool {
        self.models.contains(model)
    }

    pub fn type_of(&self, model: ModelRef) -> Option<TypeId> {
        self.models.get(model).map(|m| m.type_id)
    }

    pub fn id_value(&self, model: ModelRef) -> Option<&Value> {
        let data = self.models.get(model)?;
        data.attributes
            .get(self.registry.id_attribute(data.type_id))
            .filter(|v| !v.is_null())
    }

    pub fn id_of(&self, model: ModelRef) -> Option<ModelId> {
        self.id_value(model).and_then(ModelId::from_value)
    }

    pub fn attribute(&self, model: ModelRef, key: &str) -> Option<&Value> {
        self.models.get(model)?.attributes.get(key)
    }

    /// Plain attributes; relation keys are read through [`Graph::get`]
    pub fn attributes(&self, model: ModelRef) -> Option<&Map<String, Value>> {
        self.models.get(model).map(|m| &m.attributes)
    }

    pub fn get(&self, model: ModelRef, key: &str) -> Option<Attr<'_>> {
        let data = self.models.get(model)?;
        if let Some(binding) = data.binding(key) {
            return Some(match binding.state {
                BindingState::One(related) => Attr::One(related),
                BindingState::Many(collection) => Attr::Many(collection),
            });
        }
        data.attributes.get(key).map(Attr::Value)
    }

    /// The model bound to a to-one relation
    pub fn related(&self, model: ModelRef, key: &str) -> Option<ModelRef> {
        self.models.get(model)?.binding(key)?.related_model()
    }

    /// Bound models of any relation, in order
    pub fn related_models(&self, model: ModelRef, key: &str) -> Vec<ModelRef> {
        let Some(binding) = self.models.get(model).and_then(|m| m.binding(key)) else {
            return Vec::new();
        };
        match binding.state {
            BindingState::One(related) => related.into_iter().collect(),
            BindingState::Many(collection) => self.models(collection).to_vec(),
        }
    }

    /// An instance known only by its id
    pub fn is_stub(&self, model: ModelRef) -> bool {
        let Some(data) = self.models.get(model) else {
            return false;
        };
        let id_attribute = self.registry.id_attribute(data.type_id);
        data.attributes.contains_key(id_attribute)
            && data.attributes.keys().all(|k| k == id_attribute)
    }

    pub fn get_relation(&self, model: ModelRef, key: &str) -> Option<&Binding> {
        self.models.get(model)?.binding(key)
    }

    pub fn get_relations(&self, model: ModelRef) -> &[Binding] {
        self.models
            .get(model)
            .map(|m| m.relations.as_slice())
            .unwrap_or(&[])
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    pub fn set(&mut self, model: ModelRef, attrs: impl Into<Attrs>, options: SetOptions) -> Result<()> {
        self.ensure_schema()?;
        self.model(model)?;
        self.begin();
        let result = self.apply_attrs(model, attrs.into(), options);
        self.finish(result)
    }

    pub fn set_attr(&mut self, model: ModelRef, key: &str, value: impl Into<AttrValue>) -> Result<()> {
        self.set(model, Attrs::new().with(key, value), SetOptions::default())
    }

    /// Bind `related` into a relation without touching its other members
    pub fn add_related(&mut self, model: ModelRef, key: &str, related: ModelRef) -> Result<()> {
        self.ensure_schema()?;
        let expected = self.binding(model, key)?.relation.related;
        let Some(actual) = self.type_of(related) else {
            return Err(GraphError::StaleModel(related));
        };
        if !self.registry.is_a(actual, expected) {
            tracing::warn!(
                key,
                expected = self.registry.name(expected),
                actual = self.registry.name(actual),
                "related model has the wrong type; ignoring"
            );
            return Ok(());
        }
        self.begin();
        let result = self.link(model, key, related);
        self.finish(result)
    }

    pub fn remove_related(&mut self, model: ModelRef, key: &str, related: ModelRef) -> Result<()> {
        self.binding(model, key)?;
        self.begin();
        let result = self.unlink(model, key, related, Cause::Detach);
        self.finish(result)
    }

    /// Drop every attribute and relation and leave the identity map
    pub fn clear(&mut self, model: ModelRef) -> Result<()> {
        self.model(model)?;
        self.begin();
        let result = self.clear_inner(model);
        self.finish(result)
    }

    /// A new instance with the same plain attributes and no id. Relations
    /// are not copied: to-one related models stay bound to the original.
    pub fn clone_model(&mut self, model: ModelRef) -> Result<ModelRef> {
        let data = self.model(model)?;
        let type_id = data.type_id;
        let id_attribute = self.registry.id_attribute(type_id);
        let attrs: Attrs = data
            .attributes
            .iter()
            .filter(|(k, _)| k.as_str() != id_attribute)
            .map(|(k, v)| (k.clone(), AttrValue::Json(v.clone())))
            .collect();
        self.begin();
        let result = self.build(type_id, attrs, SetOptions::default());
        self.finish(result)
    }

    /// Detach a model from everything that references it and free it
    pub fn destroy(&mut self, model: ModelRef) -> Result<()> {
        self.model(model)?;
        self.begin();
        let result = self.destroy_inner(model);
        self.finish(result)
    }

    // ========================================================================
    // Collections
    // ========================================================================

    pub fn create_collection(&mut self, model_type: TypeId) -> CollectionRef {
        self.collections.insert(CollectionData::new(model_type, None))
    }

    /// Drop a free-standing collection. Relation collections belong to
    /// their model and are left alone (`false`).
    pub fn drop_collection(&mut self, collection: CollectionRef) -> Result<bool> {
        if self.collection(collection)?.owner.is_some() {
            return Ok(false);
        }
        let Some(data) = self.collections.remove(collection) else {
            return Err(GraphError::StaleCollection(collection));
        };
        for model in data.models {
            self.drop_holder(model, &Holder::Collection(collection));
        }
        Ok(true)
    }

    pub fn models(&self, collection: CollectionRef) -> &[ModelRef] {
        self.collections
            .get(collection)
            .map(|c| c.models.as_slice())
            .unwrap_or(&[])
    }

    pub fn collection_type(&self, collection: CollectionRef) -> Option<TypeId> {
        self.collections.get(collection).map(|c| c.model_type)
    }

    pub fn collection_owner(&self, collection: CollectionRef) -> Option<(ModelRef, &str)> {
        self.collections
            .get(collection)?
            .owner
            .as_ref()
            .map(|(model, key)| (*model, key.as_str()))
    }

    pub fn collection_get(&self, collection: CollectionRef, id: &ModelId) -> Option<ModelRef> {
        self.models(collection)
            .iter()
            .copied()
            .find(|m| self.id_of(*m).as_ref() == Some(id))
    }

    /// Add ids, objects or models; returns the models now in the collection
    /// for the given items.
    pub fn collection_add(
        &mut self,
        collection: CollectionRef,
        items: impl Into<AttrValue>,
        options: SetOptions,
    ) -> Result<Vec<ModelRef>> {
        self.ensure_schema()?;
        self.begin();
        let result = self.collection_add_inner(collection, items.into(), options);
        self.finish(result)
    }

    /// Replace the contents, keeping the given order
    pub fn collection_set(
        &mut self,
        collection: CollectionRef,
        items: impl Into<AttrValue>,
        options: SetOptions,
    ) -> Result<Vec<ModelRef>> {
        self.ensure_schema()?;
        self.begin();
        let result = self.collection_set_inner(collection, items.into(), options);
        self.finish(result)
    }

    pub fn collection_remove(&mut self, collection: CollectionRef, model: ModelRef) -> Result<bool> {
        let owner = self.collection(collection)?.owner.clone();
        if !self.collection(collection)?.contains(model) {
            return Ok(false);
        }
        self.begin();
        let result = match owner {
            Some((owner, key)) => self.unlink(owner, &key, model, Cause::Detach).map(|_| true),
            None => self.remove_from_plain(collection, model),
        };
        self.finish(result)
    }

    // ========================================================================
    // Fetch support
    // ========================================================================

    /// Bind instances for `ids` into a relation, creating id-only stubs for
    /// ids not yet registered.
    pub fn materialize(&mut self, model: ModelRef, key: &str, ids: &[ModelId]) -> Result<Vec<ModelRef>> {
        self.ensure_schema()?;
        self.begin();
        let result = self.materialize_inner(model, key, ids);
        self.finish(result)
    }

    /// Merge a record loaded for `type_id`. The type's parse hook runs over
    /// it first; `expected` supplies the id when the record omits one.
    pub fn apply_fetched(
        &mut self,
        type_id: TypeId,
        expected: Option<&ModelId>,
        record: Value,
    ) -> Result<Option<ModelRef>> {
        if !record.is_object() {
            tracing::warn!(type_name = self.registry.name(type_id), "fetched record is not an object; ignoring");
            return Ok(None);
        }
        self.ensure_schema()?;
        let mut attrs = Attrs::from(record);
        if let Some(parse) = self.registry.parse_hook(type_id).cloned() {
            attrs = attrs.parsed_with(&parse);
        }
        let id_attribute = self.registry.id_attribute(type_id).to_string();
        if let Some(id) = expected {
            if attrs.get(&id_attribute).is_none() {
                // Numeric stub ids stay numeric.
                let raw = self
                    .resolve(type_id, id)
                    .and_then(|stub| self.id_value(stub).cloned())
                    .unwrap_or_else(|| Value::String(id.as_str().to_string()));
                attrs.insert(id_attribute, raw);
            }
        }
        self.begin();
        let result = self.find_or_create_inner(
            type_id,
            Lookup::Attrs(attrs),
            FindOptions::default(),
            SetOptions::default(),
        );
        self.finish(result)
    }

    /// Relations marked for automatic fetching on models constructed since
    /// the last call
    pub fn take_auto_fetches(&mut self) -> Vec<(ModelRef, String)> {
        let queued = std::mem::take(&mut self.auto_fetch);
        queued
            .into_iter()
            .filter(|(m, _)| self.models.contains(*m))
            .collect()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    pub(crate) fn model(&self, model: ModelRef) -> Result<&ModelData> {
        self.models.get(model).ok_or(GraphError::StaleModel(model))
    }

    pub(crate) fn model_mut(&mut self, model: ModelRef) -> Result<&mut ModelData> {
        self.models.get_mut(model).ok_or(GraphError::StaleModel(model))
    }

    pub(crate) fn collection(&self, collection: CollectionRef) -> Result<&CollectionData> {
        self.collections
            .get(collection)
            .ok_or(GraphError::StaleCollection(collection))
    }

    pub(crate) fn collection_mut(&mut self, collection: CollectionRef) -> Result<&mut CollectionData> {
        self.collections
            .get_mut(collection)
            .ok_or(GraphError::StaleCollection(collection))
    }

    pub(crate) fn binding(&self, model: ModelRef, key: &str) -> Result<&Binding> {
        let data = self.model(model)?;
        data.binding(key).ok_or_else(|| GraphError::UnknownRelation {
            type_name: self.registry.name(data.type_id).to_string(),
            key: key.to_string(),
        })
    }

    pub(crate) fn binding_mut(&mut self, model: ModelRef, key: &str) -> Result<&mut Binding> {
        let data = self
            .models
            .get_mut(model)
            .ok_or(GraphError::StaleModel(model))?;
        let type_id = data.type_id;
        match data.relations.iter_mut().find(|b| b.relation.key == key) {
            Some(binding) => Ok(binding),
            None => Err(GraphError::UnknownRelation {
                type_name: self.registry.name(type_id).to_string(),
                key: key.to_string(),
            }),
        }
    }

    fn duplicate(&self, type_id: TypeId, id: ModelId) -> GraphError {
        GraphError::DuplicateId {
            type_name: self.registry.name(type_id).to_string(),
            id,
        }
    }

    pub(crate) fn begin(&mut self) {
        self.events.begin();
    }

    pub(crate) fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        let models = &self.models;
        self.events.end(|m| models.contains(m));
        result
    }

    /// Prepare the registry and give live models bindings for relations that
    /// have become resolvable since they were built.
    fn ensure_schema(&mut self) -> Result<()> {
        self.registry.prepare()?;
        if self.registry.generation() == self.realized_generation {
            return Ok(());
        }
        self.realized_generation = self.registry.generation();
        let live: Vec<(ModelRef, TypeId)> = self
            .models
            .iter()
            .map(|(model, data): (ModelRef, &ModelData)| (model, data.type_id))
            .collect();
        for (model, type_id) in live {
            let Ok(relations) = self.registry.relations_for(type_id) else {
                continue;
            };
            for relation in relations {
                if self.model(model)?.binding(&relation.key).is_some() {
                    continue;
                }
                tracing::debug!(key = %relation.key, "binding late-resolved relation");
                let binding = self.new_binding(model, relation);
                self.model_mut(model)?.relations.push(binding);
            }
        }
        Ok(())
    }

    fn new_binding(&mut self, owner: ModelRef, relation: Arc<Relation>) -> Binding {
        let state = match relation.kind {
            RelationKind::ToOne => BindingState::One(None),
            RelationKind::ToMany => BindingState::Many(self.collections.insert(CollectionData::new(
                relation.related,
                Some((owner, relation.key.clone())),
            ))),
        };
        Binding {
            relation,
            state,
            key_contents: Vec::new(),
        }
    }

    pub(crate) fn find_or_create_inner(
        &mut self,
        type_id: TypeId,
        lookup: Lookup,
        options: FindOptions,
        set: SetOptions,
    ) -> Result<Option<ModelRef>> {
        let mut attrs = match lookup {
            Lookup::Id(raw) => return Ok(ModelId::from_value(&raw).and_then(|id| self.resolve(type_id, &id))),
            Lookup::Attrs(attrs) => attrs,
        };
        if options.parse {
            if let Some(parse) = self.registry.parse_hook(type_id).cloned() {
                attrs = attrs.parsed_with(&parse);
            }
        }
        let existing = attrs
            .id(self.registry.id_attribute(type_id))
            .and_then(|id| self.resolve(type_id, &id));
        if let Some(found) = existing {
            if options.merge {
                self.apply_attrs(found, attrs, set)?;
            }
            return Ok(Some(found));
        }
        if !options.create {
            return Ok(None);
        }
        self.build(type_id, attrs, set).map(Some)
    }

    /// Construct a model: pick the subtype, create its bindings, then apply
    /// attributes (the id first, so the instance is registered before any
    /// relation reaches back to it).
    pub(crate) fn build(&mut self, declared: TypeId, attrs: Attrs, options: SetOptions) -> Result<ModelRef> {
        let type_id = self.registry.resolve_subtype(declared, &attrs.json_view())?;
        let relations = self.registry.relations_for(type_id)?;
        let root = self.registry.root_of(type_id);
        if let Some(id) = attrs.id(self.registry.id_attribute(type_id)) {
            if self.store.resolve(root, &id).is_some() {
                return Err(self.duplicate(type_id, id));
            }
        }

        let model: ModelRef = self.models.insert(ModelData::new(type_id));
        let bindings: Vec<Binding> = relations
            .into_iter()
            .map(|relation| self.new_binding(model, relation))
            .collect();
        self.model_mut(model)?.relations = bindings;
        self.store.track(root, model);

        if let Err(err) = self.apply_attrs(model, attrs, options) {
            if let Err(cleanup) = self.destroy_inner(model) {
                tracing::warn!(error = %cleanup, "failed to discard partially built model");
            }
            self.events.forget(model);
            return Err(err);
        }
        self.events.discard_changes(model);
        self.queue_auto_fetch(model);
        tracing::debug!(
            type_name = self.registry.name(type_id),
            id = ?self.id_of(model),
            "model constructed"
        );
        Ok(model)
    }

    fn queue_auto_fetch(&mut self, model: ModelRef) {
        if !self.config.auto_fetch {
            return;
        }
        let keys: Vec<String> = self
            .get_relations(model)
            .iter()
            .filter(|b| b.relation.auto_fetch)
            .map(|b| b.relation.key.clone())
            .collect();
        for key in keys {
            if self
                .ids_to_fetch(model, &key, false)
                .is_ok_and(|ids| !ids.is_empty())
            {
                self.auto_fetch.push((model, key));
            }
        }
    }

    pub(crate) fn apply_attrs(&mut self, model: ModelRef, attrs: Attrs, options: SetOptions) -> Result<()> {
        let type_id = self.model(model)?.type_id;
        let id_attribute = self.registry.id_attribute(type_id).to_string();
        let relations: Vec<Arc<Relation>> = self
            .model(model)?
            .relations
            .iter()
            .map(|b| b.relation.clone())
            .collect();

        let mut scalars: Vec<(String, AttrValue)> = Vec::new();
        let mut links: Vec<(Arc<Relation>, AttrValue)> = Vec::new();
        for (key, value) in attrs {
            let Some(relation) = relations
                .iter()
                .find(|r| r.key == key || r.key_source == key)
            else {
                scalars.push((key, value));
                continue;
            };
            // A value under key_source wins over one under the key itself.
            match links.iter().position(|(r, _)| r.key == relation.key) {
                Some(pos) if key == relation.key_source => links[pos].1 = value,
                Some(_) => {}
                None => links.push((relation.clone(), value)),
            }
        }
        if let Some(pos) = scalars.iter().position(|(k, _)| *k == id_attribute) {
            let id = scalars.remove(pos);
            scalars.insert(0, id);
        }

        for (key, value) in scalars {
            let AttrValue::Json(value) = value else {
                tracing::warn!(key = %key, "model handles can only be assigned to relation keys; ignoring");
                continue;
            };
            if key == id_attribute {
                self.change_id(model, &value)?;
            }
            self.write_scalar(model, key, value)?;
        }
        for (relation, value) in links {
            self.assign_relation(model, &relation, value, options)?;
        }
        Ok(())
    }

    fn write_scalar(&mut self, model: ModelRef, key: String, value: Value) -> Result<()> {
        let data = self.model_mut(model)?;
        if data.attributes.get(&key) == Some(&value) {
            return Ok(());
        }
        data.attributes.insert(key.clone(), value);
        self.events.changed(model, &key);
        Ok(())
    }

    /// Move a model to a new id in the identity map
    fn change_id(&mut self, model: ModelRef, value: &Value) -> Result<()> {
        let (type_id, old) = {
            let data = self.model(model)?;
            let id_attribute = self.registry.id_attribute(data.type_id);
            let old = data.attributes.get(id_attribute).and_then(ModelId::from_value);
            (data.type_id, old)
        };
        let new = ModelId::from_value(value);
        if old == new {
            return Ok(());
        }
        let root = self.registry.root_of(type_id);
        if let Some(new_id) = new {
            self.store
                .register(root, new_id.clone(), model)
                .map_err(|_| self.duplicate(type_id, new_id))?;
            // A cleared model rejoins its type's instances when it gets an id again.
            self.store.track(root, model);
        }
        if let Some(old_id) = old {
            self.store.unregister(root, &old_id, model);
        }
        Ok(())
    }

    fn clear_inner(&mut self, model: ModelRef) -> Result<()> {
        self.unregister(model)?;
        let keys: Vec<String> = self.model(model)?.attributes.keys().cloned().collect();
        for key in keys {
            self.model_mut(model)?.attributes.remove(&key);
            self.events.changed(model, &key);
        }
        let bound = self.model(model)?.bound(&self.collections);
        for (key, related) in bound {
            for target in related {
                self.unlink(model, &key, target, Cause::Detach)?;
            }
            self.binding_mut(model, &key)?.key_contents.clear();
        }
        Ok(())
    }

    pub(crate) fn destroy_inner(&mut self, model: ModelRef) -> Result<()> {
        let bound = self.model(model)?.bound(&self.collections);
        for (key, related) in bound {
            for target in related {
                self.unlink(model, &key, target, Cause::Destroy)?;
            }
        }
        let holders = self.model(model)?.held_by.clone();
        for holder in holders {
            match holder {
                Holder::One { owner, key } => {
                    self.unlink(owner, &key, model, Cause::Destroy)?;
                }
                Holder::Collection(collection) => {
                    match self.collection(collection)?.owner.clone() {
                        Some((owner, key)) => self.unlink(owner, &key, model, Cause::Destroy)?,
                        None => {
                            self.remove_from_plain(collection, model)?;
                        }
                    }
                }
            }
        }

        let type_id = self.model(model)?.type_id;
        let id = self.id_of(model);
        let root = self.registry.root_of(type_id);
        if let Some(id) = &id {
            self.store.unregister(root, id, model);
        }
        self.store.untrack(root, model);
        let data = self.models.remove(model).ok_or(GraphError::StaleModel(model))?;
        for binding in &data.relations {
            if let BindingState::Many(collection) = binding.state {
                self.collections.remove(collection);
            }
        }
        self.events.push(GraphEvent::Destroyed { model });
        tracing::debug!(type_name = self.registry.name(type_id), id = ?id, "model destroyed");
        Ok(())
    }

    fn collection_add_inner(
        &mut self,
        collection: CollectionRef,
        items: AttrValue,
        options: SetOptions,
    ) -> Result<Vec<ModelRef>> {
        let (model_type, owner) = {
            let data = self.collection(collection)?;
            (data.model_type, data.owner.clone())
        };
        let resolved = self.resolve_items(model_type, items, options)?;
        for &model in &resolved.models {
            match &owner {
                Some((owner, key)) => self.link(*owner, key, model)?,
                None => self.add_to_plain(collection, model)?,
            }
        }
        Ok(resolved.models)
    }

    fn collection_set_inner(
        &mut self,
        collection: CollectionRef,
        items: AttrValue,
        options: SetOptions,
    ) -> Result<Vec<ModelRef>> {
        let (model_type, owner) = {
            let data = self.collection(collection)?;
            (data.model_type, data.owner.clone())
        };
        let resolved = self.resolve_items(model_type, items, options)?;
        let models = resolved.models.clone();
        match owner {
            Some((owner, key)) => self.reconcile_many(owner, &key, resolved, options.remove)?,
            None => self.reconcile_plain(collection, &models, options.remove)?,
        }
        Ok(models)
    }

    fn materialize_inner(&mut self, model: ModelRef, key: &str, ids: &[ModelId]) -> Result<Vec<ModelRef>> {
        let relation = self.binding(model, key)?.relation.clone();
        let mut bound = Vec::with_capacity(ids.len());
        for id in ids {
            let raw = Value::String(id.as_str().to_string());
            let Some(target) = self.resolve_or_stub(relation.related, raw)? else {
                continue;
            };
            match relation.kind {
                RelationKind::ToOne => self.replace_one(model, key, Some(target))?,
                RelationKind::ToMany => self.link(model, key, target)?,
            }
            bound.push(target);
        }
        Ok(bound)
    }

    /// The registered instance for a bare id, or a new id-only stub
    pub(crate) fn resolve_or_stub(&mut self, related: TypeId, raw: Value) -> Result<Option<ModelRef>> {
        let Some(id) = ModelId::from_value(&raw) else {
            return Ok(None);
        };
        if let Some(found) = self.store.resolve(self.registry.root_of(related), &id) {
            if self.resolve(related, &id).is_some() {
                return Ok(Some(found));
            }
            tracing::warn!(
                id = %id,
                expected = self.registry.name(related),
                "id belongs to an instance of an unrelated type; ignoring"
            );
            return Ok(None);
        }
        let attrs = Attrs::new().with(self.registry.id_attribute(related), raw);
        self.build(related, attrs, SetOptions::default()).map(Some)
    }

    pub(crate) fn add_to_plain(&mut self, collection: CollectionRef, model: ModelRef) -> Result<()> {
        let data = self.collection_mut(collection)?;
        if data.contains(model) {
            return Ok(());
        }
        data.models.push(model);
        self.add_holder(model, Holder::Collection(collection));
        self.events.push(GraphEvent::Added { collection, model });
        Ok(())
    }

    pub(crate) fn remove_from_plain(&mut self, collection: CollectionRef, model: ModelRef) -> Result<bool> {
        if !self.collection_mut(collection)?.remove(model) {
            return Ok(false);
        }
        self.drop_holder(model, &Holder::Collection(collection));
        self.events.push(GraphEvent::Removed { collection, model });
        Ok(true)
    }
}
