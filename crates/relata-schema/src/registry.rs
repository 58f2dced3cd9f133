//! Type registry: hierarchy linking, relation sharing and discriminator tables.
//!
//! Declarations are cheap and order-independent; all cross-type work happens
//! in [`TypeRegistry::prepare`], which recomputes the derived state from the
//! declarations whenever something changed since the last pass.

use crate::descriptor::{IncludeInJson, ParseFn, Relation, RelationKind, TypeDef, TypeRef};
use crate::id::TypeId;
use crate::scope::ModelScope;
use crate::SchemaError;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;

/// Registry-wide defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Id attribute for types that do not declare one
    pub id_attribute: String,
    /// Discriminator attribute for types that do not declare one
    pub sub_model_type_attribute: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            id_attribute: "id".to_string(),
            sub_model_type_attribute: "type".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum RelationSlot {
    Ready(Arc<Relation>),
    /// Related type name that no scope could resolve (yet)
    Pending { key: String, type_name: String },
}

impl RelationSlot {
    fn key(&self) -> &str {
        match self {
            Self::Ready(relation) => &relation.key,
            Self::Pending { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone)]
struct Discriminator {
    attribute: String,
    value: String,
    /// Resolved subtype, or the name that failed to resolve
    target: Result<TypeId, String>,
}

#[derive(Debug)]
struct TypeEntry {
    def: TypeDef,
    parent: Option<TypeId>,
    children: Vec<TypeId>,
    /// Value this type is registered under in its parent's subtype map
    discriminator: Option<String>,
    effective: Vec<RelationSlot>,
    /// Flattened discriminator table over the whole subtype chain, closest first
    sub_types: Vec<Discriminator>,
}

impl TypeEntry {
    fn new(def: TypeDef) -> Self {
        Self {
            parent: def.extends,
            def,
            children: Vec::new(),
            discriminator: None,
            effective: Vec::new(),
            sub_types: Vec::new(),
        }
    }
}

/// All known model types.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    config: SchemaConfig,
    types: Vec<TypeEntry>,
    global: ModelScope,
    scopes: Vec<ModelScope>,
    dirty: bool,
    generation: u64,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::with_config(SchemaConfig::default())
    }

    pub fn with_config(config: SchemaConfig) -> Self {
        Self {
            config,
            types: Vec::new(),
            global: ModelScope::new("global"),
            scopes: Vec::new(),
            dirty: false,
            generation: 0,
        }
    }

    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    /// Register a type under its name in the global scope
    pub fn define(&mut self, def: TypeDef) -> Result<TypeId, SchemaError> {
        if self.global.contains(&def.name) {
            return Err(SchemaError::DuplicateType(def.name));
        }
        if let Some(parent) = def.extends {
            self.entry(parent)?;
        }

        let id = TypeId::new(self.types.len() as u32);
        self.global.insert(def.name.clone(), id);
        tracing::debug!(type_name = %def.name, type_id = id.raw(), "defined model type");
        self.types.push(TypeEntry::new(def));
        self.dirty = true;
        Ok(id)
    }

    pub fn add_model_scope(&mut self, scope: ModelScope) -> Result<(), SchemaError> {
        if self.scopes.iter().any(|s| s.name() == scope.name()) {
            return Err(SchemaError::DuplicateScope(scope.name().to_string()));
        }
        self.scopes.push(scope);
        self.dirty = true;
        Ok(())
    }

    pub fn remove_model_scope(&mut self, name: &str) -> Option<ModelScope> {
        let pos = self.scopes.iter().position(|s| s.name() == name)?;
        self.dirty = true;
        Some(self.scopes.remove(pos))
    }

    /// Resolve a type name: `scope.Name` targets one scope, a bare name
    /// searches the global scope then every added scope in order.
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        if let Some((scope, rest)) = name.split_once('.') {
            return self
                .scopes
                .iter()
                .find(|s| s.name() == scope)
                .and_then(|s| s.get(rest));
        }
        self.global
            .get(name)
            .or_else(|| self.scopes.iter().find_map(|s| s.get(name)))
    }

    pub fn resolve(&self, type_ref: &TypeRef) -> Option<TypeId> {
        match type_ref {
            TypeRef::Id(id) => (id.index() < self.types.len()).then_some(*id),
            TypeRef::Name(name) => self.lookup(name),
        }
    }

    /// Bumped every time `prepare` recomputes derived state
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn type_ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.types.len()).map(|i| TypeId::new(i as u32))
    }

    // ========================================================================
    // Derived state
    // ========================================================================

    /// Recompute hierarchy, reverse relations, effective relations and
    /// discriminator tables. Returns `false` when nothing changed.
    pub fn prepare(&mut self) -> Result<bool, SchemaError> {
        if !self.dirty {
            return Ok(false);
        }

        self.link_hierarchy()?;
        let order = self.hierarchy_order();
        let (installed, reverse_links) = self.collect_reverse_relations()?;
        self.share_relations(&order, installed, &reverse_links);
        self.build_discriminator_tables();

        self.dirty = false;
        self.generation += 1;
        tracing::debug!(
            types = self.types.len(),
            generation = self.generation,
            "type registry prepared"
        );
        Ok(true)
    }

    fn link_hierarchy(&mut self) -> Result<(), SchemaError> {
        for entry in &mut self.types {
            entry.parent = entry.def.extends;
            entry.children.clear();
            entry.discriminator = None;
        }

        let mut declared: Vec<(TypeId, TypeId)> = Vec::new();
        for index in 0..self.types.len() {
            let owner = TypeId::new(index as u32);
            for (value, name) in self.types[index].def.sub_model_types.clone() {
                let Some(sub) = self.lookup(&name) else {
                    continue;
                };
                if sub == owner {
                    return Err(SchemaError::HierarchyConflict {
                        type_name: self.types[index].def.name.clone(),
                        reason: format!("lists itself as subtype `{value}`"),
                    });
                }
                let entry = &mut self.types[sub.index()];
                if entry.parent.is_none() {
                    entry.parent = Some(owner);
                }
                if entry.discriminator.is_none() {
                    entry.discriminator = Some(value);
                }
                declared.push((owner, sub));
            }
        }

        for index in 0..self.types.len() {
            let mut steps = 0usize;
            let mut cursor = self.types[index].parent;
            while let Some(parent) = cursor {
                steps += 1;
                if steps > self.types.len() {
                    return Err(SchemaError::HierarchyConflict {
                        type_name: self.types[index].def.name.clone(),
                        reason: "inheritance cycle".to_string(),
                    });
                }
                cursor = self.types[parent.index()].parent;
            }
        }

        for (owner, sub) in declared {
            if !self.is_a(sub, owner) {
                return Err(SchemaError::HierarchyConflict {
                    type_name: self.types[sub.index()].def.name.clone(),
                    reason: format!(
                        "listed as a subtype of `{}` but already extends `{}`",
                        self.types[owner.index()].def.name,
                        self.parent(sub)
                            .map(|p| self.types[p.index()].def.name.as_str())
                            .unwrap_or("?"),
                    ),
                });
            }
        }

        for index in 0..self.types.len() {
            if let Some(parent) = self.types[index].parent {
                self.types[parent.index()]
                    .children
                    .push(TypeId::new(index as u32));
            }
        }
        Ok(())
    }

    /// Roots first, then breadth-first through children (base → derived)
    fn hierarchy_order(&self) -> Vec<TypeId> {
        let mut order = Vec::with_capacity(self.types.len());
        let mut queue: VecDeque<TypeId> = self
            .type_ids()
            .filter(|t| self.types[t.index()].parent.is_none())
            .collect();
        while let Some(next) = queue.pop_front() {
            order.push(next);
            queue.extend(self.types[next.index()].children.iter().copied());
        }
        order
    }

    #[allow(clippy::type_complexity)]
    fn collect_reverse_relations(
        &self,
    ) -> Result<
        (
            Vec<Vec<Arc<Relation>>>,
            AHashMap<(TypeId, String), (String, RelationKind)>,
        ),
        SchemaError,
    > {
        let mut installed: Vec<Vec<Arc<Relation>>> = vec![Vec::new(); self.types.len()];
        let mut reverse_links = AHashMap::new();

        for owner in self.type_ids() {
            let owner_name = &self.types[owner.index()].def.name;
            for def in &self.types[owner.index()].def.relations {
                let Some(reverse) = &def.reverse else {
                    continue;
                };
                let Some(related) = self.resolve(&def.related) else {
                    continue;
                };
                let reverse_kind = reverse.kind.unwrap_or(RelationKind::ToOne);
                if def.kind == RelationKind::ToMany && reverse_kind == RelationKind::ToMany {
                    return Err(SchemaError::ManyToMany {
                        type_name: owner_name.clone(),
                        key: def.key.clone(),
                    });
                }

                let related_entry = &self.types[related.index()];
                let conflict = |reason: String| SchemaError::ConflictingRelation {
                    type_name: related_entry.def.name.clone(),
                    key: reverse.key.clone(),
                    reason,
                };

                // Both ends declared explicitly: link them instead of installing.
                if let Some(own) = related_entry
                    .def
                    .relations
                    .iter()
                    .find(|d| d.key == reverse.key)
                {
                    let compatible = own.kind == reverse_kind
                        && self
                            .resolve(&own.related)
                            .is_some_and(|t| self.is_a(owner, t) || self.is_a(t, owner));
                    if !compatible {
                        return Err(conflict(format!(
                            "reverse of `{owner_name}.{}` expects {reverse_kind:?} to `{owner_name}`",
                            def.key
                        )));
                    }
                    reverse_links.insert((related, reverse.key.clone()), (def.key.clone(), def.kind));
                    continue;
                }

                if let Some(existing) = installed[related.index()]
                    .iter()
                    .find(|r| r.key == reverse.key)
                {
                    let same = existing.kind == reverse_kind
                        && existing.related == owner
                        && existing.reverse.as_ref().is_some_and(|(k, _)| *k == def.key);
                    if same {
                        continue;
                    }
                    return Err(conflict(format!(
                        "already installed as the reverse of another relation (requested by `{owner_name}.{}`)",
                        def.key
                    )));
                }

                installed[related.index()].push(Arc::new(Relation {
                    kind: reverse_kind,
                    key: reverse.key.clone(),
                    related: owner,
                    reverse: Some((def.key.clone(), def.kind)),
                    key_source: reverse.key.clone(),
                    key_destination: reverse.key.clone(),
                    include_in_json: IncludeInJson::Full,
                    collection_type: None,
                    auto_fetch: false,
                    declared_on: related,
                    is_reverse: true,
                }));
            }
        }
        Ok((installed, reverse_links))
    }

    fn share_relations(
        &mut self,
        order: &[TypeId],
        installed: Vec<Vec<Arc<Relation>>>,
        reverse_links: &AHashMap<(TypeId, String), (String, RelationKind)>,
    ) {
        for &type_id in order {
            let mut slots = self.types[type_id.index()]
                .parent
                .map(|p| self.types[p.index()].effective.clone())
                .unwrap_or_default();

            let own: Vec<RelationSlot> = self.types[type_id.index()]
                .def
                .relations
                .iter()
                .map(|def| match self.resolve(&def.related) {
                    Some(related) => RelationSlot::Ready(Arc::new(Relation {
                        kind: def.kind,
                        key: def.key.clone(),
                        related,
                        reverse: def
                            .reverse
                            .as_ref()
                            .map(|r| (r.key.clone(), r.kind.unwrap_or(RelationKind::ToOne)))
                            .or_else(|| reverse_links.get(&(type_id, def.key.clone())).cloned()),
                        key_source: def.key_source.clone().unwrap_or_else(|| def.key.clone()),
                        key_destination: def
                            .key_destination
                            .clone()
                            .unwrap_or_else(|| def.key.clone()),
                        include_in_json: def.include_in_json.clone(),
                        collection_type: def.collection_type.clone(),
                        auto_fetch: def.auto_fetch,
                        declared_on: type_id,
                        is_reverse: false,
                    })),
                    None => RelationSlot::Pending {
                        key: def.key.clone(),
                        type_name: match &def.related {
                            TypeRef::Name(name) => name.clone(),
                            TypeRef::Id(id) => format!("#{}", id.raw()),
                        },
                    },
                })
                .collect();

            let additions = own.into_iter().chain(
                installed[type_id.index()]
                    .iter()
                    .cloned()
                    .map(RelationSlot::Ready),
            );
            for slot in additions {
                match slots.iter().position(|s| s.key() == slot.key()) {
                    Some(pos) => slots[pos] = slot,
                    None => slots.push(slot),
                }
            }
            self.types[type_id.index()].effective = slots;
        }
    }

    fn build_discriminator_tables(&mut self) {
        for type_id in self.type_ids().collect::<Vec<_>>() {
            let mut table = Vec::new();
            let mut queue = VecDeque::from([type_id]);
            while let Some(next) = queue.pop_front() {
                let attribute = self.sub_type_attribute(next).to_string();
                for (value, name) in &self.types[next.index()].def.sub_model_types {
                    table.push(Discriminator {
                        attribute: attribute.clone(),
                        value: value.clone(),
                        target: self.lookup(name).ok_or_else(|| name.clone()),
                    });
                }
                queue.extend(self.types[next.index()].children.iter().copied());
            }
            self.types[type_id.index()].sub_types = table;
        }
    }

    // ========================================================================
    // Queries (valid after `prepare`)
    // ========================================================================

    fn entry(&self, type_id: TypeId) -> Result<&TypeEntry, SchemaError> {
        self.types
            .get(type_id.index())
            .ok_or(SchemaError::UnknownTypeId(type_id))
    }

    pub fn def(&self, type_id: TypeId) -> Option<&TypeDef> {
        self.types.get(type_id.index()).map(|e| &e.def)
    }

    pub fn name(&self, type_id: TypeId) -> &str {
        self.types
            .get(type_id.index())
            .map(|e| e.def.name.as_str())
            .unwrap_or("<unknown>")
    }

    pub fn parent(&self, type_id: TypeId) -> Option<TypeId> {
        self.types.get(type_id.index()).and_then(|e| e.parent)
    }

    pub fn children(&self, type_id: TypeId) -> &[TypeId] {
        self.types
            .get(type_id.index())
            .map(|e| e.children.as_slice())
            .unwrap_or_default()
    }

    /// Top of the hierarchy; ids are unique per root
    pub fn root_of(&self, type_id: TypeId) -> TypeId {
        let mut current = type_id;
        let mut steps = 0;
        while let Some(parent) = self.parent(current) {
            current = parent;
            steps += 1;
            if steps > self.types.len() {
                break;
            }
        }
        current
    }

    /// `type_id` is `ancestor` or one of its (transitive) subtypes
    pub fn is_a(&self, type_id: TypeId, ancestor: TypeId) -> bool {
        let mut cursor = Some(type_id);
        let mut steps = 0;
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.types.len() {
                return false;
            }
            cursor = self.parent(current);
        }
        false
    }

    fn ancestors(&self, type_id: TypeId) -> impl Iterator<Item = &TypeEntry> + '_ {
        let mut cursor = self.types.get(type_id.index());
        let mut steps = 0;
        let limit = self.types.len();
        std::iter::from_fn(move || {
            let current = cursor?;
            steps += 1;
            cursor = if steps > limit {
                None
            } else {
                current.parent.and_then(|p| self.types.get(p.index()))
            };
            Some(current)
        })
    }

    pub fn id_attribute(&self, type_id: TypeId) -> &str {
        self.ancestors(type_id)
            .find_map(|e| e.def.id_attribute.as_deref())
            .unwrap_or(&self.config.id_attribute)
    }

    pub fn sub_type_attribute(&self, type_id: TypeId) -> &str {
        self.ancestors(type_id)
            .find_map(|e| e.def.sub_model_type_attribute.as_deref())
            .unwrap_or(&self.config.sub_model_type_attribute)
    }

    pub fn url_root(&self, type_id: TypeId) -> Option<&str> {
        self.ancestors(type_id)
            .find_map(|e| e.def.url_root.as_deref())
    }

    pub fn parse_hook(&self, type_id: TypeId) -> Option<&ParseFn> {
        self.ancestors(type_id).find_map(|e| e.def.parse.as_ref())
    }

    /// `(attribute, value)` registered for this type in its supertype's map
    pub fn discriminator_of(&self, type_id: TypeId) -> Option<(&str, &str)> {
        let value = self.types.get(type_id.index())?.discriminator.as_deref()?;
        let parent = self.parent(type_id)?;
        Some((self.sub_type_attribute(parent), value))
    }

    /// Every relation a model of `type_id` carries, own and inherited.
    ///
    /// Fails when one of them names a type no scope can resolve.
    pub fn relations_for(&self, type_id: TypeId) -> Result<Vec<Arc<Relation>>, SchemaError> {
        let entry = self.entry(type_id)?;
        entry
            .effective
            .iter()
            .map(|slot| match slot {
                RelationSlot::Ready(relation) => Ok(relation.clone()),
                RelationSlot::Pending { key, type_name } => Err(SchemaError::UnknownType {
                    name: type_name.clone(),
                    referenced_by: format!("{}.{key}", entry.def.name),
                }),
            })
            .collect()
    }

    pub fn relation(&self, type_id: TypeId, key: &str) -> Option<Arc<Relation>> {
        self.types
            .get(type_id.index())?
            .effective
            .iter()
            .find_map(|slot| match slot {
                RelationSlot::Ready(relation) if relation.key == key => Some(relation.clone()),
                _ => None,
            })
    }

    /// Pick the concrete type to construct for raw attributes given the
    /// declared type, following discriminator values down the hierarchy.
    pub fn resolve_subtype(
        &self,
        type_id: TypeId,
        attributes: &Map<String, Value>,
    ) -> Result<TypeId, SchemaError> {
        let mut current = type_id;
        for _ in 0..=self.types.len() {
            let entry = self.entry(current)?;
            let hit = entry.sub_types.iter().find(|d| {
                attributes
                    .get(&d.attribute)
                    .is_some_and(|v| discriminator_matches(v, &d.value))
            });
            let Some(hit) = hit else {
                return Ok(current);
            };
            let next = hit.target.clone().map_err(|name| SchemaError::UnknownType {
                name,
                referenced_by: format!("{}.{}", entry.def.name, hit.attribute),
            })?;
            if next == current {
                return Ok(current);
            }
            current = next;
        }
        Ok(current)
    }
}

fn discriminator_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        _ => false,
    }
}
