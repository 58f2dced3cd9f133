//! Static declarations: model types and the relations between them.

use crate::id::{ModelId, TypeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Builds one URL for a set of ids (batched fetch of a to-many relation).
pub type BatchUrlFn = Arc<dyn Fn(&[ModelId]) -> String + Send + Sync>;

/// Rewrites raw top-level attributes before they reach a model.
pub type ParseFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    ToOne,
    ToMany,
}

/// Reference to a related type: direct, or by name through the registry's
/// scopes (resolved lazily, so mutually relating types can be declared in
/// any order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Id(TypeId),
    Name(String),
}

impl From<TypeId> for TypeRef {
    fn from(value: TypeId) -> Self {
        Self::Id(value)
    }
}

impl From<&str> for TypeRef {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl From<String> for TypeRef {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

/// How a relation is projected by the serializer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IncludeInJson {
    /// Nested serialization of the related model(s)
    #[default]
    Full,
    /// The id (or ids) only
    IdAttribute,
    /// One named attribute of each related model
    Attribute(String),
    /// Left out of the output
    Omit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseRelation {
    pub key: String,
    /// Defaults to [`RelationKind::ToOne`]
    pub kind: Option<RelationKind>,
}

/// Collection type used for the models of a to-many relation.
#[derive(Clone)]
pub struct CollectionType {
    pub name: String,
    pub batch_url: Option<BatchUrlFn>,
}

impl CollectionType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batch_url: None,
        }
    }

    pub fn with_batch_url(
        mut self,
        build: impl Fn(&[ModelId]) -> String + Send + Sync + 'static,
    ) -> Self {
        self.batch_url = Some(Arc::new(build));
        self
    }
}

impl fmt::Debug for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionType")
            .field("name", &self.name)
            .field("batch_url", &self.batch_url.is_some())
            .finish()
    }
}

/// A relation as declared on a type
#[derive(Debug, Clone)]
pub struct RelationDef {
    pub kind: RelationKind,
    pub key: String,
    pub related: TypeRef,
    pub reverse: Option<ReverseRelation>,
    pub key_source: Option<String>,
    pub key_destination: Option<String>,
    pub include_in_json: IncludeInJson,
    pub collection_type: Option<CollectionType>,
    pub auto_fetch: bool,
}

impl RelationDef {
    pub fn new(kind: RelationKind, key: impl Into<String>, related: impl Into<TypeRef>) -> Self {
        Self {
            kind,
            key: key.into(),
            related: related.into(),
            reverse: None,
            key_source: None,
            key_destination: None,
            include_in_json: IncludeInJson::Full,
            collection_type: None,
            auto_fetch: false,
        }
    }

    pub fn to_one(key: impl Into<String>, related: impl Into<TypeRef>) -> Self {
        Self::new(RelationKind::ToOne, key, related)
    }

    pub fn to_many(key: impl Into<String>, related: impl Into<TypeRef>) -> Self {
        Self::new(RelationKind::ToMany, key, related)
    }

    /// Declare a to-one reverse relation on the related type
    pub fn reverse(mut self, key: impl Into<String>) -> Self {
        self.reverse = Some(ReverseRelation {
            key: key.into(),
            kind: None,
        });
        self
    }

    pub fn reverse_many(mut self, key: impl Into<String>) -> Self {
        self.reverse = Some(ReverseRelation {
            key: key.into(),
            kind: Some(RelationKind::ToMany),
        });
        self
    }

    pub fn key_source(mut self, source: impl Into<String>) -> Self {
        self.key_source = Some(source.into());
        self
    }

    pub fn key_destination(mut self, destination: impl Into<String>) -> Self {
        self.key_destination = Some(destination.into());
        self
    }

    pub fn include_in_json(mut self, include: IncludeInJson) -> Self {
        self.include_in_json = include;
        self
    }

    pub fn collection_type(mut self, collection: CollectionType) -> Self {
        self.collection_type = Some(collection);
        self
    }

    pub fn auto_fetch(mut self, enabled: bool) -> Self {
        self.auto_fetch = enabled;
        self
    }
}

/// A relation after registry resolution, as carried by bindings.
#[derive(Debug, Clone)]
pub struct Relation {
    pub kind: RelationKind,
    pub key: String,
    pub related: TypeId,
    /// Reverse key and kind on the related type
    pub reverse: Option<(String, RelationKind)>,
    pub key_source: String,
    pub key_destination: String,
    pub include_in_json: IncludeInJson,
    pub collection_type: Option<CollectionType>,
    pub auto_fetch: bool,
    /// Type the descriptor was declared on (or installed on, for reverses)
    pub declared_on: TypeId,
    /// Installed automatically as the reverse of another type's relation
    pub is_reverse: bool,
}

impl Relation {
    pub fn is_to_many(&self) -> bool {
        self.kind == RelationKind::ToMany
    }

    pub fn batch_url(&self) -> Option<&BatchUrlFn> {
        self.collection_type
            .as_ref()
            .and_then(|c| c.batch_url.as_ref())
    }
}

/// A model type declaration
#[derive(Clone, Default)]
pub struct TypeDef {
    pub name: String,
    pub extends: Option<TypeId>,
    pub id_attribute: Option<String>,
    /// Discriminator value → subtype name, in declaration order
    pub sub_model_types: Vec<(String, String)>,
    pub sub_model_type_attribute: Option<String>,
    pub relations: Vec<RelationDef>,
    pub url_root: Option<String>,
    pub parse: Option<ParseFn>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn extends(mut self, parent: TypeId) -> Self {
        self.extends = Some(parent);
        self
    }

    pub fn id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.id_attribute = Some(attribute.into());
        self
    }

    pub fn sub_type(mut self, value: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.sub_model_types.push((value.into(), type_name.into()));
        self
    }

    pub fn sub_type_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.sub_model_type_attribute = Some(attribute.into());
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn url_root(mut self, root: impl Into<String>) -> Self {
        self.url_root = Some(root.into());
        self
    }

    pub fn parse_with(mut self, parse: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.parse = Some(Arc::new(parse));
        self
    }
}

impl fmt::Debug for TypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDef")
            .field("name", &self.name)
            .field("extends", &self.extends)
            .field("id_attribute", &self.id_attribute)
            .field("sub_model_types", &self.sub_model_types)
            .field("sub_model_type_attribute", &self.sub_model_type_attribute)
            .field("relations", &self.relations)
            .field("url_root", &self.url_root)
            .field("parse", &self.parse.is_some())
            .finish()
    }
}
