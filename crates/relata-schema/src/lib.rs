//! Relata schema layer: model types, relation descriptors and the type registry
//!
//! Types are declared once with [`TypeDef`] and registered in a [`TypeRegistry`].
//! The registry owns everything that is static about the object graph:
//!
//! ```text
//! ┌──────────────┐   define()    ┌──────────────────────────────────────────┐
//! │   TypeDef    │──────────────►│               TypeRegistry               │
//! │ relations    │               │                                          │
//! │ subModelTypes│               │  scopes ──► name → TypeId                │
//! └──────────────┘               │  prepare() ──► hierarchy (parent/child)  │
//!                                │            ──► reverse relations         │
//!                                │            ──► effective relations       │
//!                                │            ──► discriminator tables      │
//!                                └──────────────────────────────────────────┘
//! ```
//!
//! Nothing here touches live instances; the graph crate realizes descriptors
//! into bindings on models.

pub mod descriptor;
pub mod id;
pub mod registry;
pub mod scope;


pub use descriptor::{
    BatchUrlFn, CollectionType, IncludeInJson, ParseFn, Relation, RelationDef, RelationKind,
    ReverseRelation, TypeDef, TypeRef,
};
pub use id::{ModelId, TypeId};
pub use registry::{SchemaConfig, TypeRegistry};
pub use scope::ModelScope;

/// Configuration errors. These indicate a programming error in the type
/// declarations and surface when a model of an affected type is constructed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown type `{name}` referenced by `{referenced_by}`")]
    UnknownType { name: String, referenced_by: String },

    #[error("type id {0:?} is not registered")]
    UnknownTypeId(TypeId),

    #[error("type `{0}` is already defined")]
    DuplicateType(String),

    #[error("model scope `{0}` is already registered")]
    DuplicateScope(String),

    #[error("relation `{key}` on `{type_name}` conflicts with an existing relation: {reason}")]
    ConflictingRelation {
        type_name: String,
        key: String,
        reason: String,
    },

    #[error("relation `{key}` on `{type_name}`: a to-many relation cannot have a to-many reverse")]
    ManyToMany { type_name: String, key: String },

    #[error("type hierarchy conflict for `{type_name}`: {reason}")]
    HierarchyConflict { type_name: String, reason: String },
}
