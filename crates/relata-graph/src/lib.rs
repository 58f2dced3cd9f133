//! # Relata Graph
//!
//! The live object graph: an identity map guaranteeing one instance per
//! (type hierarchy, id), relation bindings kept consistent from both ends,
//! change events, and JSON projection.
//!
//! ```text
//!   raw attrs ──► find_or_create ──► IdentityStore ─── one instance per id
//!                       │
//!                       ▼
//!                 relation engine ── link / unlink / mirror ──► bindings
//!                       │
//!                       ▼
//!                  EventQueue ── delivered after both ends agree
//! ```
//!
//! Models live in an arena and are addressed by copyable [`ModelRef`]
//! handles; relations refer to each other by handle, so cycles need no
//! reference counting.

mod arena;
pub mod collection;
pub mod config;
pub mod event;
mod graph;
pub mod model;
mod relation;
mod serialize;
mod store;
pub mod value;

#[cfg(test)]
mod tests;

pub use collection::CollectionRef;
pub use config::GraphConfig;
pub use event::{EventHandler, GraphEvent};
pub use graph::{FindOptions, Graph, SetOptions};
pub use model::{Binding, BindingState, ModelRef};
pub use value::{Attr, AttrValue, Attrs, Lookup};

use relata_schema::{ModelId, SchemaError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("model {0:?} has been destroyed")]
    StaleModel(ModelRef),

    #[error("collection {0:?} no longer exists")]
    StaleCollection(CollectionRef),

    #[error("type `{type_name}` has no relation `{key}`")]
    UnknownRelation { type_name: String, key: String },

    #[error("another `{type_name}` with id `{id}` is already registered")]
    DuplicateId { type_name: String, id: ModelId },
}

pub type Result<T> = std::result::Result<T, GraphError>;
