//! # Relata Fetch
//!
//! Asynchronous loading of related models into a shared [`relata_graph::Graph`].
//!
//! The coordinator owns no data of its own: it reads which ids a relation is
//! missing, asks a [`Transport`] for them, and merges the answers back into
//! the graph under its lock. Concurrent requests for the same id share one
//! [`FetchHandle`].

pub mod config;
pub mod coordinator;
pub mod handle;
pub mod transport;


pub use config::FetchConfig;
pub use coordinator::{FetchCoordinator, FetchOptions, OnError, OnSuccess};
pub use handle::{FetchHandle, FetchResult};
pub use transport::{FetchRequest, MemoryTransport, Transport, TransportError};

use relata_graph::GraphError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("fetch task failed: {0}")]
    Join(String),
}
