//! Transport interface
//!
//! The coordinator never talks to a server itself; it hands each request to a
//! [`Transport`] and merges whatever JSON comes back.

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use relata_schema::ModelId;
use serde_json::Value;

/// One load request: a single model by id, or a set of ids through the
/// relation collection's batch URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub type_name: String,
    pub ids: Vec<ModelId>,
    /// Resource location, when the type declares one (`url_root`) or the
    /// relation's collection builds batch URLs
    pub url: Option<String>,
    /// Answered with an array of records, even for a set of one
    pub batch: bool,
}

impl FetchRequest {
    pub fn is_batch(&self) -> bool {
        self.batch
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("`{type_name}` `{id}` not found")]
    NotFound { type_name: String, id: ModelId },

    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport failure: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Load records. A single-id request answers with one object, a batch
    /// with an array of objects.
    async fn fetch(&self, request: FetchRequest) -> Result<Value, TransportError>;
}

// ============================================================================
// In-memory transport
// ============================================================================

/// Serves records from memory, keyed by type name and id. Records the
/// requests it receives.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    records: Mutex<AHashMap<(String, ModelId), Value>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, type_name: &str, id: impl Into<ModelId>, record: Value) {
        self.records
            .lock()
            .insert((type_name.to_string(), id.into()), record);
    }

    pub fn remove(&self, type_name: &str, id: &ModelId) -> Option<Value> {
        self.records.lock().remove(&(type_name.to_string(), id.clone()))
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<Value, TransportError> {
        self.requests.lock().push(request.clone());
        let records = self.records.lock();
        let lookup = |id: &ModelId| records.get(&(request.type_name.clone(), id.clone())).cloned();

        if request.is_batch() {
            // Unknown ids are left out of a batch answer.
            let found: Vec<Value> = request.ids.iter().filter_map(lookup).collect();
            return Ok(Value::Array(found));
        }
        let Some(id) = request.ids.first() else {
            return Ok(Value::Array(Vec::new()));
        };
        lookup(id).ok_or_else(|| TransportError::NotFound {
            type_name: request.type_name.clone(),
            id: id.clone(),
        })
    }
}
