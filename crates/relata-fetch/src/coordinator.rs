//! Fetch coordinator
//!
//! Loads the unresolved side of relations through a [`Transport`]. Ids are
//! materialized as stubs and bound before the request leaves, so callers see
//! placeholder models immediately; the response is merged into those same
//! instances when it arrives.
//!
//! ```text
//!   fetch_related(model, key)
//!        │  ids_to_fetch ─► in flight? ── yes ─► reuse handle
//!        │                       │ no
//!        ▼                       ▼
//!   materialize stubs ─► spawn request ─► merge / destroy stubs ─► callbacks
//! ```

use crate::config::FetchConfig;
use crate::handle::{FetchHandle, FetchResult};
use crate::transport::{FetchRequest, Transport};
use crate::FetchError;
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use relata_graph::{Attrs, Graph, Lookup, ModelRef};
use relata_schema::{ModelId, Relation, RelationKind, TypeId};
use serde_json::Value;
use std::sync::Arc;

pub type OnSuccess = Arc<dyn Fn(&[ModelRef]) + Send + Sync>;
pub type OnError = Arc<dyn Fn(&FetchError) + Send + Sync>;

/// Per-call fetch options
#[derive(Clone, Default)]
pub struct FetchOptions {
    /// Fetch every id of the relation, not only unresolved ones
    pub refresh: bool,
    on_success: Option<OnSuccess>,
    on_error: Option<OnError>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Called once per request with the models it loaded
    pub fn on_success(mut self, callback: impl Fn(&[ModelRef]) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Called once per failed request
    pub fn on_error(mut self, callback: impl Fn(&FetchError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    fn has_callbacks(&self) -> bool {
        self.on_success.is_some() || self.on_error.is_some()
    }

    fn notify(&self, result: &FetchResult) {
        match result {
            Ok(models) => {
                if let Some(callback) = &self.on_success {
                    callback(models);
                }
            }
            Err(err) => {
                if let Some(callback) = &self.on_error {
                    callback(err);
                }
            }
        }
    }
}

impl std::fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOptions")
            .field("refresh", &self.refresh)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A request ready to be sent
struct Planned {
    related: TypeId,
    request: FetchRequest,
    /// Relation the loaded models are bound into
    owner: Option<(ModelRef, String)>,
}

type InFlight = Arc<Mutex<AHashMap<(TypeId, ModelId), FetchHandle>>>;

/// Deduplicating loader for related models.
///
/// At most one request per (type hierarchy, id) is in flight; later callers
/// asking for the same id share its handle.
#[derive(Clone)]
pub struct FetchCoordinator {
    /// The graph the loaded records are merged into
    graph: Arc<RwLock<Graph>>,
    transport: Arc<dyn Transport>,
    config: FetchConfig,
    /// Handles of requests not yet settled, by hierarchy root and id
    in_flight: InFlight,
}

impl FetchCoordinator {
    pub fn new(graph: Arc<RwLock<Graph>>, transport: Arc<dyn Transport>) -> Self {
        Self::with_config(graph, transport, FetchConfig::default())
    }

    pub fn with_config(
        graph: Arc<RwLock<Graph>>,
        transport: Arc<dyn Transport>,
        config: FetchConfig,
    ) -> Self {
        Self {
            graph,
            transport,
            config,
            in_flight: Arc::default(),
        }
    }

    pub fn graph(&self) -> &Arc<RwLock<Graph>> {
        &self.graph
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Number of ids with a request outstanding
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Ids `key` on `model` would request, without starting anything. Ids
    /// with a request already in flight are left out.
    pub fn ids_to_fetch(
        &self,
        model: ModelRef,
        key: &str,
        refresh: bool,
    ) -> Result<Vec<ModelId>, FetchError> {
        let graph = self.graph.read();
        let root = graph.registry().root_of(graph.relation_of(model, key)?.related);
        let mut ids = graph.ids_to_fetch(model, key, refresh)?;
        let in_flight = self.in_flight.lock();
        ids.retain(|id| !in_flight.contains_key(&(root, id.clone())));
        Ok(ids)
    }

    /// Start loading whatever `key` on `model` still lacks.
    ///
    /// Returns one handle per request, including requests started earlier
    /// for the same ids; an empty list when nothing needs loading. Must be
    /// called inside a Tokio runtime.
    pub fn fetch_related(
        &self,
        model: ModelRef,
        key: &str,
        options: FetchOptions,
    ) -> Result<Vec<FetchHandle>, FetchError> {
        let mut graph = self.graph.write();
        let relation = graph.relation_of(model, key)?.clone();
        let ids = graph.ids_to_fetch(model, key, options.refresh)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let root = graph.registry().root_of(relation.related);

        let mut in_flight = self.in_flight.lock();
        let mut handles: Vec<FetchHandle> = Vec::new();
        let mut fresh: Vec<ModelId> = Vec::new();
        for id in ids {
            match in_flight.get(&(root, id.clone())) {
                Some(existing) => {
                    if !handles.iter().any(|h| h.same_as(existing)) {
                        handles.push(existing.clone());
                    }
                }
                None => fresh.push(id),
            }
        }
        if options.has_callbacks() {
            for shared in &handles {
                let shared = shared.clone();
                let options = options.clone();
                tokio::spawn(async move { options.notify(&shared.await) });
            }
        }
        if fresh.is_empty() {
            return Ok(handles);
        }

        graph.materialize(model, key, &fresh)?;
        for planned in plan(&graph, model, &relation, fresh) {
            let ids = planned.request.ids.clone();
            tracing::debug!(
                type_name = %planned.request.type_name,
                ids = ids.len(),
                url = ?planned.request.url,
                "fetching related models"
            );
            let handle = self.spawn(root, planned, options.clone());
            for id in ids {
                in_flight.insert((root, id), handle.clone());
            }
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Load what `key` lacks and resolve to the relation's bound models once
    /// every request has settled. The first failure fails the handle.
    pub fn get_async(
        &self,
        model: ModelRef,
        key: &str,
        options: FetchOptions,
    ) -> Result<FetchHandle, FetchError> {
        let handles = self.fetch_related(model, key, options)?;
        let graph = self.graph.clone();
        let key = key.to_string();
        if handles.is_empty() {
            return Ok(FetchHandle::ready(Ok(graph.read().related_models(model, &key))));
        }
        Ok(FetchHandle::spawn(async move {
            for result in futures::future::join_all(handles).await {
                result?;
            }
            let models = graph.read().related_models(model, &key);
            Ok(models)
        }))
    }

    /// Load one model by id, merging into the registered instance (or a new
    /// stub). With `refresh` off, an instance that is not a stub is returned
    /// as is.
    pub fn fetch_model(
        &self,
        type_id: TypeId,
        id: &ModelId,
        options: FetchOptions,
    ) -> Result<FetchHandle, FetchError> {
        let mut graph = self.graph.write();
        let root = graph.registry().root_of(type_id);
        if let Some(existing) = self.in_flight.lock().get(&(root, id.clone())) {
            return Ok(existing.clone());
        }

        let model = match graph.resolve(type_id, id) {
            Some(model) => model,
            None => {
                let id_attribute = graph.registry().id_attribute(type_id).to_string();
                graph.create(type_id, Attrs::new().with(id_attribute, id.as_str()))?
            }
        };
        if !options.refresh && !graph.is_stub(model) {
            return Ok(FetchHandle::ready(Ok(vec![model])));
        }

        let request = FetchRequest {
            type_name: graph.registry().name(type_id).to_string(),
            ids: vec![id.clone()],
            url: model_url(&graph, type_id, id),
            batch: false,
        };
        let handle = self.spawn(
            root,
            Planned {
                related: type_id,
                request,
                owner: None,
            },
            options,
        );
        self.in_flight.lock().insert((root, id.clone()), handle.clone());
        Ok(handle)
    }

    /// Construct a model and start the fetches its auto-fetch relations ask
    /// for.
    pub fn create(
        &self,
        type_id: TypeId,
        attrs: impl Into<Lookup>,
    ) -> Result<(ModelRef, Vec<FetchHandle>), FetchError> {
        let model = self.graph.write().create(type_id, attrs)?;
        let handles = self.drain_auto_fetches()?;
        Ok((model, handles))
    }

    /// Start fetches queued by models constructed through the graph directly
    pub fn drain_auto_fetches(&self) -> Result<Vec<FetchHandle>, FetchError> {
        let queued = self.graph.write().take_auto_fetches();
        let mut handles = Vec::new();
        for (model, key) in queued {
            handles.extend(self.fetch_related(model, &key, FetchOptions::default())?);
        }
        Ok(handles)
    }

    fn spawn(&self, root: TypeId, planned: Planned, options: FetchOptions) -> FetchHandle {
        let graph = self.graph.clone();
        let transport = self.transport.clone();
        let in_flight = self.in_flight.clone();
        let config = self.config.clone();
        FetchHandle::spawn(async move {
            let ids = planned.request.ids.clone();
            let outcome = transport.fetch(planned.request.clone()).await;
            let result = settle(&graph, &config, &planned, outcome.map_err(FetchError::from));
            in_flight
                .lock()
                .retain(|(r, id), _| !(*r == root && ids.contains(id)));
            options.notify(&result);
            result
        })
    }
}

/// Split ids into requests: one batch (even for a single id) when the
/// relation's collection builds batch URLs, otherwise one per id.
fn plan(graph: &Graph, owner: ModelRef, relation: &Relation, ids: Vec<ModelId>) -> Vec<Planned> {
    let registry = graph.registry();
    let type_name = registry.name(relation.related).to_string();
    let owner = Some((owner, relation.key.clone()));

    if let (RelationKind::ToMany, Some(batch_url)) = (relation.kind, relation.batch_url()) {
        let url = batch_url(&ids);
        return vec![Planned {
            related: relation.related,
            request: FetchRequest {
                type_name,
                ids,
                url: Some(url),
                batch: true,
            },
            owner,
        }];
    }
    ids.into_iter()
        .map(|id| Planned {
            related: relation.related,
            request: FetchRequest {
                type_name: type_name.clone(),
                url: model_url(graph, relation.related, &id),
                ids: vec![id],
                batch: false,
            },
            owner: owner.clone(),
        })
        .collect()
}

fn model_url(graph: &Graph, type_id: TypeId, id: &ModelId) -> Option<String> {
    graph.registry().url_root(type_id).map(|root| {
        if root.ends_with('/') {
            format!("{root}{id}")
        } else {
            format!("{root}/{id}")
        }
    })
}

/// Merge a response into the graph, or clean up after a failure.
fn settle(
    graph: &RwLock<Graph>,
    config: &FetchConfig,
    planned: &Planned,
    outcome: Result<Value, FetchError>,
) -> FetchResult {
    let mut graph = graph.write();
    let batch = planned.request.is_batch();
    let ids = &planned.request.ids;

    let payload = match outcome {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(
                type_name = %planned.request.type_name,
                ids = ids.len(),
                error = %err,
                "fetch failed"
            );
            if !batch || config.destroy_stubs_on_batch_failure {
                destroy_stubs(&mut graph, planned.related, ids)?;
            }
            return Err(err);
        }
    };

    let mut loaded = Vec::new();
    match (payload, batch) {
        (Value::Array(records), _) => {
            for record in records {
                if let Some(model) = graph.apply_fetched(planned.related, None, record)? {
                    loaded.push(model);
                }
            }
        }
        (record, false) => {
            if let Some(model) = graph.apply_fetched(planned.related, ids.first(), record)? {
                loaded.push(model);
            }
        }
        (other, true) => {
            tracing::warn!(response = %other, "batch response is not an array; ignoring");
        }
    }

    if let Some((owner, key)) = &planned.owner {
        if graph.contains(*owner) {
            for model in &loaded {
                graph.add_related(*owner, key, *model)?;
            }
        }
    }
    if batch && config.destroy_missing_from_batch {
        let missing: Vec<ModelId> = ids
            .iter()
            .filter(|id| !loaded.iter().any(|m| graph.id_of(*m).as_ref() == Some(*id)))
            .cloned()
            .collect();
        destroy_stubs(&mut graph, planned.related, &missing)?;
    }
    tracing::debug!(
        type_name = %planned.request.type_name,
        loaded = loaded.len(),
        "fetch settled"
    );
    Ok(loaded)
}

/// Destroy the models for `ids` that are still id-only. Models that gained
/// data meanwhile, or were loaded before, stay.
fn destroy_stubs(graph: &mut Graph, type_id: TypeId, ids: &[ModelId]) -> Result<(), FetchError> {
    for id in ids {
        if let Some(model) = graph.resolve(type_id, id) {
            if graph.is_stub(model) {
                graph.destroy(model)?;
            }
        }
    }
    Ok(())
}
