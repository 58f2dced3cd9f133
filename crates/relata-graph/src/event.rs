//! Change notifications.
//!
//! Events raised while a public operation runs are queued and delivered once
//! the outermost operation finishes, so handlers always observe both ends of
//! every relation already consistent.

use crate::collection::CollectionRef;
use crate::model::ModelRef;
use ahash::AHashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    /// Attribute or to-one relation keys changed on a model
    Changed { model: ModelRef, keys: Vec<String> },
    Added { collection: CollectionRef, model: ModelRef },
    Removed { collection: CollectionRef, model: ModelRef },
    AddedRelated { model: ModelRef, key: String, related: ModelRef },
    RemovedRelated { model: ModelRef, key: String, related: ModelRef },
    Destroyed { model: ModelRef },
}

pub type EventHandler = Box<dyn Fn(&GraphEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct EventQueue {
    handlers: Vec<EventHandler>,
    pending: Vec<GraphEvent>,
    depth: u32,
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("handlers", &self.handlers.len())
            .field("pending", &self.pending.len())
            .field("depth", &self.depth)
            .finish()
    }
}

impl EventQueue {
    pub fn subscribe(&mut self, handler: EventHandler) {
        self.handlers.push(handler);
    }

    pub fn begin(&mut self) {
        self.depth += 1;
    }

    pub fn push(&mut self, event: GraphEvent) {
        self.pending.push(event);
    }

    pub fn changed(&mut self, model: ModelRef, key: &str) {
        self.pending.push(GraphEvent::Changed {
            model,
            keys: vec![key.to_string()],
        });
    }

    /// Drop change events for a model still being constructed
    pub fn discard_changes(&mut self, model: ModelRef) {
        self.pending
            .retain(|e| !matches!(e, GraphEvent::Changed { model: m, .. } if *m == model));
    }

    /// Drop everything queued about a model that never became visible
    pub fn forget(&mut self, model: ModelRef) {
        self.pending.retain(|e| match e {
            GraphEvent::Changed { model: m, .. } | GraphEvent::Destroyed { model: m } => *m != model,
            GraphEvent::Added { model: m, .. } | GraphEvent::Removed { model: m, .. } => *m != model,
            GraphEvent::AddedRelated { model: m, related, .. }
            | GraphEvent::RemovedRelated { model: m, related, .. } => *m != model && *related != model,
        });
    }

    /// Close one level; the outermost close delivers the queue.
    pub fn end(&mut self, is_live: impl Fn(ModelRef) -> bool) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth > 0 || self.pending.is_empty() {
            return;
        }
        let events = coalesce(std::mem::take(&mut self.pending), is_live);
        for event in &events {
            for handler in &self.handlers {
                handler(event);
            }
        }
    }
}

/// One `Changed` per model, at the position of its first change; changes to
/// models destroyed within the same operation are dropped.
fn coalesce(pending: Vec<GraphEvent>, is_live: impl Fn(ModelRef) -> bool) -> Vec<GraphEvent> {
    let mut out: Vec<GraphEvent> = Vec::with_capacity(pending.len());
    let mut changed_at: AHashMap<ModelRef, usize> = AHashMap::new();
    for event in pending {
        match event {
            GraphEvent::Changed { model, keys } => {
                if !is_live(model) {
                    continue;
                }
                match changed_at.get(&model) {
                    Some(&pos) => {
                        if let GraphEvent::Changed { keys: existing, .. } = &mut out[pos] {
                            for key in keys {
                                if !existing.contains(&key) {
                                    existing.push(key);
                                }
                            }
                        }
                    }
                    None => {
                        changed_at.insert(model, out.len());
                        out.push(GraphEvent::Changed { model, keys });
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}
