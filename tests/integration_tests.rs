//! Integration tests across the workspace
//!
//! These tests drive the three crates together:
//! - Type registry → Graph construction and identity
//! - Graph → JSON → Graph round trips
//! - Fetch coordinator → Transport → Graph merges
//!
//! Run with: cargo test --test integration_tests

use parking_lot::RwLock;
use relata_fetch::{FetchCoordinator, FetchError, FetchOptions, MemoryTransport};
use relata_graph::{Graph, GraphError, GraphEvent, SetOptions};
use relata_schema::{
    IncludeInJson, ModelId, RelationDef, SchemaError, TypeDef, TypeId, TypeRegistry,
};
use serde_json::json;
use std::sync::Arc;

struct Shop {
    registry: TypeRegistry,
    customer: TypeId,
    order: TypeId,
    payment: TypeId,
    card: TypeId,
    wire: TypeId,
}

/// Orders reference `Product` by name; it is declared last.
fn shop_schema() -> Shop {
    let mut registry = TypeRegistry::new();
    let customer = registry
        .define(TypeDef::new("Customer").url_root("/customers"))
        .unwrap();
    let order = registry
        .define(
            TypeDef::new("Order")
                .url_root("/orders")
                .relation(
                    RelationDef::to_one("customer", customer)
                        .reverse_many("orders")
                        .include_in_json(IncludeInJson::IdAttribute),
                )
                .relation(RelationDef::to_many("products", "Product")),
        )
        .unwrap();
    let payment = registry
        .define(
            TypeDef::new("Payment")
                .sub_type_attribute("kind")
                .sub_type("card", "CardPayment")
                .sub_type("wire", "WirePayment")
                .relation(RelationDef::to_one("order", order).reverse("payment")),
        )
        .unwrap();
    let card = registry.define(TypeDef::new("CardPayment").extends(payment)).unwrap();
    let wire = registry.define(TypeDef::new("WirePayment").extends(payment)).unwrap();
    Shop {
        registry,
        customer,
        order,
        payment,
        card,
        wire,
    }
}

fn with_products(mut shop: Shop) -> Shop {
    shop.registry.define(TypeDef::new("Product")).unwrap();
    shop
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// ============================================================================
// Registry → Graph
// ============================================================================

#[test]
fn test_pending_type_blocks_construction_until_declared() {
    init_tracing();
    let shop = shop_schema();
    let order = shop.order;
    let mut graph = Graph::new(shop.registry);

    let err = graph.create(order, json!({ "id": "o1" })).unwrap_err();
    assert!(matches!(
        err,
        GraphError::Schema(SchemaError::UnknownType { ref name, .. }) if name == "Product"
    ));

    graph.registry_mut().define(TypeDef::new("Product")).unwrap();
    let o1 = graph
        .create(order, json!({ "id": "o1", "products": ["p1", "p2"] }))
        .unwrap();
    assert_eq!(graph.related_models(o1, "products").len(), 2);
}

#[test]
fn test_bindings_follow_reassignment_across_types() {
    let shop = with_products(shop_schema());
    let (customer, order) = (shop.customer, shop.order);
    let mut graph = Graph::new(shop.registry);

    let c1 = graph.create(customer, json!({ "id": "c1", "name": "Ada" })).unwrap();
    let c2 = graph.create(customer, json!({ "id": "c2", "name": "Grace" })).unwrap();
    let o1 = graph.create(order, json!({ "id": "o1", "customer": "c1" })).unwrap();
    let o2 = graph.create(order, json!({ "id": "o2", "customer": "c1" })).unwrap();
    assert_eq!(graph.related_models(c1, "orders"), vec![o1, o2]);

    graph
        .set(o1, json!({ "customer": "c2" }), SetOptions::default())
        .unwrap();
    assert_eq!(graph.related_models(c1, "orders"), vec![o2]);
    assert_eq!(graph.related_models(c2, "orders"), vec![o1]);

    graph.destroy(c2).unwrap();
    assert_eq!(graph.related(o1, "customer"), None);
    assert_eq!(graph.to_json(o1).unwrap()["customer"], json!("c2"));
}

#[test]
fn test_subtypes_share_one_identity_namespace() {
    let shop = with_products(shop_schema());
    let Shop { payment, card, wire, order, .. } = shop;
    let mut graph = Graph::new(shop.registry);

    let p = graph
        .create(payment, json!({ "id": "pay-1", "kind": "card", "order": { "id": "o1" } }))
        .unwrap();
    assert_eq!(graph.type_of(p), Some(card));
    assert_eq!(graph.resolve(card, &ModelId::new("pay-1")), Some(p));
    assert_eq!(graph.resolve(payment, &ModelId::new("pay-1")), Some(p));
    assert_eq!(graph.resolve(wire, &ModelId::new("pay-1")), None);

    let o1 = graph.resolve(order, &ModelId::new("o1")).unwrap();
    assert_eq!(graph.related(o1, "payment"), Some(p));

    let err = graph.create(wire, json!({ "id": "pay-1" })).unwrap_err();
    assert!(matches!(err, GraphError::DuplicateId { .. }));
}

#[test]
fn test_json_round_trip_into_fresh_graph() -> anyhow::Result<()> {
    let shop = with_products(shop_schema());
    let customer = shop.customer;
    let mut graph = Graph::new(shop.registry);

    let c1 = graph.create(
        customer,
        json!({
            "id": "c1",
            "name": "Ada",
            "orders": [
                { "id": "o1", "total": 30, "products": ["p1"] },
                { "id": "o2", "total": 12, "products": [] },
            ],
        }),
    )?;
    let exported = graph.to_json(c1)?;
    assert_eq!(exported["orders"][0]["customer"], json!("c1"));

    let mut fresh = Graph::new(with_products(shop_schema()).registry);
    let copy = fresh.create(customer, exported.clone())?;
    assert_eq!(fresh.to_json(copy)?, exported);
    assert_eq!(fresh.len(), graph.len());
    Ok(())
}

#[test]
fn test_events_observe_whole_operations() {
    let shop = with_products(shop_schema());
    let (customer, order) = (shop.customer, shop.order);
    let mut graph = Graph::new(shop.registry);
    let seen: Arc<parking_lot::Mutex<Vec<GraphEvent>>> = Arc::default();
    let sink = seen.clone();
    graph.on_event(move |event| sink.lock().push(event.clone()));

    let c1 = graph.create(customer, json!({ "id": "c1" })).unwrap();
    seen.lock().clear();
    let o1 = graph.create(order, json!({ "id": "o1", "customer": "c1" })).unwrap();

    let events = seen.lock().clone();
    assert!(events.contains(&GraphEvent::AddedRelated {
        model: c1,
        key: "orders".to_string(),
        related: o1,
    }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, GraphEvent::Changed { model, .. } if *model == o1)));
}

// ============================================================================
// Fetch coordination
// ============================================================================

fn coordinator(shop: Shop) -> (FetchCoordinator, Arc<MemoryTransport>, TypeId, TypeId) {
    let (customer, order) = (shop.customer, shop.order);
    let transport = Arc::new(MemoryTransport::new());
    transport.insert("Order", "o1", json!({ "id": "o1", "total": 30 }));
    transport.insert("Order", "o2", json!({ "id": "o2", "total": 12 }));
    transport.insert("Customer", "c9", json!({ "id": "c9", "name": "Lin" }));
    let graph = Arc::new(RwLock::new(Graph::new(shop.registry)));
    let coordinator = FetchCoordinator::new(graph, transport.clone());
    (coordinator, transport, customer, order)
}

#[tokio::test]
async fn test_fetch_fills_stubs_and_keeps_reverse_bindings() {
    init_tracing();
    let (coordinator, transport, customer, _) = coordinator(with_products(shop_schema()));
    let c1 = coordinator
        .graph()
        .write()
        .create(customer, json!({ "id": "c1", "orders": ["o1", "o2"] }))
        .unwrap();

    let first = coordinator.fetch_related(c1, "orders", FetchOptions::new()).unwrap();
    let second = coordinator.fetch_related(c1, "orders", FetchOptions::new()).unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    for handle in first.into_iter().chain(second) {
        handle.await.unwrap();
    }
    assert_eq!(transport.requests().len(), 2);

    let graph = coordinator.graph().read();
    let orders = graph.related_models(c1, "orders");
    assert_eq!(orders.len(), 2);
    for o in orders {
        assert!(!graph.is_stub(o));
        assert_eq!(graph.related(o, "customer"), Some(c1));
    }
}

#[tokio::test]
async fn test_fetch_failure_is_local_to_missing_ids() {
    let (coordinator, transport, customer, order) = coordinator(with_products(shop_schema()));
    let c1 = coordinator
        .graph()
        .write()
        .create(customer, json!({ "id": "c1", "orders": ["o1", "gone"] }))
        .unwrap();

    let result = coordinator
        .get_async(c1, "orders", FetchOptions::new())
        .unwrap()
        .await;
    assert!(matches!(result, Err(FetchError::Transport(_))));
    assert_eq!(transport.requests().len(), 2);

    let graph = coordinator.graph().read();
    let o1 = graph.resolve(order, &ModelId::new("o1")).unwrap();
    assert_eq!(graph.related_models(c1, "orders"), vec![o1]);
    assert_eq!(graph.resolve(order, &ModelId::new("gone")), None);
    assert_eq!(
        graph.to_json(c1).unwrap()["orders"],
        json!([{ "id": "o1", "total": 30, "customer": "c1", "products": [], "payment": null }])
    );
}

#[tokio::test]
async fn test_fetch_model_merges_into_existing_stub() {
    let (coordinator, _, customer, order) = coordinator(with_products(shop_schema()));
    let o3 = coordinator
        .graph()
        .write()
        .create(order, json!({ "id": "o3", "customer": "c9" }))
        .unwrap();
    let stub = coordinator.graph().read().related(o3, "customer").unwrap();

    let loaded = coordinator
        .fetch_model(customer, &ModelId::new("c9"), FetchOptions::new())
        .unwrap()
        .await
        .unwrap();
    assert_eq!(loaded, vec![stub]);

    let graph = coordinator.graph().read();
    assert_eq!(graph.attribute(stub, "name"), Some(&json!("Lin")));
    assert_eq!(graph.related_models(stub, "orders"), vec![o3]);
}
