//! Graph tests: identity, bidirectional bindings, stubs, destroy, events and
//! serialization

use super::*;
use parking_lot::Mutex;
use proptest::prelude::*;
use relata_schema::{IncludeInJson, ModelId, RelationDef, TypeDef, TypeId, TypeRegistry};
use serde_json::json;
use std::sync::Arc;

struct Zoo {
    graph: Graph,
    zoo: TypeId,
    animal: TypeId,
    lion: TypeId,
    zebra: TypeId,
    species: TypeId,
}

fn zoo_schema() -> Zoo {
    let mut registry = TypeRegistry::new();
    let species = registry.define(TypeDef::new("Species")).unwrap();
    let animal = registry
        .define(
            TypeDef::new("Animal")
                .sub_type("lion", "Lion")
                .sub_type("zebra", "Zebra")
                .relation(
                    RelationDef::to_one("species", species)
                        .include_in_json(IncludeInJson::IdAttribute),
                ),
        )
        .unwrap();
    let lion = registry.define(TypeDef::new("Lion").extends(animal)).unwrap();
    let zebra = registry.define(TypeDef::new("Zebra").extends(animal)).unwrap();
    let zoo = registry
        .define(TypeDef::new("Zoo").relation(RelationDef::to_many("animals", animal).reverse("livesIn")))
        .unwrap();
    Zoo {
        graph: Graph::new(registry),
        zoo,
        animal,
        lion,
        zebra,
        species,
    }
}

fn id(raw: &str) -> ModelId {
    ModelId::new(raw)
}

fn animals(graph: &Graph, zoo: ModelRef) -> Vec<ModelRef> {
    graph.related_models(zoo, "animals")
}

#[test]
fn test_identity_one_instance_per_id() {
    let Zoo { mut graph, animal, .. } = zoo_schema();

    let a1 = graph.create(animal, json!({ "id": "a1", "name": "Leo" })).unwrap();
    assert_eq!(graph.resolve(animal, &id("a1")), Some(a1));

    let merged = graph
        .find_or_create(animal, json!({ "id": "a1", "age": 4 }), FindOptions::default())
        .unwrap();
    assert_eq!(merged, Some(a1));
    assert_eq!(graph.attribute(a1, "name"), Some(&json!("Leo")));
    assert_eq!(graph.attribute(a1, "age"), Some(&json!(4)));

    let err = graph.create(animal, json!({ "id": "a1" })).unwrap_err();
    assert!(matches!(err, GraphError::DuplicateId { .. }));
    assert_eq!(graph.instances_of(animal), vec![a1]);
}

#[test]
fn test_numeric_and_string_ids_are_one_instance() {
    let Zoo { mut graph, animal, .. } = zoo_schema();

    let a = graph.create(animal, json!({ "id": 5001 })).unwrap();
    assert_eq!(graph.find(animal, "5001").unwrap(), Some(a));
    assert_eq!(graph.find(animal, json!(5001)).unwrap(), Some(a));
}

#[test]
fn test_merge_disabled_leaves_existing_untouched() {
    let Zoo { mut graph, animal, .. } = zoo_schema();

    let a = graph.create(animal, json!({ "id": "a", "name": "Leo" })).unwrap();
    let found = graph
        .find_or_create(
            animal,
            json!({ "id": "a", "name": "Other" }),
            FindOptions::default().with_merge(false),
        )
        .unwrap();
    assert_eq!(found, Some(a));
    assert_eq!(graph.attribute(a, "name"), Some(&json!("Leo")));

    let missing = graph.find(animal, json!({ "id": "nope" })).unwrap();
    assert_eq!(missing, None);
}

#[test]
fn test_changing_id_moves_registration() {
    let Zoo { mut graph, animal, .. } = zoo_schema();

    let a = graph.create(animal, json!({ "name": "anonymous" })).unwrap();
    assert!(!graph.is_registered(a));

    graph.set_attr(a, "id", "late").unwrap();
    assert_eq!(graph.resolve(animal, &id("late")), Some(a));

    graph.set_attr(a, "id", "renamed").unwrap();
    assert_eq!(graph.resolve(animal, &id("late")), None);
    assert_eq!(graph.resolve(animal, &id("renamed")), Some(a));

    let other = graph.create(animal, json!({ "id": "other" })).unwrap();
    let err = graph.set_attr(other, "id", "renamed").unwrap_err();
    assert!(matches!(err, GraphError::DuplicateId { .. }));
    assert_eq!(graph.id_of(other), Some(id("other")));
}

#[test]
fn test_to_many_assignment_sets_reverse() {
    let Zoo { mut graph, zoo, animal, .. } = zoo_schema();

    let z = graph.create(zoo, json!({ "id": "z" })).unwrap();
    let a1 = graph.create(animal, json!({ "id": "a1" })).unwrap();
    let a2 = graph.create(animal, json!({ "id": "a2" })).unwrap();

    graph.set_attr(z, "animals", vec![a1, a2]).unwrap();

    assert_eq!(animals(&graph, z), vec![a1, a2]);
    assert_eq!(graph.related(a1, "livesIn"), Some(z));
    assert_eq!(graph.related(a2, "livesIn"), Some(z));
}

#[test]
fn test_to_one_reassignment_moves_between_collections() {
    let Zoo { mut graph, zoo, animal, .. } = zoo_schema();

    let z1 = graph.create(zoo, json!({ "id": "z1" })).unwrap();
    let z2 = graph.create(zoo, json!({ "id": "z2" })).unwrap();
    let a = graph
        .create(animal, json!({ "id": "a", "livesIn": "z1" }))
        .unwrap();
    assert_eq!(animals(&graph, z1), vec![a]);

    graph.set_attr(a, "livesIn", z2).unwrap();
    assert!(animals(&graph, z1).is_empty());
    assert_eq!(animals(&graph, z2), vec![a]);

    graph.set_attr(a, "livesIn", AttrValue::NULL).unwrap();
    assert!(animals(&graph, z2).is_empty());
    assert_eq!(graph.related(a, "livesIn"), None);
}

#[test]
fn test_one_to_one_displaces_previous_holder() {
    let mut registry = TypeRegistry::new();
    let user = registry.define(TypeDef::new("User")).unwrap();
    let person = registry
        .define(TypeDef::new("Person").relation(RelationDef::to_one("user", user).reverse("person")))
        .unwrap();
    let mut graph = Graph::new(registry);

    let u = graph.create(user, json!({ "id": "u" })).unwrap();
    let p1 = graph.create(person, json!({ "id": "p1", "user": "u" })).unwrap();
    assert_eq!(graph.related(u, "person"), Some(p1));

    let p2 = graph.create(person, json!({ "id": "p2" })).unwrap();
    graph.set_attr(p2, "user", u).unwrap();

    assert_eq!(graph.related(u, "person"), Some(p2));
    assert_eq!(graph.related(p2, "user"), Some(u));
    assert_eq!(graph.related(p1, "user"), None);
    assert!(graph.get_relation(p1, "user").unwrap().key_contents().is_empty());
}

#[test]
fn test_bare_ids_become_stubs_and_merge_later() {
    let Zoo { mut graph, zoo, animal, .. } = zoo_schema();

    let z = graph
        .create(zoo, json!({ "id": "z", "animals": ["a1", "a2"] }))
        .unwrap();
    let members = animals(&graph, z);
    assert_eq!(members.len(), 2);
    assert!(members.iter().all(|m| graph.is_stub(*m)));
    assert_eq!(graph.related(members[0], "livesIn"), Some(z));
    assert_eq!(graph.ids_to_fetch(z, "animals", false).unwrap(), vec![id("a1"), id("a2")]);

    let full = graph
        .find_or_create(animal, json!({ "id": "a1", "name": "Leo" }), FindOptions::default())
        .unwrap();
    assert_eq!(full, Some(members[0]));
    assert!(!graph.is_stub(members[0]));
    assert_eq!(graph.ids_to_fetch(z, "animals", false).unwrap(), vec![id("a2")]);
    assert_eq!(
        graph.ids_to_fetch(z, "animals", true).unwrap(),
        vec![id("a1"), id("a2")]
    );
}

#[test]
fn test_set_without_remove_keeps_existing_members() {
    let Zoo { mut graph, zoo, .. } = zoo_schema();

    let z = graph
        .create(zoo, json!({ "id": "z", "animals": ["a1", "a2"] }))
        .unwrap();
    let before = animals(&graph, z);

    graph
        .set(z, json!({ "animals": ["a3"] }), SetOptions::keep_existing())
        .unwrap();
    let after = animals(&graph, z);
    assert_eq!(after.len(), 3);
    assert_eq!(&after[..2], &before[..]);

    graph
        .set(z, json!({ "animals": ["a3", "a1"] }), SetOptions::default())
        .unwrap();
    let reordered = animals(&graph, z);
    assert_eq!(reordered, vec![after[2], after[0]]);
    assert_eq!(graph.related(after[1], "livesIn"), None);
}

#[test]
fn test_nested_objects_are_found_or_created() {
    let Zoo { mut graph, zoo, animal, .. } = zoo_schema();

    let existing = graph.create(animal, json!({ "id": "a1", "name": "old" })).unwrap();
    let z = graph
        .create(
            zoo,
            json!({ "id": "z", "animals": [{ "id": "a1", "name": "new" }, { "id": "a2" }] }),
        )
        .unwrap();

    let members = animals(&graph, z);
    assert_eq!(members[0], existing);
    assert_eq!(graph.attribute(existing, "name"), Some(&json!("new")));
    assert_eq!(graph.resolve(animal, &id("a2")), Some(members[1]));
}

#[test]
fn test_subtype_chosen_by_discriminator_and_shares_identity() {
    let Zoo { mut graph, animal, lion, zebra, .. } = zoo_schema();

    let l = graph
        .find_or_create(animal, json!({ "id": "l1", "type": "lion" }), FindOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(graph.type_of(l), Some(lion));
    assert_eq!(graph.resolve(animal, &id("l1")), Some(l));
    assert_eq!(graph.resolve(lion, &id("l1")), Some(l));
    assert_eq!(graph.resolve(zebra, &id("l1")), None);

    let err = graph.create(zebra, json!({ "id": "l1" })).unwrap_err();
    assert!(matches!(err, GraphError::DuplicateId { .. }));
    assert_eq!(graph.instances_of(lion), vec![l]);
    assert!(graph.instances_of(zebra).is_empty());
}

#[test]
fn test_wrong_type_related_model_is_ignored() {
    let Zoo { mut graph, zoo, species, .. } = zoo_schema();

    let z = graph.create(zoo, json!({ "id": "z" })).unwrap();
    let s = graph.create(species, json!({ "id": "s" })).unwrap();

    graph.set_attr(z, "animals", vec![s]).unwrap();
    assert!(animals(&graph, z).is_empty());
}

#[test]
fn test_destroy_detaches_everywhere() {
    let Zoo { mut graph, zoo, animal, species, .. } = zoo_schema();

    let z = graph.create(zoo, json!({ "id": "z" })).unwrap();
    let s = graph.create(species, json!({ "id": "s1", "name": "panthera" })).unwrap();
    let a = graph
        .create(animal, json!({ "id": "a", "livesIn": "z", "species": "s1" }))
        .unwrap();
    let plain = graph.create_collection(animal);
    graph.collection_add(plain, a, SetOptions::default()).unwrap();

    graph.destroy(s).unwrap();
    assert_eq!(graph.related(a, "species"), None);
    // The id survives so the species can be fetched again.
    assert_eq!(graph.ids_to_fetch(a, "species", false).unwrap(), vec![id("s1")]);
    assert_eq!(graph.to_json(a).unwrap()["species"], json!("s1"));

    graph.destroy(a).unwrap();
    assert!(!graph.contains(a));
    assert!(animals(&graph, z).is_empty());
    assert!(graph.models(plain).is_empty());
    assert_eq!(graph.find(animal, "a").unwrap(), None);

    let err = graph.set_attr(a, "name", "ghost").unwrap_err();
    assert!(matches!(err, GraphError::StaleModel(_)));
    assert!(matches!(graph.destroy(a), Err(GraphError::StaleModel(_))));
}

#[test]
fn test_clear_unregisters_and_empties_relations() {
    let Zoo { mut graph, zoo, animal, .. } = zoo_schema();

    let z = graph.create(zoo, json!({ "id": "z", "animals": ["a"] })).unwrap();
    let a = graph.resolve(animal, &id("a")).unwrap();

    graph.clear(a).unwrap();
    assert!(graph.contains(a));
    assert!(graph.attributes(a).unwrap().is_empty());
    assert_eq!(graph.find(animal, "a").unwrap(), None);
    assert!(animals(&graph, z).is_empty());
    assert!(graph.instances_of(animal).is_empty());

    // Given an id again, the model is found and listed once more.
    graph.set_attr(a, "id", "a").unwrap();
    assert_eq!(graph.find(animal, "a").unwrap(), Some(a));
    assert!(graph.is_registered(a));
    assert_eq!(graph.instances_of(animal), vec![a]);
}

#[test]
fn test_fetched_record_without_id_keeps_numeric_stub_id() {
    let Zoo { mut graph, zoo, animal, .. } = zoo_schema();
    let z = graph.create(zoo, json!({ "id": "z", "animals": [5] })).unwrap();
    let stub = animals(&graph, z)[0];

    let seen: Arc<Mutex<Vec<GraphEvent>>> = Arc::default();
    let sink = seen.clone();
    graph.on_event(move |event| sink.lock().push(event.clone()));

    let merged = graph
        .apply_fetched(animal, Some(&id("5")), json!({ "name": "Leo" }))
        .unwrap();
    assert_eq!(merged, Some(stub));
    assert_eq!(graph.id_value(stub), Some(&json!(5)));
    assert_eq!(graph.to_json(stub).unwrap()["id"], json!(5));
    assert_eq!(
        seen.lock().clone(),
        vec![GraphEvent::Changed {
            model: stub,
            keys: vec!["name".to_string()],
        }]
    );
}

#[test]
fn test_clone_copies_attributes_but_not_identity() {
    let Zoo { mut graph, zoo, animal, .. } = zoo_schema();

    graph.create(zoo, json!({ "id": "z" })).unwrap();
    let a = graph
        .create(animal, json!({ "id": "a", "name": "Leo", "livesIn": "z" }))
        .unwrap();

    let copy = graph.clone_model(a).unwrap();
    assert_ne!(copy, a);
    assert_eq!(graph.id_of(copy), None);
    assert_eq!(graph.attribute(copy, "name"), Some(&json!("Leo")));
    assert_eq!(graph.related(copy, "livesIn"), None);
    assert!(graph.related(a, "livesIn").is_some());
}

#[test]
fn test_events_delivered_once_per_operation() {
    let Zoo { mut graph, zoo, animal, .. } = zoo_schema();
    let seen: Arc<Mutex<Vec<GraphEvent>>> = Arc::default();
    let sink = seen.clone();
    graph.on_event(move |event| sink.lock().push(event.clone()));

    let z1 = graph.create(zoo, json!({ "id": "z1" })).unwrap();
    let z2 = graph.create(zoo, json!({ "id": "z2" })).unwrap();
    let a = graph.create(animal, json!({ "id": "a", "livesIn": "z1" })).unwrap();
    seen.lock().clear();

    graph
        .set(a, json!({ "name": "Leo", "livesIn": "z2" }), SetOptions::default())
        .unwrap();

    let events = seen.lock().clone();
    let changed: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, GraphEvent::Changed { model, .. } if *model == a))
        .collect();
    assert_eq!(
        changed,
        vec![&GraphEvent::Changed {
            model: a,
            keys: vec!["name".to_string(), "livesIn".to_string()],
        }]
    );
    assert!(events.contains(&GraphEvent::RemovedRelated {
        model: z1,
        key: "animals".to_string(),
        related: a,
    }));
    assert!(events.contains(&GraphEvent::AddedRelated {
        model: z2,
        key: "animals".to_string(),
        related: a,
    }));
}

#[test]
fn test_serialization_is_cycle_safe() {
    let Zoo { mut graph, zoo, .. } = zoo_schema();

    let z = graph
        .create(zoo, json!({ "id": "z", "name": "City Zoo", "animals": [{ "id": "a", "name": "Leo" }] }))
        .unwrap();

    assert_eq!(
        graph.to_json(z).unwrap(),
        json!({
            "id": "z",
            "name": "City Zoo",
            "animals": [{ "id": "a", "name": "Leo", "species": null, "livesIn": "z" }],
        })
    );
}

#[test]
fn test_serialization_emits_discriminator() {
    let Zoo { mut graph, lion, .. } = zoo_schema();

    let l = graph.create(lion, json!({ "id": "l" })).unwrap();
    assert_eq!(
        graph.to_json(l).unwrap(),
        json!({ "id": "l", "type": "lion", "species": null, "livesIn": null })
    );
}

#[test]
fn test_key_source_and_destination() {
    let mut registry = TypeRegistry::new();
    let person = registry.define(TypeDef::new("Person")).unwrap();
    let pet = registry
        .define(
            TypeDef::new("Pet").relation(
                RelationDef::to_one("owner", person)
                    .key_source("owner_id")
                    .key_destination("owner_id")
                    .include_in_json(IncludeInJson::IdAttribute),
            ),
        )
        .unwrap();
    let mut graph = Graph::new(registry);

    let p = graph.create(pet, json!({ "id": "p", "owner_id": "o1" })).unwrap();
    let owner = graph.related(p, "owner").unwrap();
    assert_eq!(graph.id_of(owner), Some(id("o1")));
    assert_eq!(graph.attribute(p, "owner_id"), None);
    assert_eq!(graph.to_json(p).unwrap(), json!({ "id": "p", "owner_id": "o1" }));
}

#[test]
fn test_include_in_json_projections() {
    let mut registry = TypeRegistry::new();
    let tag = registry.define(TypeDef::new("Tag")).unwrap();
    let post = registry
        .define(
            TypeDef::new("Post")
                .relation(RelationDef::to_many("tags", tag).include_in_json(IncludeInJson::Attribute("label".into())))
                .relation(RelationDef::to_many("drafts", tag).include_in_json(IncludeInJson::Omit))
                .relation(RelationDef::to_many("refs", tag).include_in_json(IncludeInJson::IdAttribute)),
        )
        .unwrap();
    let mut graph = Graph::new(registry);

    let p = graph
        .create(
            post,
            json!({
                "id": 1,
                "tags": [{ "id": "t1", "label": "rust" }, { "id": "t2" }],
                "drafts": ["t1"],
                "refs": [{ "id": "t2" }, 7],
            }),
        )
        .unwrap();

    assert_eq!(
        graph.to_json(p).unwrap(),
        json!({ "id": 1, "tags": ["rust", null], "refs": ["t2", 7] })
    );
}

#[test]
fn test_late_declared_type_gains_reverse_binding() {
    let mut registry = TypeRegistry::new();
    let person = registry.define(TypeDef::new("Person")).unwrap();
    let mut graph = Graph::new(registry);
    let p = graph.create(person, json!({ "id": "p1" })).unwrap();
    assert!(graph.get_relations(p).is_empty());

    let pet = graph
        .registry_mut()
        .define(TypeDef::new("Pet").relation(RelationDef::to_one("person", person).reverse_many("pets")))
        .unwrap();
    let dog = graph.create(pet, json!({ "id": "d", "person": "p1" })).unwrap();

    assert_eq!(graph.related_models(p, "pets"), vec![dog]);
}

#[test]
fn test_parse_hook_applies_to_top_level_only() {
    let mut registry = TypeRegistry::new();
    let record = registry
        .define(
            TypeDef::new("Record")
                .relation(RelationDef::to_many("children", "Record"))
                .parse_with(|mut raw| {
                    if let Some(map) = raw.as_object_mut() {
                        if let Some(ident) = map.remove("ident") {
                            map.insert("id".to_string(), ident);
                        }
                    }
                    raw
                }),
        )
        .unwrap();
    let mut graph = Graph::new(registry);

    let r = graph
        .find_or_create(
            record,
            json!({ "ident": "r1", "children": [{ "ident": "r2" }] }),
            FindOptions::default().with_parse(true),
        )
        .unwrap()
        .unwrap();
    assert_eq!(graph.id_of(r), Some(id("r1")));
    let child = graph.related_models(r, "children")[0];
    assert_eq!(graph.id_of(child), None);
    assert_eq!(graph.attribute(child, "ident"), Some(&json!("r2")));

    let unparsed = graph
        .find_or_create(record, json!({ "ident": "r3" }), FindOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(graph.id_of(unparsed), None);
}

#[test]
fn test_plain_collection_add_set_remove() {
    let Zoo { mut graph, animal, .. } = zoo_schema();
    let c = graph.create_collection(animal);

    let added = graph
        .collection_add(c, json!(["a1", { "id": "a2", "name": "Zed" }]), SetOptions::default())
        .unwrap();
    assert_eq!(graph.models(c), added.as_slice());
    assert_eq!(graph.collection_get(c, &id("a2")), Some(added[1]));
    assert_eq!(graph.collection_owner(c), None);

    let set = graph.collection_set(c, json!(["a3", "a1"]), SetOptions::default()).unwrap();
    assert_eq!(graph.models(c), set.as_slice());
    assert_eq!(set[1], added[0]);

    assert!(graph.collection_remove(c, added[0]).unwrap());
    assert!(!graph.collection_remove(c, added[0]).unwrap());
    assert!(graph.drop_collection(c).unwrap());
    assert!(graph.models(c).is_empty());
}

#[test]
fn test_relation_collection_add_and_remove_mirror() {
    let Zoo { mut graph, zoo, .. } = zoo_schema();
    let z = graph.create(zoo, json!({ "id": "z" })).unwrap();
    let Some(Attr::Many(collection)) = graph.get(z, "animals") else {
        panic!("animals is a to-many binding");
    };
    assert_eq!(graph.collection_owner(collection), Some((z, "animals")));

    let added = graph.collection_add(collection, json!(["a"]), SetOptions::default()).unwrap();
    assert_eq!(graph.related(added[0], "livesIn"), Some(z));

    graph.collection_remove(collection, added[0]).unwrap();
    assert_eq!(graph.related(added[0], "livesIn"), None);
    assert!(!graph.drop_collection(collection).unwrap());
}

#[test]
fn test_auto_fetch_queued_for_unresolved_ids() {
    let mut registry = TypeRegistry::new();
    let item = registry.define(TypeDef::new("Item")).unwrap();
    let cart = registry
        .define(TypeDef::new("Cart").relation(RelationDef::to_many("items", item).auto_fetch(true)))
        .unwrap();
    let mut graph = Graph::new(registry);

    let full = graph.create(cart, json!({ "id": "c1", "items": [{ "id": "i1", "n": 1 }] })).unwrap();
    assert!(graph.take_auto_fetches().is_empty());
    assert_eq!(graph.ids_to_fetch(full, "items", false).unwrap(), Vec::<ModelId>::new());

    let c = graph.create(cart, json!({ "id": "c2", "items": ["i2"] })).unwrap();
    assert_eq!(graph.take_auto_fetches(), vec![(c, "items".to_string())]);
    assert!(graph.take_auto_fetches().is_empty());
}

#[test]
fn test_unknown_relation_errors() {
    let Zoo { mut graph, zoo, .. } = zoo_schema();
    let z = graph.create(zoo, json!({ "id": "z" })).unwrap();

    let err = graph.ids_to_fetch(z, "keepers", false).unwrap_err();
    assert!(matches!(err, GraphError::UnknownRelation { ref key, .. } if key == "keepers"));
}

#[test]
fn test_config_roundtrips_with_defaults() {
    let config: GraphConfig = serde_json::from_value(json!({ "auto_fetch": false })).unwrap();
    assert!(config.emit_discriminator);
    assert!(!config.auto_fetch);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    /// Whatever sequence of assignments is made from either end, an animal
    /// lists a zoo exactly when that zoo lists the animal.
    #[test]
    fn bindings_stay_symmetric(ops in prop::collection::vec((any::<bool>(), 0usize..4, 0usize..4, any::<u8>()), 1..40)) {
        let Zoo { mut graph, zoo, animal, .. } = zoo_schema();
        let zoos: Vec<ModelRef> = (0..3)
            .map(|i| graph.create(zoo, json!({ "id": format!("z{i}") })).unwrap())
            .collect();
        let beasts: Vec<ModelRef> = (0..4)
            .map(|i| graph.create(animal, json!({ "id": format!("a{i}") })).unwrap())
            .collect();

        for (from_zoo, z, a, mask) in ops {
            if from_zoo {
                let members: Vec<ModelRef> = (0..4).filter(|i| mask & (1 << i) != 0).map(|i| beasts[i]).collect();
                let options = if mask & 0x80 != 0 { SetOptions::keep_existing() } else { SetOptions::default() };
                graph.set(zoos[z % 3], Attrs::new().with("animals", members), options).unwrap();
            } else {
                let target = (z < 3).then(|| zoos[z]);
                graph.set_attr(beasts[a], "livesIn", target).unwrap();
            }

            for &beast in &beasts {
                let holders: Vec<ModelRef> = zoos
                    .iter()
                    .copied()
                    .filter(|z| graph.related_models(*z, "animals").contains(&beast))
                    .collect();
                prop_assert!(holders.len() <= 1);
                prop_assert_eq!(graph.related(beast, "livesIn"), holders.first().copied());
            }
        }
    }
}
