//! Polymorphic mappings: round trips and dispatch for every strategy.

mod common;

use common::*;
use ormgraph_core::proto::Value;
use ormgraph_core::{
    CascadeMode, Entity, EntityMapping, Error, IdentifierMapping, PolymorphismPolicy, RelationDescriptor,
};

/// Garage owning vehicles, with Vehicle stored under `policy`.
fn garage(policy: PolymorphismPolicy) -> Vec<EntityMapping> {
    let own_tables = !matches!(policy, PolymorphismPolicy::SingleTable { .. });
    let subtype = |name: &str, table: &str| {
        let mapping = EntityMapping::subtype(name, "Vehicle");
        if own_tables {
            mapping.table(table)
        } else {
            mapping
        }
    };
    vec![
        EntityMapping::new("Garage", "garage")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name")
            .relation(
                RelationDescriptor::one_to_many_set("vehicles", "Vehicle", "garage_id")
                    .reverse("garage")
                    .cascade(CascadeMode::AllOrphanRemoval),
            ),
        EntityMapping::new("Vehicle", "vehicle")
            .identifier(IdentifierMapping::assigned("id"))
            .column("brand")
            .back_reference("garage")
            .polymorphism(policy),
        subtype("Car", "car").column("doors"),
        subtype("Truck", "truck").column("payload"),
    ]
}

fn policies() -> Vec<PolymorphismPolicy> {
    vec![
        PolymorphismPolicy::SingleTable {
            discriminator: "kind".into(),
            subtypes: vec![("car".into(), "Car".into()), ("truck".into(), "Truck".into())],
        },
        PolymorphismPolicy::JoinedTables {
            subtypes: vec!["Car".into(), "Truck".into()],
        },
        PolymorphismPolicy::TablePerClass {
            subtypes: vec!["Car".into(), "Truck".into()],
        },
    ]
}

fn car(id: i64, doors: i64) -> Entity {
    Entity::new("Car")
        .with_field("id", id)
        .with_field("brand", "Renault")
        .with_field("doors", doors)
}

fn truck(id: i64, payload: i64) -> Entity {
    Entity::new("Truck")
        .with_field("id", id)
        .with_field("brand", "Volvo")
        .with_field("payload", payload)
}

#[test]
fn test_round_trip_for_every_strategy() {
    for policy in policies() {
        let ctx = context(garage(policy.clone()));
        let store = TestStore::new(&ctx);
        let mut session = store.session();
        let garages = ctx.persister("Garage").unwrap();

        let mut depot = Entity::new("Garage")
            .with_field("id", 1i64)
            .with_field("name", "Depot")
            .with_many("vehicles", vec![car(10, 5), truck(20, 18)]);
        garages.insert(&mut session, &mut depot).unwrap();

        let loaded = garages.select(&mut session, 1i64).unwrap().unwrap();
        assert_graph_eq(&depot, &loaded);

        let vehicles = ctx.persister("Vehicle").unwrap();
        let hauler = vehicles.select(&mut session, 20i64).unwrap().unwrap();
        assert_eq!(hauler.entity_type(), "Truck", "{:?}", policy.strategy());
        assert_eq!(hauler.field("payload"), &Value::Int64(18));
        assert_eq!(ids(&vehicles.select_all(&mut session).unwrap()), vec![10, 20]);

        let cars = ctx.persister("Car").unwrap().select_all(&mut session).unwrap();
        assert_eq!(ids(&cars), vec![10]);
    }
}

#[test]
fn test_update_and_delete_across_subtypes() {
    for policy in policies() {
        let ctx = context(garage(policy));
        let store = TestStore::new(&ctx);
        let mut session = store.session();
        let garages = ctx.persister("Garage").unwrap();

        let mut depot = Entity::new("Garage")
            .with_field("id", 1i64)
            .with_many("vehicles", vec![car(10, 5), truck(20, 18)]);
        garages.insert(&mut session, &mut depot).unwrap();

        let reference = garages.select(&mut session, 1i64).unwrap().unwrap();
        let mut modified = reference.clone();
        let fleet = modified.many_mut("vehicles").unwrap();
        fleet.retain(|v| v.entity_type() == "Car");
        fleet[0].set_field("doors", 3i64);
        fleet.push(truck(30, 40));
        garages.update(&mut session, &mut modified, &reference, false).unwrap();

        let vehicles = ctx.persister("Vehicle").unwrap();
        assert!(vehicles.select(&mut session, 20i64).unwrap().is_none());
        let loaded = garages.select(&mut session, 1i64).unwrap().unwrap();
        assert_graph_eq(&modified, &loaded);

        garages.delete(&mut session, &loaded).unwrap();
        assert!(vehicles.select_all(&mut session).unwrap().is_empty());
    }
}

#[test]
fn test_mixed_batch_notifies_root_and_subtypes() {
    let ctx = context(garage(PolymorphismPolicy::JoinedTables {
        subtypes: vec!["Car".into(), "Truck".into()],
    }));
    let store = TestStore::new(&ctx);
    let mut session = store.session();

    let everything = Recorder::new();
    let only_cars = Recorder::new();
    ctx.add_listener("Vehicle", everything.clone()).unwrap();
    ctx.add_listener("Car", only_cars.clone()).unwrap();

    let vehicles = ctx.persister("Vehicle").unwrap();
    let mut batch = vec![car(1, 3), truck(2, 10), car(3, 5)];
    vehicles.insert_all(&mut session, &mut batch).unwrap();
    assert_eq!(store.count("vehicle"), 3);
    assert_eq!(store.count("car"), 2);

    vehicles.select_all(&mut session).unwrap();
    assert_eq!(
        everything.events(),
        vec!["before_insert:3", "after_insert:3", "before_select:0", "after_select:3"]
    );
    assert_eq!(only_cars.events(), vec!["before_insert:2", "after_insert:2", "after_select:2"]);
}

#[test]
fn test_root_listeners_skip_repeated_instances() {
    let ctx = context(garage(PolymorphismPolicy::JoinedTables {
        subtypes: vec!["Car".into(), "Truck".into()],
    }));
    let store = TestStore::new(&ctx);
    let mut session = store.session();

    let everything = Recorder::new();
    let only_cars = Recorder::new();
    ctx.add_listener("Vehicle", everything.clone()).unwrap();
    ctx.add_listener("Car", only_cars.clone()).unwrap();

    let mut batch = vec![car(1, 3), car(1, 3), truck(2, 10)];
    ctx.persister("Vehicle").unwrap().insert_all(&mut session, &mut batch).unwrap();
    assert_eq!(store.count("vehicle"), 2);
    assert_eq!(everything.events(), vec!["before_insert:2", "after_insert:2"]);
    assert_eq!(only_cars.events(), vec!["before_insert:1", "after_insert:1"]);
}

#[test]
fn test_subtype_persister_rejects_siblings() {
    let ctx = context(garage(PolymorphismPolicy::TablePerClass {
        subtypes: vec!["Car".into(), "Truck".into()],
    }));
    let store = TestStore::new(&ctx);
    let mut session = store.session();

    let mut lorry = truck(2, 10);
    assert!(matches!(
        ctx.persister("Car").unwrap().insert(&mut session, &mut lorry),
        Err(Error::WrongEntityType { .. })
    ));

    let vehicles = ctx.persister("Vehicle").unwrap();
    let mut beetle = car(1, 2);
    vehicles.insert(&mut session, &mut beetle).unwrap();
    let mut converted = truck(1, 10);
    assert!(matches!(
        vehicles.update(&mut session, &mut converted, &beetle, false),
        Err(Error::SubtypeChanged { .. })
    ));
}
