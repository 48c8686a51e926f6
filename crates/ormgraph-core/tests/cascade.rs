//! Integration tests for cascades and loads against the embedded store.

mod common;

use std::sync::Arc;

use common::*;
use ormgraph_core::proto::{Connection, Predicate, Row, Value};
use ormgraph_core::{
    CascadeMode, EngineConfig, Entity, EntityKey, EntityMapping, Error, IdentifierMapping, PersistenceContext,
    RelationDescriptor, SequenceGenerator,
};

fn indexed_cities(mode: CascadeMode) -> Vec<EntityMapping> {
    vec![
        EntityMapping::new("Country", "country")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name")
            .relation(
                RelationDescriptor::one_to_many_list("cities", "City", "country_id")
                    .indexed_by("position")
                    .reverse("country")
                    .cascade(mode),
            ),
        EntityMapping::new("City", "city")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name")
            .back_reference("country"),
    ]
}

fn load(ctx: &PersistenceContext, conn: &mut dyn Connection, mapping: &str, id: i64) -> Entity {
    ctx.persister(mapping).unwrap().select(conn, id).unwrap().unwrap()
}

#[test]
fn test_orphan_removal_replaces_cities() {
    let ctx = context(country_cities(CascadeMode::AllOrphanRemoval));
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let countries = ctx.persister("Country").unwrap();

    let mut france = country(1, "France", vec![city(10, "Paris"), city(20, "Lyon")]);
    countries.insert(&mut session, &mut france).unwrap();
    assert_eq!(store.count("city"), 2);

    let reference = load(&ctx, &mut session, "Country", 1);
    let mut modified = reference.clone();
    let cities = modified.many_mut("cities").unwrap();
    cities.retain(|c| c.field("id") != &Value::Int64(10));
    cities[0].set_field("name", "Lyon-renamed");
    cities.push(city(30, "Grenoble"));
    countries.update(&mut session, &mut modified, &reference, false).unwrap();

    let loaded = load(&ctx, &mut session, "Country", 1);
    assert_eq!(ids(loaded.many("cities")), vec![20, 30]);
    let lyon = loaded.many("cities").iter().find(|c| c.field("id") == &Value::Int64(20)).unwrap();
    assert_eq!(lyon.field("name"), &Value::from("Lyon-renamed"));
    assert_eq!(lyon.reference("country"), Some(&EntityKey::new("Country", 1i64)));
    assert!(store.row("city", 10).is_none());
}

#[test]
fn test_association_only_delete_keeps_cities() {
    let ctx = context(country_cities_linked(CascadeMode::AssociationOnly));
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let countries = ctx.persister("Country").unwrap();

    let mut france = country(1, "France", vec![city(10, "Paris"), city(20, "Lyon")]);
    countries.insert(&mut session, &mut france).unwrap();
    assert_eq!(store.count("country_city"), 2);

    let loaded = load(&ctx, &mut session, "Country", 1);
    assert_eq!(ids(loaded.many("cities")), vec![10, 20]);
    countries.delete(&mut session, &loaded).unwrap();

    assert_eq!(store.count("country"), 0);
    assert_eq!(store.count("country_city"), 0);
    assert_eq!(store.count("city"), 2);
}

#[test]
fn test_all_detaches_removed_element() {
    let ctx = context(country_cities(CascadeMode::All));
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let countries = ctx.persister("Country").unwrap();

    let mut france = country(1, "France", vec![city(10, "Paris"), city(20, "Lyon")]);
    countries.insert(&mut session, &mut france).unwrap();

    let reference = load(&ctx, &mut session, "Country", 1);
    let mut modified = reference.clone();
    modified
        .many_mut("cities")
        .unwrap()
        .retain(|c| c.field("id") != &Value::Int64(10));
    countries.update(&mut session, &mut modified, &reference, false).unwrap();

    assert_eq!(ids(load(&ctx, &mut session, "Country", 1).many("cities")), vec![20]);
    let paris = store.row("city", 10).unwrap();
    assert!(paris.get_or_null("country_id").is_null());
    assert!(ctx.persister("City").unwrap().select(&mut session, 10i64).unwrap().is_some());
}

#[test]
fn test_all_unlinks_removed_association() {
    let ctx = context(country_cities_linked(CascadeMode::All));
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let countries = ctx.persister("Country").unwrap();

    let mut france = country(1, "France", vec![city(10, "Paris"), city(20, "Lyon")]);
    countries.insert(&mut session, &mut france).unwrap();

    let reference = load(&ctx, &mut session, "Country", 1);
    let mut modified = reference.clone();
    modified.set_many("cities", vec![city(20, "Lyon").persisted()]);
    countries.update(&mut session, &mut modified, &reference, false).unwrap();

    assert_eq!(store.count("country_city"), 1);
    assert_eq!(store.count("city"), 2);
    assert_eq!(ids(load(&ctx, &mut session, "Country", 1).many("cities")), vec![20]);
}

#[test]
fn test_all_delete_detaches_elements() {
    let ctx = context(country_cities(CascadeMode::All));
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let countries = ctx.persister("Country").unwrap();

    let mut france = country(1, "France", vec![city(10, "Paris"), city(20, "Lyon")]);
    countries.insert(&mut session, &mut france).unwrap();
    countries.delete(&mut session, &france).unwrap();

    assert_eq!(store.count("country"), 0);
    assert_eq!(store.count("city"), 2);
    assert!(store.rows("city").iter().all(|r| r.get_or_null("country_id").is_null()));
}

fn read_only_country() -> Vec<EntityMapping> {
    vec![
        EntityMapping::new("Country", "country")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name"),
        EntityMapping::new("City", "city")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name")
            .relation(RelationDescriptor::one_to_one("country", "Country", "country_id").cascade(CascadeMode::ReadOnly)),
    ]
}

#[test]
fn test_read_only_writes_only_the_owned_key() {
    let ctx = context(read_only_country());
    let store = TestStore::new(&ctx);
    let mut session = store.session();

    let mut france = Entity::new("Country").with_field("id", 1i64).with_field("name", "France");
    ctx.persister("Country").unwrap().insert(&mut session, &mut france).unwrap();
    session.clear_log();

    let cities = ctx.persister("City").unwrap();
    let mut paris = city(10, "Paris").with_one("country", france.clone().with_field("name", "Changed"));
    cities.insert(&mut session, &mut paris).unwrap();
    assert_eq!(written_tables(&session), vec!["city"]);
    assert_eq!(store.row("city", 10).unwrap().get_or_null("country_id"), &Value::Int64(1));
    assert_eq!(store.row("country", 1).unwrap().get_or_null("name"), &Value::from("France"));

    session.clear_log();
    cities.delete(&mut session, &paris).unwrap();
    assert_eq!(written_tables(&session), vec!["city"]);
    assert!(store.row("country", 1).is_some());
}

#[test]
fn test_read_only_collection_is_not_written() {
    let ctx = context(country_cities(CascadeMode::ReadOnly));
    let store = TestStore::new(&ctx);
    let mut session = store.session();

    let mut france = country(1, "France", vec![city(10, "Paris")]);
    ctx.persister("Country").unwrap().insert(&mut session, &mut france).unwrap();
    assert_eq!(written_tables(&session), vec!["country"]);
    assert_eq!(store.count("city"), 0);
}

#[test]
fn test_store_violation_is_propagated() {
    let ctx = context(read_only_country());
    let store = TestStore::new(&ctx);
    let mut session = store.session();

    let ghost = Entity::new("Country").with_field("id", 99i64);
    let mut paris = city(10, "Paris").with_one("country", ghost);
    let err = ctx.persister("City").unwrap().insert(&mut session, &mut paris).unwrap_err();

    assert!(matches!(err, Error::Statement { .. }));
    assert!(err.store_error().unwrap().is_constraint_violation());
    assert!(err.to_string().contains("city"));
    assert_eq!(store.count("city"), 0);
}

#[test]
fn test_update_with_itself_changes_no_relation() {
    for mappings in [indexed_cities(CascadeMode::All), country_cities_linked(CascadeMode::All)] {
        let ctx = context(mappings);
        let store = TestStore::new(&ctx);
        let mut session = store.session();
        let countries = ctx.persister("Country").unwrap();

        let mut france = country(1, "France", vec![city(10, "Paris"), city(20, "Lyon")]);
        countries.insert(&mut session, &mut france).unwrap();
        let loaded = load(&ctx, &mut session, "Country", 1);

        session.clear_log();
        countries
            .update(&mut session, &mut loaded.clone(), &loaded, true)
            .unwrap();
        assert!(session.executed().iter().all(|s| s.is_update()));
        assert!(!assigns(&session, "country_id"));
        assert!(!assigns(&session, "position"));
        assert!(!written_tables(&session).iter().any(|t| t == "country_city"));
        assert_graph_eq(&loaded, &load(&ctx, &mut session, "Country", 1));
    }
}

fn person_address() -> Vec<EntityMapping> {
    vec![
        EntityMapping::new("Person", "person")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name")
            .relation(RelationDescriptor::one_to_one("address", "Address", "address_id")),
        EntityMapping::new("Address", "address")
            .identifier(IdentifierMapping::assigned("id"))
            .column("street"),
    ]
}

#[test]
fn test_shared_target_is_inserted_once() {
    let ctx = context(person_address());
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let people = ctx.persister("Person").unwrap();

    let home = Entity::new("Address").with_field("id", 5i64).with_field("street", "Main St");
    let mut couple = vec![
        Entity::new("Person").with_field("id", 1i64).with_one("address", home.clone()),
        Entity::new("Person").with_field("id", 2i64).with_one("address", home.clone()),
    ];
    people.insert_all(&mut session, &mut couple).unwrap();
    assert_eq!(inserts_into(&session, "address"), 1);
    assert_eq!(store.count("address"), 1);

    session.clear_log();
    let mut lodger = Entity::new("Person")
        .with_field("id", 3i64)
        .with_one("address", home.persisted());
    people.insert(&mut session, &mut lodger).unwrap();
    assert_eq!(inserts_into(&session, "address"), 0);
    assert_eq!(store.row("person", 3).unwrap().get_or_null("address_id"), &Value::Int64(5));
}

#[test]
fn test_reordered_list_positions() {
    for mode in [CascadeMode::All, CascadeMode::AllOrphanRemoval] {
        let ctx = context(indexed_cities(mode));
        let store = TestStore::new(&ctx);
        let mut session = store.session();
        let countries = ctx.persister("Country").unwrap();

        let mut france = country(1, "France", vec![city(1, "a"), city(2, "b"), city(3, "c")]);
        countries.insert(&mut session, &mut france).unwrap();
        for (id, position) in [(1, 0i64), (2, 1), (3, 2)] {
            assert_eq!(store.row("city", id).unwrap().get_or_null("position"), &Value::Int64(position));
        }

        let reference = load(&ctx, &mut session, "Country", 1);
        let mut modified = reference.clone();
        let before = reference.many("cities");
        modified.set_many("cities", vec![before[2].clone(), before[0].clone()]);
        countries.update(&mut session, &mut modified, &reference, false).unwrap();

        assert_eq!(store.row("city", 3).unwrap().get_or_null("position"), &Value::Int64(0));
        assert_eq!(store.row("city", 1).unwrap().get_or_null("position"), &Value::Int64(1));
        match mode {
            CascadeMode::AllOrphanRemoval => assert!(store.row("city", 2).is_none()),
            _ => assert!(store.row("city", 2).unwrap().get_or_null("position").is_null()),
        }

        let loaded = load(&ctx, &mut session, "Country", 1);
        let order: Vec<&Value> = loaded
            .many("cities")
            .iter()
            .map(|c| c.field("id"))
            .collect();
        assert_eq!(order, vec![&Value::Int64(3), &Value::Int64(1)]);
    }
}

#[test]
fn test_mandatory_relation_must_be_set() {
    let mut mappings = person_address();
    mappings[0] = EntityMapping::new("Person", "person")
        .identifier(IdentifierMapping::assigned("id"))
        .relation(RelationDescriptor::one_to_one("address", "Address", "address_id").mandatory());
    let ctx = context(mappings);
    let store = TestStore::new(&ctx);
    let mut session = store.session();

    let mut nomad = Entity::new("Person").with_field("id", 7i64);
    let err = ctx.persister("Person").unwrap().insert(&mut session, &mut nomad).unwrap_err();
    match err {
        Error::MandatoryRelation { relation, owner } => {
            assert_eq!(relation, "address");
            assert_eq!(owner, EntityKey::new("Person", 7i64));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.count("person"), 0);
}

#[test]
fn test_unreadable_position_is_an_error() {
    let ctx = context(indexed_cities(CascadeMode::All));
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let countries = ctx.persister("Country").unwrap();

    let mut france = country(1, "France", vec![city(10, "Paris"), city(20, "Lyon")]);
    countries.insert(&mut session, &mut france).unwrap();
    store
        .engine
        .update("city", &Row::new().with("position", Value::Null), &Predicate::eq("id", 20i64))
        .unwrap();

    match countries.select(&mut session, 1i64).unwrap_err() {
        Error::IndexNotResolved { relation, instance } => {
            assert_eq!(relation, "cities");
            assert_eq!(instance, EntityKey::new("City", 20i64));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_listeners_see_each_operation() {
    let ctx = context(country_cities(CascadeMode::AllOrphanRemoval));
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let countries = ctx.persister("Country").unwrap();
    let recorder = Recorder::new();
    countries.add_listener(recorder.clone()).unwrap();

    let mut france = country(1, "France", vec![city(10, "Paris")]);
    countries.insert(&mut session, &mut france).unwrap();
    let loaded = countries.select(&mut session, 1i64).unwrap().unwrap();
    countries
        .update(&mut session, &mut loaded.clone().with_field("name", "République"), &loaded, false)
        .unwrap();
    countries.delete(&mut session, &loaded).unwrap();

    assert_eq!(
        recorder.events(),
        vec![
            "before_insert:1",
            "after_insert:1",
            "before_select:1",
            "after_select:1",
            "before_update:1",
            "after_update:1",
            "before_delete:1",
            "after_delete:1",
        ]
    );
}

#[test]
fn test_delete_by_id_loads_the_graph() {
    let ctx = context(country_cities(CascadeMode::AllOrphanRemoval));
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let countries = ctx.persister("Country").unwrap();

    let mut batch = vec![
        country(1, "France", vec![city(10, "Paris"), city(20, "Lyon")]),
        country(2, "Italy", vec![city(30, "Rome")]),
    ];
    countries.insert_all(&mut session, &mut batch).unwrap();

    assert_eq!(countries.delete_by_id(&mut session, 1i64).unwrap(), 1);
    assert_eq!(ids(&countries.select_all(&mut session).unwrap()), vec![2]);
    assert_eq!(store.count("city"), 1);

    assert_eq!(countries.delete_by_ids(&mut session, &[Value::Int64(2), Value::Int64(42)]).unwrap(), 1);
    assert_eq!(store.count("country"), 0);
    assert_eq!(store.count("city"), 0);
}

#[test]
fn test_self_referencing_tree_round_trip() {
    let ctx = context(vec![EntityMapping::new("Category", "category")
        .identifier(IdentifierMapping::assigned("id"))
        .column("name")
        .back_reference("parent")
        .relation(
            RelationDescriptor::one_to_many_list("children", "Category", "parent_id")
                .indexed_by("position")
                .reverse("parent"),
        )]);
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let categories = ctx.persister("Category").unwrap();

    let node = |id: i64, children: Vec<Entity>| {
        Entity::new("Category")
            .with_field("id", id)
            .with_field("name", format!("c{}", id))
            .with_many("children", children)
    };
    let mut root = node(1, vec![node(2, vec![node(4, vec![])]), node(3, vec![])]);
    categories.insert(&mut session, &mut root).unwrap();

    let loaded = categories.select(&mut session, 1i64).unwrap().unwrap();
    assert_graph_eq(&root, &loaded);
    let first = &loaded.many("children")[0];
    assert_eq!(first.field("id"), &Value::Int64(2));
    assert_eq!(first.reference("parent"), Some(&EntityKey::new("Category", 1i64)));
    assert_eq!(first.many("children")[0].reference("parent"), Some(&EntityKey::new("Category", 2i64)));

    // Every instance is both a root and a nested child here.
    let all = categories.select_all(&mut session).unwrap();
    assert_eq!(ids(&all), vec![1, 2, 3, 4]);
    let by_id = |id: i64| all.iter().find(|c| c.field("id") == &Value::Int64(id)).unwrap();
    assert_graph_eq(&root, by_id(1));
    assert_graph_eq(&root.many("children")[0], by_id(2));

    let both = categories
        .select_ids(&mut session, &[Value::from(1i64), Value::from(2i64)])
        .unwrap();
    assert_graph_eq(&root, &both[0]);
    assert_graph_eq(&root.many("children")[0], &both[1]);
}

#[test]
fn test_reference_cycle_stops_at_repeated_instance() {
    let ctx = context(vec![EntityMapping::new("Person", "person")
        .identifier(IdentifierMapping::assigned("id"))
        .column("name")
        .relation(
            RelationDescriptor::many_to_many("friends", "Person", "person_friend", "person_id", "friend_id")
                .cascade(CascadeMode::AssociationOnly),
        )]);
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let people = ctx.persister("Person").unwrap();

    let person = |id: i64, friends: Vec<Entity>| {
        Entity::new("Person")
            .with_field("id", id)
            .with_field("name", format!("p{}", id))
            .with_many("friends", friends)
    };
    let mut alice = person(1, vec![person(2, vec![])]);
    people.insert(&mut session, &mut alice).unwrap();
    store
        .engine
        .insert("person_friend", &Row::new().with("person_id", 2i64).with("friend_id", 1i64))
        .unwrap();

    let loaded = people.select(&mut session, 1i64).unwrap().unwrap();
    let bob = &loaded.many("friends")[0];
    assert_eq!(bob.field("id"), &Value::Int64(2));
    let again = &bob.many("friends")[0];
    assert_eq!(again.field("id"), &Value::Int64(1));
    assert!(again.many("friends").is_empty());

    let everyone = people.select_all(&mut session).unwrap();
    assert_eq!(ids(&everyone), vec![1, 2]);
    for person in &everyone {
        let friend = &person.many("friends")[0];
        assert_eq!(friend.many("friends").len(), 1);
        assert!(friend.many("friends")[0].many("friends").is_empty());
    }
}

#[test]
fn test_duplicate_links_keep_their_positions() {
    let ctx = context(vec![
        EntityMapping::new("Playlist", "playlist")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name")
            .relation(
                RelationDescriptor::many_to_many("songs", "Song", "playlist_song", "playlist_id", "song_id")
                    .indexed_by("position")
                    .tolerating_duplicates(),
            ),
        EntityMapping::new("Song", "song")
            .identifier(IdentifierMapping::assigned("id"))
            .column("title"),
    ]);
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let playlists = ctx.persister("Playlist").unwrap();

    let song = |id: i64| Entity::new("Song").with_field("id", id).with_field("title", format!("s{}", id));
    let mut mix = Entity::new("Playlist")
        .with_field("id", 1i64)
        .with_many("songs", vec![song(1), song(2), song(1)]);
    playlists.insert(&mut session, &mut mix).unwrap();
    assert_eq!(store.count("song"), 2);
    assert_eq!(store.count("playlist_song"), 3);

    let song_ids = |entity: &Entity| -> Vec<i64> {
        entity
            .many("songs")
            .iter()
            .filter_map(|s| s.field("id").as_i64())
            .collect()
    };
    let reference = playlists.select(&mut session, 1i64).unwrap().unwrap();
    assert_eq!(song_ids(&reference), vec![1, 2, 1]);

    let mut modified = reference.clone();
    let songs = reference.many("songs");
    modified.set_many("songs", vec![songs[1].clone(), songs[0].clone()]);
    playlists.update(&mut session, &mut modified, &reference, false).unwrap();

    assert_eq!(store.count("playlist_song"), 2);
    assert_eq!(store.count("song"), 2);
    assert_eq!(song_ids(&playlists.select(&mut session, 1i64).unwrap().unwrap()), vec![2, 1]);
}

#[test]
fn test_generated_identifiers() {
    let mut mappings = country_cities(CascadeMode::All);
    mappings[1] = EntityMapping::new("City", "city")
        .identifier(IdentifierMapping::generated("id", Arc::new(SequenceGenerator::starting_at(100))))
        .column("name")
        .back_reference("country");
    let ctx = context(mappings);
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let countries = ctx.persister("Country").unwrap();

    let unnamed = |name: &str| Entity::new("City").with_field("name", name);
    let mut france = country(1, "France", vec![unnamed("Paris"), unnamed("Lyon")]);
    countries.insert(&mut session, &mut france).unwrap();

    assert_eq!(ids(france.many("cities")), vec![100, 101]);
    assert!(france.many("cities").iter().all(Entity::is_persisted));
    assert_graph_eq(&france, &countries.select(&mut session, 1i64).unwrap().unwrap());
}

#[test]
fn test_failed_call_rolls_back_with_the_transaction() {
    let ctx = context(country_cities(CascadeMode::All));
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let countries = ctx.persister("Country").unwrap();

    let mut france = country(1, "France", vec![city(10, "Paris")]);
    countries.insert(&mut session, &mut france).unwrap();

    session.begin().unwrap();
    let mut copycat = country(2, "Copycat", vec![city(10, "Paris")]);
    let err = countries.insert(&mut session, &mut copycat).unwrap_err();
    assert!(err.store_error().unwrap().is_constraint_violation());
    session.rollback().unwrap();

    assert!(store.row("country", 2).is_none());
    assert_eq!(store.count("city"), 1);
}

#[test]
fn test_select_ids_splits_long_lists() {
    let ctx = PersistenceContext::build(
        country_cities(CascadeMode::All),
        EngineConfig::default().with_in_list_limit(2),
    )
    .unwrap();
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let countries = ctx.persister("Country").unwrap();

    let mut batch: Vec<Entity> = (1..=5).map(|id| country(id, "c", vec![])).collect();
    countries.insert_all(&mut session, &mut batch).unwrap();

    session.clear_log();
    let wanted: Vec<Value> = [5i64, 1, 3, 9, 2].into_iter().map(Value::from).collect();
    let loaded = countries.select_ids(&mut session, &wanted).unwrap();
    assert_eq!(session.selects().len(), 3);
    let order: Vec<i64> = loaded.iter().filter_map(|c| c.field("id").as_i64()).collect();
    assert_eq!(order, vec![5, 1, 3, 2]);
}

#[test]
fn test_cascade_depth_limit() {
    let ctx = PersistenceContext::build(
        country_cities(CascadeMode::All),
        EngineConfig::default().with_max_cascade_depth(1),
    )
    .unwrap();
    let store = TestStore::new(&ctx);
    let mut session = store.session();

    let cities = Recorder::new();
    ctx.add_listener("City", cities.clone()).unwrap();

    let mut france = country(1, "France", vec![city(10, "Paris")]);
    let err = ctx.persister("Country").unwrap().insert(&mut session, &mut france).unwrap_err();
    assert!(matches!(err, Error::CascadeDepthExceeded(1)));
    assert!(cities.events().is_empty());
}

#[test]
fn test_depth_limit_on_delete_notifies_nothing_below() {
    let ctx = context(country_cities(CascadeMode::AllOrphanRemoval));
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let mut france = country(1, "France", vec![city(10, "Paris")]);
    ctx.persister("Country").unwrap().insert(&mut session, &mut france).unwrap();

    let shallow = PersistenceContext::build(
        country_cities(CascadeMode::AllOrphanRemoval),
        EngineConfig::default().with_max_cascade_depth(1),
    )
    .unwrap();
    let cities = Recorder::new();
    shallow.add_listener("City", cities.clone()).unwrap();
    let countries = shallow.persister("Country").unwrap();
    let loaded = countries.select(&mut session, 1i64).unwrap().unwrap();

    let err = countries.delete(&mut session, &loaded).unwrap_err();
    assert!(matches!(err, Error::CascadeDepthExceeded(1)));
    assert!(cities.events().is_empty());
    assert_eq!(store.count("city"), 1);
}

#[test]
fn test_persister_rejects_foreign_types() {
    let ctx = context(country_cities(CascadeMode::All));
    let store = TestStore::new(&ctx);
    let mut session = store.session();
    let countries = ctx.persister("Country").unwrap();

    let mut paris = city(10, "Paris");
    assert!(matches!(
        countries.insert(&mut session, &mut paris),
        Err(Error::WrongEntityType { .. })
    ));

    let france = country(1, "France", vec![]).persisted();
    let mut italy = country(2, "Italy", vec![]);
    assert!(matches!(
        countries.update(&mut session, &mut italy, &france, false),
        Err(Error::IdentifierMismatch { .. })
    ));
    assert!(matches!(ctx.persister("Nowhere"), Err(Error::UnknownMapping(_))));
}
