//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use ormgraph_core::proto::{Predicate, Row, Statement, Value};
use ormgraph_core::{
    CascadeMode, EngineConfig, Entity, EntityMapping, IdentifierMapping, PersistListener, PersistenceContext,
    RelationDescriptor,
};
use ormgraph_store::{Session, StorageConfig, StorageEngine};
use parking_lot::Mutex;

/// A store with every table the context needs.
pub struct TestStore {
    pub engine: StorageEngine,
    _dir: tempfile::TempDir,
}

impl TestStore {
    pub fn new(ctx: &PersistenceContext) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(StorageConfig::new(dir.path())).unwrap();
        for def in ctx.table_defs().unwrap() {
            engine.create_table(def).unwrap();
        }
        Self { engine, _dir: dir }
    }

    pub fn session(&self) -> Session<'_> {
        Session::new(&self.engine)
    }

    pub fn count(&self, table: &str) -> usize {
        self.engine.count(table).unwrap()
    }

    pub fn row(&self, table: &str, id: i64) -> Option<Row> {
        self.engine
            .scan(table, &Predicate::eq("id", id))
            .unwrap()
            .into_iter()
            .next()
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.engine.scan(table, &Predicate::all()).unwrap()
    }
}

pub fn context(mappings: Vec<EntityMapping>) -> PersistenceContext {
    PersistenceContext::build(mappings, EngineConfig::default()).unwrap()
}

/// Country owning its cities through `city.country_id`.
pub fn country_cities(mode: CascadeMode) -> Vec<EntityMapping> {
    vec![
        EntityMapping::new("Country", "country")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name")
            .relation(
                RelationDescriptor::one_to_many_set("cities", "City", "country_id")
                    .reverse("country")
                    .cascade(mode),
            ),
        EntityMapping::new("City", "city")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name")
            .back_reference("country"),
    ]
}

/// Country linked to its cities through the `country_city` table.
pub fn country_cities_linked(mode: CascadeMode) -> Vec<EntityMapping> {
    vec![
        EntityMapping::new("Country", "country")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name")
            .relation(
                RelationDescriptor::many_to_many("cities", "City", "country_city", "country_id", "city_id")
                    .cascade(mode),
            ),
        EntityMapping::new("City", "city")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name"),
    ]
}

pub fn city(id: i64, name: &str) -> Entity {
    Entity::new("City").with_field("id", id).with_field("name", name)
}

pub fn country(id: i64, name: &str, cities: Vec<Entity>) -> Entity {
    Entity::new("Country")
        .with_field("id", id)
        .with_field("name", name)
        .with_many("cities", cities)
}

/// Identifiers of a collection, sorted.
pub fn ids(entities: &[Entity]) -> Vec<i64> {
    let mut ids: Vec<i64> = entities.iter().filter_map(|e| e.field("id").as_i64()).collect();
    ids.sort_unstable();
    ids
}

/// Compare two graphs by type, scalar fields and related entities at every
/// depth. Collections compare as multisets; back-pointer keys are ignored.
pub fn assert_graph_eq(expected: &Entity, actual: &Entity) {
    assert_eq!(expected.entity_type(), actual.entity_type());
    for name in expected.fields().keys().chain(actual.fields().keys()) {
        assert_eq!(
            expected.field(name),
            actual.field(name),
            "field '{}' of {}",
            name,
            expected.entity_type()
        );
    }
    for name in expected.relations().keys().chain(actual.relations().keys()) {
        let sorted = |entity: &Entity| {
            let mut related: Vec<Entity> = entity.related(name).into_iter().cloned().collect();
            related.sort_by_key(|e| e.field("id").to_string());
            related
        };
        let (left, right) = (sorted(expected), sorted(actual));
        assert_eq!(left.len(), right.len(), "size of relation '{}'", name);
        for (l, r) in left.iter().zip(&right) {
            assert_graph_eq(l, r);
        }
    }
}

/// Tables written by the statements, in order.
pub fn written_tables(session: &Session<'_>) -> Vec<String> {
    session.executed().iter().map(|s| s.table().to_string()).collect()
}

pub fn inserts_into(session: &Session<'_>, table: &str) -> usize {
    session
        .executed()
        .iter()
        .filter(|s| s.is_insert() && s.table() == table)
        .count()
}

/// Whether any executed update assigns `column`.
pub fn assigns(session: &Session<'_>, column: &str) -> bool {
    session.executed().iter().any(|s| match s {
        Statement::Update { set, .. } => set.contains(column),
        _ => false,
    })
}

/// Listener recording every callback as `event:count`.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn record(&self, event: &str, count: usize) {
        self.events.lock().push(format!("{}:{}", event, count));
    }
}

impl PersistListener for Recorder {
    fn before_insert(&self, entities: &[&Entity]) {
        self.record("before_insert", entities.len());
    }

    fn after_insert(&self, entities: &[&Entity]) {
        self.record("after_insert", entities.len());
    }

    fn before_update(&self, pairs: &[(&Entity, &Entity)]) {
        self.record("before_update", pairs.len());
    }

    fn after_update(&self, pairs: &[(&Entity, &Entity)]) {
        self.record("after_update", pairs.len());
    }

    fn before_delete(&self, entities: &[&Entity]) {
        self.record("before_delete", entities.len());
    }

    fn after_delete(&self, entities: &[&Entity]) {
        self.record("after_delete", entities.len());
    }

    fn before_select(&self, ids: &[Value]) {
        self.record("before_select", ids.len());
    }

    fn after_select(&self, entities: &[Entity]) {
        self.record("after_select", entities.len());
    }
}
