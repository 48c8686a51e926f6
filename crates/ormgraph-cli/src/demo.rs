//! Demo schema and the cascade walkthrough run by `ormgraph demo`.
//!
//! Countries own their cities (orphan removal, ordered); regions group
//! cities through an association table without owning them.

use ormgraph_core::proto::{Connection, Value};
use ormgraph_core::{
    CascadeMode, EngineConfig, Entity, EntityMapping, IdentifierMapping, PersistenceContext, RelationDescriptor,
};
use ormgraph_store::{Session, StorageEngine};

use crate::formatter::{format_entity, OutputFormat};
use crate::CliError;

const FRANCE: i64 = 1;
const PARIS: i64 = 10;
const LYON: i64 = 20;
const GRENOBLE: i64 = 30;
const RHONE_ALPES: i64 = 100;

pub fn mappings() -> Vec<EntityMapping> {
    vec![
        EntityMapping::new("Country", "country")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name")
            .relation(
                RelationDescriptor::one_to_many_list("cities", "City", "country_id")
                    .indexed_by("position")
                    .reverse("country")
                    .cascade(CascadeMode::AllOrphanRemoval),
            ),
        EntityMapping::new("City", "city")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name")
            .back_reference("country"),
        EntityMapping::new("Region", "region")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name")
            .relation(
                RelationDescriptor::many_to_many("cities", "City", "region_city", "region_id", "city_id")
                    .cascade(CascadeMode::AssociationOnly),
            ),
    ]
}

pub fn context(config: EngineConfig) -> Result<PersistenceContext, CliError> {
    Ok(PersistenceContext::build(mappings(), config)?)
}

/// Create every table of the demo schema.
pub fn create_tables(ctx: &PersistenceContext, engine: &StorageEngine) -> Result<(), CliError> {
    for def in ctx.table_defs()? {
        engine.create_table(def)?;
    }
    Ok(())
}

fn city(id: i64, name: &str) -> Entity {
    Entity::new("City").with_field("id", id).with_field("name", name)
}

fn show(title: &str, entity: Option<&Entity>, format: OutputFormat) {
    println!("== {}", title);
    match entity {
        Some(entity) => println!("{}", format_entity(entity, format)),
        None => println!("(none)\n"),
    }
}

/// Run both walkthroughs inside one transaction.
pub fn run(ctx: &PersistenceContext, engine: &StorageEngine, format: OutputFormat) -> Result<(), CliError> {
    create_tables(ctx, engine)?;
    let mut session = Session::new(engine);
    session.begin()?;
    match walkthrough(ctx, &mut session, format) {
        Ok(()) => {
            session.commit()?;
            engine.flush()?;
            tracing::info!(statements = session.executed().len(), "demo committed");
            Ok(())
        }
        Err(e) => {
            session.rollback()?;
            Err(e)
        }
    }
}

fn walkthrough(ctx: &PersistenceContext, conn: &mut dyn Connection, format: OutputFormat) -> Result<(), CliError> {
    let countries = ctx.persister("Country")?;
    let regions = ctx.persister("Region")?;
    let cities = ctx.persister("City")?;

    // Leftovers of an earlier run.
    regions.delete_by_id(conn, RHONE_ALPES)?;
    countries.delete_by_id(conn, FRANCE)?;

    let mut france = Entity::new("Country")
        .with_field("id", FRANCE)
        .with_field("name", "France")
        .with_many("cities", vec![city(PARIS, "Paris"), city(LYON, "Lyon")]);
    countries.insert(conn, &mut france)?;
    let reference = countries.select(conn, FRANCE)?;
    show("inserted", reference.as_ref(), format);
    let Some(reference) = reference else {
        return Err(CliError::Demo("inserted country is not selectable".into()));
    };

    let mut modified = reference.clone();
    let mut lyon = reference
        .many("cities")
        .iter()
        .find(|c| c.field("id") == &Value::Int64(LYON))
        .cloned()
        .ok_or_else(|| CliError::Demo("Lyon was not loaded".into()))?;
    lyon.set_field("name", "Lyon-renamed");
    modified.set_many("cities", vec![lyon, city(GRENOBLE, "Grenoble")]);
    countries.update(conn, &mut modified, &reference, false)?;
    show("after orphan removal", countries.select(conn, FRANCE)?.as_ref(), format);
    println!("city {} still stored: {}\n", PARIS, cities.select(conn, PARIS)?.is_some());

    let mut region = Entity::new("Region")
        .with_field("id", RHONE_ALPES)
        .with_field("name", "Rhône-Alpes")
        .with_many("cities", modified.many("cities").to_vec());
    regions.insert(conn, &mut region)?;
    let loaded = regions.select(conn, RHONE_ALPES)?;
    show("region linking existing cities", loaded.as_ref(), format);

    if let Some(loaded) = loaded {
        regions.delete(conn, &loaded)?;
    }
    let remaining: Vec<String> = cities
        .select_all(conn)?
        .iter()
        .map(|c| c.field("name").to_string())
        .collect();
    println!("region deleted; cities kept: {}", remaining.join(", "));
    Ok(())
}
