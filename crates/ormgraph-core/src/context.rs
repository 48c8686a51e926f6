//! Persistence context: validated mappings, prepared join plans, listeners
//! and configuration, shared by every persister.

use std::collections::HashMap;
use std::sync::Arc;

use ormgraph_proto::TableDef;

use crate::config::EngineConfig;
use crate::error::Error;
use crate::join::JoinPlan;
use crate::listener::{ListenerCollection, PersistListener};
use crate::mapping::{EntityMapping, MappingRegistry};
use crate::persister::Persister;
use crate::schema;

/// Entry point of the engine.
///
/// Built once from the mapping declarations; immutable afterwards apart
/// from listener registration, so it can be shared between threads.
#[derive(Debug)]
pub struct PersistenceContext {
    registry: MappingRegistry,
    join_plans: HashMap<String, Vec<JoinPlan>>,
    listeners: HashMap<String, ListenerCollection>,
    config: EngineConfig,
}

impl PersistenceContext {
    /// Validate mappings and prepare their join plans.
    pub fn build(mappings: Vec<EntityMapping>, config: EngineConfig) -> Result<Self, Error> {
        let registry = MappingRegistry::build(mappings)?;

        let mut join_plans = HashMap::new();
        let mut listeners = HashMap::new();
        for name in registry.mapping_names() {
            let plans = JoinPlan::build_all(&registry, name)?;
            tracing::debug!(
                mapping = %name,
                queries = plans.len(),
                joins = plans.iter().map(|p| p.join_count()).sum::<usize>(),
                "join plan prepared"
            );
            join_plans.insert(name.clone(), plans);
            listeners.insert(name.clone(), ListenerCollection::default());
        }

        tracing::info!(mappings = registry.mapping_names().len(), "persistence context built");
        Ok(Self {
            registry,
            join_plans,
            listeners,
            config,
        })
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Persister for a mapping.
    pub fn persister(&self, mapping: &str) -> Result<Persister<'_>, Error> {
        let mapping = self
            .registry
            .mapping(mapping)
            .ok_or_else(|| Error::UnknownMapping(mapping.to_string()))?;
        Ok(Persister::new(self, &mapping.name))
    }

    /// Register a listener on a mapping.
    pub fn add_listener(&self, mapping: &str, listener: Arc<dyn PersistListener>) -> Result<(), Error> {
        self.listeners
            .get(mapping)
            .ok_or_else(|| Error::UnknownMapping(mapping.to_string()))?
            .add(listener);
        Ok(())
    }

    /// Table definitions the mappings need: entity tables first,
    /// association tables last.
    pub fn table_defs(&self) -> Result<Vec<TableDef>, Error> {
        schema::table_defs(&self.registry)
    }

    /// Prepared selects loading a mapping.
    pub fn join_plans(&self, mapping: &str) -> Result<&[JoinPlan], Error> {
        self.join_plans
            .get(mapping)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::UnknownMapping(mapping.to_string()))
    }

    /// Listeners of a mapping, if any are registered.
    pub(crate) fn listeners(&self, mapping: &str) -> Option<&ListenerCollection> {
        self.listeners.get(mapping).filter(|l| !l.is_empty())
    }
}
