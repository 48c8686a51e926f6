//! Entity and relation mappings.
//!
//! Mappings are declared with the builders in this module and validated
//! once by [`MappingRegistry::build`]; they are immutable afterwards.

mod entity;
mod identifier;
mod registry;
mod relation;

pub use entity::{ColumnMapping, EntityMapping, PolymorphismPolicy, Strategy};
pub use identifier::{IdGenerator, IdentifierMapping, IdentifierPolicy, SequenceGenerator, UuidGenerator};
pub use registry::{ConcretePlan, Dispatch, MappingRegistry, PlanRelation, TablePart};
pub use relation::{CascadeMode, Ownership, RelationDescriptor, RelationKind};
