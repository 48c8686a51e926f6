//! Entity mappings.

use ormgraph_proto::Value;

use super::identifier::IdentifierMapping;
use super::relation::RelationDescriptor;

/// A scalar property stored in a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub property: String,
    pub column: String,
}

/// How a root mapping stores its subtypes.
///
/// Subtypes are named by mapping; the root itself may appear among them when
/// plain root instances exist.
#[derive(Debug, Clone, PartialEq)]
pub enum PolymorphismPolicy {
    /// One shared table; `discriminator` selects the subtype.
    SingleTable {
        discriminator: String,
        subtypes: Vec<(Value, String)>,
    },
    /// Root table plus one table per subtype holding its own columns,
    /// keyed by the shared identifier.
    JoinedTables { subtypes: Vec<String> },
    /// One independent table per subtype holding every column.
    TablePerClass { subtypes: Vec<String> },
}

impl PolymorphismPolicy {
    /// Subtype mapping names in declaration order.
    pub fn subtype_names(&self) -> Vec<&str> {
        match self {
            PolymorphismPolicy::SingleTable { subtypes, .. } => {
                subtypes.iter().map(|(_, name)| name.as_str()).collect()
            }
            PolymorphismPolicy::JoinedTables { subtypes }
            | PolymorphismPolicy::TablePerClass { subtypes } => {
                subtypes.iter().map(String::as_str).collect()
            }
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            PolymorphismPolicy::SingleTable { .. } => Strategy::SingleTable,
            PolymorphismPolicy::JoinedTables { .. } => Strategy::JoinedTables,
            PolymorphismPolicy::TablePerClass { .. } => Strategy::TablePerClass,
        }
    }
}

/// Polymorphism strategy without its subtype table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    SingleTable,
    JoinedTables,
    TablePerClass,
}

/// Mapping of one entity type to its table.
#[derive(Debug, Clone)]
pub struct EntityMapping {
    /// Mapping name, used as the entity type.
    pub name: String,
    /// Table. Optional for single-table subtypes, which use the root table.
    pub table: Option<String>,
    /// Root mapping this subtype extends.
    pub parent: Option<String>,
    pub identifier: Option<IdentifierMapping>,
    /// Scalar columns in declaration order.
    pub columns: Vec<ColumnMapping>,
    pub relations: Vec<RelationDescriptor>,
    /// Properties other mappings may name as reverse accessors.
    pub back_references: Vec<String>,
    pub polymorphism: Option<PolymorphismPolicy>,
}

impl EntityMapping {
    /// Map an entity type to a table.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: Some(table.into()),
            parent: None,
            identifier: None,
            columns: Vec::new(),
            relations: Vec::new(),
            back_references: Vec::new(),
            polymorphism: None,
        }
    }

    /// Declare a subtype of `parent`. It inherits the identifier, columns and
    /// relations of its parent.
    pub fn subtype(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            parent: Some(parent.into()),
            identifier: None,
            columns: Vec::new(),
            relations: Vec::new(),
            back_references: Vec::new(),
            polymorphism: None,
        }
    }

    pub fn identifier(mut self, identifier: IdentifierMapping) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// Set the table of a subtype.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Map a property to a column of the same name.
    pub fn column(self, property: impl Into<String>) -> Self {
        let property = property.into();
        self.column_as(property.clone(), property)
    }

    /// Map a property to a named column.
    pub fn column_as(mut self, property: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.push(ColumnMapping {
            property: property.into(),
            column: column.into(),
        });
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn back_reference(mut self, property: impl Into<String>) -> Self {
        self.back_references.push(property.into());
        self
    }

    pub fn polymorphism(mut self, policy: PolymorphismPolicy) -> Self {
        self.polymorphism = Some(policy);
        self
    }

    /// Find a relation by property name.
    pub fn find_relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }
}
