//! Relation descriptors.

/// Cardinality and collection shape of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// At most one related entity.
    OneToOne,
    /// Unordered collection.
    OneToManySet,
    /// Ordered collection.
    OneToManyList,
    /// Collection stored through an association table.
    ManyToMany,
}

impl RelationKind {
    /// Check whether the relation holds a collection.
    pub fn is_collection(&self) -> bool {
        !matches!(self, RelationKind::OneToOne)
    }
}

/// Where the relation is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// The source table holds a foreign key to the target.
    SourceForeignKey { column: String },
    /// The target table holds a foreign key back to the source (mapped-by).
    TargetForeignKey { column: String },
    /// A dedicated table stores (owner id, target id, optional index).
    AssociationTable {
        table: String,
        owner_column: String,
        target_column: String,
    },
}

impl Ownership {
    /// The association table, if the relation uses one.
    pub fn association_table(&self) -> Option<&str> {
        match self {
            Ownership::AssociationTable { table, .. } => Some(table),
            _ => None,
        }
    }
}

/// How owner operations propagate to related entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadeMode {
    /// Related entities are read but never written.
    ReadOnly,
    /// Inserts and updates cascade; removal detaches.
    All,
    /// Inserts and updates cascade; removal deletes the related entity.
    AllOrphanRemoval,
    /// Inserts and updates cascade; removal deletes only the association row.
    AssociationOnly,
}

impl CascadeMode {
    /// Check whether writes propagate to related entities.
    pub fn writes(&self) -> bool {
        !matches!(self, CascadeMode::ReadOnly)
    }
}

/// Immutable description of one relation of an entity mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    /// Relation property on the source entity.
    pub name: String,
    pub kind: RelationKind,
    /// Target mapping name, bound when the registry is built.
    pub target: String,
    pub ownership: Ownership,
    pub cascade: CascadeMode,
    /// Column holding the 0-based position of each element.
    pub index_column: Option<String>,
    /// Target property re-wired to point back at the owner after load.
    pub reverse: Option<String>,
    /// Whether an empty value is a mapping error.
    pub mandatory: bool,
    /// Whether the same target may appear more than once in the collection.
    pub tolerates_duplicates: bool,
}

impl RelationDescriptor {
    fn new(name: impl Into<String>, kind: RelationKind, target: impl Into<String>, ownership: Ownership) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            ownership,
            cascade: CascadeMode::All,
            index_column: None,
            reverse: None,
            mandatory: false,
            tolerates_duplicates: false,
        }
    }

    /// One-to-one where the source table holds `column`.
    pub fn one_to_one(name: impl Into<String>, target: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new(
            name,
            RelationKind::OneToOne,
            target,
            Ownership::SourceForeignKey {
                column: column.into(),
            },
        )
    }

    /// One-to-one where the target table holds `column`.
    pub fn one_to_one_mapped_by(
        name: impl Into<String>,
        target: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            RelationKind::OneToOne,
            target,
            Ownership::TargetForeignKey {
                column: column.into(),
            },
        )
    }

    /// Unordered one-to-many where the target table holds `column`.
    pub fn one_to_many_set(name: impl Into<String>, target: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new(
            name,
            RelationKind::OneToManySet,
            target,
            Ownership::TargetForeignKey {
                column: column.into(),
            },
        )
    }

    /// Ordered one-to-many where the target table holds `column`.
    pub fn one_to_many_list(name: impl Into<String>, target: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new(
            name,
            RelationKind::OneToManyList,
            target,
            Ownership::TargetForeignKey {
                column: column.into(),
            },
        )
    }

    /// Many-to-many through an association table.
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        table: impl Into<String>,
        owner_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            RelationKind::ManyToMany,
            target,
            Ownership::AssociationTable {
                table: table.into(),
                owner_column: owner_column.into(),
                target_column: target_column.into(),
            },
        )
    }

    /// Replace the ownership, keeping kind and options.
    pub fn owned_by(mut self, ownership: Ownership) -> Self {
        self.ownership = ownership;
        self
    }

    pub fn cascade(mut self, mode: CascadeMode) -> Self {
        self.cascade = mode;
        self
    }

    pub fn indexed_by(mut self, column: impl Into<String>) -> Self {
        self.index_column = Some(column.into());
        self
    }

    pub fn reverse(mut self, property: impl Into<String>) -> Self {
        self.reverse = Some(property.into());
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn tolerating_duplicates(mut self) -> Self {
        self.tolerates_duplicates = true;
        self
    }

    /// Foreign key column held by the source table, if any.
    pub fn source_column(&self) -> Option<&str> {
        match &self.ownership {
            Ownership::SourceForeignKey { column } => Some(column),
            _ => None,
        }
    }

    /// Foreign key column held by the target table, if any.
    pub fn target_column(&self) -> Option<&str> {
        match &self.ownership {
            Ownership::TargetForeignKey { column } => Some(column),
            _ => None,
        }
    }

    /// Check whether the source row holds the relation.
    pub fn is_source_owned(&self) -> bool {
        matches!(self.ownership, Ownership::SourceForeignKey { .. })
    }
}
