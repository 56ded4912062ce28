//! Item definitions for the typed resource model
//!
//! Modules own resource types and associations; resource types own scalar
//! and navigation properties. Every item carries a stable identity and a
//! back-reference to its owner.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of a user-facing name.
pub const MAX_NAME_LEN: usize = 256;
/// Maximum length of a module uri.
pub const MAX_URI_LEN: usize = 512;
/// Maximum length of a description.
pub const MAX_DESCRIPTION_LEN: usize = 4000;
/// Ceiling on a resource type's flattened (inherited + own) property count.
pub const MAX_TYPE_PROPERTIES: usize = 256;

/// Stable identity of a model item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generate a fresh identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// First eight hex digits, used as a collision-proof suffix in derived
    /// physical names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ItemId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Cardinality constraint on one side of an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Multiplicity {
    One,
    ZeroOrOne,
    Many,
}

impl Multiplicity {
    /// Whether an end can transition from `self` to `next` without
    /// recreating the association.
    ///
    /// `Many` only stays `Many`; `One` may relax to anything; `ZeroOrOne`
    /// may relax to `Many` or stay. Tightening is never compatible.
    pub fn can_become(self, next: Multiplicity) -> bool {
        match self {
            Multiplicity::Many => next == Multiplicity::Many,
            Multiplicity::One => true,
            Multiplicity::ZeroOrOne => {
                matches!(next, Multiplicity::ZeroOrOne | Multiplicity::Many)
            }
        }
    }
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Multiplicity::One => "one",
            Multiplicity::ZeroOrOne => "zero_or_one",
            Multiplicity::Many => "many",
        };
        f.write_str(s)
    }
}

impl FromStr for Multiplicity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one" => Ok(Multiplicity::One),
            "zero_or_one" => Ok(Multiplicity::ZeroOrOne),
            "many" => Ok(Multiplicity::Many),
            other => Err(format!("unknown multiplicity: {}", other)),
        }
    }
}

/// Which side of an association a navigation property sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssociationEnd {
    Subject,
    Object,
}

impl AssociationEnd {
    pub fn opposite(self) -> Self {
        match self {
            AssociationEnd::Subject => AssociationEnd::Object,
            AssociationEnd::Object => AssociationEnd::Subject,
        }
    }
}

impl fmt::Display for AssociationEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssociationEnd::Subject => "subject",
            AssociationEnd::Object => "object",
        };
        f.write_str(s)
    }
}

impl FromStr for AssociationEnd {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subject" => Ok(AssociationEnd::Subject),
            "object" => Ok(AssociationEnd::Object),
            other => Err(format!("unknown association end: {}", other)),
        }
    }
}

/// Primitive data type of a scalar property, with facets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    String { max_len: u32 },
    Binary { max_len: u32 },
    Boolean,
    Byte,
    DateTime,
    Decimal { precision: u8, scale: u8 },
    Double,
    Single,
    Int16,
    Int32,
    Int64,
    Guid,
}

impl DataType {
    /// The PostgreSQL column type this data type maps to
    pub fn sql_type(&self) -> String {
        match self {
            DataType::String { max_len } => format!("varchar({})", max_len),
            DataType::Binary { .. } => "bytea".to_string(),
            DataType::Boolean => "boolean".to_string(),
            DataType::Byte => "smallint".to_string(),
            DataType::DateTime => "timestamptz".to_string(),
            DataType::Decimal { precision, scale } => format!("numeric({},{})", precision, scale),
            DataType::Double => "double precision".to_string(),
            DataType::Single => "real".to_string(),
            DataType::Int16 => "smallint".to_string(),
            DataType::Int32 => "integer".to_string(),
            DataType::Int64 => "bigint".to_string(),
            DataType::Guid => "uuid".to_string(),
        }
    }

    /// Whether a column of `self` can be altered in place to `next`.
    ///
    /// Only widening transitions qualify; everything else is expressed as a
    /// drop-and-recreate under the same physical name.
    pub fn alter_compatible(&self, next: &DataType) -> bool {
        use DataType::*;
        match (*self, *next) {
            (a, b) if a == b => true,
            (String { max_len: a }, String { max_len: b }) => b >= a,
            (Binary { max_len: a }, Binary { max_len: b }) => b >= a,
            (Byte, Int16) | (Byte, Int32) | (Byte, Int64) => true,
            (Int16, Int32) | (Int16, Int64) => true,
            (Int32, Int64) => true,
            (Single, Double) => true,
            (
                Decimal {
                    precision: p1,
                    scale: s1,
                },
                Decimal {
                    precision: p2,
                    scale: s2,
                },
            ) => p2 >= p1 && s2 >= s1,
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::String { max_len } => write!(f, "string({})", max_len),
            DataType::Binary { max_len } => write!(f, "binary({})", max_len),
            DataType::Boolean => f.write_str("boolean"),
            DataType::Byte => f.write_str("byte"),
            DataType::DateTime => f.write_str("datetime"),
            DataType::Decimal { precision, scale } => write!(f, "decimal({},{})", precision, scale),
            DataType::Double => f.write_str("double"),
            DataType::Single => f.write_str("single"),
            DataType::Int16 => f.write_str("int16"),
            DataType::Int32 => f.write_str("int32"),
            DataType::Int64 => f.write_str("int64"),
            DataType::Guid => f.write_str("guid"),
        }
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn facets(s: &str) -> Option<&str> {
            let open = s.find('(')?;
            let close = s.rfind(')')?;
            s.get(open + 1..close)
        }

        match s {
            "boolean" => return Ok(DataType::Boolean),
            "byte" => return Ok(DataType::Byte),
            "datetime" => return Ok(DataType::DateTime),
            "double" => return Ok(DataType::Double),
            "single" => return Ok(DataType::Single),
            "int16" => return Ok(DataType::Int16),
            "int32" => return Ok(DataType::Int32),
            "int64" => return Ok(DataType::Int64),
            "guid" => return Ok(DataType::Guid),
            _ => {}
        }

        let inner = facets(s).ok_or_else(|| format!("unknown data type: {}", s))?;
        if s.starts_with("string(") {
            let max_len = inner
                .parse::<u32>()
                .map_err(|_| format!("bad string facet: {}", s))?;
            Ok(DataType::String { max_len })
        } else if s.starts_with("binary(") {
            let max_len = inner
                .parse::<u32>()
                .map_err(|_| format!("bad binary facet: {}", s))?;
            Ok(DataType::Binary { max_len })
        } else if s.starts_with("decimal(") {
            let (p, sc) = inner
                .split_once(',')
                .ok_or_else(|| format!("bad decimal facets: {}", s))?;
            let precision = p
                .trim()
                .parse::<u8>()
                .map_err(|_| format!("bad decimal precision: {}", s))?;
            let scale = sc
                .trim()
                .parse::<u8>()
                .map_err(|_| format!("bad decimal scale: {}", s))?;
            Ok(DataType::Decimal { precision, scale })
        } else {
            Err(format!("unknown data type: {}", s))
        }
    }
}

/// Namespace-scoped container of resource types and associations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub id: ItemId,
    pub namespace: String,
    pub uri: Option<String>,
    pub description: Option<String>,
    /// System-defined modules cannot be structurally changed by a
    /// synchronization.
    pub system: bool,
    pub resource_types: IndexMap<ItemId, ResourceType>,
    pub associations: IndexMap<ItemId, Association>,
}

impl Module {
    /// Create a new empty module with a fresh identity
    pub fn new(namespace: &str) -> Self {
        Self {
            id: ItemId::new(),
            namespace: namespace.to_string(),
            uri: None,
            description: None,
            system: false,
            resource_types: IndexMap::new(),
            associations: IndexMap::new(),
        }
    }

    /// Mark the module as system-defined
    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    /// Add a resource type to this module
    pub fn add_resource_type(&mut self, mut resource_type: ResourceType) -> ItemId {
        resource_type.module = self.id;
        let id = resource_type.id;
        self.resource_types.insert(id, resource_type);
        id
    }

    /// Compare own attributes only; child collections are diffed per kind
    pub fn same_definition(&self, other: &Module) -> bool {
        self.namespace == other.namespace
            && self.uri == other.uri
            && self.description == other.description
            && self.system == other.system
    }
}

/// A type in the single-inheritance hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceType {
    pub id: ItemId,
    pub name: String,
    pub description: Option<String>,
    /// Base type identity; exactly one root type per catalog has no base.
    pub base: Option<ItemId>,
    /// Small integer tagging this type's rows in the shared table. Assigned
    /// by the engine; read-only to the caller.
    pub discriminator: Option<i32>,
    /// Owning module back-reference
    pub module: ItemId,
    pub scalar_properties: IndexMap<ItemId, ScalarProperty>,
    pub navigation_properties: IndexMap<ItemId, NavigationProperty>,
}

impl ResourceType {
    /// Create a new resource type owned by `module`
    pub fn new(name: &str, module: ItemId) -> Self {
        Self {
            id: ItemId::new(),
            name: name.to_string(),
            description: None,
            base: None,
            discriminator: None,
            module,
            scalar_properties: IndexMap::new(),
            navigation_properties: IndexMap::new(),
        }
    }

    /// Set the base type
    pub fn derived_from(mut self, base: ItemId) -> Self {
        self.base = Some(base);
        self
    }

    /// Add a scalar property owned by this type
    pub fn add_scalar_property(&mut self, mut property: ScalarProperty) -> ItemId {
        property.owner = self.id;
        let id = property.id;
        self.scalar_properties.insert(id, property);
        id
    }

    /// Compare own attributes only. The discriminator is engine-assigned
    /// and excluded.
    pub fn same_definition(&self, other: &ResourceType) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.base == other.base
            && self.module == other.module
    }
}

/// A primitive-typed property, mapped to exactly one (table, column) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarProperty {
    pub id: ItemId,
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    /// Owning resource type back-reference
    pub owner: ItemId,
}

impl ScalarProperty {
    pub fn new(name: &str, data_type: DataType, owner: ItemId) -> Self {
        Self {
            id: ItemId::new(),
            name: name.to_string(),
            data_type,
            nullable: false,
            owner,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn same_definition(&self, other: &ScalarProperty) -> bool {
        self.name == other.name
            && self.data_type == other.data_type
            && self.nullable == other.nullable
            && self.owner == other.owner
    }
}

/// The named, directional handle through which an association is reached
/// from a resource type. Mapped to a column only when it sits opposite a
/// `One` end (the foreign-key-backed side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationProperty {
    pub id: ItemId,
    pub name: String,
    pub end: AssociationEnd,
    pub association: ItemId,
    /// Owning resource type back-reference
    pub owner: ItemId,
}

impl NavigationProperty {
    pub fn new(name: &str, end: AssociationEnd, association: ItemId, owner: ItemId) -> Self {
        Self {
            id: ItemId::new(),
            name: name.to_string(),
            end,
            association,
            owner,
        }
    }

    pub fn same_definition(&self, other: &NavigationProperty) -> bool {
        self.name == other.name
            && self.end == other.end
            && self.association == other.association
            && self.owner == other.owner
    }
}

/// A typed, cardinality-constrained relationship between two resource
/// types, identified by a predicate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Association {
    pub id: ItemId,
    pub name: String,
    pub description: Option<String>,
    /// Predicate identity tagging this association's rows in the shared
    /// relationship table; never shared across associations.
    pub predicate: ItemId,
    /// Subject-side navigation property
    pub subject: ItemId,
    /// Object-side navigation property
    pub object: ItemId,
    pub subject_multiplicity: Multiplicity,
    pub object_multiplicity: Multiplicity,
    /// Physical view name. Assigned by the engine on first creation and
    /// frozen afterwards.
    pub view_name: Option<String>,
    /// Owning module back-reference
    pub module: ItemId,
}

impl Association {
    pub fn multiplicity(&self, end: AssociationEnd) -> Multiplicity {
        match end {
            AssociationEnd::Subject => self.subject_multiplicity,
            AssociationEnd::Object => self.object_multiplicity,
        }
    }

    pub fn navigation(&self, end: AssociationEnd) -> ItemId {
        match end {
            AssociationEnd::Subject => self.subject,
            AssociationEnd::Object => self.object,
        }
    }

    /// Which end a navigation property identity sits on
    pub fn end_of(&self, navigation: ItemId) -> Option<AssociationEnd> {
        if navigation == self.subject {
            Some(AssociationEnd::Subject)
        } else if navigation == self.object {
            Some(AssociationEnd::Object)
        } else {
            None
        }
    }

    pub fn has_one_end(&self) -> bool {
        self.subject_multiplicity == Multiplicity::One
            || self.object_multiplicity == Multiplicity::One
    }

    /// The navigation property backed by a foreign-key column: the one
    /// opposite a `One` end. `None` when no end is `One`.
    pub fn fk_navigation(&self) -> Option<ItemId> {
        if self.object_multiplicity == Multiplicity::One {
            Some(self.subject)
        } else if self.subject_multiplicity == Multiplicity::One {
            Some(self.object)
        } else {
            None
        }
    }

    /// The end whose at-most-one participation the unique index enforces.
    /// `None` for `Many`–`Many` (the index is on the full pair instead).
    /// When both ends are constrained only the stronger (`One`) end gets the
    /// index; the other is the backend trigger collaborator's obligation.
    pub fn constrained_end(&self) -> Option<AssociationEnd> {
        use Multiplicity::*;
        match (self.subject_multiplicity, self.object_multiplicity) {
            (Many, Many) => None,
            (One, _) => Some(AssociationEnd::Subject),
            (_, One) => Some(AssociationEnd::Object),
            (ZeroOrOne, _) => Some(AssociationEnd::Subject),
            (_, ZeroOrOne) => Some(AssociationEnd::Object),
        }
    }

    /// One-ended associations are written through the foreign-key column;
    /// every other shape gets dedicated insert/delete procedures.
    pub fn needs_procedures(&self) -> bool {
        self.fk_navigation().is_none()
    }

    /// Columns of the unique index enforcing this association's cardinality
    /// on the shared relationship table. `Many`–`Many` constrains the full
    /// pair; otherwise the column opposite the constrained end must be
    /// unique (each of its rows has at most one partner).
    pub fn unique_index_columns(&self) -> Vec<&'static str> {
        match self.constrained_end() {
            None => vec!["subject_id", "object_id"],
            Some(AssociationEnd::Subject) => vec!["object_id"],
            Some(AssociationEnd::Object) => vec!["subject_id"],
        }
    }

    /// Compare own attributes only. The view name is engine-assigned and
    /// excluded.
    pub fn same_definition(&self, other: &Association) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.predicate == other.predicate
            && self.subject == other.subject
            && self.object == other.object
            && self.subject_multiplicity == other.subject_multiplicity
            && self.object_multiplicity == other.object_multiplicity
            && self.module == other.module
    }
}
