// Resource Model
//
// Backend object types, their listing and drop statements, and the order
// in which they can be safely deleted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of backend object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Changelog,
    ComputePool,
    DescriptorSource,
    Entity,
    FunctionSource,
    Function,
    Relation,
    SchemaRegistry,
    Store,
    Stream,
    Schema,
    Database,
}

/// Deletion order for resources inside a database, most dependent first.
///
/// ENTITY and STORE are never dropped automatically: they may be shared
/// between runs and dropping them can fail authorization.
pub const DEPENDENCY_ORDER: [ResourceType; 7] = [
    ResourceType::Relation,
    ResourceType::Stream,
    ResourceType::Changelog,
    ResourceType::Function,
    ResourceType::ComputePool,
    ResourceType::FunctionSource,
    ResourceType::DescriptorSource,
];

/// System schemas that are never dropped.
pub const PROTECTED_SCHEMAS: [&str; 2] = ["information_schema", "pg_catalog"];

pub fn is_protected_schema(schema: &str) -> bool {
    let lowered = schema.to_lowercase();
    PROTECTED_SCHEMAS.contains(&lowered.as_str())
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Changelog => "CHANGELOG",
            Self::ComputePool => "COMPUTE_POOL",
            Self::DescriptorSource => "DESCRIPTOR_SOURCE",
            Self::Entity => "ENTITY",
            Self::FunctionSource => "FUNCTION_SOURCE",
            Self::Function => "FUNCTION",
            Self::Relation => "RELATION",
            Self::SchemaRegistry => "SCHEMA_REGISTRY",
            Self::Store => "STORE",
            Self::Stream => "STREAM",
            Self::Schema => "SCHEMA",
            Self::Database => "DATABASE",
        }
    }

    /// Global resources live outside any database and are listed and
    /// dropped without database/schema context.
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            Self::Store
                | Self::SchemaRegistry
                | Self::ComputePool
                | Self::DescriptorSource
                | Self::Entity
                | Self::Function
                | Self::FunctionSource
        )
    }

    /// Relation-like resources are listed per schema and dropped by their
    /// fully-qualified `database.schema.name`.
    pub fn is_relation_like(&self) -> bool {
        matches!(self, Self::Relation | Self::Stream | Self::Changelog)
    }

    /// Map the relation kind reported by a relation listing.
    ///
    /// Streams and changelogs keep their own type; every other kind
    /// (materialized view, table, view, ...) is a plain relation.
    pub fn from_relation_kind(kind: &str) -> Self {
        match kind.to_uppercase().as_str() {
            "STREAM" => Self::Stream,
            "CHANGELOG" => Self::Changelog,
            _ => Self::Relation,
        }
    }

    /// Whether a relation of `kind` belongs in a listing of `self`.
    pub fn includes_relation_kind(&self, kind: &str) -> bool {
        match self {
            Self::Relation => true,
            other => kind.eq_ignore_ascii_case(other.as_str()),
        }
    }

    /// Statement listing every resource of this type.
    ///
    /// Relation-like types are listed per schema (see [`list_relations_in_schema`]),
    /// schemas and databases have their own commands.
    pub fn list_statement(&self) -> &'static str {
        match self {
            Self::ComputePool => "LIST COMPUTE_POOLS;",
            Self::DescriptorSource => "LIST DESCRIPTOR_SOURCES;",
            Self::Entity => "LIST ENTITIES;",
            Self::FunctionSource => "LIST FUNCTION_SOURCES;",
            Self::Function => "LIST FUNCTIONS;",
            Self::SchemaRegistry => "LIST SCHEMA_REGISTRIES;",
            Self::Store => "LIST STORES;",
            Self::Relation | Self::Stream | Self::Changelog => "LIST RELATIONS;",
            Self::Schema => "LIST SCHEMAS;",
            Self::Database => "LIST DATABASES;",
        }
    }

    /// Statement dropping `target`.
    ///
    /// Entities need their store and go through [`drop_entity_statement`].
    pub fn drop_statement(&self, target: &str) -> String {
        match self {
            Self::Relation | Self::Stream | Self::Changelog => format!("DROP RELATION {target};"),
            other => format!("DROP {} {target};", other.as_str()),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown resource type: {0}")]
pub struct UnknownResourceType(pub String);

impl FromStr for ResourceType {
    type Err = UnknownResourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s.trim().to_uppercase().as_str() {
            "CHANGELOG" => Self::Changelog,
            "COMPUTE_POOL" => Self::ComputePool,
            "DESCRIPTOR_SOURCE" => Self::DescriptorSource,
            "ENTITY" => Self::Entity,
            "FUNCTION_SOURCE" => Self::FunctionSource,
            "FUNCTION" => Self::Function,
            "RELATION" => Self::Relation,
            "SCHEMA_REGISTRY" => Self::SchemaRegistry,
            "STORE" => Self::Store,
            "STREAM" => Self::Stream,
            "SCHEMA" => Self::Schema,
            "DATABASE" => Self::Database,
            _ => return Err(UnknownResourceType(s.to_string())),
        };
        Ok(parsed)
    }
}

/// Uniform view of one listed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub name: String,
    pub resource_type: ResourceType,
    pub schema: Option<String>,
}

impl ResourceRecord {
    pub fn new(name: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            name: name.into(),
            resource_type,
            schema: None,
        }
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Name passed to the drop statement.
    ///
    /// Relation-like resources are qualified as `database.schema.name`,
    /// falling back to `default_schema` and then `public`.
    pub fn drop_target(&self, database: &str, default_schema: Option<&str>) -> String {
        if self.resource_type.is_relation_like() {
            let schema = self
                .schema
                .as_deref()
                .or(default_schema)
                .unwrap_or("public");
            format!("{database}.{schema}.{}", self.name)
        } else {
            self.name.clone()
        }
    }
}

/// `LIST RELATIONS IN SCHEMA <database>.<schema>;`
pub fn list_relations_in_schema(database: &str, schema: &str) -> String {
    format!("LIST RELATIONS IN SCHEMA {database}.{schema};")
}

/// `LIST ENTITIES IN STORE "<store>";`
pub fn list_entities_in_store(store: &str) -> String {
    format!("LIST ENTITIES IN STORE \"{store}\";")
}

/// `DROP ENTITY "<entity>" IN STORE "<store>";`
pub fn drop_entity_statement(entity: &str, store: &str) -> String {
    format!("DROP ENTITY \"{entity}\" IN STORE \"{store}\";")
}

/// `"TYPE:name"` label used in teardown results.
pub fn outcome_label(resource_type: ResourceType, target: &str) -> String {
    format!("{resource_type}:{target}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_order_starts_with_relations() {
        assert_eq!(DEPENDENCY_ORDER[0], ResourceType::Relation);
        assert!(!DEPENDENCY_ORDER.contains(&ResourceType::Entity));
        assert!(!DEPENDENCY_ORDER.contains(&ResourceType::Store));
        assert!(!DEPENDENCY_ORDER.contains(&ResourceType::Schema));
    }

    #[test]
    fn global_and_relation_like_are_disjoint() {
        for t in DEPENDENCY_ORDER {
            assert!(!(t.is_global() && t.is_relation_like()), "{t}");
        }
        assert!(ResourceType::Function.is_global());
        assert!(ResourceType::Changelog.is_relation_like());
        assert!(!ResourceType::Database.is_global());
    }

    #[test]
    fn parse_round_trips_display() {
        let all = [
            ResourceType::Changelog,
            ResourceType::ComputePool,
            ResourceType::DescriptorSource,
            ResourceType::Entity,
            ResourceType::FunctionSource,
            ResourceType::Function,
            ResourceType::Relation,
            ResourceType::SchemaRegistry,
            ResourceType::Store,
            ResourceType::Stream,
            ResourceType::Schema,
            ResourceType::Database,
        ];
        for t in all {
            assert_eq!(t.to_string().parse::<ResourceType>().unwrap(), t);
        }
        assert_eq!("compute_pool".parse(), Ok(ResourceType::ComputePool));
        assert!("TOPIC".parse::<ResourceType>().is_err());
    }

    #[test]
    fn relation_kinds() {
        assert_eq!(ResourceType::from_relation_kind("stream"), ResourceType::Stream);
        assert_eq!(
            ResourceType::from_relation_kind("MATERIALIZED_VIEW"),
            ResourceType::Relation
        );
        assert!(ResourceType::Relation.includes_relation_kind("TABLE"));
        assert!(ResourceType::Stream.includes_relation_kind("Stream"));
        assert!(!ResourceType::Changelog.includes_relation_kind("STREAM"));
    }

    #[test]
    fn drop_statements() {
        assert_eq!(
            ResourceType::Stream.drop_statement("db.public.s1"),
            "DROP RELATION db.public.s1;"
        );
        assert_eq!(
            ResourceType::ComputePool.drop_statement("pool_1"),
            "DROP COMPUTE_POOL pool_1;"
        );
        assert_eq!(ResourceType::Schema.drop_statement("s"), "DROP SCHEMA s;");
        assert_eq!(
            drop_entity_statement("dbte2e_users", "msk"),
            "DROP ENTITY \"dbte2e_users\" IN STORE \"msk\";"
        );
    }

    #[test]
    fn drop_target_qualifies_relations() {
        let rel = ResourceRecord::new("mv1", ResourceType::Relation).in_schema("analytics");
        assert_eq!(rel.drop_target("db", Some("public")), "db.analytics.mv1");

        let bare = ResourceRecord::new("s1", ResourceType::Stream);
        assert_eq!(bare.drop_target("db", None), "db.public.s1");
        assert_eq!(bare.drop_target("db", Some("raw")), "db.raw.s1");

        let func = ResourceRecord::new("udf", ResourceType::Function).in_schema("x");
        assert_eq!(func.drop_target("db", None), "udf");
    }

    #[test]
    fn protected_schema_check_ignores_case() {
        assert!(is_protected_schema("INFORMATION_SCHEMA"));
        assert!(!is_protected_schema("public"));
    }
}
