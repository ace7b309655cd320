// In-Memory Control Plane
//
// A small catalog that understands the administrative statements used by
// the cleanup engine. Backs unit and integration tests, and downstream
// harnesses that need a backend without network access.
//
// Reproduces the backend behaviours cleanup depends on:
// - relations pinned by running queries refuse to drop (retryable)
// - relations referenced by downstream relations refuse to drop (retryable)
// - schemas and databases with relations left refuse to drop (retryable)
// - dropping something missing reports "does not exist"

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};

use super::{ControlPlane, QueryError, Row, RowStream, Scope};
use crate::resource::ResourceType;

/// Shape of rows produced by listing statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowStyle {
    #[default]
    Positional,
    Mapping,
}

#[derive(Debug, Clone)]
struct Relation {
    name: String,
    kind: String,
    /// Fully-qualified names of upstream relations.
    depends_on: Vec<String>,
}

#[derive(Debug, Clone)]
struct RunningQuery {
    id: String,
    database: String,
    /// Fully-qualified relations this query keeps alive.
    pins: Vec<String>,
}

#[derive(Debug, Clone)]
struct ScriptedFailure {
    statement_prefix: String,
    error: QueryError,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct Catalog {
    /// database -> schema -> relations, in creation order
    databases: BTreeMap<String, BTreeMap<String, Vec<Relation>>>,
    globals: HashMap<ResourceType, Vec<String>>,
    /// store -> entities
    stores: BTreeMap<String, Vec<String>>,
    queries: Vec<RunningQuery>,
    failures: Vec<ScriptedFailure>,
    statements: Vec<String>,
    next_query_id: u64,
}

/// In-memory [`ControlPlane`].
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    catalog: Mutex<Catalog>,
    row_style: RowStyle,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row_style(row_style: RowStyle) -> Self {
        Self {
            catalog: Mutex::default(),
            row_style,
        }
    }

    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        // A panicking test thread must not hide the catalog from the others.
        self.catalog.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---------------------------------------------------------------
    // Seeding
    // ---------------------------------------------------------------

    /// Create a database with an empty `public` schema.
    pub fn add_database(&self, database: &str) {
        self.catalog()
            .databases
            .entry(database.to_string())
            .or_default()
            .entry("public".to_string())
            .or_default();
    }

    pub fn add_schema(&self, database: &str, schema: &str) {
        self.catalog()
            .databases
            .entry(database.to_string())
            .or_default()
            .entry(schema.to_string())
            .or_default();
    }

    /// Add a relation of `kind` (`STREAM`, `CHANGELOG`, `MATERIALIZED_VIEW`, ...).
    ///
    /// `depends_on` lists fully-qualified upstream relations.
    pub fn add_relation(
        &self,
        database: &str,
        schema: &str,
        name: &str,
        kind: &str,
        depends_on: &[&str],
    ) {
        self.catalog()
            .databases
            .entry(database.to_string())
            .or_default()
            .entry(schema.to_string())
            .or_default()
            .push(Relation {
                name: name.to_string(),
                kind: kind.to_string(),
                depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            });
    }

    /// Add a global resource (function, compute pool, source, ...).
    pub fn add_global(&self, resource_type: ResourceType, name: &str) {
        self.catalog()
            .globals
            .entry(resource_type)
            .or_default()
            .push(name.to_string());
    }

    pub fn add_store(&self, store: &str) {
        self.catalog().stores.entry(store.to_string()).or_default();
    }

    pub fn add_entity(&self, store: &str, entity: &str) {
        self.catalog()
            .stores
            .entry(store.to_string())
            .or_default()
            .push(entity.to_string());
    }

    /// Start a query in `database` that pins the given relations.
    /// Returns its id.
    pub fn start_query(&self, database: &str, pins: &[&str]) -> String {
        let mut catalog = self.catalog();
        catalog.next_query_id += 1;
        let id = format!("q{}", catalog.next_query_id);
        catalog.queries.push(RunningQuery {
            id: id.clone(),
            database: database.to_string(),
            pins: pins.iter().map(|s| s.to_string()).collect(),
        });
        id
    }

    /// Fail statements starting with `statement_prefix`.
    ///
    /// `times = None` fails forever.
    pub fn fail_with(&self, statement_prefix: &str, error: QueryError, times: Option<usize>) {
        self.catalog().failures.push(ScriptedFailure {
            statement_prefix: statement_prefix.to_string(),
            error,
            remaining: times,
        });
    }

    // ---------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------

    /// Every statement received, in order, including failed ones.
    pub fn statements(&self) -> Vec<String> {
        self.catalog().statements.clone()
    }

    pub fn has_database(&self, database: &str) -> bool {
        self.catalog().databases.contains_key(database)
    }

    pub fn schemas(&self, database: &str) -> Vec<String> {
        self.catalog()
            .databases
            .get(database)
            .map(|schemas| schemas.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Fully-qualified names of every relation in `database`.
    pub fn relations(&self, database: &str) -> Vec<String> {
        let catalog = self.catalog();
        let Some(schemas) = catalog.databases.get(database) else {
            return Vec::new();
        };
        schemas
            .iter()
            .flat_map(|(schema, rels)| {
                rels.iter()
                    .map(move |r| format!("{database}.{schema}.{}", r.name))
            })
            .collect()
    }

    pub fn globals(&self, resource_type: ResourceType) -> Vec<String> {
        self.catalog()
            .globals
            .get(&resource_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn entities(&self, store: &str) -> Vec<String> {
        self.catalog().stores.get(store).cloned().unwrap_or_default()
    }

    pub fn running_queries(&self) -> usize {
        self.catalog().queries.len()
    }

    // ---------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------

    fn run(&self, scope: &Scope, sql: &str) -> Result<Vec<Vec<(&'static str, Value)>>, QueryError> {
        let mut catalog = self.catalog();
        catalog.statements.push(sql.to_string());

        if let Some(error) = catalog.take_failure(sql) {
            return Err(error);
        }

        let statement = sql.trim().trim_end_matches(';').trim();

        if statement == "LIST DATABASES" {
            return Ok(catalog
                .databases
                .keys()
                .map(|db| vec![("Name", Value::from(db.as_str()))])
                .collect());
        }
        if statement == "LIST SCHEMAS" {
            let database = scope.database.as_deref().unwrap_or_default();
            let schemas = catalog.schemas_of(database)?;
            return Ok(schemas
                .keys()
                .map(|s| vec![("Name", Value::from(s.as_str()))])
                .collect());
        }
        if let Some(path) = statement.strip_prefix("LIST RELATIONS IN SCHEMA ") {
            let (database, schema) = path
                .split_once('.')
                .ok_or_else(|| QueryError::new(format!("invalid schema path {path}")))?;
            let relations = catalog
                .schemas_of(database)?
                .get(schema)
                .ok_or_else(|| not_exists("schema", &format!("{database}.{schema}")))?;
            return Ok(relations
                .iter()
                .map(|r| {
                    vec![
                        ("Name", Value::from(r.name.as_str())),
                        ("Type", Value::from(r.kind.as_str())),
                    ]
                })
                .collect());
        }
        if statement == "LIST QUERIES" {
            return Ok(catalog
                .queries
                .iter()
                .filter(|q| scope.database.as_deref().map_or(true, |db| db == q.database))
                .map(|q| {
                    vec![
                        ("Id", Value::from(q.id.as_str())),
                        ("State", Value::from("running")),
                    ]
                })
                .collect());
        }
        if let Some(id) = statement.strip_prefix("TERMINATE QUERY ") {
            let before = catalog.queries.len();
            catalog.queries.retain(|q| q.id != id);
            if catalog.queries.len() == before {
                return Err(not_exists("query", id));
            }
            return Ok(Vec::new());
        }
        if let Some(store) = statement.strip_prefix("LIST ENTITIES IN STORE ") {
            let store = unquote(store);
            let entities = catalog
                .stores
                .get(store)
                .ok_or_else(|| not_exists("store", store))?;
            return Ok(entities
                .iter()
                .map(|e| vec![("Name", Value::from(e.as_str()))])
                .collect());
        }
        if statement == "LIST STORES" {
            return Ok(catalog
                .stores
                .keys()
                .map(|s| vec![("Name", Value::from(s.as_str()))])
                .collect());
        }
        if let Some(target) = statement.strip_prefix("DROP RELATION ") {
            catalog.drop_relation(target)?;
            return Ok(Vec::new());
        }
        if let Some(schema) = statement.strip_prefix("DROP SCHEMA ") {
            let database = scope.database.as_deref().unwrap_or_default();
            catalog.drop_schema(database, schema)?;
            return Ok(Vec::new());
        }
        if let Some(database) = statement.strip_prefix("DROP DATABASE ") {
            catalog.drop_database(database)?;
            return Ok(Vec::new());
        }
        if let Some(rest) = statement.strip_prefix("DROP ENTITY ") {
            let (entity, store) = split_in_store(rest)?;
            let entities = catalog
                .stores
                .get_mut(store)
                .ok_or_else(|| not_exists("store", store))?;
            let before = entities.len();
            entities.retain(|e| e != entity);
            if entities.len() == before {
                return Err(QueryError::new(
                    "This server does not host this topic-partition.",
                ));
            }
            return Ok(Vec::new());
        }
        if let Some(store) = statement.strip_prefix("DROP STORE ") {
            if catalog.stores.remove(store).is_none() {
                return Err(not_exists("store", store));
            }
            return Ok(Vec::new());
        }
        if let Some(rest) = statement.strip_prefix("CREATE STORE ") {
            let store = rest.split_whitespace().next().unwrap_or_default();
            if catalog.stores.contains_key(store) {
                return Err(QueryError::new(format!("store {store} already exists")));
            }
            catalog.stores.insert(store.to_string(), Vec::new());
            return Ok(Vec::new());
        }
        if let Some(rest) = statement.strip_prefix("CREATE ENTITY ") {
            let (entity, store) = split_in_store(rest)?;
            let entities = catalog
                .stores
                .get_mut(store)
                .ok_or_else(|| not_exists("store", store))?;
            if entities.iter().any(|e| e == entity) {
                return Err(QueryError::new(format!("entity {entity} already exists")));
            }
            entities.push(entity.to_string());
            return Ok(Vec::new());
        }
        if let Some(rest) = statement.strip_prefix("LIST ") {
            let resource_type = global_type_for_list(rest)
                .ok_or_else(|| QueryError::new(format!("unsupported statement: {sql}")))?;
            return Ok(catalog
                .globals
                .get(&resource_type)
                .map(|names| {
                    names
                        .iter()
                        .map(|n| vec![("Name", Value::from(n.as_str()))])
                        .collect()
                })
                .unwrap_or_default());
        }
        if let Some(rest) = statement.strip_prefix("DROP ") {
            let (type_tag, name) = rest
                .split_once(' ')
                .ok_or_else(|| QueryError::new(format!("unsupported statement: {sql}")))?;
            let resource_type: ResourceType = type_tag
                .parse()
                .map_err(|_| QueryError::new(format!("unsupported statement: {sql}")))?;
            let names = catalog.globals.entry(resource_type).or_default();
            let before = names.len();
            names.retain(|n| n != name);
            if names.len() == before {
                return Err(not_exists(&resource_type.as_str().to_lowercase(), name));
            }
            return Ok(Vec::new());
        }

        Err(QueryError::new(format!("unsupported statement: {sql}")))
    }

    fn render(&self, rows: Vec<Vec<(&'static str, Value)>>) -> Vec<Result<Row, QueryError>> {
        rows.into_iter()
            .map(|columns| {
                Ok(match self.row_style {
                    RowStyle::Positional => {
                        Row::Sequence(columns.into_iter().map(|(_, v)| v).collect())
                    }
                    RowStyle::Mapping => Row::Mapping(
                        columns
                            .into_iter()
                            .map(|(k, v)| (k.to_string(), v))
                            .collect::<Map<String, Value>>(),
                    ),
                })
            })
            .collect()
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn query(&self, scope: &Scope, sql: &str) -> Result<RowStream, QueryError> {
        let rows = self.run(scope, sql)?;
        Ok(stream::iter(self.render(rows)).boxed())
    }
}

impl Catalog {
    fn take_failure(&mut self, sql: &str) -> Option<QueryError> {
        let statement = sql.trim();
        let index = self
            .failures
            .iter()
            .position(|f| statement.starts_with(&f.statement_prefix))?;
        let failure = &mut self.failures[index];
        let error = failure.error.clone();
        match failure.remaining.as_mut() {
            Some(n) if *n <= 1 => {
                self.failures.remove(index);
            }
            Some(n) => *n -= 1,
            None => {}
        }
        Some(error)
    }

    fn schemas_of(&self, database: &str) -> Result<&BTreeMap<String, Vec<Relation>>, QueryError> {
        self.databases
            .get(database)
            .ok_or_else(|| QueryError::with_state(format!("database {database} does not exist"), "3D000"))
    }

    fn is_pinned(&self, fq_name: &str) -> bool {
        self.queries.iter().any(|q| q.pins.iter().any(|p| p == fq_name))
    }

    fn is_referenced(&self, fq_name: &str) -> bool {
        self.databases.values().any(|schemas| {
            schemas
                .values()
                .flatten()
                .any(|r| r.depends_on.iter().any(|d| d == fq_name))
        })
    }

    fn drop_relation(&mut self, fq_name: &str) -> Result<(), QueryError> {
        let mut parts = fq_name.splitn(3, '.');
        let (Some(database), Some(schema), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(not_exists("relation", fq_name));
        };

        let exists = self
            .databases
            .get(database)
            .and_then(|schemas| schemas.get(schema))
            .is_some_and(|rels| rels.iter().any(|r| r.name == name));
        if !exists {
            return Err(not_exists("relation", fq_name));
        }
        if self.is_pinned(fq_name) {
            return Err(QueryError::with_state(
                format!("relation {fq_name} has running queries"),
                "2BP01",
            ));
        }
        if self.is_referenced(fq_name) {
            return Err(QueryError::with_state(
                format!("relation {fq_name} has referenced relations"),
                "2BP01",
            ));
        }

        if let Some(rels) = self
            .databases
            .get_mut(database)
            .and_then(|schemas| schemas.get_mut(schema))
        {
            rels.retain(|r| r.name != name);
        }
        Ok(())
    }

    fn drop_schema(&mut self, database: &str, schema: &str) -> Result<(), QueryError> {
        let schemas = self
            .databases
            .get_mut(database)
            .ok_or_else(|| not_exists("database", database))?;
        match schemas.get(schema) {
            None => Err(not_exists("schema", schema)),
            Some(rels) if !rels.is_empty() => Err(QueryError::with_state(
                format!("schema {schema} has referenced relations"),
                "2BP01",
            )),
            Some(_) => {
                schemas.remove(schema);
                Ok(())
            }
        }
    }

    fn drop_database(&mut self, database: &str) -> Result<(), QueryError> {
        let schemas = self
            .databases
            .get(database)
            .ok_or_else(|| not_exists("database", database))?;
        if schemas.values().any(|rels| !rels.is_empty()) {
            return Err(QueryError::with_state(
                format!("database {database} has referenced relations"),
                "2BP01",
            ));
        }
        self.databases.remove(database);
        self.queries.retain(|q| q.database != database);
        Ok(())
    }
}

fn not_exists(what: &str, name: &str) -> QueryError {
    QueryError::new(format!("{what} {name} does not exist"))
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches('"')
}

/// `"<entity>" IN STORE "<store>"`
fn split_in_store(rest: &str) -> Result<(&str, &str), QueryError> {
    let (entity, store) = rest
        .split_once(" IN STORE ")
        .ok_or_else(|| QueryError::new(format!("missing store in: {rest}")))?;
    Ok((unquote(entity), unquote(store)))
}

fn global_type_for_list(plural: &str) -> Option<ResourceType> {
    let resource_type = match plural {
        "COMPUTE_POOLS" => ResourceType::ComputePool,
        "DESCRIPTOR_SOURCES" => ResourceType::DescriptorSource,
        "ENTITIES" => ResourceType::Entity,
        "FUNCTION_SOURCES" => ResourceType::FunctionSource,
        "FUNCTIONS" => ResourceType::Function,
        "SCHEMA_REGISTRIES" => ResourceType::SchemaRegistry,
        _ => return None,
    };
    Some(resource_type)
}
