// Resource Lister
//
// Enumerates live resources and normalizes the backend's row shapes
// (mappings or positional sequences) into `ResourceRecord`s.
// Records are rebuilt on every call and never cached.

use crate::client::{fetch_all, ControlPlane, QueryError, Row, Scope};
use crate::naming::INTEGRATION_DB_PREFIX;
use crate::resource::{self, ResourceRecord, ResourceType};

const NAME_KEYS: [&str; 2] = ["Name", "name"];
const TYPE_KEYS: [&str; 2] = ["Type", "type"];
const QUERY_ID_KEYS: [&str; 4] = ["id", "query_id", "Id", "Query_Id"];

/// Name and (optional) type cell of one listing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRow {
    pub name: String,
    pub kind: Option<String>,
}

/// Extract name and type from either row shape.
///
/// Mapping rows are looked up by `Name`/`name` and `Type`/`type`;
/// positional rows use index 0 for the name and index 1 for the type.
/// Rows without a name yield `None`.
pub fn normalize_row(row: &Row) -> Option<NormalizedRow> {
    let (name, kind) = match row {
        Row::Mapping(_) => (row.get_text(&NAME_KEYS), row.get_text(&TYPE_KEYS)),
        Row::Sequence(_) => (row.column_text(0), row.column_text(1)),
    };
    name.map(|name| NormalizedRow { name, kind })
}

fn query_id(row: &Row) -> Option<String> {
    match row {
        Row::Mapping(_) => row.get_text(&QUERY_ID_KEYS),
        Row::Sequence(_) => row.column_text(0),
    }
}

fn names(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .filter_map(normalize_row)
        .map(|r| r.name)
        .collect()
}

/// Schemas of `database`.
///
/// Fails when the database is missing or invalid; callers rely on this to
/// detect a database that no longer exists.
pub async fn list_schemas(
    client: &dyn ControlPlane,
    database: &str,
) -> Result<Vec<String>, QueryError> {
    let scope = Scope::database(database).with_schema("public");
    let rows = fetch_all(client, &scope, "LIST SCHEMAS;")
        .await
        .inspect_err(|e| tracing::warn!(database, error = %e, "Could not list schemas"))?;
    Ok(names(&rows))
}

/// List resources of `resource_type`.
///
/// Global types are listed without database context. Relation-like types
/// are listed schema by schema inside `database`; a schema that fails to
/// list is skipped, but failing to enumerate the schemas fails the call.
/// `schema` is only used as statement context.
pub async fn list_resources(
    client: &dyn ControlPlane,
    resource_type: ResourceType,
    database: Option<&str>,
    schema: Option<&str>,
) -> Result<Vec<ResourceRecord>, QueryError> {
    if resource_type.is_relation_like() {
        let Some(database) = database else {
            tracing::warn!(%resource_type, "Relation listing needs a database, skipping");
            return Ok(Vec::new());
        };
        return list_relations(client, resource_type, database, schema).await;
    }

    if matches!(resource_type, ResourceType::Schema | ResourceType::Database) {
        tracing::warn!(%resource_type, "Not listable as a resource, use list_schemas/list_databases");
        return Ok(Vec::new());
    }

    let rows = fetch_all(client, &Scope::global(), resource_type.list_statement()).await?;
    Ok(rows
        .iter()
        .filter_map(normalize_row)
        .map(|r| ResourceRecord::new(r.name, resource_type))
        .collect())
}

async fn list_relations(
    client: &dyn ControlPlane,
    resource_type: ResourceType,
    database: &str,
    schema: Option<&str>,
) -> Result<Vec<ResourceRecord>, QueryError> {
    let schemas = list_schemas(client, database).await?;
    tracing::debug!(database, count = schemas.len(), "Found schemas");

    let scope = Scope::new(Some(database), schema);
    let mut records = Vec::new();

    for schema_name in schemas {
        let sql = resource::list_relations_in_schema(database, &schema_name);
        let rows = match fetch_all(client, &scope, &sql).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(schema = %schema_name, error = %e, "Could not list relations in schema");
                continue;
            }
        };

        for row in rows.iter().filter_map(normalize_row) {
            let Some(kind) = row.kind else {
                continue;
            };
            if resource_type.includes_relation_kind(&kind) {
                records.push(
                    ResourceRecord::new(row.name, ResourceType::from_relation_kind(&kind))
                        .in_schema(schema_name.clone()),
                );
            }
        }
    }

    Ok(records)
}

/// Ids of the queries currently running in `scope`.
pub async fn list_query_ids(
    client: &dyn ControlPlane,
    scope: &Scope,
) -> Result<Vec<String>, QueryError> {
    let rows = fetch_all(client, scope, "LIST QUERIES;").await?;
    Ok(rows.iter().filter_map(query_id).collect())
}

pub async fn list_databases(client: &dyn ControlPlane) -> Result<Vec<String>, QueryError> {
    let rows = fetch_all(client, &Scope::global(), "LIST DATABASES;").await?;
    Ok(names(&rows))
}

/// Databases created by integration runs (`it_db*`).
pub async fn list_integration_databases(
    client: &dyn ControlPlane,
) -> Result<Vec<String>, QueryError> {
    Ok(list_databases(client)
        .await?
        .into_iter()
        .filter(|db| db.starts_with(INTEGRATION_DB_PREFIX))
        .collect())
}

pub async fn list_stores(client: &dyn ControlPlane) -> Result<Vec<String>, QueryError> {
    let rows = fetch_all(client, &Scope::global(), ResourceType::Store.list_statement()).await?;
    Ok(names(&rows))
}

pub async fn list_entities_in_store(
    client: &dyn ControlPlane,
    store: &str,
) -> Result<Vec<String>, QueryError> {
    let rows = fetch_all(client, &Scope::global(), &resource::list_entities_in_store(store)).await?;
    Ok(names(&rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::{InMemoryControlPlane, RowStyle};
    use serde_json::{json, Value};

    fn mapping(value: Value) -> Row {
        match value {
            Value::Object(map) => Row::Mapping(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn mapping_and_positional_rows_normalize_alike() {
        let from_map = normalize_row(&mapping(json!({"Name": "x", "Type": "STREAM"})));
        let from_seq = normalize_row(&Row::Sequence(vec![json!("x"), json!("STREAM")]));

        assert_eq!(from_map, from_seq);
        assert_eq!(
            from_map,
            Some(NormalizedRow {
                name: "x".into(),
                kind: Some("STREAM".into())
            })
        );
    }

    #[test]
    fn lowercase_keys_and_short_rows() {
        let row = normalize_row(&mapping(json!({"name": "y"}))).unwrap();
        assert_eq!(row.name, "y");
        assert_eq!(row.kind, None);

        let row = normalize_row(&Row::Sequence(vec![json!("z")])).unwrap();
        assert_eq!(row.kind, None);
    }

    #[test]
    fn rows_without_name_are_dropped() {
        assert_eq!(normalize_row(&mapping(json!({"Type": "STREAM"}))), None);
        assert_eq!(normalize_row(&Row::Sequence(vec![])), None);
        assert_eq!(normalize_row(&Row::Sequence(vec![json!("")])), None);
    }

    #[test]
    fn query_ids_from_either_shape() {
        assert_eq!(query_id(&mapping(json!({"Query_Id": 17}))).as_deref(), Some("17"));
        assert_eq!(query_id(&Row::Sequence(vec![json!("q1"), json!("running")])).as_deref(), Some("q1"));
    }

    fn seeded(style: RowStyle) -> InMemoryControlPlane {
        let backend = InMemoryControlPlane::with_row_style(style);
        backend.add_relation("db", "public", "s1", "STREAM", &[]);
        backend.add_relation("db", "public", "c1", "CHANGELOG", &[]);
        backend.add_relation("db", "analytics", "mv1", "MATERIALIZED_VIEW", &[]);
        backend
    }

    #[tokio::test]
    async fn relation_listing_includes_every_kind() {
        for style in [RowStyle::Positional, RowStyle::Mapping] {
            let backend = seeded(style);
            let mut records = list_resources(&backend, ResourceType::Relation, Some("db"), None)
                .await
                .unwrap();
            records.sort_by(|a, b| a.name.cmp(&b.name));

            assert_eq!(
                records,
                vec![
                    ResourceRecord::new("c1", ResourceType::Changelog).in_schema("public"),
                    ResourceRecord::new("mv1", ResourceType::Relation).in_schema("analytics"),
                    ResourceRecord::new("s1", ResourceType::Stream).in_schema("public"),
                ]
            );
        }
    }

    #[tokio::test]
    async fn stream_listing_matches_exact_kind() {
        let backend = seeded(RowStyle::Positional);
        let records = list_resources(&backend, ResourceType::Stream, Some("db"), None)
            .await
            .unwrap();

        assert_eq!(records, vec![ResourceRecord::new("s1", ResourceType::Stream).in_schema("public")]);
    }

    #[tokio::test]
    async fn missing_database_fails_relation_listing() {
        let backend = InMemoryControlPlane::new();
        let err = list_resources(&backend, ResourceType::Relation, Some("nope"), None)
            .await
            .unwrap_err();
        assert!(err.message.contains("does not exist"));
    }

    #[tokio::test]
    async fn failing_schema_is_skipped() {
        let backend = seeded(RowStyle::Positional);
        backend.fail_with(
            "LIST RELATIONS IN SCHEMA db.analytics",
            QueryError::new("internal error"),
            None,
        );

        let records = list_resources(&backend, ResourceType::Relation, Some("db"), None)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.schema.as_deref() == Some("public")));
    }

    #[tokio::test]
    async fn global_listing_ignores_database() {
        let backend = InMemoryControlPlane::with_row_style(RowStyle::Mapping);
        backend.add_global(ResourceType::Function, "udf_1");

        let records = list_resources(&backend, ResourceType::Function, Some("db"), Some("public"))
            .await
            .unwrap();
        assert_eq!(records, vec![ResourceRecord::new("udf_1", ResourceType::Function)]);
    }

    #[tokio::test]
    async fn integration_databases_by_prefix() {
        let backend = InMemoryControlPlane::new();
        backend.add_database("it_db_20250101");
        backend.add_database("prod");

        assert_eq!(
            list_integration_databases(&backend).await.unwrap(),
            vec!["it_db_20250101".to_string()]
        );
    }
}
