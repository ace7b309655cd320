// Control-Plane Client
//
// Contract for issuing administrative statements against the backend.
// Results arrive as an asynchronous sequence of rows whose shape depends
// on the endpoint: key-value mappings or positional sequences.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde_json::{Map, Value};

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Mapping(Map<String, Value>),
    Sequence(Vec<Value>),
}

impl Row {
    /// First non-empty value among `keys` (mapping rows only).
    pub fn get_text(&self, keys: &[&str]) -> Option<String> {
        match self {
            Row::Mapping(map) => keys
                .iter()
                .filter_map(|k| map.get(*k))
                .find_map(value_text),
            Row::Sequence(_) => None,
        }
    }

    /// Value at `index` rendered as text (sequence rows only).
    pub fn column_text(&self, index: usize) -> Option<String> {
        match self {
            Row::Sequence(values) => values.get(index).and_then(value_text),
            Row::Mapping(_) => None,
        }
    }
}

/// Render a scalar cell as text. Null and empty strings yield `None`.
pub(crate) fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Failure reported by the backend for one statement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}{}", state_suffix(.sql_state))]
pub struct QueryError {
    pub message: String,
    pub sql_state: Option<String>,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
        }
    }

    pub fn with_state(message: impl Into<String>, sql_state: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: Some(sql_state.into()),
        }
    }
}

fn state_suffix(sql_state: &Option<String>) -> String {
    sql_state
        .as_deref()
        .map(|state| format!(" (sqlstate {state})"))
        .unwrap_or_default()
}

/// Database/schema context a statement runs in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub database: Option<String>,
    pub schema: Option<String>,
}

impl Scope {
    /// No database or schema context.
    pub fn global() -> Self {
        Self::default()
    }

    pub fn database(database: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
            schema: None,
        }
    }

    pub fn new(database: Option<&str>, schema: Option<&str>) -> Self {
        Self {
            database: database.map(str::to_string),
            schema: schema.map(str::to_string),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

pub type RowStream = BoxStream<'static, Result<Row, QueryError>>;

/// Remote control plane.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn ControlPlane>`.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Execute one statement. DDL statements yield zero rows.
    async fn query(&self, scope: &Scope, sql: &str) -> Result<RowStream, QueryError>;
}

/// Run a statement and drain its rows so the command completes.
pub async fn execute(
    client: &dyn ControlPlane,
    scope: &Scope,
    sql: &str,
) -> Result<(), QueryError> {
    let mut rows = client.query(scope, sql).await?;
    while let Some(row) = rows.next().await {
        row?;
    }
    Ok(())
}

/// Run a statement and collect every row.
pub async fn fetch_all(
    client: &dyn ControlPlane,
    scope: &Scope,
    sql: &str,
) -> Result<Vec<Row>, QueryError> {
    client.query(scope, sql).await?.try_collect().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(value: Value) -> Row {
        match value {
            Value::Object(map) => Row::Mapping(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn mapping_lookup_tries_keys_in_order() {
        let row = mapping(json!({"name": "orders", "Id": 42}));
        assert_eq!(row.get_text(&["Name", "name"]).as_deref(), Some("orders"));
        assert_eq!(row.get_text(&["id", "Id"]).as_deref(), Some("42"));
        assert_eq!(row.get_text(&["Type"]), None);
        assert_eq!(row.column_text(0), None);
    }

    #[test]
    fn empty_and_null_cells_are_absent() {
        let row = Row::Sequence(vec![json!(""), Value::Null, json!(true)]);
        assert_eq!(row.column_text(0), None);
        assert_eq!(row.column_text(1), None);
        assert_eq!(row.column_text(2).as_deref(), Some("true"));
        assert_eq!(row.column_text(3), None);
    }

    #[test]
    fn query_error_display_includes_state() {
        let err = QueryError::with_state("dependent objects exist", "2BP01");
        assert_eq!(err.to_string(), "dependent objects exist (sqlstate 2BP01)");
        assert_eq!(QueryError::new("boom").to_string(), "boom");
    }

    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn ControlPlane) {}
    }
}
