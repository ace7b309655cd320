// HTTP Control Plane
//
// Submits statements to the backend's REST endpoint and exposes the
// returned result set as positional rows.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ControlPlane, QueryError, Row, RowStream, Scope};

/// SQL state reported for a successful statement.
const SUCCESS_STATE: &str = "00000";

/// Connection settings for [`HttpControlPlane`].
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub url: String,
    pub token: String,
    pub organization_id: String,
    pub timezone: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    organization: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    parameters: StatementParameters<'a>,
}

#[derive(Debug, Serialize)]
struct StatementParameters<'a> {
    timezone: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSet {
    #[serde(default)]
    sql_state: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Vec<Vec<Value>>>,
}

/// [`ControlPlane`] over the backend's statements API.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    http: reqwest::Client,
    settings: HttpSettings,
}

impl HttpControlPlane {
    pub fn new(settings: HttpSettings) -> Result<Self, QueryError> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| QueryError::new(format!("failed to build http client: {e}")))?;
        Ok(Self { http, settings })
    }

    fn statements_url(&self) -> String {
        format!("{}/statements", self.settings.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn query(&self, scope: &Scope, sql: &str) -> Result<RowStream, QueryError> {
        let request = StatementRequest {
            statement: sql,
            organization: &self.settings.organization_id,
            database: scope.database.as_deref(),
            schema: scope.schema.as_deref(),
            parameters: StatementParameters {
                timezone: &self.settings.timezone,
            },
        };

        tracing::debug!(statement = sql, database = ?scope.database, schema = ?scope.schema, "submitting statement");

        let response = self
            .http
            .post(self.statements_url())
            .bearer_auth(&self.settings.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| QueryError::new(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QueryError::new(format!("failed to read response: {e}")))?;

        let result = parse_result_set(&body).map_err(|e| {
            if status.is_success() {
                e
            } else {
                QueryError::new(format!("{status}: {body}"))
            }
        })?;

        if !status.is_success() {
            return Err(QueryError {
                message: result.message.unwrap_or_else(|| status.to_string()),
                sql_state: result.sql_state,
            });
        }

        rows_from_result_set(result)
    }
}

fn parse_result_set(body: &str) -> Result<ResultSet, QueryError> {
    serde_json::from_str(body).map_err(|e| QueryError::new(format!("malformed result set: {e}")))
}

fn rows_from_result_set(result: ResultSet) -> Result<RowStream, QueryError> {
    match result.sql_state.as_deref() {
        None | Some(SUCCESS_STATE) => {}
        Some(state) => {
            return Err(QueryError::with_state(
                result.message.unwrap_or_default(),
                state,
            ))
        }
    }

    let rows = result.data.unwrap_or_default().into_iter().map(|r| Ok(Row::Sequence(r)));
    Ok(stream::iter(rows.collect::<Vec<_>>()).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn success_result_set_becomes_positional_rows() {
        let body = r#"{
            "sqlState": "00000",
            "metadata": {"columns": [{"name": "Name"}, {"name": "Type"}]},
            "data": [["s1", "STREAM"], ["mv1", "MATERIALIZED_VIEW"]]
        }"#;

        let rows: Vec<Row> = rows_from_result_set(parse_result_set(body).unwrap())
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].column_text(1).as_deref(), Some("MATERIALIZED_VIEW"));
    }

    #[test]
    fn error_state_becomes_query_error() {
        let body = r#"{"sqlState": "2BP01", "message": "relation has running queries"}"#;
        let err = match rows_from_result_set(parse_result_set(body).unwrap()) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert_eq!(err.sql_state.as_deref(), Some("2BP01"));
        assert_eq!(err.message, "relation has running queries");
    }

    #[test]
    fn ddl_without_data_yields_no_rows() {
        let result = parse_result_set(r#"{"sqlState": "00000"}"#).unwrap();
        assert!(result.data.is_none());
        assert!(rows_from_result_set(result).is_ok());
    }

    #[test]
    fn request_omits_missing_context() {
        let request = StatementRequest {
            statement: "LIST STORES;",
            organization: "org",
            database: None,
            schema: None,
            parameters: StatementParameters { timezone: "UTC" },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("database").is_none());
        assert_eq!(json["parameters"]["timezone"], "UTC");
    }
}
