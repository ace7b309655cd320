// Teardown Engine
//
// Removes every resource a database (or one test run) owns, in dependency
// order, waiting out the backend's transient refusals. Per-resource
// failures are data in the result, never errors.

mod fingerprint;

pub use fingerprint::cleanup_resources_by_fingerprint;

use serde::Serialize;

use crate::client::{ControlPlane, Scope};
use crate::lister;
use crate::naming::Fingerprint;
use crate::ops;
use crate::resource::{self, is_protected_schema, ResourceRecord, ResourceType, DEPENDENCY_ORDER};
use crate::retry::{RetryError, RetryPolicy};

/// Outcome of a teardown. Labels are `TYPE:target`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownResult {
    pub dropped: Vec<String>,
    pub failed: Vec<String>,
    pub errors: Vec<String>,
}

impl TeardownResult {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.dropped.is_empty() && self.failed.is_empty() && self.errors.is_empty()
    }

    /// Record one drop attempt. Returns whether the target is gone.
    ///
    /// A target may be attempted again by a later pass; its latest outcome
    /// replaces the earlier failure.
    pub(crate) fn record(&mut self, label: String, outcome: Result<(), RetryError>) -> bool {
        let prefix = format!("failed to drop {label}: ");
        let earlier = self.failed.iter().position(|l| *l == label);

        match outcome {
            Ok(()) => {
                tracing::info!(resource = %label, "Dropped");
                if let Some(index) = earlier {
                    self.failed.remove(index);
                    self.errors.retain(|e| !e.starts_with(&prefix));
                }
                self.dropped.push(label);
                true
            }
            Err(e) => {
                tracing::error!(resource = %label, error = %e, "Failed to drop");
                let message = format!("{prefix}{e}");
                match earlier {
                    Some(_) => {
                        if let Some(existing) = self.errors.iter_mut().find(|m| m.starts_with(&prefix)) {
                            *existing = message;
                        }
                    }
                    None => {
                        self.errors.push(message);
                        self.failed.push(label);
                    }
                }
                false
            }
        }
    }
}

/// What [`clean_database_with_children`] should remove.
#[derive(Debug, Clone)]
pub struct TeardownRequest {
    pub database: String,
    /// Statement context, and the schema used to qualify relations whose
    /// listing row carries none.
    pub schema: Option<String>,
    /// Only resources whose name contains this are dropped.
    pub fingerprint: Option<Fingerprint>,
    pub drop_schemas: bool,
    pub drop_database: bool,
    pub policy: RetryPolicy,
}

impl TeardownRequest {
    /// Full teardown: every resource, every schema, then the database.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            schema: None,
            fingerprint: None,
            drop_schemas: true,
            drop_database: true,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Drop matching resources only; leave schemas and the database.
    pub fn resources_only(mut self) -> Self {
        self.drop_schemas = false;
        self.drop_database = false;
        self
    }
}

/// Drop scope for a record: none for global types, the database and
/// request schema otherwise.
pub(crate) fn drop_scope(resource_type: ResourceType, database: &str, schema: Option<&str>) -> Scope {
    if resource_type.is_global() {
        Scope::global()
    } else {
        Scope::new(Some(database), schema)
    }
}

/// Records taken by the `pass_type` pass, in the order they should be dropped.
///
/// The RELATION pass takes every relation-like record (materialized views,
/// streams, changelogs, ...) so a relation and everything reading from it go
/// in one pass. The STREAM and CHANGELOG passes only see what is left over.
/// Relations are listed in creation order, which puts downstream relations
/// last; they are dropped in reverse.
pub(crate) fn pass_records(pass_type: ResourceType, records: Vec<ResourceRecord>) -> Vec<ResourceRecord> {
    let mut records: Vec<_> = records
        .into_iter()
        .filter(|r| match pass_type {
            ResourceType::Relation => r.resource_type.is_relation_like(),
            other => r.resource_type == other,
        })
        .collect();
    if pass_type.is_relation_like() {
        records.reverse();
    }
    records
}

/// Drop one record and record the outcome. Returns whether it is gone.
pub(crate) async fn drop_record(
    client: &dyn ControlPlane,
    record: &ResourceRecord,
    database: &str,
    schema: Option<&str>,
    policy: &RetryPolicy,
    result: &mut TeardownResult,
) -> bool {
    let target = record.drop_target(database, schema);
    let scope = drop_scope(record.resource_type, database, schema);
    let label = resource::outcome_label(record.resource_type, &target);

    let outcome = ops::drop_resource(client, record.resource_type, &target, &scope, policy).await;
    result.record(label, outcome)
}

/// Tear down `request.database` and its children.
///
/// A database that cannot be listed is treated as already gone and yields
/// an empty result, so repeated teardowns are no-ops.
pub async fn clean_database_with_children(
    client: &dyn ControlPlane,
    request: &TeardownRequest,
) -> TeardownResult {
    let database = request.database.as_str();
    let schema = request.schema.as_deref();
    let fingerprint = request.fingerprint.as_ref();
    let mut result = TeardownResult::default();

    tracing::info!(
        database,
        schema = ?schema,
        fingerprint = ?fingerprint.map(Fingerprint::as_str),
        drop_schemas = request.drop_schemas,
        drop_database = request.drop_database,
        "Starting teardown"
    );

    if let Err(e) = lister::list_schemas(client, database).await {
        tracing::info!(database, error = %e, "Database does not exist, skipping teardown");
        return result;
    }

    let scope = Scope::new(Some(database), schema);
    ops::terminate_all_queries(client, &scope).await;

    for resource_type in DEPENDENCY_ORDER {
        tracing::info!(%resource_type, "Processing resources");
        ops::terminate_all_queries(client, &scope).await;

        let records = match lister::list_resources(client, resource_type, Some(database), schema).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(%resource_type, error = %e, "Could not list resources");
                continue;
            }
        };

        for record in pass_records(resource_type, records) {
            if let Some(fp) = fingerprint {
                if !fp.matches(&record.name) {
                    tracing::debug!(name = %record.name, "No fingerprint match, skipping");
                    continue;
                }
            }
            drop_record(client, &record, database, schema, &request.policy, &mut result).await;
        }
    }

    if request.drop_schemas {
        match lister::list_schemas(client, database).await {
            Ok(schemas) => {
                for schema_name in schemas {
                    if is_protected_schema(&schema_name) {
                        tracing::debug!(schema = %schema_name, "Skipping system schema");
                        continue;
                    }
                    let outcome =
                        ops::drop_schema(client, &schema_name, database, &request.policy).await;
                    result.record(resource::outcome_label(ResourceType::Schema, &schema_name), outcome);
                }
            }
            Err(e) => tracing::warn!(database, error = %e, "Could not drop schemas"),
        }
    }

    if request.drop_database {
        let outcome = ops::drop_database(client, database, &request.policy).await;
        result.record(resource::outcome_label(ResourceType::Database, database), outcome);
    }

    tracing::info!(
        database,
        fingerprint = ?fingerprint.map(Fingerprint::as_str),
        dropped = result.dropped.len(),
        failed = result.failed.len(),
        errors = result.errors.len(),
        "Teardown summary"
    );
    result
}
