// Resource Operations
//
// Single-resource create/drop/terminate operations. Every remote mutation
// goes through the retry wrapper; a drop whose target is already gone and
// a create whose target already exists both count as success.

use std::time::Duration;

use crate::client::{execute, ControlPlane, Scope};
use crate::lister;
use crate::naming::validate_resource_name;
use crate::resource::{self, ResourceType};
use crate::retry::{classify_error, is_already_exists, ErrorClass, OpError, RetryError, RetryPolicy};

/// Passes made by [`terminate_all_queries`]; dropping one query can spawn another.
const TERMINATE_PASSES: usize = 3;
const TERMINATE_SETTLE: Duration = Duration::from_secs(3);
const TERMINATE_FINAL_SETTLE: Duration = Duration::from_secs(2);

/// Execute a drop statement with retry; a missing target is success.
async fn run_drop(
    client: &dyn ControlPlane,
    scope: &Scope,
    sql: &str,
    label: &str,
    operation: &str,
    policy: &RetryPolicy,
) -> Result<(), RetryError> {
    policy
        .run(operation, || async move {
            match execute(client, scope, sql).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    let err = OpError::Query(e);
                    if classify_error(&err) == ErrorClass::AlreadyGone {
                        tracing::info!(resource = label, "Does not exist, skipping");
                        Ok(())
                    } else {
                        Err(err)
                    }
                }
            }
        })
        .await
}

/// Execute a create statement with retry; an existing target is success.
async fn run_create(
    client: &dyn ControlPlane,
    sql: &str,
    label: &str,
    operation: &str,
    policy: &RetryPolicy,
) -> Result<(), RetryError> {
    let scope = Scope::global();
    let scope = &scope;
    policy
        .run(operation, || async move {
            match execute(client, scope, sql).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    let err = OpError::Query(e);
                    if is_already_exists(&err) {
                        tracing::info!(resource = label, "Already exists");
                        Ok(())
                    } else {
                        Err(err)
                    }
                }
            }
        })
        .await
}

/// Drop one resource with the statement appropriate to its type.
///
/// `target` is the fully-qualified name for relation-like types and the
/// bare name otherwise. Entities need a store; use [`drop_entity`].
pub async fn drop_resource(
    client: &dyn ControlPlane,
    resource_type: ResourceType,
    target: &str,
    scope: &Scope,
    policy: &RetryPolicy,
) -> Result<(), RetryError> {
    let target = validate_resource_name(target).map_err(OpError::from)?;
    if resource_type == ResourceType::Entity {
        return Err(OpError::InvalidInput(format!("entity {target} needs a store")).into());
    }

    let sql = resource_type.drop_statement(&target);
    let label = resource::outcome_label(resource_type, &target);
    let operation = format!("drop_{}", resource_type.as_str().to_lowercase());
    run_drop(client, scope, &sql, &label, &operation, policy).await
}

/// `DROP RELATION <fq_name>;` for any relation-like type.
pub async fn drop_relation(
    client: &dyn ControlPlane,
    fq_name: &str,
    relation_type: ResourceType,
    scope: &Scope,
    policy: &RetryPolicy,
) -> Result<(), RetryError> {
    let fq_name = validate_resource_name(fq_name).map_err(OpError::from)?;
    let sql = ResourceType::Relation.drop_statement(&fq_name);
    let label = resource::outcome_label(relation_type, &fq_name);
    run_drop(client, scope, &sql, &label, "drop_relation", policy).await
}

pub async fn drop_schema(
    client: &dyn ControlPlane,
    schema: &str,
    database: &str,
    policy: &RetryPolicy,
) -> Result<(), RetryError> {
    let schema = validate_resource_name(schema).map_err(OpError::from)?;
    let database = validate_resource_name(database).map_err(OpError::from)?;
    let scope = Scope::database(database).with_schema("public");
    let sql = ResourceType::Schema.drop_statement(&schema);
    let label = resource::outcome_label(ResourceType::Schema, &schema);
    run_drop(client, &scope, &sql, &label, "drop_schema", policy).await
}

pub async fn drop_database(
    client: &dyn ControlPlane,
    database: &str,
    policy: &RetryPolicy,
) -> Result<(), RetryError> {
    let database = validate_resource_name(database).map_err(OpError::from)?;
    let sql = ResourceType::Database.drop_statement(&database);
    let label = resource::outcome_label(ResourceType::Database, &database);
    run_drop(client, &Scope::global(), &sql, &label, "drop_database", policy).await
}

pub async fn drop_store(
    client: &dyn ControlPlane,
    store: &str,
    policy: &RetryPolicy,
) -> Result<(), RetryError> {
    drop_resource(client, ResourceType::Store, store, &Scope::global(), policy).await
}

/// `DROP ENTITY "<entity>" IN STORE "<store>";`
pub async fn drop_entity(
    client: &dyn ControlPlane,
    entity: &str,
    store: &str,
    policy: &RetryPolicy,
) -> Result<(), RetryError> {
    let entity = validate_resource_name(entity).map_err(OpError::from)?;
    let store = validate_resource_name(store).map_err(OpError::from)?;
    let sql = resource::drop_entity_statement(&entity, &store);
    let label = format!("{store}/{entity}");
    run_drop(client, &Scope::global(), &sql, &label, "drop_entity", policy).await
}

/// Kafka store registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    pub name: String,
    pub store_type: String,
    pub uris: String,
    pub sasl_hash_function: String,
    pub aws_region: String,
    pub iam_role_arn: String,
}

impl StoreSpec {
    /// MSK store authenticated through an IAM role.
    pub fn kafka_msk(
        name: impl Into<String>,
        uris: impl Into<String>,
        iam_role_arn: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            store_type: "KAFKA".into(),
            uris: uris.into(),
            sasl_hash_function: "AWS_MSK_IAM".into(),
            aws_region: "us-east-1".into(),
            iam_role_arn: iam_role_arn.into(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.aws_region = region.into();
        self
    }

    fn create_statement(&self, name: &str) -> String {
        format!(
            "CREATE STORE {name}\n\
             WITH (\n    \
                 'type' = {},\n    \
                 'uris' = '{}',\n    \
                 'kafka.sasl.hash_function' = {},\n    \
                 'kafka.msk.aws_region' = '{}',\n    \
                 'kafka.msk.iam_role_arn' = '{}'\n\
             );",
            self.store_type, self.uris, self.sasl_hash_function, self.aws_region, self.iam_role_arn
        )
    }
}

pub async fn create_store(
    client: &dyn ControlPlane,
    spec: &StoreSpec,
    policy: &RetryPolicy,
) -> Result<(), RetryError> {
    let name = validate_resource_name(&spec.name).map_err(OpError::from)?;
    if spec.uris.is_empty() {
        return Err(OpError::InvalidInput("store URIs must be provided".into()).into());
    }
    if spec.iam_role_arn.is_empty() {
        return Err(OpError::InvalidInput(
            "IAM role ARN must be provided for MSK IAM authentication".into(),
        )
        .into());
    }

    let sql = spec.create_statement(&name);
    let label = resource::outcome_label(ResourceType::Store, &name);
    run_create(client, &sql, &label, "create_store", policy).await
}

/// `CREATE ENTITY "<entity>" IN STORE "<store>";`
pub async fn create_entity(
    client: &dyn ControlPlane,
    entity: &str,
    store: &str,
    policy: &RetryPolicy,
) -> Result<(), RetryError> {
    let entity = validate_resource_name(entity).map_err(OpError::from)?;
    let store = validate_resource_name(store).map_err(OpError::from)?;
    let sql = format!("CREATE ENTITY \"{entity}\" IN STORE \"{store}\";");
    let label = format!("{store}/{entity}");
    run_create(client, &sql, &label, "create_entity", policy).await
}

/// Terminate every running query visible in `scope`.
///
/// Best effort: up to three passes with a settle delay between them, since
/// terminating one query can spawn another. Returns `false` when the
/// queries could not be listed; individual termination failures are only
/// logged.
pub async fn terminate_all_queries(client: &dyn ControlPlane, scope: &Scope) -> bool {
    tracing::info!(database = ?scope.database, "Terminating all running queries");

    for pass in 1..=TERMINATE_PASSES {
        let query_ids = match lister::list_query_ids(client, scope).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "Could not terminate queries");
                return false;
            }
        };

        if query_ids.is_empty() {
            tracing::info!(pass, "No running queries found");
            break;
        }

        let mut terminated = 0usize;
        for id in &query_ids {
            match execute(client, scope, &format!("TERMINATE QUERY {id};")).await {
                Ok(()) => {
                    terminated += 1;
                    tracing::debug!(query_id = %id, "Terminated query");
                }
                Err(e) => tracing::warn!(query_id = %id, error = %e, "Could not terminate query"),
            }
        }
        tracing::info!(pass, terminated, found = query_ids.len(), "Terminated queries");

        if pass < TERMINATE_PASSES {
            tokio::time::sleep(TERMINATE_SETTLE).await;
        }
    }

    tokio::time::sleep(TERMINATE_FINAL_SETTLE).await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::InMemoryControlPlane;
    use crate::client::QueryError;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn missing_relation_is_success() {
        let backend = InMemoryControlPlane::new();
        drop_relation(
            &backend,
            "db.public.gone",
            ResourceType::Relation,
            &Scope::database("db"),
            &policy(),
        )
        .await
        .unwrap();
        assert_eq!(backend.statements(), vec!["DROP RELATION db.public.gone;"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pinned_relation_drops_once_query_ends() {
        let backend = InMemoryControlPlane::new();
        backend.add_relation("db", "public", "mv", "MATERIALIZED_VIEW", &[]);
        backend.start_query("db", &["db.public.mv"]);

        let err = drop_relation(
            &backend,
            "db.public.mv",
            ResourceType::Relation,
            &Scope::database("db"),
            &policy(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RetryError::Timeout { .. }));

        assert!(terminate_all_queries(&backend, &Scope::database("db")).await);
        drop_relation(
            &backend,
            "db.public.mv",
            ResourceType::Relation,
            &Scope::database("db"),
            &policy(),
        )
        .await
        .unwrap();
        assert!(backend.relations("db").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let backend = InMemoryControlPlane::new();
        backend.fail_with("DROP DATABASE", QueryError::new("permission denied"), None);

        let err = drop_database(&backend, "db", &policy()).await.unwrap_err();
        assert!(matches!(err, RetryError::Failed(OpError::Query(_))));
        assert_eq!(backend.statements().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_names_never_reach_the_backend() {
        let backend = InMemoryControlPlane::new();
        let err = drop_schema(&backend, "s; DROP DATABASE x", "db", &policy())
            .await
            .unwrap_err();
        assert!(matches!(err, RetryError::Failed(OpError::InvalidName(_))));
        assert!(backend.statements().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn entity_drop_treats_missing_partition_as_gone() {
        let backend = InMemoryControlPlane::new();
        backend.add_entity("msk", "dbte2e_users");

        drop_entity(&backend, "dbte2e_users", "msk", &policy()).await.unwrap();
        drop_entity(&backend, "dbte2e_users", "msk", &policy()).await.unwrap();
        assert!(backend.entities("msk").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn create_store_is_idempotent_and_validated() {
        let backend = InMemoryControlPlane::new();
        let spec = StoreSpec::kafka_msk("msk", "b-1.kafka:9098", "arn:aws:iam::1:role/x");

        create_store(&backend, &spec, &policy()).await.unwrap();
        create_store(&backend, &spec, &policy()).await.unwrap();
        assert!(backend.statements()[0].starts_with("CREATE STORE msk\nWITH ("));
        assert!(backend.statements()[0].contains("'kafka.msk.aws_region' = 'us-east-1'"));

        let missing_uris = StoreSpec::kafka_msk("other", "", "arn");
        let err = create_store(&backend, &missing_uris, &policy()).await.unwrap_err();
        assert!(matches!(err, RetryError::Failed(OpError::InvalidInput(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn create_entity_then_drop_store() {
        let backend = InMemoryControlPlane::new();
        backend.add_store("msk");

        create_entity(&backend, "dbte2e_pageviews", "msk", &policy()).await.unwrap();
        create_entity(&backend, "dbte2e_pageviews", "msk", &policy()).await.unwrap();
        assert_eq!(backend.entities("msk"), vec!["dbte2e_pageviews".to_string()]);

        drop_store(&backend, "msk", &policy()).await.unwrap();
        drop_store(&backend, "msk", &policy()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_reports_listing_failure() {
        let backend = InMemoryControlPlane::new();
        backend.fail_with("LIST QUERIES", QueryError::new("unauthorized"), None);
        assert!(!terminate_all_queries(&backend, &Scope::global()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_clears_queries_in_scope_only() {
        let backend = InMemoryControlPlane::new();
        backend.start_query("db", &[]);
        backend.start_query("db", &[]);
        backend.start_query("other", &[]);

        assert!(terminate_all_queries(&backend, &Scope::database("db")).await);
        assert_eq!(backend.running_queries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_resource_uses_type_statement() {
        let backend = InMemoryControlPlane::new();
        backend.add_global(ResourceType::FunctionSource, "fs_1");

        drop_resource(&backend, ResourceType::FunctionSource, "fs_1", &Scope::global(), &policy())
            .await
            .unwrap();
        assert_eq!(backend.statements(), vec!["DROP FUNCTION_SOURCE fs_1;"]);
        assert!(backend.globals(ResourceType::FunctionSource).is_empty());
    }
}
