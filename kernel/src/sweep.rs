// Sweep
//
// Removes everything integration runs leave behind: every `it_db*`
// database with its children, and the prefixed entities in the shared
// store.

use serde::Serialize;

use crate::client::{ControlPlane, QueryError};
use crate::lister;
use crate::naming::Fingerprint;
use crate::ops;
use crate::retry::RetryPolicy;
use crate::teardown::{clean_database_with_children, TeardownRequest, TeardownResult};

pub const DEFAULT_ENTITY_PREFIX: &str = "dbte2e_";

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("a store name is required to sweep entities")]
    MissingStore,

    #[error("could not list databases: {0}")]
    ListDatabases(#[source] QueryError),

    #[error("could not list entities in store {store}: {source}")]
    ListEntities {
        store: String,
        #[source]
        source: QueryError,
    },
}

#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub store: String,
    pub entity_prefix: String,
    /// Report what would be dropped without dropping it.
    pub dry_run: bool,
    pub policy: RetryPolicy,
}

impl SweepOptions {
    pub fn new(store: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            entity_prefix: DEFAULT_ENTITY_PREFIX.to_string(),
            dry_run: false,
            policy: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseSweep {
    pub database: String,
    pub fingerprint: String,
    pub result: TeardownResult,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub dry_run: bool,
    pub databases: Vec<DatabaseSweep>,
    /// Integration databases whose name carries no fingerprint.
    pub databases_skipped: Vec<String>,
    /// `store/entity` labels found with the configured prefix.
    pub entities_found: Vec<String>,
    pub entities_dropped: Vec<String>,
    pub entities_failed: Vec<String>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.entities_failed.is_empty() && self.databases.iter().all(|d| d.result.is_clean())
    }

    pub fn resources_dropped(&self) -> usize {
        self.databases.iter().map(|d| d.result.dropped.len()).sum::<usize>()
            + self.entities_dropped.len()
    }
}

/// Tear down integration databases, then drop prefixed entities.
pub async fn sweep(
    client: &dyn ControlPlane,
    options: &SweepOptions,
) -> Result<SweepReport, SweepError> {
    if options.store.trim().is_empty() {
        return Err(SweepError::MissingStore);
    }

    let mut report = SweepReport {
        dry_run: options.dry_run,
        ..SweepReport::default()
    };

    let databases = lister::list_integration_databases(client)
        .await
        .map_err(SweepError::ListDatabases)?;
    tracing::info!(count = databases.len(), "Found integration databases");

    for database in databases {
        let Some(fingerprint) = Fingerprint::from_database_name(&database) else {
            tracing::warn!(%database, "No fingerprint in database name, skipping");
            report.databases_skipped.push(database);
            continue;
        };
        let result = if options.dry_run {
            tracing::info!(%database, "Dry run, would tear down");
            TeardownResult::default()
        } else {
            let request = TeardownRequest::new(database.clone())
                .with_fingerprint(fingerprint.clone())
                .with_policy(options.policy.clone());
            clean_database_with_children(client, &request).await
        };
        report.databases.push(DatabaseSweep {
            database,
            fingerprint: fingerprint.to_string(),
            result,
        });
    }

    let store = options.store.as_str();
    let entities = lister::list_entities_in_store(client, store)
        .await
        .map_err(|source| SweepError::ListEntities {
            store: store.to_string(),
            source,
        })?;

    for entity in entities {
        if !entity.starts_with(&options.entity_prefix) {
            continue;
        }
        let label = format!("{store}/{entity}");
        report.entities_found.push(label.clone());
        if options.dry_run {
            tracing::info!(entity = %label, "Dry run, would drop");
            continue;
        }

        match ops::drop_entity(client, &entity, store, &options.policy).await {
            Ok(()) => {
                tracing::info!(entity = %label, "Dropped entity");
                report.entities_dropped.push(label);
            }
            Err(e) => {
                tracing::error!(entity = %label, error = %e, "Failed to drop entity");
                report.entities_failed.push(label);
            }
        }
    }

    tracing::info!(
        databases = report.databases.len(),
        entities_found = report.entities_found.len(),
        dropped = report.resources_dropped(),
        "Sweep complete"
    );
    Ok(report)
}
