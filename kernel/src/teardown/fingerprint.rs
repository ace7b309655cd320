// Fingerprint-scoped cleanup: drops only what one test run created,
// leaving schemas and the database in place.

use std::collections::HashSet;

use crate::client::{ControlPlane, Scope};
use crate::lister;
use crate::naming::Fingerprint;
use crate::ops;
use crate::resource::{ResourceRecord, DEPENDENCY_ORDER};
use crate::retry::RetryPolicy;

use super::{drop_record, pass_records, TeardownResult};

/// Drop every resource whose name contains `fingerprint`.
///
/// Resources come from `resource_list` when given, otherwise they are
/// discovered type by type; a type that fails to list is skipped. Unlike
/// [`super::clean_database_with_children`] there is no existence check
/// and schemas and the database are never dropped.
pub async fn cleanup_resources_by_fingerprint(
    client: &dyn ControlPlane,
    fingerprint: &Fingerprint,
    database: &str,
    schema: &str,
    resource_list: Option<Vec<ResourceRecord>>,
    policy: &RetryPolicy,
) -> TeardownResult {
    let mut result = TeardownResult::default();

    tracing::info!(%fingerprint, database, schema, "Cleaning up resources by fingerprint");

    ops::terminate_all_queries(client, &Scope::new(Some(database), Some(schema))).await;

    let candidates = match resource_list {
        Some(list) => matching(fingerprint, list),
        None => discover(client, fingerprint, database, schema).await,
    };

    let mut gone = HashSet::new();
    for resource_type in DEPENDENCY_ORDER {
        let records = pass_records(resource_type, candidates.clone());
        if records.is_empty() {
            continue;
        }
        tracing::info!(%resource_type, count = records.len(), "Dropping resources");

        for record in records {
            if !fingerprint.matches(&record.name) {
                continue;
            }
            let key = (record.resource_type, record.drop_target(database, Some(schema)));
            if gone.contains(&key) {
                continue;
            }
            if drop_record(client, &record, database, Some(schema), policy, &mut result).await {
                gone.insert(key);
            }
        }
    }

    tracing::info!(
        %fingerprint,
        dropped = result.dropped.len(),
        failed = result.failed.len(),
        "Fingerprint cleanup summary"
    );
    result
}

/// Records whose name carries the fingerprint, in their original order,
/// each drop target once.
fn matching(fingerprint: &Fingerprint, records: Vec<ResourceRecord>) -> Vec<ResourceRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| !r.name.is_empty() && fingerprint.matches(&r.name))
        .filter(|r| {
            // Relation listings repeat streams and changelogs under every
            // relation-like type.
            let kind = (!r.resource_type.is_relation_like()).then_some(r.resource_type);
            seen.insert((kind, r.schema.clone(), r.name.clone()))
        })
        .collect()
}

async fn discover(
    client: &dyn ControlPlane,
    fingerprint: &Fingerprint,
    database: &str,
    schema: &str,
) -> Vec<ResourceRecord> {
    let mut found = Vec::new();
    for resource_type in DEPENDENCY_ORDER {
        match lister::list_resources(client, resource_type, Some(database), Some(schema)).await {
            Ok(records) => found.extend(records),
            Err(e) => tracing::warn!(%resource_type, error = %e, "Could not discover resources"),
        }
    }
    matching(fingerprint, found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceType;

    #[test]
    fn matching_keeps_order_and_drops_repeats() {
        let fp = Fingerprint::new("20250101");
        let kept = matching(
            &fp,
            vec![
                ResourceRecord::new("s_20250101", ResourceType::Stream).in_schema("public"),
                ResourceRecord::new("mv_20250101", ResourceType::Relation).in_schema("public"),
                ResourceRecord::new("bar_20250102", ResourceType::Relation),
                ResourceRecord::new("", ResourceType::Function),
                ResourceRecord::new("s_20250101", ResourceType::Stream).in_schema("public"),
            ],
        );

        let names: Vec<_> = kept.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["s_20250101", "mv_20250101"]);
    }
}
