// Resource Naming & Fingerprinting
//
// Every ephemeral resource created during a test run carries a fingerprint
// in its name. Bulk cleanup later selects resources by that fingerprint.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix shared by every integration test database.
pub const INTEGRATION_DB_PREFIX: &str = "it_db";

/// Characters that must never reach an interpolated statement.
const FORBIDDEN_CHARS: [char; 7] = [';', '"', '\'', '\\', '\n', '\r', '\t'];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NameError {
    #[error("resource name must be a non-empty string")]
    Empty,

    #[error("invalid characters in resource name: {0:?}")]
    InvalidCharacters(String),
}

/// Validate a resource name before it is interpolated into a statement.
///
/// Returns the trimmed name.
pub fn validate_resource_name(name: &str) -> Result<String, NameError> {
    if name.trim().is_empty() {
        return Err(NameError::Empty);
    }

    if name.chars().any(|c| FORBIDDEN_CHARS.contains(&c)) {
        return Err(NameError::InvalidCharacters(name.to_string()));
    }

    Ok(name.trim().to_string())
}

/// Timestamp suffix in the form `YYYYMMDD_HHMMSS_mmm`.
pub fn generate_timestamp_suffix() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Eight hex characters, for one-off names inside a single test.
pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Substring embedded in resource names to scope bulk operations to one run.
///
/// Matching is a plain substring test. Two fingerprints must not be
/// substrings of each other, which the timestamp format makes unlikely.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh fingerprint for this moment, suffixed with the worker id if any.
    pub fn generate(worker_id: Option<&str>) -> Self {
        let stamp = generate_timestamp_suffix();
        match worker_id {
            Some(worker) if !worker.is_empty() => Self(format!("{stamp}_{worker}")),
            _ => Self(stamp),
        }
    }

    /// Recover the fingerprint of an `it_db_<fingerprint>` database.
    ///
    /// `None` when nothing is left after the prefix: an empty fingerprint
    /// would match every name.
    pub fn from_database_name(database: &str) -> Option<Self> {
        let prefix = format!("{INTEGRATION_DB_PREFIX}_");
        let value = database.replacen(&prefix, "", 1);
        (!value.trim().is_empty()).then_some(Self(value))
    }

    pub fn matches(&self, name: &str) -> bool {
        name.contains(self.0.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-session naming state.
///
/// Created once when a test session starts and handed by reference to
/// whatever needs to name or clean up resources.
#[derive(Debug, Clone)]
pub struct SessionContext {
    fingerprint: Fingerprint,
    worker_id: Option<String>,
    entity_prefix: String,
}

impl SessionContext {
    pub fn new(worker_id: Option<String>, entity_prefix: impl Into<String>) -> Self {
        Self {
            fingerprint: Fingerprint::generate(worker_id.as_deref()),
            worker_id,
            entity_prefix: entity_prefix.into(),
        }
    }

    /// Session with a caller-chosen fingerprint (replays, tests).
    pub fn with_fingerprint(fingerprint: Fingerprint, entity_prefix: impl Into<String>) -> Self {
        Self {
            fingerprint,
            worker_id: None,
            entity_prefix: entity_prefix.into(),
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn worker_id(&self) -> Option<&str> {
        self.worker_id.as_deref()
    }

    /// `it_db_<fingerprint>`
    pub fn database_name(&self) -> String {
        format!("{INTEGRATION_DB_PREFIX}_{}", self.fingerprint)
    }

    /// Entity name with the configured prefix applied.
    pub fn entity_name(&self, base: &str) -> String {
        format!("{}{base}", self.entity_prefix)
    }

    /// `<base>_<fingerprint>`
    pub fn resource_name(&self, base: &str) -> String {
        format!("{base}_{}", self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_trims_and_rejects() {
        assert_eq!(validate_resource_name("  orders ").unwrap(), "orders");
        assert_eq!(validate_resource_name("   "), Err(NameError::Empty));
        assert!(matches!(
            validate_resource_name("x; DROP DATABASE y"),
            Err(NameError::InvalidCharacters(_))
        ));
        assert!(validate_resource_name("a\"b").is_err());
    }

    #[test]
    fn timestamp_suffix_shape() {
        let suffix = generate_timestamp_suffix();
        // 20250101_120000_123
        assert_eq!(suffix.len(), 19);
        assert_eq!(suffix.matches('_').count(), 2);
    }

    #[test]
    fn worker_id_is_appended() {
        let fp = Fingerprint::generate(Some("gw3"));
        assert!(fp.as_str().ends_with("_gw3"));

        let fp = Fingerprint::generate(Some(""));
        assert!(!fp.as_str().ends_with('_'));
    }

    #[test]
    fn fingerprint_from_database_name() {
        let fp = Fingerprint::from_database_name("it_db_20250101_101010_001").unwrap();
        assert_eq!(fp.as_str(), "20250101_101010_001");
        assert!(fp.matches("orders_20250101_101010_001"));
        assert!(!fp.matches("orders_20250202_101010_001"));

        assert_eq!(Fingerprint::from_database_name("it_db_"), None);
        assert_eq!(Fingerprint::from_database_name("it_db_ "), None);
    }

    #[test]
    fn session_derives_names() {
        let session = SessionContext::with_fingerprint(Fingerprint::new("20250101"), "dbte2e_");

        assert_eq!(session.database_name(), "it_db_20250101");
        assert_eq!(session.entity_name("pageviews"), "dbte2e_pageviews");
        assert_eq!(session.resource_name("mv"), "mv_20250101");
        assert!(session.fingerprint().matches(&session.resource_name("mv")));
    }

    #[test]
    fn short_ids_differ() {
        assert_eq!(short_id().len(), 8);
        assert_ne!(short_id(), short_id());
    }
}
