// Retry Wrapper
//
// Re-invokes operations against the eventually-consistent control plane
// while the backend reports a transient condition, up to a wall-clock
// deadline.
//
// Classification is string-based: the backend surfaces "busy" states only
// through message text and one state code. All of that matching lives in
// `classify_error`.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::client::QueryError;
use crate::naming::NameError;

pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Message fragments that mark a failure as transient.
const TRANSIENT_KEYWORDS: [&str; 6] = [
    "running queries",
    "referenced relations",
    "2bp01",
    "retry",
    "running",
    "referenced",
];

/// Message fragments that mean the target is already gone.
const ALREADY_GONE_KEYWORDS: [&str; 3] = [
    "does not exist",
    "not found",
    "this server does not host this topic-partition",
];

/// Error from a single resource operation.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    /// The remote operation failed.
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    InvalidName(#[from] NameError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Discriminant of [`OpError`], used to configure which errors may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpErrorKind {
    Query,
    InvalidName,
    InvalidInput,
}

impl OpError {
    pub fn kind(&self) -> OpErrorKind {
        match self {
            Self::Query(_) => OpErrorKind::Query,
            Self::InvalidName(_) => OpErrorKind::InvalidName,
            Self::InvalidInput(_) => OpErrorKind::InvalidInput,
        }
    }
}

/// How a failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Busy or not ready yet; worth another attempt.
    Retryable,
    /// Anything else.
    Permanent,
    /// The target no longer exists; cleanup treats this as success.
    AlreadyGone,
}

/// Classify a failure by its message and state code.
pub fn classify_error(err: &OpError) -> ErrorClass {
    let message = err.to_string().to_lowercase();

    if ALREADY_GONE_KEYWORDS.iter().any(|k| message.contains(k)) {
        ErrorClass::AlreadyGone
    } else if TRANSIENT_KEYWORDS.iter().any(|k| message.contains(k)) {
        ErrorClass::Retryable
    } else {
        ErrorClass::Permanent
    }
}

/// Whether a create failed only because its target is already present.
pub fn is_already_exists(err: &OpError) -> bool {
    err.to_string().to_lowercase().contains("already exists")
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("operation {operation} timed out after {}s. Last error: {last_error}", .max_wait.as_secs())]
    Timeout {
        operation: String,
        max_wait: Duration,
        last_error: String,
    },

    #[error(transparent)]
    Failed(#[from] OpError),
}

/// Retry policy for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_wait: Duration,
    pub interval: Duration,
    /// Error kinds eligible for retry. A matching kind must still classify
    /// as retryable.
    pub retry_on: Vec<OpErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_wait: DEFAULT_MAX_WAIT,
            interval: DEFAULT_RETRY_INTERVAL,
            retry_on: vec![OpErrorKind::Query],
        }
    }
}

impl RetryPolicy {
    pub fn new(max_wait: Duration, interval: Duration) -> Self {
        Self {
            max_wait,
            interval,
            ..Self::default()
        }
    }

    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = OpErrorKind>) -> Self {
        self.retry_on = kinds.into_iter().collect();
        self
    }

    /// Run `op` until it succeeds, fails permanently, or the deadline passes.
    ///
    /// An error is retried only when its kind is in `retry_on` and
    /// [`classify_error`] calls it retryable.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OpError>>,
    {
        let start = Instant::now();
        let mut last_error = String::new();

        while start.elapsed() < self.max_wait {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.retry_on.contains(&err.kind()) || classify_error(&err) != ErrorClass::Retryable {
                return Err(RetryError::Failed(err));
            }

            let message = err.to_string().to_lowercase();
            let remaining = self.max_wait.saturating_sub(start.elapsed());
            tracing::warn!(
                operation,
                retry_in_secs = self.interval.as_secs_f64(),
                remaining_secs = remaining.as_secs(),
                error = %message,
                "Operation failed, retrying"
            );
            last_error = message;
            tokio::time::sleep(self.interval).await;
        }

        Err(RetryError::Timeout {
            operation: operation.to_string(),
            max_wait: self.max_wait,
            last_error,
        })
    }
}
