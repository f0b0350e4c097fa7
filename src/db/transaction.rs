/*!
 * Transaction helpers
 *
 * Item-scoped critical sections run inside a serializable transaction. Serialization
 * failures, deadlocks and SQLite busy errors are classified as `TransactionAbort` and
 * retried a bounded number of times before they surface as a `Conflict`.
 */

use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::counter;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, EntityTrait,
    IsolationLevel, QuerySelect, Select, TransactionTrait,
};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded retry policy for transient transaction aborts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

impl From<&AppConfig> for RetryPolicy {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            max_retries: cfg.transaction_max_retries,
            backoff: cfg.retry_backoff(),
        }
    }
}

/// Begins a transaction at `SERIALIZABLE` isolation.
///
/// SQLite rejects isolation settings and already serializes writers behind its
/// database lock, so it gets a plain transaction.
pub async fn begin_serializable(db: &DatabaseConnection) -> Result<DatabaseTransaction, ServiceError> {
    let isolation = match db.get_database_backend() {
        DbBackend::Sqlite => None,
        _ => Some(IsolationLevel::Serializable),
    };
    db.begin_with_config(isolation, None)
        .await
        .map_err(ServiceError::db_error)
}

/// Commits on success and rolls back on failure, returning the original result.
pub async fn commit_or_rollback<T>(
    txn: DatabaseTransaction,
    result: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    match result {
        Ok(value) => {
            txn.commit().await.map_err(ServiceError::db_error)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "Transaction rollback failed");
            }
            Err(err)
        }
    }
}

/// Adds `FOR UPDATE` to a select on backends with row locks.
pub fn for_update<E, C>(select: Select<E>, conn: &C) -> Select<E>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    match conn.get_database_backend() {
        DbBackend::Sqlite => select,
        _ => select.lock_exclusive(),
    }
}

/// Runs `f` until it succeeds, fails with a non-transient error, or the retry budget
/// is spent. Each attempt must open its own transaction.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut f: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Err(err) if err.is_transient() => {
                if attempt >= policy.max_retries {
                    counter!("barangay_db.transaction.retries_exhausted", 1, "operation" => operation);
                    warn!(operation, attempts = attempt + 1, error = %err, "Giving up after repeated transaction aborts");
                    return Err(ServiceError::Conflict(format!(
                        "{} aborted after {} attempts due to concurrent updates",
                        operation,
                        attempt + 1
                    )));
                }
                attempt += 1;
                counter!("barangay_db.transaction.retry", 1, "operation" => operation);
                debug!(operation, attempt, error = %err, "Retrying aborted transaction");
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "test_op", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ServiceError::TransactionAbort("busy".into()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_conflict() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(2), "test_op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::TransactionAbort("serialization failure".into()))
        })
        .await;

        assert!(matches!(result, Err(ServiceError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn genuine_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(5), "test_op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::ValidationError("quantity must be positive".into()))
        })
        .await;

        assert!(matches!(result, Err(ServiceError::ValidationError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
