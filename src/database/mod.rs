pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqliteConnectOptions};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

/// Capped exponential backoff for the connection path.
///
/// Attendance writes never go through this; a retried write could book a session twice.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
        }
    }

    /// Delay before retry number `attempt` (0-based): 1s, 2s, 4s, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    pub async fn run<T, E, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 >= self.max_attempts => {
                    tracing::error!(
                        "{} failed after {} attempts: {}",
                        operation_name,
                        self.max_attempts,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation_name,
                        attempt + 1,
                        self.max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

pub async fn create_connection(database_url: &str, policy: RetryPolicy) -> Result<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = policy
        .run("database connect", || {
            SqlitePool::connect_with(connect_options.clone())
        })
        .await?;

    // Run migrations
    migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Verifies the pool can still reach the database, retrying with the shared policy.
pub async fn health_check(pool: &SqlitePool, policy: RetryPolicy) -> Result<(), sqlx::Error> {
    policy
        .run("database health check", || async move {
            sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
        })
        .await
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    migrations::run_migrations(&pool).await.expect("migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_from_one_second() {
        let policy = RetryPolicy::new(5);
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn run_stops_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = policy
            .run("always failing", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_returns_first_success() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = policy
            .run("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("not yet".to_string()) } else { Ok(n) } }
            })
            .await;

        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn health_check_succeeds_on_open_pool() {
        let pool = test_pool().await;
        assert!(health_check(&pool, RetryPolicy::new(1)).await.is_ok());
    }
}
