//! In-process mutual exclusion and rate limiting keyed by user.
//!
//! Both are owned service objects injected where needed; nothing here is persisted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The maps stay consistent even if a holder panicked mid-operation.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-user lock serializing attendance operations.
///
/// `try_acquire` never waits: a second caller for the same user is told the
/// operation is already in progress.
#[derive(Debug, Clone, Default)]
pub struct UserLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, user_id: &str) -> Option<UserLockGuard> {
        let mut held = lock(&self.held);
        if !held.insert(user_id.to_string()) {
            return None;
        }

        Some(UserLockGuard {
            held: Arc::clone(&self.held),
            user_id: user_id.to_string(),
        })
    }

    /// Polls until the lock is free or `timeout` elapses. Used by scheduled jobs,
    /// which should not lose to a member's in-flight request.
    pub async fn acquire_within(&self, user_id: &str, timeout: Duration) -> Option<UserLockGuard> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_acquire(user_id) {
                return Some(guard);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[cfg(test)]
    pub fn is_held(&self, user_id: &str) -> bool {
        lock(&self.held).contains(user_id)
    }
}

/// Releases the user's lock when dropped, on every exit path.
#[derive(Debug)]
pub struct UserLockGuard {
    held: Arc<Mutex<HashSet<String>>>,
    user_id: String,
}

impl Drop for UserLockGuard {
    fn drop(&mut self) {
        lock(&self.held).remove(&self.user_id);
    }
}

/// Sliding-window limiter for repeated UI triggers.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut hits = lock(&self.hits);
        let entry = hits.entry(key.to_string()).or_default();
        entry.retain(|hit| now.saturating_duration_since(*hit) < self.window);

        if entry.len() >= self.limit {
            return false;
        }

        entry.push(now);
        true
    }

    /// Drops expired entries; returns how many keys were removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    fn cleanup_at(&self, now: Instant) -> usize {
        let mut hits = lock(&self.hits);
        let before = hits.len();
        hits.retain(|_, entry| {
            entry.retain(|hit| now.saturating_duration_since(*hit) < self.window);
            !entry.is_empty()
        });
        before - hits.len()
    }

    pub fn tracked_keys(&self) -> usize {
        lock(&self.hits).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_for_same_user_fails_until_release() {
        let locks = UserLocks::new();
        let guard = locks.try_acquire("u1").unwrap();
        assert!(locks.try_acquire("u1").is_none());
        assert!(locks.is_held("u1"));

        drop(guard);
        assert!(!locks.is_held("u1"));
        assert!(locks.try_acquire("u1").is_some());
    }

    #[test]
    fn different_users_do_not_contend() {
        let locks = UserLocks::new();
        let _a = locks.try_acquire("u1").unwrap();
        assert!(locks.try_acquire("u2").is_some());
    }

    #[test]
    fn clones_share_the_same_lock_table() {
        let locks = UserLocks::new();
        let shared = locks.clone();
        let _guard = locks.try_acquire("u1").unwrap();
        assert!(shared.try_acquire("u1").is_none());
    }

    #[tokio::test]
    async fn acquire_within_waits_for_release() {
        let locks = UserLocks::new();
        let guard = locks.try_acquire("u1").unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire_within("u1", Duration::from_secs(5)).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn acquire_within_gives_up_after_timeout() {
        let locks = UserLocks::new();
        let _guard = locks.try_acquire("u1").unwrap();
        assert!(locks.acquire_within("u1", Duration::from_millis(60)).await.is_none());
    }

    #[test]
    fn rate_limiter_blocks_after_limit_within_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at("u1:check_in", start));
        assert!(limiter.check_at("u1:check_in", start));
        assert!(!limiter.check_at("u1:check_in", start + Duration::from_secs(1)));
        assert!(limiter.check_at("u2:check_in", start));
        assert!(limiter.check_at("u1:check_in", start + Duration::from_secs(61)));
    }

    #[test]
    fn cleanup_drops_expired_keys() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();
        limiter.check_at("u1", start);
        limiter.check_at("u2", start + Duration::from_secs(30));

        assert_eq!(limiter.cleanup_at(start + Duration::from_secs(61)), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
