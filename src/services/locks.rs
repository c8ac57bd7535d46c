// src/services/locks.rs

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::AppError;

/// Per-session exclusive token guarding question closure and advance.
///
/// The returned guard releases the token when dropped, including on error paths.
#[derive(Default)]
pub struct SessionLocks {
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

/// Holding this means no other closure/advance runs for the session.
pub struct SessionToken {
    session_id: i64,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for SessionToken {
    fn drop(&mut self) {
        tracing::trace!(session_id = self.session_id, "Session token released");
    }
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits at most `timeout` for the session's token.
    pub async fn acquire(&self, session_id: i64, timeout: Duration) -> Result<SessionToken, AppError> {
        let lock = self
            .locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(SessionToken {
                session_id,
                _guard: guard,
            }),
            Err(_) => Err(AppError::InvalidState(format!(
                "Session {} is busy, try again",
                session_id
            ))),
        }
    }

    /// Forgets a session's token once nothing holds it.
    pub fn release_session(&self, session_id: i64) {
        self.locks
            .remove_if(&session_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of sessions with a tracked token.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_is_exclusive_per_session() {
        let locks = SessionLocks::new();
        let held = locks.acquire(1, Duration::from_millis(50)).await.unwrap();

        let blocked = locks.acquire(1, Duration::from_millis(20)).await;
        assert!(matches!(blocked, Err(AppError::InvalidState(_))));

        // Other sessions are unaffected.
        assert!(locks.acquire(2, Duration::from_millis(20)).await.is_ok());

        drop(held);
        assert!(locks.acquire(1, Duration::from_millis(20)).await.is_ok());
    }

    #[tokio::test]
    async fn token_is_released_on_error_paths() {
        let locks = SessionLocks::new();

        async fn failing(locks: &SessionLocks) -> Result<(), AppError> {
            let _token = locks.acquire(3, Duration::from_millis(20)).await?;
            Err(AppError::InternalServerError("boom".to_string()))
        }

        assert!(failing(&locks).await.is_err());
        assert!(locks.acquire(3, Duration::from_millis(20)).await.is_ok());
        locks.release_session(3);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn held_tokens_are_not_forgotten() {
        let locks = SessionLocks::new();
        let held = locks.acquire(4, Duration::from_millis(20)).await.unwrap();

        locks.release_session(4);
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.release_session(4);
        assert!(locks.is_empty());
    }
}
