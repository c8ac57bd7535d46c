// src/services/timers.rs

use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::AbortHandle;

/// Kinds of deferred work a session can have pending. At most one of each kind is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Closes the open question when its time limit runs out.
    QuestionDeadline,
    /// Opens the next question after the display pause.
    Advance,
    /// Force-closes an exam after its total time plus grace.
    ExamDeadline,
    /// Starts an exam at its scheduled instant.
    ScheduledStart,
}

/// Process-local timers keyed by session.
///
/// A timer task only sleeps; once the delay elapses it spawns the work as a
/// separate task. Cancelling therefore never interrupts work that already began.
#[derive(Default)]
pub struct TimerRegistry {
    timers: DashMap<(i64, TimerKind), AbortHandle>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `work` to run after `delay`, replacing any timer of the same kind for the session.
    pub fn arm<F>(&self, session_id: i64, kind: TimerKind, delay: Duration, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(work);
        })
        .abort_handle();

        if let Some(previous) = self.timers.insert((session_id, kind), handle) {
            previous.abort();
        }
        tracing::debug!(session_id, ?kind, delay_ms = delay.as_millis() as u64, "Timer armed");
    }

    /// Returns true if a still-sleeping timer was cancelled.
    pub fn cancel(&self, session_id: i64, kind: TimerKind) -> bool {
        match self.timers.remove(&(session_id, kind)) {
            Some((_, handle)) => {
                let pending = !handle.is_finished();
                handle.abort();
                if pending {
                    tracing::debug!(session_id, ?kind, "Timer cancelled");
                }
                pending
            }
            None => false,
        }
    }

    pub fn cancel_all(&self, session_id: i64) {
        for kind in [
            TimerKind::QuestionDeadline,
            TimerKind::Advance,
            TimerKind::ExamDeadline,
            TimerKind::ScheduledStart,
        ] {
            self.cancel(session_id, kind);
        }
    }

    pub fn is_armed(&self, session_id: i64, kind: TimerKind) -> bool {
        self.timers
            .get(&(session_id, kind))
            .is_some_and(|h| !h.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fires_after_delay() {
        let timers = TimerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        timers.arm(1, TimerKind::Advance, Duration::from_millis(10), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rearming_replaces_previous_timer() {
        let timers = TimerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let h = hits.clone();
            timers.arm(1, TimerKind::QuestionDeadline, Duration::from_millis(20), async move {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_all_stops_every_kind() {
        let timers = TimerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for kind in [TimerKind::QuestionDeadline, TimerKind::ExamDeadline] {
            let h = hits.clone();
            timers.arm(7, kind, Duration::from_millis(20), async move {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        let other = hits.clone();
        timers.arm(8, TimerKind::QuestionDeadline, Duration::from_millis(20), async move {
            other.fetch_add(10, Ordering::SeqCst);
        });

        assert!(timers.is_armed(7, TimerKind::ExamDeadline));
        timers.cancel_all(7);
        assert!(!timers.is_armed(7, TimerKind::ExamDeadline));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }
}
