use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Identity of a scheduled lifecycle timer. At most one timer per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Approval(Uuid),
    SessionExpiry(Uuid),
}

struct Scheduled {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Keyed one-shot timers on the tokio runtime.
///
/// Timers are a fallback enforcer only: the callbacks they run must re-check
/// state before acting, so a missed cancellation or a lost timer (restart,
/// another instance) is harmless.
#[derive(Clone, Default)]
pub struct TimerService {
    tasks: Arc<Mutex<HashMap<TimerKey, Scheduled>>>,
    generation: Arc<AtomicU64>,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` after `delay`, replacing any timer already armed for `key`.
    pub fn schedule<F>(&self, key: TimerKey, delay: Duration, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);

        // Hold the lock across spawn so a zero delay cannot deregister before insert
        let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Deregister before running so the callback can re-arm the same key
            {
                let mut tasks = tasks.lock().unwrap_or_else(|e| e.into_inner());
                if tasks.get(&key).map(|s| s.generation) == Some(generation) {
                    tasks.remove(&key);
                }
            }

            callback.await;
        });

        if let Some(previous) = guard.insert(key, Scheduled { generation, handle }) {
            previous.handle.abort();
        }
        tracing::debug!("Armed timer {:?} for {:?}", key, delay);
    }

    /// Abort the timer for `key`. Returns whether one was armed.
    pub fn cancel(&self, key: TimerKey) -> bool {
        let removed = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
        match removed {
            Some(scheduled) => {
                scheduled.handle.abort();
                tracing::debug!("Cancelled timer {:?}", key);
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, key: TimerKey) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&key)
    }

    pub fn armed_count(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Abort every armed timer (shutdown).
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for (_, scheduled) in tasks.drain() {
            scheduled.handle.abort();
        }
    }
}

/// Convert a non-negative chrono delta into a sleep duration.
pub fn delay_from(delta: chrono::Duration) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let key = TimerKey::Approval(Uuid::new_v4());

        let counter = Arc::clone(&fired);
        timers.schedule(key, Duration::from_secs(300), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        settle().await;
        assert!(timers.is_armed(key));

        tokio::time::advance(Duration::from_secs(299)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed(key));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let key = TimerKey::SessionExpiry(Uuid::new_v4());

        let counter = Arc::clone(&fired);
        timers.schedule(key, Duration::from_secs(60), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.cancel(key));
        assert!(!timers.cancel(key));

        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timers.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_previous_timer() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let key = TimerKey::Approval(Uuid::new_v4());

        for _ in 0..3 {
            let counter = Arc::clone(&fired);
            timers.schedule(key, Duration::from_secs(10), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        settle().await;
        assert_eq!(timers.armed_count(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn negative_delta_becomes_zero_delay() {
        assert_eq!(delay_from(chrono::Duration::seconds(-3)), Duration::ZERO);
        assert_eq!(delay_from(chrono::Duration::seconds(3)), Duration::from_secs(3));
    }
}
