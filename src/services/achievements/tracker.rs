use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{AchievementBackend, AchievementRule, BackendError};
use crate::events::{EventSink, StageEvent};
use crate::services::local_store::LocalStore;

const COUNTERS_KEY: &str = "achievements.counters";
const UNLOCKED_KEY: &str = "achievements.unlocked";

#[derive(Default)]
struct TrackerState {
    counters: HashMap<String, u64>,
    unlocked: BTreeSet<String>,
    /// Unlocks waiting on the backend; a second trigger must not double-post.
    in_flight: HashSet<String>,
    playtime_total: u64,
}

#[derive(Clone)]
pub struct AchievementTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    rules: Vec<AchievementRule>,
    backend: Arc<dyn AchievementBackend>,
    store: LocalStore,
    events: EventSink,
    state: Mutex<TrackerState>,
}

impl AchievementTracker {
    pub fn new(
        rules: Vec<AchievementRule>,
        backend: Arc<dyn AchievementBackend>,
        store: LocalStore,
        events: EventSink,
    ) -> Self {
        let state = TrackerState {
            counters: store.get(COUNTERS_KEY).unwrap_or_default(),
            unlocked: store.get(UNLOCKED_KEY).unwrap_or_default(),
            ..TrackerState::default()
        };
        Self {
            inner: Arc::new(TrackerInner {
                rules,
                backend,
                store,
                events,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn is_unlocked(&self, id: &str) -> bool {
        self.inner
            .state
            .lock()
            .map(|s| s.unlocked.contains(id))
            .unwrap_or(false)
    }

    pub fn unlocked(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .map(|s| s.unlocked.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|s| s.counters.get(name).copied())
            .unwrap_or(0)
    }

    pub fn playtime_total(&self) -> u64 {
        self.inner.state.lock().map(|s| s.playtime_total).unwrap_or(0)
    }

    /// Returns `true` only when this call performed the unlock.
    pub async fn unlock(&self, id: &str) -> bool {
        {
            let Ok(mut state) = self.inner.state.lock() else {
                return false;
            };
            if !self.inner.rules.iter().any(|r| r.id == id) {
                log::debug!("achievements: unknown id {}", id);
                return false;
            }
            if state.unlocked.contains(id) || !state.in_flight.insert(id.to_string()) {
                return false;
            }
        }
        let mut guard = InFlightGuard {
            inner: &self.inner,
            id,
            armed: true,
        };

        let result = self.inner.backend.unlock(id).await;

        let unlocked = {
            let Ok(mut state) = self.inner.state.lock() else {
                return false;
            };
            state.in_flight.remove(id);
            guard.armed = false;
            match result {
                Ok(()) => {
                    state.unlocked.insert(id.to_string());
                    self.inner.store.set(UNLOCKED_KEY, &state.unlocked);
                    true
                }
                Err(err) => {
                    log_backend_error("unlock", &err);
                    false
                }
            }
        };

        if unlocked {
            log::info!("achievement unlocked: {}", id);
            self.inner
                .events
                .emit(StageEvent::AchievementUnlocked { id: id.to_string() });
        }
        unlocked
    }

    /// Adds `amount` to `name` (created at 0) and unlocks any counter rule
    /// it now satisfies. Returns the new value.
    pub async fn increment_counter(&self, name: &str, amount: u64) -> u64 {
        let (value, due) = {
            let Ok(mut state) = self.inner.state.lock() else {
                return 0;
            };
            let entry = state.counters.entry(name.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
            let value = *entry;
            self.inner.store.set(COUNTERS_KEY, &state.counters);

            let due: Vec<String> = self
                .inner
                .rules
                .iter()
                .filter(|r| r.counter_reached(name, value) && !state.unlocked.contains(&r.id))
                .map(|r| r.id.clone())
                .collect();
            (value, due)
        };

        for id in due {
            self.unlock(&id).await;
        }
        value
    }

    /// Reports `elapsed_secs` to the backend and evaluates playtime rules
    /// against the returned cumulative total.
    pub async fn poll_playtime(&self, elapsed_secs: u64) -> Option<u64> {
        let total = match self.inner.backend.update_playtime(elapsed_secs).await {
            Ok(total) => total,
            Err(err) => {
                log_backend_error("playtime", &err);
                return None;
            }
        };

        let due: Vec<String> = {
            let Ok(mut state) = self.inner.state.lock() else {
                return Some(total);
            };
            state.playtime_total = total;
            self.inner
                .rules
                .iter()
                .filter(|r| r.playtime_reached(total) && !state.unlocked.contains(&r.id))
                .map(|r| r.id.clone())
                .collect()
        };

        for id in due {
            self.unlock(&id).await;
        }
        Some(total)
    }

    /// Polls playtime every `interval` until the handle is aborted.
    pub fn spawn_playtime_poller(&self, interval: Duration) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracker.poll_playtime(interval.as_secs()).await;
            }
        })
    }
}

/// Clears an in-flight marker if the unlock future is dropped mid-request.
struct InFlightGuard<'a> {
    inner: &'a TrackerInner,
    id: &'a str,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut state) = self.inner.state.lock() {
            state.in_flight.remove(self.id);
        }
    }
}

fn log_backend_error(op: &str, err: &BackendError) {
    if err.is_not_ready() {
        log::debug!("achievements: {} skipped, backend not ready", op);
    } else {
        log::warn!("achievements: {} failed: {}", op, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeBackend {
        unlock_calls: AtomicUsize,
        fail_next: Mutex<Option<BackendError>>,
        /// Next unlock request never completes.
        hang_next: AtomicBool,
        playtime: AtomicU64,
        playtime_calls: AtomicUsize,
    }

    impl AchievementBackend for FakeBackend {
        fn unlock(&self, _id: &str) -> BoxFuture<'_, Result<(), BackendError>> {
            Box::pin(async move {
                tokio::task::yield_now().await;
                self.unlock_calls.fetch_add(1, Ordering::SeqCst);
                if self.hang_next.swap(false, Ordering::SeqCst) {
                    std::future::pending::<()>().await;
                }
                match self.fail_next.lock().unwrap().take() {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            })
        }

        fn update_playtime(&self, seconds: u64) -> BoxFuture<'_, Result<u64, BackendError>> {
            Box::pin(async move {
                self.playtime_calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.playtime.fetch_add(seconds, Ordering::SeqCst) + seconds)
            })
        }
    }

    fn tracker(backend: Arc<FakeBackend>, store: LocalStore) -> AchievementTracker {
        AchievementTracker::new(
            vec![
                AchievementRule::counter("ACH_MEOW_100", "meow", 100),
                AchievementRule::manual("ACH_FIRST_LAUNCH"),
                AchievementRule::playtime("ACH_PLAYTIME_1H", 3_600),
            ],
            backend,
            store,
            EventSink::disconnected(),
        )
    }

    #[tokio::test]
    async fn test_counter_threshold_unlocks_once() {
        let backend = Arc::new(FakeBackend::default());
        let t = tracker(backend.clone(), LocalStore::in_memory());

        assert_eq!(t.increment_counter("meow", 100).await, 100);
        assert_eq!(backend.unlock_calls.load(Ordering::SeqCst), 1);
        assert!(t.is_unlocked("ACH_MEOW_100"));

        assert_eq!(t.increment_counter("meow", 100).await, 200);
        assert_eq!(backend.unlock_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unlock_twice_is_noop() {
        let backend = Arc::new(FakeBackend::default());
        let (events, mut rx) = EventSink::channel();
        let t = AchievementTracker::new(
            vec![AchievementRule::manual("ACH_FIRST_LAUNCH")],
            backend.clone(),
            LocalStore::in_memory(),
            events,
        );

        assert!(t.unlock("ACH_FIRST_LAUNCH").await);
        assert!(!t.unlock("ACH_FIRST_LAUNCH").await);
        assert_eq!(backend.unlock_calls.load(Ordering::SeqCst), 1);
        assert_eq!(t.unlocked(), vec!["ACH_FIRST_LAUNCH".to_string()]);
        assert_eq!(
            rx.try_recv().ok(),
            Some(StageEvent::AchievementUnlocked {
                id: "ACH_FIRST_LAUNCH".into()
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_unlocks_post_once() {
        let backend = Arc::new(FakeBackend::default());
        let t = tracker(backend.clone(), LocalStore::in_memory());

        let (a, b) = tokio::join!(t.unlock("ACH_FIRST_LAUNCH"), t.unlock("ACH_FIRST_LAUNCH"));
        assert!(a ^ b);
        assert_eq!(backend.unlock_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_id_makes_no_remote_call() {
        let backend = Arc::new(FakeBackend::default());
        let t = tracker(backend.clone(), LocalStore::in_memory());
        assert!(!t.unlock("ACH_NOPE").await);
        assert_eq!(backend.unlock_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_unlock_is_retried_on_next_trigger() {
        let backend = Arc::new(FakeBackend::default());
        *backend.fail_next.lock().unwrap() = Some(BackendError::not_ready("503"));
        let t = tracker(backend.clone(), LocalStore::in_memory());

        t.increment_counter("meow", 100).await;
        assert!(!t.is_unlocked("ACH_MEOW_100"));

        t.increment_counter("meow", 1).await;
        assert!(t.is_unlocked("ACH_MEOW_100"));
        assert_eq!(backend.unlock_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_state_survives_reload() {
        let backend = Arc::new(FakeBackend::default());
        let store = LocalStore::in_memory();
        let t = tracker(backend.clone(), store.clone());
        t.increment_counter("meow", 120).await;

        let reloaded = tracker(backend.clone(), store);
        assert_eq!(reloaded.counter("meow"), 120);
        assert!(reloaded.is_unlocked("ACH_MEOW_100"));
        reloaded.increment_counter("meow", 1).await;
        assert_eq!(backend.unlock_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_playtime_rule() {
        let backend = Arc::new(FakeBackend::default());
        backend.playtime.store(3_595, Ordering::SeqCst);
        let t = tracker(backend.clone(), LocalStore::in_memory());

        assert_eq!(t.poll_playtime(4).await, Some(3_599));
        assert!(!t.is_unlocked("ACH_PLAYTIME_1H"));
        assert_eq!(t.poll_playtime(10).await, Some(3_609));
        assert!(t.is_unlocked("ACH_PLAYTIME_1H"));
        assert_eq!(t.playtime_total(), 3_609);
    }

    #[tokio::test]
    async fn test_cancelled_unlock_can_be_retried() {
        let backend = Arc::new(FakeBackend::default());
        backend.hang_next.store(true, Ordering::SeqCst);
        let t = tracker(backend.clone(), LocalStore::in_memory());

        let first = tokio::time::timeout(Duration::from_millis(20), t.unlock("ACH_FIRST_LAUNCH")).await;
        assert!(first.is_err());
        assert!(!t.is_unlocked("ACH_FIRST_LAUNCH"));

        assert!(t.unlock("ACH_FIRST_LAUNCH").await);
        assert_eq!(backend.unlock_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_reports_every_interval() {
        let backend = Arc::new(FakeBackend::default());
        let t = tracker(backend.clone(), LocalStore::in_memory());
        let handle = t.spawn_playtime_poller(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(backend.playtime_calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.playtime_calls.load(Ordering::SeqCst), 1);
        assert_eq!(t.playtime_total(), 10);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.playtime_calls.load(Ordering::SeqCst), 2);
        assert_eq!(t.playtime_total(), 20);

        handle.abort();
    }
}
