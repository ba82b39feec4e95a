//! Dark-mode switch.
//!
//! Start-up priority: host process setting, then the persisted value, then light.

use futures_util::future::BoxFuture;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use super::local_store::LocalStore;
use crate::events::{EventSink, StageEvent};

const THEME_DARK_KEY: &str = "theme.dark";

/// Host-process side of the theme setting (e.g. the shell's settings file).
pub trait ThemeBridge: Send + Sync {
    fn get_dark_mode(&self) -> BoxFuture<'_, Result<bool, String>>;
    fn set_dark_mode(&self, dark: bool) -> BoxFuture<'_, Result<(), String>>;
}

#[derive(Clone)]
pub struct ThemeStore {
    store: LocalStore,
    bridge: Option<Arc<dyn ThemeBridge>>,
    events: EventSink,
    /// Document-level marker the renderer reads.
    dark: Arc<AtomicBool>,
}

impl ThemeStore {
    pub fn new(store: LocalStore, bridge: Option<Arc<dyn ThemeBridge>>, events: EventSink) -> Self {
        Self {
            store,
            bridge,
            events,
            dark: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_dark(&self) -> bool {
        self.dark.load(Ordering::SeqCst)
    }

    pub fn apply(&self, dark: bool) {
        self.dark.store(dark, Ordering::SeqCst);
        self.store.set(THEME_DARK_KEY, &dark);
        self.events.emit(StageEvent::ThemeChanged { dark });
    }

    pub async fn init(&self) -> bool {
        let host = match self.bridge.as_ref() {
            Some(bridge) => match bridge.get_dark_mode().await {
                Ok(dark) => Some(dark),
                Err(err) => {
                    log::warn!("theme: host dark-mode query failed: {}", err);
                    None
                }
            },
            None => None,
        };

        let dark = host
            .or_else(|| self.store.get::<bool>(THEME_DARK_KEY))
            .unwrap_or(false);
        self.apply(dark);
        dark
    }

    pub async fn toggle(&self) -> bool {
        let dark = !self.is_dark();
        self.apply(dark);

        if let Some(bridge) = self.bridge.as_ref() {
            if let Err(err) = bridge.set_dark_mode(dark).await {
                log::warn!("theme: host sync failed: {}", err);
            }
        }
        dark
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeHost {
        dark: Result<bool, String>,
        writes: Mutex<Vec<bool>>,
    }

    impl ThemeBridge for FakeHost {
        fn get_dark_mode(&self) -> BoxFuture<'_, Result<bool, String>> {
            let dark = self.dark.clone();
            Box::pin(async move { dark })
        }

        fn set_dark_mode(&self, dark: bool) -> BoxFuture<'_, Result<(), String>> {
            self.writes.lock().unwrap().push(dark);
            Box::pin(async { Err("host gone".to_string()) })
        }
    }

    fn host(dark: Result<bool, String>) -> Arc<FakeHost> {
        Arc::new(FakeHost {
            dark,
            writes: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_init_defaults_to_light() {
        let theme = ThemeStore::new(LocalStore::in_memory(), None, EventSink::disconnected());
        assert!(!theme.init().await);
        assert!(!theme.is_dark());
    }

    #[tokio::test]
    async fn test_init_prefers_host_over_persisted() {
        let store = LocalStore::in_memory();
        store.set(THEME_DARK_KEY, &false);
        let theme = ThemeStore::new(store.clone(), Some(host(Ok(true))), EventSink::disconnected());
        assert!(theme.init().await);
        assert_eq!(store.get::<bool>(THEME_DARK_KEY), Some(true));
    }

    #[tokio::test]
    async fn test_init_falls_back_to_persisted_when_host_fails() {
        let store = LocalStore::in_memory();
        store.set(THEME_DARK_KEY, &true);
        let theme = ThemeStore::new(store, Some(host(Err("offline".into()))), EventSink::disconnected());
        assert!(theme.init().await);
    }

    #[tokio::test]
    async fn test_toggle_applies_even_if_host_sync_fails() {
        let fake = host(Ok(false));
        let (events, mut rx) = EventSink::channel();
        let theme = ThemeStore::new(LocalStore::in_memory(), Some(fake.clone()), events);

        theme.init().await;
        assert!(theme.toggle().await);
        assert!(theme.is_dark());
        assert_eq!(*fake.writes.lock().unwrap(), vec![true]);

        assert_eq!(rx.recv().await, Some(StageEvent::ThemeChanged { dark: false }));
        assert_eq!(rx.recv().await, Some(StageEvent::ThemeChanged { dark: true }));
    }
}
