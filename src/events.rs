//! Typed events emitted to the UI layer.
//!
//! The UI wiring subscribes to a single channel instead of listening for
//! ad-hoc document events.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub const EVT_AVATAR_FOCUS_CHANGED: &str = "avatar-focus-changed";
pub const EVT_LOCK_TOGGLED: &str = "lock-toggled";
pub const EVT_ACHIEVEMENT_UNLOCKED: &str = "achievement-unlocked";
pub const EVT_THEME_CHANGED: &str = "theme-changed";
pub const EVT_DISPLAY_SWITCHED: &str = "display-switched";
pub const EVT_SETTING_CHANGED: &str = "setting-changed";

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[cfg_attr(feature = "typegen", specta(rename_all = "camelCase"))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StageEvent {
    AvatarFocusChanged { focused: bool },
    LockToggled { locked: bool },
    AchievementUnlocked { id: String },
    ThemeChanged { dark: bool },
    #[serde(rename_all = "camelCase")]
    DisplaySwitched { display_id: String },
    SettingChanged { key: String, value: bool },
}

impl StageEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AvatarFocusChanged { .. } => EVT_AVATAR_FOCUS_CHANGED,
            Self::LockToggled { .. } => EVT_LOCK_TOGGLED,
            Self::AchievementUnlocked { .. } => EVT_ACHIEVEMENT_UNLOCKED,
            Self::ThemeChanged { .. } => EVT_THEME_CHANGED,
            Self::DisplaySwitched { .. } => EVT_DISPLAY_SWITCHED,
            Self::SettingChanged { .. } => EVT_SETTING_CHANGED,
        }
    }
}

/// Sending half handed to every component that emits events.
///
/// A missing or closed receiver is not an error: events are fire-and-forget.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<StageEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<StageEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that drops everything.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: StageEvent) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        let name = event.name();
        if tx.send(event).is_err() {
            log::debug!("event {} dropped: receiver closed", name);
        }
    }
}
