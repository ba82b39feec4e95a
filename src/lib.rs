//! Presentation-layer core of the rcat desktop avatar.
//!
//! A host creates one [`AvatarManager`], feeds it pointer/wheel/touch events
//! through [`AvatarManager::interaction_mut`], and calls
//! [`AvatarManager::tick`] once per rendered frame. UI state flows back as
//! [`StageEvent`]s and lock-free [`avatar::AvatarStateSnapshot`]s.

pub mod avatar;
pub mod events;
pub mod manager;
pub mod services;
pub mod settings;
pub mod widgets;

pub use events::{EventSink, StageEvent};
pub use manager::{AvatarManager, LoadTicket};
pub use services::achievements::AchievementTracker;
pub use services::config::StageConfig;
pub use services::local_store::LocalStore;
pub use services::theme::{ThemeBridge, ThemeStore};
pub use settings::{AvatarSettings, SettingKey};
pub use widgets::{Popup, PopupSet, ToggleRow, WidgetFactory};
