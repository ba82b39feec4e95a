//! Local achievement tracking.
//!
//! Counters and the unlocked set live in `LocalStore`; an unlock only sticks
//! once the backend has confirmed it.

mod backend;
mod error;
mod rules;
mod tracker;

pub use backend::{AchievementBackend, HttpAchievementBackend};
pub use error::BackendError;
pub use rules::{AchievementRule, AchievementTrigger, default_catalog};
pub use tracker::AchievementTracker;
