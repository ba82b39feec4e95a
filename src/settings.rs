//! Shared boolean settings read by the drivers and toggled by the UI rows.

use serde::{Deserialize, Serialize};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingKey {
    /// Avatar is locked: no drag/zoom/focus, surface is click-through.
    Locked,
    /// Floating controls appear when the pointer approaches.
    ProximityControls,
    /// Avatar head/eyes follow the pointer while focused.
    GazeFollow,
    /// Microphone drives the mouth expression.
    LipSync,
    DebugSkeleton,
    /// Agent features as a whole; the children below require it.
    AgentMaster,
    AgentKeyboard,
    AgentBrowser,
}

impl SettingKey {
    pub const ALL: [SettingKey; 8] = [
        SettingKey::Locked,
        SettingKey::ProximityControls,
        SettingKey::GazeFollow,
        SettingKey::LipSync,
        SettingKey::DebugSkeleton,
        SettingKey::AgentMaster,
        SettingKey::AgentKeyboard,
        SettingKey::AgentBrowser,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::Locked => "locked",
            SettingKey::ProximityControls => "proximityControls",
            SettingKey::GazeFollow => "gazeFollow",
            SettingKey::LipSync => "lipSync",
            SettingKey::DebugSkeleton => "debugSkeleton",
            SettingKey::AgentMaster => "agentMaster",
            SettingKey::AgentKeyboard => "agentKeyboard",
            SettingKey::AgentBrowser => "agentBrowser",
        }
    }
}

#[derive(Clone)]
pub struct AvatarSettings {
    inner: Arc<Inner>,
}

struct Inner {
    locked: AtomicBool,
    proximity_controls: AtomicBool,
    gaze_follow: AtomicBool,
    lip_sync: AtomicBool,
    debug_skeleton: AtomicBool,
    agent_master: AtomicBool,
    agent_keyboard: AtomicBool,
    agent_browser: AtomicBool,
}

impl Default for AvatarSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl AvatarSettings {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                locked: AtomicBool::new(false),
                proximity_controls: AtomicBool::new(true),
                gaze_follow: AtomicBool::new(true),
                lip_sync: AtomicBool::new(true),
                debug_skeleton: AtomicBool::new(false),
                agent_master: AtomicBool::new(false),
                agent_keyboard: AtomicBool::new(false),
                agent_browser: AtomicBool::new(false),
            }),
        }
    }

    fn flag(&self, key: SettingKey) -> &AtomicBool {
        match key {
            SettingKey::Locked => &self.inner.locked,
            SettingKey::ProximityControls => &self.inner.proximity_controls,
            SettingKey::GazeFollow => &self.inner.gaze_follow,
            SettingKey::LipSync => &self.inner.lip_sync,
            SettingKey::DebugSkeleton => &self.inner.debug_skeleton,
            SettingKey::AgentMaster => &self.inner.agent_master,
            SettingKey::AgentKeyboard => &self.inner.agent_keyboard,
            SettingKey::AgentBrowser => &self.inner.agent_browser,
        }
    }

    pub fn get(&self, key: SettingKey) -> bool {
        self.flag(key).load(Ordering::SeqCst)
    }

    /// Returns the previous value.
    pub fn set(&self, key: SettingKey, value: bool) -> bool {
        self.flag(key).swap(value, Ordering::SeqCst)
    }

    /// Flips the flag and returns the new value.
    pub fn toggle(&self, key: SettingKey) -> bool {
        !self.flag(key).fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_locked(&self) -> bool {
        self.get(SettingKey::Locked)
    }

    pub fn snapshot(&self) -> Vec<(SettingKey, bool)> {
        SettingKey::ALL.iter().map(|&k| (k, self.get(k))).collect()
    }
}
