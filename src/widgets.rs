//! Popup menus made of checkbox-like rows bound to shared settings.
//!
//! Only the model lives here; the UI layer renders rows from `label_key`
//! and `is_checked`.

use serde::Serialize;

use crate::events::{EventSink, StageEvent};
use crate::settings::{AvatarSettings, SettingKey};

pub const POPUP_SETTINGS: &str = "settings";
pub const POPUP_AGENT_TOOLS: &str = "agent_tools";

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRow {
    pub id: String,
    pub label_key: String,
    pub setting: SettingKey,
    /// Row is greyed out unless this setting is on.
    pub requires: Option<SettingKey>,
}

impl ToggleRow {
    pub fn new(id: &str, label_key: &str, setting: SettingKey) -> Self {
        Self {
            id: id.to_string(),
            label_key: label_key.to_string(),
            setting,
            requires: None,
        }
    }

    pub fn requiring(mut self, parent: SettingKey) -> Self {
        self.requires = Some(parent);
        self
    }

    pub fn is_checked(&self, settings: &AvatarSettings) -> bool {
        settings.get(self.setting)
    }

    pub fn is_enabled(&self, settings: &AvatarSettings) -> bool {
        self.requires.is_none_or(|parent| settings.get(parent))
    }

    /// Flips the bound setting. Returns the new value, or `None` when the
    /// row is disabled.
    pub fn toggle(&self, settings: &AvatarSettings, events: &EventSink) -> Option<bool> {
        if !self.is_enabled(settings) {
            return None;
        }
        let value = settings.toggle(self.setting);
        emit_setting(events, self.setting, value);
        Some(value)
    }
}

fn emit_setting(events: &EventSink, key: SettingKey, value: bool) {
    events.emit(StageEvent::SettingChanged {
        key: key.as_str().to_string(),
        value,
    });
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Popup {
    pub id: String,
    pub rows: Vec<ToggleRow>,
    pub open: bool,
}

impl Popup {
    pub fn new(id: &str, rows: Vec<ToggleRow>) -> Self {
        Self {
            id: id.to_string(),
            rows,
            open: false,
        }
    }

    pub fn row(&self, id: &str) -> Option<&ToggleRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    /// Toggles a row; switching a parent off also switches off every row
    /// that requires it.
    pub fn toggle_row(&self, id: &str, settings: &AvatarSettings, events: &EventSink) -> Option<bool> {
        let row = self.row(id)?;
        let value = row.toggle(settings, events)?;
        if !value {
            for child in self.rows.iter().filter(|r| r.requires == Some(row.setting)) {
                if settings.set(child.setting, false) {
                    emit_setting(events, child.setting, false);
                }
            }
        }
        Some(value)
    }
}

/// Keeps at most one popup open.
#[derive(Debug, Clone, Default)]
pub struct PopupSet {
    popups: Vec<Popup>,
}

impl PopupSet {
    pub fn new(popups: Vec<Popup>) -> Self {
        Self { popups }
    }

    pub fn popup(&self, id: &str) -> Option<&Popup> {
        self.popups.iter().find(|p| p.id == id)
    }

    pub fn open_id(&self) -> Option<&str> {
        self.popups.iter().find(|p| p.open).map(|p| p.id.as_str())
    }

    pub fn open(&mut self, id: &str) -> bool {
        if self.popup(id).is_none() {
            log::warn!("unknown popup {}", id);
            return false;
        }
        for p in &mut self.popups {
            p.open = p.id == id;
        }
        true
    }

    pub fn close_all(&mut self) {
        for p in &mut self.popups {
            p.open = false;
        }
    }

    /// Button behaviour: opens the popup, or closes it if already open.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.open_id() == Some(id) {
            self.close_all();
            false
        } else {
            self.open(id)
        }
    }

    pub fn toggle_row(
        &self,
        popup_id: &str,
        row_id: &str,
        settings: &AvatarSettings,
        events: &EventSink,
    ) -> Option<bool> {
        self.popup(popup_id)?.toggle_row(row_id, settings, events)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WidgetFactory;

impl WidgetFactory {
    pub fn settings_popup(&self) -> Popup {
        Popup::new(
            POPUP_SETTINGS,
            vec![
                ToggleRow::new("lock", "settings.lock", SettingKey::Locked),
                ToggleRow::new("proximity", "settings.proximityControls", SettingKey::ProximityControls),
                ToggleRow::new("gaze", "settings.gazeFollow", SettingKey::GazeFollow),
                ToggleRow::new("lip_sync", "settings.lipSync", SettingKey::LipSync),
                ToggleRow::new("debug_skeleton", "settings.debugSkeleton", SettingKey::DebugSkeleton),
            ],
        )
    }

    pub fn agent_tools_popup(&self) -> Popup {
        Popup::new(
            POPUP_AGENT_TOOLS,
            vec![
                ToggleRow::new("agent_master", "agent.master", SettingKey::AgentMaster),
                ToggleRow::new("agent_keyboard", "agent.keyboard", SettingKey::AgentKeyboard)
                    .requiring(SettingKey::AgentMaster),
                ToggleRow::new("agent_browser", "agent.browser", SettingKey::AgentBrowser)
                    .requiring(SettingKey::AgentMaster),
            ],
        )
    }

    pub fn popups(&self) -> PopupSet {
        PopupSet::new(vec![self.settings_popup(), self.agent_tools_popup()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_toggles_shared_setting() {
        let settings = AvatarSettings::new();
        let (events, mut rx) = EventSink::channel();
        let popup = WidgetFactory.settings_popup();
        let row = popup.row("lock").unwrap();

        assert!(!row.is_checked(&settings));
        assert_eq!(row.toggle(&settings, &events), Some(true));
        assert!(settings.is_locked());
        assert_eq!(
            rx.try_recv().unwrap(),
            StageEvent::SettingChanged {
                key: "locked".into(),
                value: true
            }
        );
    }

    #[test]
    fn test_child_rows_follow_master() {
        let settings = AvatarSettings::new();
        let (events, mut rx) = EventSink::channel();
        let popup = WidgetFactory.agent_tools_popup();

        assert_eq!(popup.toggle_row("agent_keyboard", &settings, &events), None);
        assert_eq!(popup.toggle_row("agent_master", &settings, &events), Some(true));
        assert_eq!(popup.toggle_row("agent_keyboard", &settings, &events), Some(true));
        assert!(settings.get(SettingKey::AgentKeyboard));

        assert_eq!(popup.toggle_row("agent_master", &settings, &events), Some(false));
        assert!(!settings.get(SettingKey::AgentKeyboard));
        assert!(!settings.get(SettingKey::AgentBrowser));

        let mut keys = Vec::new();
        while let Ok(StageEvent::SettingChanged { key, value }) = rx.try_recv() {
            keys.push((key, value));
        }
        assert_eq!(
            keys,
            vec![
                ("agentMaster".to_string(), true),
                ("agentKeyboard".to_string(), true),
                ("agentMaster".to_string(), false),
                ("agentKeyboard".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_only_one_popup_open() {
        let mut set = WidgetFactory.popups();
        assert!(set.open(POPUP_SETTINGS));
        assert!(set.toggle(POPUP_AGENT_TOOLS));
        assert_eq!(set.open_id(), Some(POPUP_AGENT_TOOLS));
        assert!(!set.popup(POPUP_SETTINGS).unwrap().open);
        assert!(!set.toggle(POPUP_AGENT_TOOLS));
        assert_eq!(set.open_id(), None);
        assert!(!set.open("missing"));
    }
}
