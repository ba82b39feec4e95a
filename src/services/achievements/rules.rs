use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AchievementTrigger {
    /// Unlocks once `counter` reaches `threshold`.
    Counter { counter: String, threshold: u64 },
    /// Unlocks once the server-reported cumulative playtime reaches `seconds`.
    Playtime { seconds: u64 },
    /// Only unlocked explicitly.
    Manual,
}

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementRule {
    pub id: String,
    pub trigger: AchievementTrigger,
}

impl AchievementRule {
    pub fn counter(id: &str, counter: &str, threshold: u64) -> Self {
        Self {
            id: id.to_string(),
            trigger: AchievementTrigger::Counter {
                counter: counter.to_string(),
                threshold,
            },
        }
    }

    pub fn playtime(id: &str, seconds: u64) -> Self {
        Self {
            id: id.to_string(),
            trigger: AchievementTrigger::Playtime { seconds },
        }
    }

    pub fn manual(id: &str) -> Self {
        Self {
            id: id.to_string(),
            trigger: AchievementTrigger::Manual,
        }
    }

    pub(crate) fn counter_reached(&self, name: &str, value: u64) -> bool {
        match &self.trigger {
            AchievementTrigger::Counter { counter, threshold } => {
                counter == name && value >= *threshold
            }
            _ => false,
        }
    }

    pub(crate) fn playtime_reached(&self, total_seconds: u64) -> bool {
        match self.trigger {
            AchievementTrigger::Playtime { seconds } => total_seconds >= seconds,
            _ => false,
        }
    }
}

pub fn default_catalog() -> Vec<AchievementRule> {
    vec![
        AchievementRule::manual("ACH_FIRST_LAUNCH"),
        AchievementRule::manual("ACH_CHANGE_MODEL"),
        AchievementRule::counter("ACH_MEOW_100", "meow", 100),
        AchievementRule::counter("ACH_CHAT_50", "chat", 50),
        AchievementRule::counter("ACH_FIRST_SCREEN_SHARE", "screenShare", 1),
        AchievementRule::counter("ACH_VOICE_CALL_10", "voiceCall", 10),
        AchievementRule::playtime("ACH_PLAYTIME_1H", 3_600),
        AchievementRule::playtime("ACH_PLAYTIME_10H", 36_000),
        AchievementRule::playtime("ACH_PLAYTIME_100H", 360_000),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_ids_are_unique() {
        let catalog = default_catalog();
        let mut ids: Vec<_> = catalog.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), catalog.len());
    }

    #[test]
    fn test_thresholds() {
        let rule = AchievementRule::counter("A", "meow", 100);
        assert!(!rule.counter_reached("meow", 99));
        assert!(rule.counter_reached("meow", 100));
        assert!(!rule.counter_reached("chat", 500));
        assert!(!rule.playtime_reached(u64::MAX));

        let rule = AchievementRule::playtime("B", 3_600);
        assert!(rule.playtime_reached(3_600));
        assert!(!rule.counter_reached("meow", 10_000));
    }

    #[test]
    fn test_trigger_wire_format() {
        let json = serde_json::to_value(AchievementRule::counter("A", "meow", 100)).unwrap();
        assert_eq!(json["trigger"]["kind"], "counter");
        assert_eq!(json["trigger"]["threshold"], 100);
    }
}
