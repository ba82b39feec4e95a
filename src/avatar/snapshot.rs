use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use super::animation::AnimationState;
use super::interaction::InteractionState;
use super::model::AvatarKind;

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionSnapshot {
    pub clip: Option<String>,
    pub state: AnimationState,
}

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LipSyncSnapshot {
    pub active: bool,
    pub mouth: f32,
}

/// What the UI layer needs once per frame, published without locking.
#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarStateSnapshot {
    pub seq: u64,
    pub avatar: Option<String>,
    pub kind: Option<AvatarKind>,
    pub motion: MotionSnapshot,
    pub lip_sync: LipSyncSnapshot,
    pub interaction: InteractionState,
    /// Top-left of the floating controls, surface pixels.
    pub controls_anchor: [f32; 2],
}

#[derive(Default)]
pub struct SnapshotStore {
    latest_seq: AtomicU64,
    snapshot: ArcSwapOption<AvatarStateSnapshot>,
}

impl SnapshotStore {
    pub fn next_seq(&self) -> u64 {
        self.latest_seq.load(Ordering::SeqCst) + 1
    }

    /// Older or repeated sequence numbers are ignored.
    pub fn publish(&self, snapshot: AvatarStateSnapshot) -> bool {
        let seq = snapshot.seq;
        if seq <= self.latest_seq.load(Ordering::SeqCst) {
            return false;
        }
        self.latest_seq.store(seq, Ordering::SeqCst);
        self.snapshot.store(Some(Arc::new(snapshot)));
        true
    }

    pub fn load(&self) -> Option<Arc<AvatarStateSnapshot>> {
        self.snapshot.load_full()
    }

    pub fn clear(&self) {
        self.snapshot.store(None);
    }
}
