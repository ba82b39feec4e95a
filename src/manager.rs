//! Owner of the active avatar and both drivers.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::avatar::animation::AnimationDriver;
use crate::avatar::clip::{AnimationClip, ClipLoader};
use crate::avatar::display::DisplayBridge;
use crate::avatar::error::AvatarError;
use crate::avatar::interaction::InteractionDriver;
use crate::avatar::lip_sync::SpectrumSource;
use crate::avatar::mixer::PlayOptions;
use crate::avatar::model::{AvatarHandle, ModelLoader};
use crate::avatar::retarget::ClipRetargeter;
use crate::avatar::snapshot::{AvatarStateSnapshot, LipSyncSnapshot, MotionSnapshot, SnapshotStore};
use crate::events::EventSink;
use crate::services::config::StageConfig;
use crate::services::local_store::LocalStore;
use crate::settings::{AvatarSettings, SettingKey};

/// Identifies one model load; only the newest ticket may attach its avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket(u64);

pub struct AvatarManager {
    settings: AvatarSettings,
    animation: AnimationDriver,
    interaction: InteractionDriver,
    models: ModelLoader,
    clips: ClipLoader,
    snapshots: Arc<SnapshotStore>,
    load_generation: u64,
}

impl AvatarManager {
    pub fn new(
        config: &StageConfig,
        settings: AvatarSettings,
        store: LocalStore,
        events: EventSink,
        retargeter: Option<Arc<dyn ClipRetargeter>>,
        display: Option<Arc<dyn DisplayBridge>>,
    ) -> Self {
        let animation = AnimationDriver::new(retargeter).with_default_fade(config.fade_seconds);
        let mut interaction = InteractionDriver::new(settings.clone(), store, events, config, display);
        interaction.restore();
        Self {
            settings,
            animation,
            interaction,
            models: ModelLoader,
            clips: ClipLoader::new(),
            snapshots: Arc::new(SnapshotStore::default()),
            load_generation: 0,
        }
    }

    /// Picks up the work area of the display the avatar starts on.
    pub async fn sync_display(&mut self) {
        if let Err(err) = self.interaction.sync_work_area().await {
            log::warn!("display query failed: {}", err);
        }
    }

    pub fn settings(&self) -> &AvatarSettings {
        &self.settings
    }

    pub fn animation(&self) -> &AnimationDriver {
        &self.animation
    }

    pub fn animation_mut(&mut self) -> &mut AnimationDriver {
        &mut self.animation
    }

    pub fn interaction(&self) -> &InteractionDriver {
        &self.interaction
    }

    pub fn interaction_mut(&mut self) -> &mut InteractionDriver {
        &mut self.interaction
    }

    pub fn avatar(&self) -> Option<&AvatarHandle> {
        self.animation.avatar()
    }

    /// Readers on other threads keep this and call `load()`.
    pub fn snapshot_store(&self) -> Arc<SnapshotStore> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> Option<Arc<AvatarStateSnapshot>> {
        self.snapshots.load()
    }

    /// Invalidates every earlier ticket.
    pub fn begin_model_load(&mut self) -> LoadTicket {
        self.load_generation += 1;
        LoadTicket(self.load_generation)
    }

    /// Attaches the loaded avatar if `ticket` is still the newest one.
    ///
    /// Returns `Ok(false)` for a stale ticket. A failed load leaves the
    /// current avatar in place.
    pub fn finish_model_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<AvatarHandle, AvatarError>,
    ) -> Result<bool, AvatarError> {
        if ticket.0 != self.load_generation {
            log::debug!(
                "model load {} superseded by {}; discarded",
                ticket.0,
                self.load_generation
            );
            return Ok(false);
        }
        let avatar = result.inspect_err(|e| log::warn!("model load failed: {}", e))?;

        self.interaction.reset();
        self.interaction.set_base_size(avatar.base_size());
        let name = avatar.name().to_string();
        if let Some(previous) = self.animation.attach(avatar) {
            log::info!("avatar switched: {} -> {}", previous.name(), name);
        }
        self.animation
            .set_debug_skeleton(self.settings.get(SettingKey::DebugSkeleton));
        Ok(true)
    }

    pub async fn load_model(&mut self, path: &Path) -> Result<bool, AvatarError> {
        let ticket = self.begin_model_load();
        let result = self.models.load(path).await;
        self.finish_model_load(ticket, result)
    }

    pub fn play_clip(&mut self, clip: Arc<AnimationClip>, options: PlayOptions) -> Result<Uuid, AvatarError> {
        self.animation
            .play(clip, options)
            .inspect_err(|e| log::warn!("play failed: {}", e))
    }

    pub async fn play_motion(&mut self, path: &Path, options: PlayOptions) -> Result<Uuid, AvatarError> {
        if self.animation.avatar().is_none() {
            return Err(AvatarError::model_not_loaded("no avatar to play motion on"));
        }
        self.animation.begin_loading();
        match self.clips.load(path).await {
            Ok(clip) => self.play_clip(clip, options),
            Err(e) => {
                self.animation.cancel_loading();
                log::warn!("motion load failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn stop_motion(&mut self) {
        self.animation.stop();
    }

    /// `Ok(None)` when lip-sync is switched off in settings.
    pub fn start_lip_sync(&mut self, source: Arc<dyn SpectrumSource>) -> Result<Option<Uuid>, AvatarError> {
        if !self.settings.get(SettingKey::LipSync) {
            log::debug!("lip-sync disabled; microphone ignored");
            return Ok(None);
        }
        self.animation.start_lip_sync(source).map(Some)
    }

    pub fn stop_lip_sync(&mut self) {
        self.animation.stop_lip_sync();
    }

    /// Once per rendered frame.
    pub fn tick(&mut self, delta: f32, now: Instant) {
        if self.animation.is_lip_syncing() && !self.settings.get(SettingKey::LipSync) {
            self.animation.stop_lip_sync();
        }
        self.animation
            .set_debug_skeleton(self.settings.get(SettingKey::DebugSkeleton) && self.avatar().is_some());

        self.animation.update(delta);
        self.interaction.tick(now);
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        let avatar = self.animation.avatar();
        let snapshot = AvatarStateSnapshot {
            seq: self.snapshots.next_seq(),
            avatar: avatar.map(|a| a.name().to_string()),
            kind: avatar.map(|a| a.kind()),
            motion: MotionSnapshot {
                clip: self.animation.current_clip_name().map(str::to_string),
                state: self.animation.state(),
            },
            lip_sync: LipSyncSnapshot {
                active: self.animation.is_lip_syncing(),
                mouth: self.animation.mouth_weight(),
            },
            interaction: self.interaction.state(),
            controls_anchor: self.interaction.controls_anchor().to_array(),
        };
        self.snapshots.publish(snapshot);
    }

    /// Releases the avatar and everything bound to it. Pending loads are
    /// invalidated.
    pub fn dispose(&mut self) {
        self.load_generation += 1;
        if let Some(avatar) = self.animation.detach() {
            log::info!("avatar disposed: {}", avatar.name());
        }
        self.interaction.reset();
        self.snapshots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::AnimationState;
    use crate::avatar::clip::tests::hips_spine_clip;
    use crate::avatar::clip::{ClipAsset, TrackAsset};
    use crate::avatar::lip_sync::tests::FlatSpectrum;
    use crate::avatar::model::tests::{plain_asset, vrm_asset};
    use crate::avatar::retarget::HumanoidRetargeter;

    fn manager() -> AvatarManager {
        AvatarManager::new(
            &StageConfig::default(),
            AvatarSettings::new(),
            LocalStore::in_memory(),
            EventSink::disconnected(),
            Some(Arc::new(HumanoidRetargeter)),
            None,
        )
    }

    fn attach(m: &mut AvatarManager, asset: crate::avatar::model::ModelAsset) {
        let ticket = m.begin_model_load();
        assert!(m.finish_model_load(ticket, AvatarHandle::from_asset(asset)).unwrap());
    }

    #[test]
    fn test_switching_avatars_releases_previous_session() {
        let mut m = manager();
        attach(&mut m, vrm_asset());
        let source = FlatSpectrum::new(150);
        assert!(m.start_lip_sync(source.clone()).unwrap().is_some());
        m.play_clip(Arc::new(hips_spine_clip()), PlayOptions::default())
            .unwrap();
        assert_eq!(Arc::strong_count(&source), 2);

        attach(&mut m, plain_asset());
        assert_eq!(Arc::strong_count(&source), 1);
        assert!(!m.animation().is_lip_syncing());
        assert_eq!(m.animation().state(), AnimationState::Idle);
        assert_eq!(m.avatar().unwrap().name(), "plain");
    }

    #[test]
    fn test_stale_ticket_is_discarded() {
        let mut m = manager();
        let first = m.begin_model_load();
        let second = m.begin_model_load();
        assert!(m.finish_model_load(second, AvatarHandle::from_asset(plain_asset())).unwrap());
        assert!(!m.finish_model_load(first, AvatarHandle::from_asset(vrm_asset())).unwrap());
        assert_eq!(m.avatar().unwrap().name(), "plain");
    }

    #[test]
    fn test_failed_load_keeps_current_avatar() {
        let mut m = manager();
        attach(&mut m, plain_asset());
        let ticket = m.begin_model_load();
        let err = m
            .finish_model_load(ticket, Err(AvatarError::load("broken")))
            .unwrap_err();
        assert!(matches!(err, AvatarError::Load { .. }));
        assert_eq!(m.avatar().unwrap().name(), "plain");
    }

    #[test]
    fn test_lip_sync_respects_setting() {
        let mut m = manager();
        attach(&mut m, vrm_asset());
        m.settings().set(SettingKey::LipSync, false);
        assert_eq!(m.start_lip_sync(FlatSpectrum::new(100)).unwrap(), None);

        m.settings().set(SettingKey::LipSync, true);
        m.start_lip_sync(FlatSpectrum::new(100)).unwrap();
        m.settings().set(SettingKey::LipSync, false);
        m.tick(1.0 / 60.0, Instant::now());
        assert!(!m.animation().is_lip_syncing());
        assert_eq!(m.avatar().unwrap().expression("aa"), Some(0.0));
    }

    #[test]
    fn test_tick_publishes_snapshot() {
        let mut m = manager();
        let store = m.snapshot_store();
        m.tick(1.0 / 60.0, Instant::now());
        let first = store.load().unwrap();
        assert_eq!(first.avatar, None);

        attach(&mut m, plain_asset());
        m.play_clip(Arc::new(hips_spine_clip()), PlayOptions::default())
            .unwrap();
        m.tick(1.0 / 60.0, Instant::now());
        let snap = m.snapshot().unwrap();
        assert!(snap.seq > first.seq);
        assert_eq!(snap.avatar.as_deref(), Some("plain"));
        assert_eq!(snap.motion.clip.as_deref(), Some("wave"));

        m.dispose();
        assert!(m.snapshot().is_none());
        assert!(m.avatar().is_none());
        m.dispose();
    }

    #[tokio::test]
    async fn test_load_and_play_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("plain.json");
        std::fs::write(&model, serde_json::to_string(&plain_asset()).unwrap()).unwrap();
        let clip = dir.path().join("wave.json");
        let asset = ClipAsset {
            name: "wave".into(),
            duration: None,
            tracks: vec![TrackAsset {
                name: "mixamorig:Hips.position".into(),
                times: vec![0.0, 1.0],
                values: vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            }],
        };
        std::fs::write(&clip, serde_json::to_string(&asset).unwrap()).unwrap();

        let mut m = manager();
        assert!(matches!(
            m.play_motion(&clip, PlayOptions::default()).await,
            Err(AvatarError::ModelNotLoaded { .. })
        ));
        assert!(m.load_model(&model).await.unwrap());
        m.play_motion(&clip, PlayOptions::default()).await.unwrap();
        assert_eq!(m.animation().current_clip_name(), Some("wave"));

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            m.play_motion(&missing, PlayOptions::default()).await,
            Err(AvatarError::Load { .. })
        ));
        assert_ne!(m.animation().state(), AnimationState::Loading);
    }
}
