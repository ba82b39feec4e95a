//! Per-avatar animation driver: clip playback, cross-fades and lip-sync.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::clip::AnimationClip;
use super::error::AvatarError;
use super::lip_sync::{LipSyncSession, SpectrumSource, VowelMap};
use super::mixer::{Mixer, PlayOptions, PlaybackAction};
use super::model::AvatarHandle;
use super::retarget::{ClipRetargeter, retarget_clip};

/// Substituted for dropped or invalid frame deltas.
pub const NOMINAL_STEP: f32 = 1.0 / 60.0;
/// Largest delta accepted as a real frame.
pub const MAX_STEP: f32 = 0.1;
/// Fade-out length used by `stop`.
pub const STOP_FADE: f32 = 0.3;

/// Any delta that is not a plausible single frame becomes `NOMINAL_STEP`.
pub fn sanitize_delta(delta: f32) -> f32 {
    if delta.is_finite() && delta > 0.0 && delta <= MAX_STEP {
        delta
    } else {
        NOMINAL_STEP
    }
}

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnimationState {
    Idle,
    Loading,
    Playing,
    CrossFading,
}

/// Bone-to-parent line segments in world space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkeletonDebugView {
    pub lines: Vec<(Vec3, Vec3)>,
}

impl SkeletonDebugView {
    fn rebuild(&mut self, avatar: &AvatarHandle) {
        self.lines.clear();
        let Some(skeleton) = avatar.skeleton(super::model::SkeletonKind::Raw) else {
            return;
        };
        for (i, bone) in skeleton.bones().iter().enumerate() {
            let Some(parent) = bone.parent else { continue };
            if let (Some(a), Some(b)) = (skeleton.world_position(parent), skeleton.world_position(i)) {
                self.lines.push((a, b));
            }
        }
    }
}

pub struct AnimationDriver {
    retargeter: Option<Arc<dyn ClipRetargeter>>,
    avatar: Option<AvatarHandle>,
    mixer: Mixer,
    lip_sync: Option<LipSyncSession>,
    debug_view: Option<SkeletonDebugView>,
    loading: bool,
    default_fade: f32,
}

impl AnimationDriver {
    /// `retargeter` is the library capability tried before name matching.
    pub fn new(retargeter: Option<Arc<dyn ClipRetargeter>>) -> Self {
        Self {
            retargeter,
            avatar: None,
            mixer: Mixer::default(),
            lip_sync: None,
            debug_view: None,
            loading: false,
            default_fade: PlayOptions::default().fade_duration,
        }
    }

    pub fn with_default_fade(mut self, seconds: f32) -> Self {
        if seconds.is_finite() && seconds >= 0.0 {
            self.default_fade = seconds;
        }
        self
    }

    pub fn default_fade(&self) -> f32 {
        self.default_fade
    }

    /// Binds `avatar`, disposing everything tied to the previous one first.
    /// Returns the previous avatar.
    pub fn attach(&mut self, avatar: AvatarHandle) -> Option<AvatarHandle> {
        self.dispose();
        let previous = self.avatar.replace(avatar);
        if let Some(avatar) = self.avatar.as_mut() {
            avatar.reset_pose();
        }
        previous
    }

    pub fn detach(&mut self) -> Option<AvatarHandle> {
        self.dispose();
        self.avatar.take()
    }

    pub fn avatar(&self) -> Option<&AvatarHandle> {
        self.avatar.as_ref()
    }

    pub fn avatar_mut(&mut self) -> Option<&mut AvatarHandle> {
        self.avatar.as_mut()
    }

    pub fn state(&self) -> AnimationState {
        if self.loading {
            AnimationState::Loading
        } else if self.mixer.is_cross_fading() {
            AnimationState::CrossFading
        } else if self.mixer.is_active() {
            AnimationState::Playing
        } else {
            AnimationState::Idle
        }
    }

    /// Marks a clip fetch in progress; `play` or `cancel_loading` ends it.
    pub fn begin_loading(&mut self) {
        self.loading = true;
    }

    pub fn cancel_loading(&mut self) {
        self.loading = false;
    }

    pub fn current_clip_name(&self) -> Option<&str> {
        self.mixer.current().map(|a| a.clip_name())
    }

    pub fn current_action_id(&self) -> Option<Uuid> {
        self.mixer.current().map(|a| a.id())
    }

    pub fn play(&mut self, clip: Arc<AnimationClip>, options: PlayOptions) -> Result<Uuid, AvatarError> {
        self.loading = false;
        let Some(avatar) = self.avatar.as_mut() else {
            return Err(AvatarError::model_not_loaded("play requires a loaded avatar"));
        };

        let retargeted = retarget_clip(&clip, avatar, self.retargeter.as_deref())?;
        log::debug!(
            "play {}: {} of {} tracks bound via {} ({:?})",
            clip.name,
            retargeted.matched(),
            clip.tracks.len(),
            retargeted.strategy,
            retargeted.skeleton
        );

        let action = PlaybackAction::new(retargeted, &options);
        let id = action.id();
        let fade = if options.fade_duration.is_finite() && options.fade_duration >= 0.0 {
            options.fade_duration
        } else {
            self.default_fade
        };

        // Secondary motion fights authored motion; resumed when playback ends.
        avatar.set_spring_bones_enabled(false);
        self.mixer.play(action, fade, options.immediate);
        if options.immediate {
            self.mixer.apply(avatar);
        }
        Ok(id)
    }

    /// Fades out over `STOP_FADE`; the action is cleared by a later `update`.
    pub fn stop(&mut self) {
        self.loading = false;
        if !self.mixer.stop(STOP_FADE) {
            log::debug!("stop: nothing playing");
        }
    }

    pub fn update(&mut self, delta: f32) {
        let dt = sanitize_delta(delta);
        let Some(avatar) = self.avatar.as_mut() else {
            return;
        };

        if self.mixer.update(dt, avatar) {
            avatar.set_spring_bones_enabled(true);
            log::debug!("playback finished fading out");
        }
        if let Some(session) = self.lip_sync.as_mut() {
            session.update(dt, avatar);
        }
        if let Some(view) = self.debug_view.as_mut() {
            view.rebuild(avatar);
        }
    }

    pub fn start_lip_sync(&mut self, source: Arc<dyn SpectrumSource>) -> Result<Uuid, AvatarError> {
        let Some(avatar) = self.avatar.as_mut() else {
            return Err(AvatarError::model_not_loaded("lip-sync requires a loaded avatar"));
        };
        if let Some(mut previous) = self.lip_sync.take() {
            previous.reset(avatar);
        }
        let session = LipSyncSession::new(source, VowelMap::for_kind(avatar.kind()));
        let id = session.id();
        self.lip_sync = Some(session);
        Ok(id)
    }

    pub fn stop_lip_sync(&mut self) {
        let Some(mut session) = self.lip_sync.take() else {
            return;
        };
        if let Some(avatar) = self.avatar.as_mut() {
            session.reset(avatar);
        }
    }

    pub fn is_lip_syncing(&self) -> bool {
        self.lip_sync.is_some()
    }

    pub fn mouth_weight(&self) -> f32 {
        self.lip_sync.as_ref().map(|s| s.weight()).unwrap_or(0.0)
    }

    pub fn set_debug_skeleton(&mut self, enabled: bool) {
        match (enabled, self.debug_view.is_some()) {
            (true, false) => {
                let mut view = SkeletonDebugView::default();
                if let Some(avatar) = self.avatar.as_ref() {
                    view.rebuild(avatar);
                }
                self.debug_view = Some(view);
            }
            (false, true) => self.debug_view = None,
            _ => {}
        }
    }

    pub fn debug_view(&self) -> Option<&SkeletonDebugView> {
        self.debug_view.as_ref()
    }

    /// Idempotent. Keeps the avatar attached but returns it to rest.
    pub fn dispose(&mut self) {
        self.loading = false;
        self.stop_lip_sync();
        self.mixer.clear(self.avatar.as_mut());
        self.debug_view = None;
        if let Some(avatar) = self.avatar.as_mut() {
            avatar.set_spring_bones_enabled(true);
        }
    }
}
