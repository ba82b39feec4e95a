//! Playback actions and the cross-fading mixer.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

use super::clip::{TrackProperty, TrackValue};
use super::model::{AvatarHandle, SkeletonKind};
use super::retarget::RetargetedClip;

/// Oldest fading actions beyond this are dropped outright.
const MAX_FADING: usize = 2;

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    Once,
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayOptions {
    pub loop_mode: LoopMode,
    pub time_scale: f32,
    /// Cross-fade length in seconds.
    pub fade_duration: f32,
    /// Snap to frame zero synchronously instead of cross-fading.
    pub immediate: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            loop_mode: LoopMode::Repeat,
            time_scale: 1.0,
            fade_duration: 0.4,
            immediate: false,
        }
    }
}

pub struct PlaybackAction {
    id: Uuid,
    retargeted: RetargetedClip,
    time: f32,
    loop_mode: LoopMode,
    time_scale: f32,
    weight: f32,
    /// Weight change per second; zero when not fading.
    fade_rate: f32,
    enabled: bool,
    finished: bool,
    cursors: Vec<usize>,
}

impl PlaybackAction {
    pub fn new(retargeted: RetargetedClip, options: &PlayOptions) -> Self {
        let cursors = vec![0; retargeted.bindings.len()];
        Self {
            id: Uuid::new_v4(),
            retargeted,
            time: 0.0,
            loop_mode: options.loop_mode,
            time_scale: if options.time_scale.is_finite() {
                options.time_scale
            } else {
                1.0
            },
            weight: 1.0,
            fade_rate: 0.0,
            enabled: true,
            finished: false,
            cursors,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn clip_name(&self) -> &str {
        &self.retargeted.clip.name
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_fading(&self) -> bool {
        self.fade_rate != 0.0
    }

    fn fade_in(&mut self, duration: f32) {
        if duration > 0.0 {
            self.weight = 0.0;
            self.fade_rate = 1.0 / duration;
        } else {
            self.weight = 1.0;
            self.fade_rate = 0.0;
        }
    }

    fn fade_out(&mut self, duration: f32) {
        if duration > 0.0 {
            self.fade_rate = -self.weight.max(f32::EPSILON) / duration;
        } else {
            self.weight = 0.0;
            self.fade_rate = 0.0;
            self.enabled = false;
        }
    }

    /// `dt` is wall time; the clip clock runs at `dt * time_scale`.
    fn advance(&mut self, dt: f32) {
        if !self.enabled {
            return;
        }

        let duration = self.retargeted.clip.duration;
        self.time += dt * self.time_scale;
        match self.loop_mode {
            LoopMode::Repeat if duration > 0.0 => {
                self.time = self.time.rem_euclid(duration);
            }
            LoopMode::Repeat => self.time = 0.0,
            LoopMode::Once => {
                if self.time >= duration || self.time < 0.0 {
                    self.time = self.time.clamp(0.0, duration);
                    self.finished = true;
                }
            }
        }

        if self.fade_rate != 0.0 {
            self.weight = (self.weight + self.fade_rate * dt).clamp(0.0, 1.0);
            if self.fade_rate > 0.0 && self.weight >= 1.0 {
                self.fade_rate = 0.0;
            } else if self.fade_rate < 0.0 && self.weight <= 0.0 {
                self.fade_rate = 0.0;
                self.enabled = false;
            }
        }
    }

    /// Blends this action's sample into `avatar` with the action weight.
    fn blend_into(&mut self, avatar: &mut AvatarHandle) {
        let weight = self.weight;
        if !self.enabled || weight <= 0.0 {
            return;
        }
        let Some(skeleton) = avatar.skeleton_mut(self.retargeted.skeleton) else {
            return;
        };
        let clip = self.retargeted.clip.clone();
        for (binding, cursor) in self.retargeted.bindings.iter().zip(self.cursors.iter_mut()) {
            let Some(track) = clip.tracks.get(binding.track) else {
                continue;
            };
            let Some(bone) = skeleton.bone(binding.bone) else {
                continue;
            };
            let mut local = bone.local;
            match track.sample(self.time, cursor) {
                TrackValue::Quat(q) => {
                    local.rotation = blend_quat(local.rotation, q, weight);
                }
                TrackValue::Vec3(v) => match binding.property {
                    TrackProperty::Scale => local.scale = blend_vec(local.scale, v, weight),
                    _ => local.translation = blend_vec(local.translation, v, weight),
                },
            }
            skeleton.set_local(binding.bone, local);
        }
    }
}

fn blend_quat(from: Quat, to: Quat, weight: f32) -> Quat {
    if weight >= 1.0 {
        return to.normalize();
    }
    from.slerp(to.normalize(), weight).normalize()
}

fn blend_vec(from: Vec3, to: Vec3, weight: f32) -> Vec3 {
    if weight >= 1.0 {
        return to;
    }
    from.lerp(to, weight)
}

/// One primary action plus the ones still fading out behind it.
#[derive(Default)]
pub struct Mixer {
    current: Option<PlaybackAction>,
    fading: SmallVec<[PlaybackAction; MAX_FADING]>,
}

impl Mixer {
    pub fn current(&self) -> Option<&PlaybackAction> {
        self.current.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some() || !self.fading.is_empty()
    }

    pub fn is_cross_fading(&self) -> bool {
        !self.fading.is_empty() || self.current.as_ref().is_some_and(|a| a.is_fading())
    }

    /// Starts `action`, cross-fading from the current one over `fade`
    /// seconds, or hard-switching when `immediate`.
    pub fn play(&mut self, mut action: PlaybackAction, fade: f32, immediate: bool) {
        if immediate {
            self.fading.clear();
            self.current = None;
            action.fade_in(0.0);
            self.current = Some(action);
            return;
        }

        match self.current.take() {
            Some(mut previous) => {
                previous.fade_out(fade);
                if self.fading.len() >= MAX_FADING {
                    self.fading.remove(0);
                }
                self.fading.push(previous);
                action.fade_in(fade);
            }
            None => action.fade_in(fade),
        }
        self.current = Some(action);
    }

    /// Moves the current action to the fade-out list.
    pub fn stop(&mut self, fade: f32) -> bool {
        let Some(mut action) = self.current.take() else {
            return false;
        };
        action.fade_out(fade);
        if self.fading.len() >= MAX_FADING {
            self.fading.remove(0);
        }
        self.fading.push(action);
        true
    }

    /// Advances every action, drops the fully faded ones and writes the
    /// blended pose. Returns `true` if the mixer went idle during this call.
    pub fn update(&mut self, dt: f32, avatar: &mut AvatarHandle) -> bool {
        let was_active = self.is_active();
        for action in self.fading.iter_mut() {
            action.advance(dt);
        }
        self.fading.retain(|a| a.enabled);
        if let Some(action) = self.current.as_mut() {
            action.advance(dt);
            if !action.enabled {
                self.current = None;
            }
        }

        if was_active {
            self.apply(avatar);
        }
        was_active && !self.is_active()
    }

    /// Writes the pose without advancing time.
    pub fn apply(&mut self, avatar: &mut AvatarHandle) {
        let mut used = [false; 2];
        for action in self.fading.iter().chain(self.current.iter()) {
            used[skeleton_slot(action.retargeted.skeleton)] = true;
        }
        for (slot, kind) in [SkeletonKind::Raw, SkeletonKind::Normalized].into_iter().enumerate() {
            if used[slot] || !self.is_active() {
                if let Some(skeleton) = avatar.skeleton_mut(kind) {
                    skeleton.reset_to_rest();
                }
            }
        }

        for action in self.fading.iter_mut() {
            action.blend_into(avatar);
        }
        if let Some(action) = self.current.as_mut() {
            action.blend_into(avatar);
        }
        avatar.update_world(used[skeleton_slot(SkeletonKind::Normalized)]);
    }

    /// Drops every action and returns the avatar to its rest pose.
    pub fn clear(&mut self, avatar: Option<&mut AvatarHandle>) {
        self.current = None;
        self.fading.clear();
        if let Some(avatar) = avatar {
            avatar.reset_pose();
        }
    }
}

fn skeleton_slot(kind: SkeletonKind) -> usize {
    match kind {
        SkeletonKind::Raw => 0,
        SkeletonKind::Normalized => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::clip::tests::{hips_spine_clip, track};
    use crate::avatar::clip::AnimationClip;
    use crate::avatar::model::tests::{plain_asset, vrm_asset};
    use crate::avatar::retarget::{retarget_clip, HumanoidRetargeter};
    use std::sync::Arc;

    fn setup() -> (AvatarHandle, RetargetedClip) {
        let avatar = AvatarHandle::from_asset(plain_asset()).unwrap();
        let clip = Arc::new(hips_spine_clip());
        let r = retarget_clip(&clip, &avatar, None).unwrap();
        (avatar, r)
    }

    fn hips_y(avatar: &AvatarHandle) -> f32 {
        avatar.skeleton(SkeletonKind::Raw).unwrap().bones()[0].local.translation.y
    }

    #[test]
    fn test_repeat_wraps_and_once_finishes() {
        let (_, r) = setup();
        let mut action = PlaybackAction::new(r.clone(), &PlayOptions::default());
        action.advance(1.25);
        assert!((action.time() - 0.25).abs() < 1e-5);

        let mut once = PlaybackAction::new(
            r,
            &PlayOptions {
                loop_mode: LoopMode::Once,
                time_scale: 2.0,
                ..PlayOptions::default()
            },
        );
        once.advance(0.75);
        assert!(once.is_finished());
        assert_eq!(once.time(), 1.0);
    }

    #[test]
    fn test_immediate_play_poses_without_fade() {
        let (mut avatar, r) = setup();
        let mut mixer = Mixer::default();
        let mut action = PlaybackAction::new(r, &PlayOptions::default());
        action.time = 0.5;
        mixer.play(action, 0.4, true);
        mixer.apply(&mut avatar);
        assert!((hips_y(&avatar) - 0.5).abs() < 1e-5);
        assert!(!mixer.is_cross_fading());
    }

    #[test]
    fn test_cross_fade_blends_then_settles() {
        let (mut avatar, r) = setup();
        let still = Arc::new(AnimationClip::new(
            "still",
            Some(1.0),
            vec![track("Hips.position", &[0.0], &[0.0, 2.0, 0.0])],
        ));
        let still = retarget_clip(&still, &avatar, None).unwrap();

        let mut mixer = Mixer::default();
        mixer.play(PlaybackAction::new(still, &PlayOptions::default()), 0.4, true);
        mixer.update(0.0, &mut avatar);
        assert!((hips_y(&avatar) - 2.0).abs() < 1e-5);

        // Cross-fade to the wave clip, which holds hips at y=0 at t=0.
        let opts = PlayOptions {
            time_scale: 0.0,
            ..PlayOptions::default()
        };
        mixer.play(PlaybackAction::new(r, &opts), 0.4, false);
        assert!(mixer.is_cross_fading());

        mixer.update(0.2, &mut avatar);
        let mid = hips_y(&avatar);
        assert!(mid > 0.0 && mid < 2.0, "mid-fade hips at {mid}");

        mixer.update(0.25, &mut avatar);
        assert!(!mixer.is_cross_fading());
        assert!(hips_y(&avatar).abs() < 1e-5);
    }

    #[test]
    fn test_stop_fades_out_then_goes_idle() {
        let (mut avatar, r) = setup();
        let mut mixer = Mixer::default();
        mixer.play(PlaybackAction::new(r, &PlayOptions::default()), 0.0, true);
        mixer.update(0.5, &mut avatar);
        assert!(mixer.stop(0.3));
        assert!(mixer.current().is_none());
        assert!(!mixer.update(0.1, &mut avatar));
        assert!(mixer.update(0.25, &mut avatar));
        assert!(!mixer.is_active());
        assert!(hips_y(&avatar).abs() < 1e-5);
    }

    #[test]
    fn test_raw_bound_clip_poses_rig_with_normalized_copy() {
        let mut avatar = AvatarHandle::from_asset(vrm_asset()).unwrap();
        let turn = Quat::from_rotation_y(1.0);
        let t = turn.to_array();
        let clip = Arc::new(AnimationClip::new(
            "twist",
            Some(1.0),
            vec![track("J_Bip_C_Spine.quaternion", &[0.0], &t)],
        ));
        let r = retarget_clip(&clip, &avatar, None).unwrap();
        assert_eq!(r.skeleton, SkeletonKind::Raw);

        let mut mixer = Mixer::default();
        mixer.play(PlaybackAction::new(r, &PlayOptions::default()), 0.0, true);
        mixer.update(1.0 / 60.0, &mut avatar);

        let raw = avatar.skeleton(SkeletonKind::Raw).unwrap();
        let spine = raw.bone_index("J_Bip_C_Spine").unwrap();
        assert!(raw.bones()[spine].local.rotation.angle_between(turn) < 1e-4);
    }

    #[test]
    fn test_normalized_bound_clip_drives_raw_rig() {
        let mut avatar = AvatarHandle::from_asset(vrm_asset()).unwrap();
        let r = retarget_clip(&Arc::new(hips_spine_clip()), &avatar, Some(&HumanoidRetargeter)).unwrap();
        assert_eq!(r.skeleton, SkeletonKind::Normalized);

        let mut mixer = Mixer::default();
        let mut action = PlaybackAction::new(r, &PlayOptions::default());
        action.time = 0.5;
        mixer.play(action, 0.0, true);
        mixer.apply(&mut avatar);

        let raw = avatar.skeleton(SkeletonKind::Raw).unwrap();
        assert!((raw.bones()[0].local.translation.y - 0.5).abs() < 1e-5);
    }
}
