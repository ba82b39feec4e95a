//! Binding clip tracks onto an avatar's bones.
//!
//! Two strategies, tried in order: an optional retargeter capability chosen
//! at start-up (the humanoid-map one ships here), then plain bone-name
//! matching against whichever skeleton fits the clip best.

use std::collections::HashMap;
use std::sync::Arc;

use super::clip::{AnimationClip, TrackProperty};
use super::error::AvatarError;
use super::model::{AvatarHandle, Skeleton, SkeletonKind};

/// Leading tracks scored when choosing a skeleton; every track is scored
/// when none of these match.
const SAMPLE_TRACKS: usize = 32;

const NAMESPACE_PREFIXES: [&str; 4] = ["mixamorig:", "mixamorig_", "mixamorig", "normalized_"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundTrack {
    pub track: usize,
    pub bone: usize,
    pub property: TrackProperty,
}

#[derive(Debug, Clone)]
pub struct RetargetedClip {
    pub clip: Arc<AnimationClip>,
    pub skeleton: SkeletonKind,
    pub bindings: Vec<BoundTrack>,
    pub strategy: &'static str,
}

impl RetargetedClip {
    pub fn matched(&self) -> usize {
        self.bindings.len()
    }
}

/// Clip-to-avatar retargeting capability.
pub trait ClipRetargeter: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` (or no bindings) hands over to the name-matching fallback.
    fn retarget(&self, clip: &Arc<AnimationClip>, avatar: &AvatarHandle) -> Option<RetargetedClip>;
}

/// Maps tracks authored against VRM humanoid bone names (`hips`,
/// `leftUpperArm`) through the avatar's humanoid table. Binds onto the
/// normalized rig when the avatar has one.
#[derive(Debug, Clone, Copy, Default)]
pub struct HumanoidRetargeter;

impl ClipRetargeter for HumanoidRetargeter {
    fn name(&self) -> &'static str {
        "humanoid"
    }

    fn retarget(&self, clip: &Arc<AnimationClip>, avatar: &AvatarHandle) -> Option<RetargetedClip> {
        let use_normalized = avatar.skeleton(SkeletonKind::Normalized).is_some();
        let bindings: Vec<BoundTrack> = clip
            .tracks
            .iter()
            .enumerate()
            .filter_map(|(i, track)| {
                let raw = avatar.humanoid_bone(&track.bone)?;
                let bone = if use_normalized {
                    avatar.normalized_index_for_raw(raw)?
                } else {
                    raw
                };
                Some(BoundTrack {
                    track: i,
                    bone,
                    property: track.property,
                })
            })
            .collect();

        if bindings.is_empty() {
            return None;
        }
        Some(RetargetedClip {
            clip: clip.clone(),
            skeleton: if use_normalized {
                SkeletonKind::Normalized
            } else {
                SkeletonKind::Raw
            },
            bindings,
            strategy: self.name(),
        })
    }
}

/// Lowercases and strips path segments and known namespace prefixes:
/// `Armature|mixamorig:LeftArm` -> `leftarm`.
pub fn normalize_bone_name(name: &str) -> String {
    let tail = name.rsplit(['|', '/']).next().unwrap_or(name);
    let mut lower = tail.trim().to_ascii_lowercase();
    for prefix in NAMESPACE_PREFIXES {
        if let Some(rest) = lower.strip_prefix(prefix) {
            lower = rest.to_string();
            break;
        }
    }
    match lower.rsplit_once(':') {
        Some((_, rest)) => rest.to_string(),
        None => lower,
    }
}

fn match_count(names: &[String], table: &HashMap<String, usize>, limit: usize) -> usize {
    names
        .iter()
        .take(limit)
        .filter(|n| table.contains_key(n.as_str()))
        .count()
}

fn name_table(skeleton: &Skeleton) -> HashMap<String, usize> {
    let mut table = HashMap::with_capacity(skeleton.len());
    for (i, bone) in skeleton.bones().iter().enumerate() {
        table.entry(normalize_bone_name(&bone.name)).or_insert(i);
    }
    table
}

/// Case-insensitive bone-name matching fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameMatchRetargeter;

impl ClipRetargeter for NameMatchRetargeter {
    fn name(&self) -> &'static str {
        "name-match"
    }

    fn retarget(&self, clip: &Arc<AnimationClip>, avatar: &AvatarHandle) -> Option<RetargetedClip> {
        let track_names: Vec<String> = clip
            .tracks
            .iter()
            .map(|t| normalize_bone_name(&t.bone))
            .collect();

        let mut best: Option<(SkeletonKind, HashMap<String, usize>, usize)> = None;
        for kind in [SkeletonKind::Raw, SkeletonKind::Normalized] {
            let Some(skeleton) = avatar.skeleton(kind) else {
                continue;
            };
            let table = name_table(skeleton);
            let score = match_count(&track_names, &table, SAMPLE_TRACKS);
            let score = if score == 0 {
                match_count(&track_names, &table, track_names.len())
            } else {
                score
            };
            log::debug!("retarget: {:?} skeleton matches {} tracks", kind, score);
            if best.as_ref().is_none_or(|(_, _, s)| score > *s) {
                best = Some((kind, table, score));
            }
        }

        let (kind, table, _) = best?;
        let bindings: Vec<BoundTrack> = track_names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| {
                table.get(name.as_str()).map(|&bone| BoundTrack {
                    track: i,
                    bone,
                    property: clip.tracks[i].property,
                })
            })
            .collect();

        if bindings.is_empty() {
            return None;
        }
        Some(RetargetedClip {
            clip: clip.clone(),
            skeleton: kind,
            bindings,
            strategy: self.name(),
        })
    }
}

/// Runs `library` first (if any), then name matching.
pub fn retarget_clip(
    clip: &Arc<AnimationClip>,
    avatar: &AvatarHandle,
    library: Option<&dyn ClipRetargeter>,
) -> Result<RetargetedClip, AvatarError> {
    if let Some(library) = library {
        match library.retarget(clip, avatar) {
            Some(r) if r.matched() > 0 => return Ok(r),
            _ => log::debug!(
                "retarget: {} matched nothing for {}, falling back to name matching",
                library.name(),
                clip.name
            ),
        }
    }

    match NameMatchRetargeter.retarget(clip, avatar) {
        Some(r) => Ok(r),
        None => Err(AvatarError::retarget(format!(
            "clip {} shares no bones with avatar {}",
            clip.name,
            avatar.name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::clip::tests::{hips_spine_clip, track};
    use crate::avatar::model::BoneAsset;
    use crate::avatar::model::tests::{plain_asset, vrm_asset};

    #[test]
    fn test_normalize_bone_name() {
        assert_eq!(normalize_bone_name("mixamorig:LeftArm"), "leftarm");
        assert_eq!(normalize_bone_name("Armature|mixamorig:Hips"), "hips");
        assert_eq!(normalize_bone_name("Armature/Spine"), "spine");
        assert_eq!(normalize_bone_name("Normalized_J_Bip_C_Hips"), "j_bip_c_hips");
        assert_eq!(normalize_bone_name("rig:Head"), "head");
    }

    #[test]
    fn test_plain_names_match_both_tracks() {
        let avatar = AvatarHandle::from_asset(plain_asset()).unwrap();
        let clip = Arc::new(hips_spine_clip());
        let r = retarget_clip(&clip, &avatar, None).unwrap();
        assert_eq!(r.matched(), 2);
        assert_eq!(r.skeleton, SkeletonKind::Raw);
        assert_eq!(r.strategy, "name-match");
    }

    #[test]
    fn test_humanoid_capability_is_preferred() {
        let avatar = AvatarHandle::from_asset(vrm_asset()).unwrap();
        let clip = Arc::new(hips_spine_clip());
        let r = retarget_clip(&clip, &avatar, Some(&HumanoidRetargeter)).unwrap();
        assert_eq!(r.strategy, "humanoid");
        assert_eq!(r.skeleton, SkeletonKind::Normalized);
        assert_eq!(r.matched(), 2);
    }

    #[test]
    fn test_fallback_picks_skeleton_with_most_matches() {
        let avatar = AvatarHandle::from_asset(vrm_asset()).unwrap();
        // Only the raw rig has a head bone.
        let clip = Arc::new(AnimationClip::new(
            "nod",
            None,
            vec![
                track("J_Bip_C_Head.quaternion", &[0.0], &[0.0, 0.0, 0.0, 1.0]),
                track("J_Bip_C_Spine.quaternion", &[0.0], &[0.0, 0.0, 0.0, 1.0]),
            ],
        ));
        let r = retarget_clip(&clip, &avatar, Some(&HumanoidRetargeter)).unwrap();
        assert_eq!(r.strategy, "name-match");
        assert_eq!(r.skeleton, SkeletonKind::Raw);
        assert_eq!(r.matched(), 2);

        let clip = Arc::new(AnimationClip::new(
            "lean",
            None,
            vec![track("Normalized_J_Bip_C_Spine.quaternion", &[0.0], &[0.0, 0.0, 0.0, 1.0])],
        ));
        // Ties go to the raw rig.
        let r = retarget_clip(&clip, &avatar, None).unwrap();
        assert_eq!(r.skeleton, SkeletonKind::Raw);
    }

    #[test]
    fn test_no_shared_bones_is_retarget_error() {
        let avatar = AvatarHandle::from_asset(plain_asset()).unwrap();
        let clip = Arc::new(AnimationClip::new(
            "tail",
            None,
            vec![track("Tail.quaternion", &[0.0], &[0.0, 0.0, 0.0, 1.0])],
        ));
        let err = retarget_clip(&clip, &avatar, Some(&HumanoidRetargeter)).unwrap_err();
        assert!(matches!(err, AvatarError::Retarget { .. }));
    }

    #[test]
    fn test_matches_past_the_sample_window_are_counted() {
        let mut asset = vrm_asset();
        asset
            .normalized_bones
            .push(BoneAsset::new("Normalized_Tail", Some("Normalized_J_Bip_C_Hips")));
        let avatar = AvatarHandle::from_asset(asset).unwrap();

        // Only the normalized rig has a tail, and it appears after the sample.
        let mut tracks: Vec<_> = (0..SAMPLE_TRACKS)
            .map(|i| track(&format!("Prop{i}.position"), &[0.0], &[0.0, 0.0, 0.0]))
            .collect();
        tracks.push(track("Tail.quaternion", &[0.0], &[0.0, 0.0, 0.0, 1.0]));
        let clip = Arc::new(AnimationClip::new("sway", None, tracks));

        let r = retarget_clip(&clip, &avatar, None).unwrap();
        assert_eq!(r.skeleton, SkeletonKind::Normalized);
        assert_eq!(r.matched(), 1);
        assert_eq!(r.bindings[0].track, SAMPLE_TRACKS);
    }
}
