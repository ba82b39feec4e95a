//! Loaded avatar: skeleton(s), humanoid map and expression values.

use glam::{Mat4, Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::error::AvatarError;

const NORMALIZED_PREFIX: &str = "Normalized_";

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarKind {
    Live2d,
    Vrm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkeletonKind {
    Raw,
    Normalized,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone)]
pub struct Bone {
    pub name: String,
    pub parent: Option<usize>,
    pub rest: Transform,
    pub local: Transform,
    pub world: Mat4,
}

/// Bones stored parents-first so world transforms resolve in one pass.
#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    bones: Vec<Bone>,
    index: HashMap<String, usize>,
}

impl Skeleton {
    pub fn new(bones: Vec<Bone>) -> Result<Self, AvatarError> {
        let mut index = HashMap::with_capacity(bones.len());
        for (i, bone) in bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                if parent >= i {
                    return Err(AvatarError::load(format!(
                        "bone {} listed before its parent",
                        bone.name
                    )));
                }
            }
            if index.insert(bone.name.clone(), i).is_some() {
                return Err(AvatarError::load(format!("duplicate bone {}", bone.name)));
            }
        }
        let mut skeleton = Self { bones, index };
        skeleton.update_world();
        Ok(skeleton)
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn set_local(&mut self, index: usize, local: Transform) {
        if let Some(bone) = self.bones.get_mut(index) {
            bone.local = local;
        }
    }

    pub fn reset_to_rest(&mut self) {
        for bone in &mut self.bones {
            bone.local = bone.rest;
        }
    }

    pub fn update_world(&mut self) {
        for i in 0..self.bones.len() {
            let local = self.bones[i].local.to_matrix();
            let world = match self.bones[i].parent {
                Some(p) => self.bones[p].world * local,
                None => local,
            };
            self.bones[i].world = world;
        }
    }

    pub fn world_position(&self, index: usize) -> Option<Vec3> {
        self.bones.get(index).map(|b| b.world.w_axis.truncate())
    }
}

pub struct AvatarHandle {
    name: String,
    kind: AvatarKind,
    raw: Skeleton,
    normalized: Option<Skeleton>,
    /// Normalized bone index -> raw bone index.
    normalized_to_raw: Vec<Option<usize>>,
    /// Lowercase humanoid bone name (`hips`, `leftupperarm`) -> raw bone index.
    humanoid: HashMap<String, usize>,
    expressions: BTreeMap<String, f32>,
    base_size: Vec2,
    spring_bones_enabled: bool,
}

impl AvatarHandle {
    pub fn from_asset(asset: ModelAsset) -> Result<Self, AvatarError> {
        let raw = build_skeleton(&asset.bones)?;
        let normalized = if asset.normalized_bones.is_empty() {
            None
        } else {
            Some(build_skeleton(&asset.normalized_bones)?)
        };

        let normalized_to_raw = normalized
            .as_ref()
            .map(|n| {
                n.bones()
                    .iter()
                    .map(|b| {
                        let name = b.name.strip_prefix(NORMALIZED_PREFIX).unwrap_or(&b.name);
                        raw.bone_index(name)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut humanoid = HashMap::with_capacity(asset.humanoid.len());
        for (human_name, bone_name) in &asset.humanoid {
            match raw.bone_index(bone_name) {
                Some(i) => {
                    humanoid.insert(human_name.to_ascii_lowercase(), i);
                }
                None => log::warn!(
                    "avatar {}: humanoid bone {} points at missing {}",
                    asset.name,
                    human_name,
                    bone_name
                ),
            }
        }

        let size = Vec2::new(asset.size[0], asset.size[1]);
        if !(size.x > 0.0 && size.y > 0.0 && size.is_finite()) {
            return Err(AvatarError::load(format!("avatar {} has invalid size", asset.name)));
        }

        Ok(Self {
            name: asset.name,
            kind: asset.kind,
            raw,
            normalized,
            normalized_to_raw,
            humanoid,
            expressions: asset.expressions.into_iter().map(|e| (e, 0.0)).collect(),
            base_size: size,
            spring_bones_enabled: true,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AvatarKind {
        self.kind
    }

    pub fn base_size(&self) -> Vec2 {
        self.base_size
    }

    pub fn skeleton(&self, kind: SkeletonKind) -> Option<&Skeleton> {
        match kind {
            SkeletonKind::Raw => Some(&self.raw),
            SkeletonKind::Normalized => self.normalized.as_ref(),
        }
    }

    pub fn skeleton_mut(&mut self, kind: SkeletonKind) -> Option<&mut Skeleton> {
        match kind {
            SkeletonKind::Raw => Some(&mut self.raw),
            SkeletonKind::Normalized => self.normalized.as_mut(),
        }
    }

    pub fn humanoid_bone(&self, name: &str) -> Option<usize> {
        self.humanoid.get(&name.to_ascii_lowercase()).copied()
    }

    /// Normalized index driving the given raw bone.
    pub fn normalized_index_for_raw(&self, raw_index: usize) -> Option<usize> {
        self.normalized_to_raw
            .iter()
            .position(|r| *r == Some(raw_index))
    }

    pub fn expression(&self, name: &str) -> Option<f32> {
        self.expressions.get(name).copied()
    }

    /// Unknown names are ignored; values are clamped to `0..=1`.
    pub fn set_expression(&mut self, name: &str, value: f32) -> bool {
        match self.expressions.get_mut(name) {
            Some(slot) => {
                *slot = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
                true
            }
            None => false,
        }
    }

    pub fn expressions(&self) -> &BTreeMap<String, f32> {
        &self.expressions
    }

    pub fn spring_bones_enabled(&self) -> bool {
        self.spring_bones_enabled
    }

    pub fn set_spring_bones_enabled(&mut self, enabled: bool) {
        self.spring_bones_enabled = enabled;
    }

    pub fn reset_pose(&mut self) {
        self.raw.reset_to_rest();
        if let Some(n) = self.normalized.as_mut() {
            n.reset_to_rest();
        }
        self.update_world(false);
    }

    /// Propagates local poses to world space. With `from_normalized` the
    /// normalized pose is first transferred onto the mapped raw bones;
    /// otherwise raw bones keep whatever pose was written to them.
    pub fn update_world(&mut self, from_normalized: bool) {
        if let Some(normalized) = self.normalized.as_mut() {
            normalized.update_world();
            if from_normalized {
                transfer_pose(normalized, &self.normalized_to_raw, &mut self.raw);
            }
        }
        self.raw.update_world();
    }
}

fn transfer_pose(normalized: &Skeleton, normalized_to_raw: &[Option<usize>], raw: &mut Skeleton) {
    for (n_index, raw_index) in normalized_to_raw.iter().enumerate() {
        let (Some(raw_index), Some(n_bone)) = (raw_index, normalized.bone(n_index)) else {
            continue;
        };
        let Some(raw_bone) = raw.bones.get_mut(*raw_index) else {
            continue;
        };
        let delta_rot = n_bone.rest.rotation.inverse() * n_bone.local.rotation;
        let delta_pos = n_bone.local.translation - n_bone.rest.translation;
        raw_bone.local.rotation = (raw_bone.rest.rotation * delta_rot).normalize();
        raw_bone.local.translation = raw_bone.rest.translation + delta_pos;
    }
}

fn build_skeleton(bones: &[BoneAsset]) -> Result<Skeleton, AvatarError> {
    let mut seen: HashMap<&str, usize> = HashMap::with_capacity(bones.len());
    let mut out = Vec::with_capacity(bones.len());
    for (i, asset) in bones.iter().enumerate() {
        let parent = match asset.parent.as_deref() {
            Some(name) => Some(*seen.get(name).ok_or_else(|| {
                AvatarError::load(format!(
                    "bone {} references unknown or later parent {}",
                    asset.name, name
                ))
            })?),
            None => None,
        };
        seen.insert(asset.name.as_str(), i);

        let rest = asset.transform();
        out.push(Bone {
            name: asset.name.clone(),
            parent,
            rest,
            local: rest,
            world: Mat4::IDENTITY,
        });
    }
    Skeleton::new(out)
}

fn default_kind() -> AvatarKind {
    AvatarKind::Vrm
}

fn default_rotation() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

fn default_scale() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

fn default_size() -> [f32; 2] {
    [400.0, 600.0]
}

/// On-disk model description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAsset {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: AvatarKind,
    #[serde(default)]
    pub bones: Vec<BoneAsset>,
    #[serde(default)]
    pub normalized_bones: Vec<BoneAsset>,
    /// Humanoid bone name -> raw bone name.
    #[serde(default)]
    pub humanoid: BTreeMap<String, String>,
    #[serde(default)]
    pub expressions: Vec<String>,
    /// Unscaled on-screen size in logical pixels.
    #[serde(default = "default_size")]
    pub size: [f32; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoneAsset {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub translation: [f32; 3],
    /// `[x, y, z, w]`
    #[serde(default = "default_rotation")]
    pub rotation: [f32; 4],
    #[serde(default = "default_scale")]
    pub scale: [f32; 3],
}

impl BoneAsset {
    pub fn new(name: &str, parent: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            translation: [0.0; 3],
            rotation: default_rotation(),
            scale: default_scale(),
        }
    }

    fn transform(&self) -> Transform {
        let rotation = Quat::from_array(self.rotation);
        Transform {
            translation: Vec3::from_array(self.translation),
            rotation: if rotation.length_squared() > f32::EPSILON {
                rotation.normalize()
            } else {
                Quat::IDENTITY
            },
            scale: Vec3::from_array(self.scale),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ModelLoader;

impl ModelLoader {
    pub async fn load(&self, path: &Path) -> Result<AvatarHandle, AvatarError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AvatarError::load(format!("{}: {}", path.display(), e)))?;
        let asset: ModelAsset = serde_json::from_str(&contents)
            .map_err(|e| AvatarError::load(format!("{}: {}", path.display(), e)))?;
        let avatar = AvatarHandle::from_asset(asset)?;
        log::info!(
            "avatar loaded: {} ({:?}, {} bones)",
            avatar.name(),
            avatar.kind(),
            avatar.raw.len()
        );
        Ok(avatar)
    }
}
