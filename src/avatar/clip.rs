//! Keyframe clips and their loader.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::error::AvatarError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackProperty {
    Position,
    Quaternion,
    Scale,
}

impl TrackProperty {
    fn parse(suffix: &str) -> Option<Self> {
        match suffix.to_ascii_lowercase().as_str() {
            "position" | "translation" => Some(Self::Position),
            "quaternion" | "rotation" => Some(Self::Quaternion),
            "scale" => Some(Self::Scale),
            _ => None,
        }
    }

    pub fn stride(self) -> usize {
        match self {
            Self::Quaternion => 4,
            Self::Position | Self::Scale => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackValue {
    Vec3(Vec3),
    Quat(Quat),
}

#[derive(Debug, Clone)]
pub struct KeyframeTrack {
    /// Full track name as authored, e.g. `mixamorig:Hips.position`.
    pub name: String,
    /// Target bone portion of `name`.
    pub bone: String,
    pub property: TrackProperty,
    pub times: Vec<f32>,
    pub values: Vec<f32>,
}

impl KeyframeTrack {
    pub fn new(name: &str, times: Vec<f32>, values: Vec<f32>) -> Result<Self, AvatarError> {
        let (bone, suffix) = name
            .rsplit_once('.')
            .ok_or_else(|| AvatarError::load(format!("track {} has no property suffix", name)))?;
        let property = TrackProperty::parse(suffix)
            .ok_or_else(|| AvatarError::load(format!("track {} has unsupported property", name)))?;

        if times.is_empty() {
            return Err(AvatarError::load(format!("track {} has no keyframes", name)));
        }
        if values.len() != times.len() * property.stride() {
            return Err(AvatarError::load(format!(
                "track {}: expected {} values, got {}",
                name,
                times.len() * property.stride(),
                values.len()
            )));
        }
        if times.windows(2).any(|w| !(w[0] <= w[1])) || times.iter().any(|t| !t.is_finite()) {
            return Err(AvatarError::load(format!("track {} times are not sorted", name)));
        }

        Ok(Self {
            name: name.to_string(),
            bone: bone.to_string(),
            property,
            times,
            values,
        })
    }

    pub fn end_time(&self) -> f32 {
        self.times.last().copied().unwrap_or(0.0)
    }

    fn key(&self, i: usize) -> TrackValue {
        let stride = self.property.stride();
        let v = &self.values[i * stride..(i + 1) * stride];
        match self.property {
            TrackProperty::Quaternion => TrackValue::Quat(Quat::from_xyzw(v[0], v[1], v[2], v[3])),
            TrackProperty::Position | TrackProperty::Scale => {
                TrackValue::Vec3(Vec3::new(v[0], v[1], v[2]))
            }
        }
    }

    /// Samples at `time`. `cursor` caches the last keyframe so forward
    /// playback is amortized O(1); it rewinds when time goes backwards.
    pub fn sample(&self, time: f32, cursor: &mut usize) -> TrackValue {
        let last = self.times.len() - 1;
        if *cursor > last || time < self.times[*cursor] {
            *cursor = 0;
        }
        while *cursor < last && self.times[*cursor + 1] <= time {
            *cursor += 1;
        }

        let i = *cursor;
        if i == last || time <= self.times[i] {
            return self.key(i);
        }

        let t0 = self.times[i];
        let t1 = self.times[i + 1];
        let alpha = if t1 > t0 { (time - t0) / (t1 - t0) } else { 0.0 };
        match (self.key(i), self.key(i + 1)) {
            (TrackValue::Quat(a), TrackValue::Quat(b)) => {
                TrackValue::Quat(a.normalize().slerp(b.normalize(), alpha))
            }
            (TrackValue::Vec3(a), TrackValue::Vec3(b)) => TrackValue::Vec3(a.lerp(b, alpha)),
            (a, _) => a,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnimationClip {
    pub name: String,
    pub duration: f32,
    pub tracks: Vec<KeyframeTrack>,
}

impl AnimationClip {
    /// Duration defaults to the last keyframe of the longest track.
    pub fn new(name: &str, duration: Option<f32>, tracks: Vec<KeyframeTrack>) -> Self {
        let longest = tracks.iter().map(|t| t.end_time()).fold(0.0f32, f32::max);
        let duration = duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(longest);
        Self {
            name: name.to_string(),
            duration,
            tracks,
        }
    }

    pub fn from_asset(asset: ClipAsset) -> Result<Self, AvatarError> {
        let tracks = asset
            .tracks
            .into_iter()
            .map(|t| KeyframeTrack::new(&t.name, t.times, t.values))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(&asset.name, asset.duration, tracks))
    }
}

/// On-disk clip description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipAsset {
    pub name: String,
    #[serde(default)]
    pub duration: Option<f32>,
    pub tracks: Vec<TrackAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackAsset {
    pub name: String,
    pub times: Vec<f32>,
    pub values: Vec<f32>,
}

/// Loads clips from disk, handing out the same `Arc` for repeated paths.
#[derive(Default)]
pub struct ClipLoader {
    cache: Mutex<HashMap<PathBuf, Arc<AnimationClip>>>,
}

impl ClipLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(&self, path: &Path) -> Result<Arc<AnimationClip>, AvatarError> {
        if let Some(clip) = self.cache.lock().ok().and_then(|c| c.get(path).cloned()) {
            log::debug!("clip cache hit: {}", path.display());
            return Ok(clip);
        }

        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AvatarError::load(format!("{}: {}", path.display(), e)))?;
        let asset: ClipAsset = serde_json::from_str(&contents)
            .map_err(|e| AvatarError::load(format!("{}: {}", path.display(), e)))?;
        let clip = Arc::new(AnimationClip::from_asset(asset)?);

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(path.to_path_buf(), clip.clone());
        }
        Ok(clip)
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn track(name: &str, times: &[f32], values: &[f32]) -> KeyframeTrack {
        KeyframeTrack::new(name, times.to_vec(), values.to_vec()).unwrap()
    }

    /// `Hips.position` and `Spine.quaternion`, one second long.
    pub(crate) fn hips_spine_clip() -> AnimationClip {
        let half = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        AnimationClip::new(
            "wave",
            None,
            vec![
                track("Hips.position", &[0.0, 1.0], &[0.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
                track(
                    "Spine.quaternion",
                    &[0.0, 1.0],
                    &[0.0, 0.0, 0.0, 1.0, half.x, half.y, half.z, half.w],
                ),
            ],
        )
    }

    #[test]
    fn test_track_name_parsing() {
        let t = track("mixamorig:Hips.position", &[0.0], &[0.0, 0.0, 0.0]);
        assert_eq!(t.bone, "mixamorig:Hips");
        assert_eq!(t.property, TrackProperty::Position);

        assert!(KeyframeTrack::new("Hips", vec![0.0], vec![0.0; 3]).is_err());
        assert!(KeyframeTrack::new("Hips.morph", vec![0.0], vec![0.0; 3]).is_err());
        assert!(KeyframeTrack::new("Hips.scale", vec![0.0, 1.0], vec![0.0; 3]).is_err());
        assert!(KeyframeTrack::new("Hips.scale", vec![1.0, 0.0], vec![0.0; 6]).is_err());
    }

    #[test]
    fn test_sampling_interpolates_and_clamps() {
        let clip = hips_spine_clip();
        let hips = &clip.tracks[0];
        let mut cursor = 0;

        assert_eq!(hips.sample(-1.0, &mut cursor), TrackValue::Vec3(Vec3::ZERO));
        assert_eq!(
            hips.sample(0.5, &mut cursor),
            TrackValue::Vec3(Vec3::new(0.0, 0.5, 0.0))
        );
        assert_eq!(
            hips.sample(5.0, &mut cursor),
            TrackValue::Vec3(Vec3::new(0.0, 1.0, 0.0))
        );
        // Rewind after a loop wrap.
        assert_eq!(hips.sample(0.0, &mut cursor), TrackValue::Vec3(Vec3::ZERO));
        assert_eq!(cursor, 0);

        let TrackValue::Quat(q) = clip.tracks[1].sample(0.5, &mut 0) else {
            panic!("expected quaternion");
        };
        let expected = Quat::from_rotation_y(std::f32::consts::FRAC_PI_4);
        assert!(q.angle_between(expected) < 1e-4);
    }

    #[test]
    fn test_duration_defaults_to_longest_track() {
        let clip = hips_spine_clip();
        assert_eq!(clip.duration, 1.0);
        let clip = AnimationClip::new("x", Some(2.5), clip.tracks);
        assert_eq!(clip.duration, 2.5);
    }

    #[tokio::test]
    async fn test_loader_caches_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wave.json");
        let asset = ClipAsset {
            name: "wave".into(),
            duration: None,
            tracks: vec![TrackAsset {
                name: "Hips.position".into(),
                times: vec![0.0, 1.0],
                values: vec![0.0; 6],
            }],
        };
        std::fs::write(&path, serde_json::to_string(&asset).unwrap()).unwrap();

        let loader = ClipLoader::new();
        let a = loader.load(&path).await.unwrap();
        std::fs::remove_file(&path).unwrap();
        let b = loader.load(&path).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        loader.clear();
        assert!(matches!(loader.load(&path).await, Err(AvatarError::Load { .. })));
    }
}
