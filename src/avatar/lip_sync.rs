//! Mouth-open signal derived from a live frequency spectrum.

use std::sync::Arc;
use uuid::Uuid;

use super::model::{AvatarHandle, AvatarKind};

/// Band volume mapped to a fully open mouth.
pub const VOLUME_CEILING: f32 = 100.0;
/// Exponential smoothing rate toward the target weight, per second.
pub const SMOOTHING_RATE: f32 = 12.0;

const LOW_BAND_FRACTION: f32 = 0.10;
const MID_BAND_FRACTION: f32 = 0.20;

/// Live audio analyser, e.g. a microphone FFT with byte magnitudes.
pub trait SpectrumSource: Send + Sync {
    fn bin_count(&self) -> usize;
    /// Fills `out` (length `bin_count()`) with magnitudes in `0..=255`.
    fn frequency_data(&self, out: &mut [u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vowel {
    Aa,
    Ih,
    Ou,
    Ee,
    Oh,
}

/// Vowel -> expression name on the current avatar.
#[derive(Debug, Clone)]
pub struct VowelMap {
    entries: Vec<(Vowel, String)>,
}

impl VowelMap {
    pub fn new(entries: Vec<(Vowel, String)>) -> Self {
        Self { entries }
    }

    pub fn for_kind(kind: AvatarKind) -> Self {
        match kind {
            AvatarKind::Vrm => Self::new(vec![
                (Vowel::Aa, "aa".into()),
                (Vowel::Ih, "ih".into()),
                (Vowel::Ou, "ou".into()),
                (Vowel::Ee, "ee".into()),
                (Vowel::Oh, "oh".into()),
            ]),
            AvatarKind::Live2d => Self::new(vec![(Vowel::Aa, "ParamMouthOpenY".into())]),
        }
    }

    pub fn expression_for(&self, vowel: Vowel) -> Option<&str> {
        self.entries
            .iter()
            .find(|(v, _)| *v == vowel)
            .map(|(_, name)| name.as_str())
    }

    pub fn expressions(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, name)| name.as_str())
    }
}

fn average(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    bins.iter().map(|&b| b as f32).sum::<f32>() / bins.len() as f32
}

/// Voice energy proxy: the low band, or half the mid band if that is larger.
pub fn band_volume(bins: &[u8]) -> f32 {
    let n = bins.len();
    if n == 0 {
        return 0.0;
    }
    let low_end = ((n as f32 * LOW_BAND_FRACTION) as usize).clamp(1, n);
    let mid_end = (low_end + (n as f32 * MID_BAND_FRACTION) as usize).min(n);
    let low = average(&bins[..low_end]);
    let mid = average(&bins[low_end..mid_end]);
    low.max(mid * 0.5)
}

pub fn target_weight(volume: f32) -> f32 {
    (volume / VOLUME_CEILING).clamp(0.0, 1.0)
}

pub struct LipSyncSession {
    id: Uuid,
    source: Arc<dyn SpectrumSource>,
    vowels: VowelMap,
    weight: f32,
    bins: Vec<u8>,
}

impl LipSyncSession {
    pub fn new(source: Arc<dyn SpectrumSource>, vowels: VowelMap) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            vowels,
            weight: 0.0,
            bins: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn update(&mut self, dt: f32, avatar: &mut AvatarHandle) {
        let n = self.source.bin_count();
        self.bins.resize(n, 0);
        self.source.frequency_data(&mut self.bins);

        let target = target_weight(band_volume(&self.bins));
        let blend = 1.0 - (-SMOOTHING_RATE * dt).exp();
        self.weight += (target - self.weight) * blend;
        if !self.weight.is_finite() {
            self.weight = 0.0;
        }

        if let Some(name) = self.vowels.expression_for(Vowel::Aa) {
            avatar.set_expression(name, self.weight);
        }
    }

    /// Zeroes every mapped mouth expression.
    pub fn reset(&mut self, avatar: &mut AvatarHandle) {
        self.weight = 0.0;
        for name in self.vowels.expressions() {
            avatar.set_expression(name, 0.0);
        }
    }
}
