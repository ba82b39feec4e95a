//! Avatar model, animation and interaction.

pub mod anchor_layout;
pub mod animation;
pub mod clip;
pub mod display;
pub mod error;
pub mod interaction;
pub mod lip_sync;
pub mod mixer;
pub mod model;
pub mod retarget;
pub mod snapshot;

pub use animation::{AnimationDriver, AnimationState};
pub use clip::{AnimationClip, ClipLoader};
pub use display::{DisplayBridge, DisplayInfo};
pub use error::AvatarError;
pub use interaction::{InteractionDriver, InteractionState};
pub use lip_sync::SpectrumSource;
pub use mixer::{LoopMode, PlayOptions};
pub use model::{AvatarHandle, AvatarKind, ModelLoader};
pub use retarget::{ClipRetargeter, HumanoidRetargeter};
pub use snapshot::{AvatarStateSnapshot, SnapshotStore};
