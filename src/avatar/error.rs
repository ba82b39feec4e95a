use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "typegen", derive(specta::Type))]
#[cfg_attr(feature = "typegen", specta(rename_all = "camelCase"))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AvatarError {
    /// The operation needs an avatar and none is attached.
    ModelNotLoaded { message: String },
    /// The clip shares no bones with the avatar.
    Retarget { message: String },
    /// Asset fetch or parse failure; the caller may retry.
    Load { message: String },
}

impl AvatarError {
    pub fn model_not_loaded(message: impl Into<String>) -> Self {
        Self::ModelNotLoaded {
            message: message.into(),
        }
    }

    pub fn retarget(message: impl Into<String>) -> Self {
        Self::Retarget {
            message: message.into(),
        }
    }

    pub fn load(message: impl Into<String>) -> Self {
        Self::Load {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::ModelNotLoaded { message } | Self::Retarget { message } | Self::Load { message } => {
                message
            }
        }
    }
}

impl std::fmt::Display for AvatarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelNotLoaded { message } => write!(f, "ModelNotLoaded: {}", message),
            Self::Retarget { message } => write!(f, "Retarget: {}", message),
            Self::Load { message } => write!(f, "Load: {}", message),
        }
    }
}

impl std::error::Error for AvatarError {}
