use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BackendError {
    /// 503: the backend is still starting up.
    NotReady { message: String },
    Http { message: String },
    Decode { message: String },
}

impl BackendError {
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady {
            message: message.into(),
        }
    }

    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::NotReady { message } | Self::Http { message } | Self::Decode { message } => {
                message
            }
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.status() == Some(reqwest::StatusCode::SERVICE_UNAVAILABLE) {
            return Self::not_ready(message);
        }
        if err.is_decode() {
            return Self::decode(message);
        }
        Self::http(message)
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotReady { message } => write!(f, "NotReady: {}", message),
            Self::Http { message } => write!(f, "Http: {}", message),
            Self::Decode { message } => write!(f, "Decode: {}", message),
        }
    }
}

impl std::error::Error for BackendError {}
