use thiserror::Error;

#[derive(Debug, Error)]
pub enum HuddleError {
    #[error("permission denied: {message}")]
    Permission {
        message: String,
        /// The grant was permanently refused; only the system settings can fix it.
        open_settings: bool,
    },
    #[error("provisioning failed: {message}")]
    Provisioning {
        message: String,
        status: Option<u16>,
        body: Option<String>,
    },
    #[error("media engine error: {0}")]
    Engine(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("join cancelled by leave")]
    Cancelled,
}

impl HuddleError {
    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::Provisioning {
            message: message.into(),
            status: None,
            body: None,
        }
    }

    /// A 2xx response whose body lacks the meeting or attendee credentials.
    pub fn invalid_payload() -> Self {
        Self::provisioning("invalid payload")
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Permission { .. } => ErrorKind::Permission,
            Self::Provisioning { .. } => ErrorKind::Provisioning,
            Self::Engine(_) => ErrorKind::Engine,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::State(_) | Self::Cancelled => ErrorKind::State,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether a fresh caller action could succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Permission { .. } | Self::Provisioning { .. } | Self::Timeout(_) => true,
            Self::Engine(_) | Self::Cancelled => true,
            Self::State(_) | Self::Config(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Permission,
    Provisioning,
    Engine,
    Timeout,
    State,
    Config,
}

/// The error currently surfaced to the UI. Only the most recent one is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&HuddleError> for SessionError {
    fn from(err: &HuddleError) -> Self {
        let message = match err {
            HuddleError::Permission { message, .. } => message.clone(),
            HuddleError::Provisioning { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            kind: err.kind(),
            message,
            retryable: err.is_retryable(),
        }
    }
}
