use std::fmt;

/// Failures produced by the wheel core. All of these are raised before any
/// roster mutation or animation starts.
#[derive(Debug, Clone, PartialEq)]
pub enum WheelError {
    AlreadyRegistered(String),
    InvalidState {
        action: &'static str,
        reason: String,
    },
    EmptyPool,
    NotFound(String),
    Forbidden(&'static str),
    InvalidInput(String),
}

impl WheelError {
    pub fn invalid_state(action: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            action,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable name, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered(_) => "already_registered",
            Self::InvalidState { .. } => "invalid_state",
            Self::EmptyPool => "empty_pool",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidInput(_) => "invalid_input",
        }
    }
}

impl fmt::Display for WheelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRegistered(id) => write!(f, "Participant {} is already registered", id),
            Self::InvalidState { action, reason } => write!(f, "Cannot {}: {}", action, reason),
            Self::EmptyPool => write!(f, "{}", crate::constants::EMPTY_POOL_ERROR),
            Self::NotFound(id) => write!(f, "Participant {} not found", id),
            Self::Forbidden(action) => write!(f, "Only an admin can {}", action),
            Self::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

impl std::error::Error for WheelError {}

pub type WheelResult<T> = Result<T, WheelError>;
