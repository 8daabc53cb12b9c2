use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const API_WINDOW: Duration = Duration::from_secs(60);
pub const REGISTRATION_WINDOW: Duration = Duration::from_secs(60);
pub const ADMIN_ACTION_WINDOW: Duration = Duration::from_secs(60);

pub const API_MAX_REQUESTS: u32 = 600;
pub const REGISTRATION_MAX_ATTEMPTS: u32 = 10;
pub const ADMIN_ACTION_MAX_ATTEMPTS: u32 = 120;

pub const API_RATE_LIMIT_ERROR: &str = "Too Many Requests";
pub const REGISTRATION_RATE_LIMIT_ERROR: &str = "Too many registration attempts. Please try again in a minute.";
pub const ADMIN_ACTION_RATE_LIMIT_ERROR: &str = "Too many wheel actions. Please slow down.";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitType {
    Api,
    Registration,
    AdminAction,
}

impl RateLimitType {
    pub fn get_window(&self) -> Duration {
        match self {
            Self::Api => API_WINDOW,
            Self::Registration => REGISTRATION_WINDOW,
            Self::AdminAction => ADMIN_ACTION_WINDOW,
        }
    }

    pub fn get_max_attempts(&self) -> u32 {
        match self {
            Self::Api => API_MAX_REQUESTS,
            Self::Registration => REGISTRATION_MAX_ATTEMPTS,
            Self::AdminAction => ADMIN_ACTION_MAX_ATTEMPTS,
        }
    }

    pub fn get_error_message(&self) -> &'static str {
        match self {
            Self::Api => API_RATE_LIMIT_ERROR,
            Self::Registration => REGISTRATION_RATE_LIMIT_ERROR,
            Self::AdminAction => ADMIN_ACTION_RATE_LIMIT_ERROR,
        }
    }

    /// Which bucket a wheel route counts against.
    pub fn for_path(path: &str) -> Self {
        if path.ends_with("/register") || path.ends_with("/cancel") {
            Self::Registration
        } else if path.contains("/accept") || path.contains("/demote") || path.ends_with("/spin") {
            Self::AdminAction
        } else {
            Self::Api
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitCheck {
    pub current_attempts: u32,
    pub is_locked: bool,
}

impl RateLimitCheck {
    pub fn new(attempts: u32, limit_type: RateLimitType) -> Self {
        Self {
            current_attempts: attempts,
            is_locked: attempts >= limit_type.get_max_attempts(),
        }
    }
}

pub fn get_rate_limit_key(limit_type: RateLimitType, identifier: &str) -> String {
    format!("rate_limit:{}:{}",
        match limit_type {
            RateLimitType::Api => "api",
            RateLimitType::Registration => "registration",
            RateLimitType::AdminAction => "admin_action",
        },
        identifier
    )
}
