use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use shared::shared_wheel_game::{Actor, WheelSettings};
use uuid::Uuid;

use crate::auth::middleware::UserId;

const DEFAULT_PORT: u16 = 3000;

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "{} must be set", key),
            Self::Invalid { key, value } => write!(f, "{} has an invalid value: {:?}", key, value),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub admin_ids: HashSet<Uuid>,
    pub cors_origin: Option<String>,
    pub wheel: WheelSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        fn parse<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
            match raw {
                Some(value) => value
                    .parse()
                    .map_err(|_| ConfigError::Invalid { key, value }),
                None => Ok(default),
            }
        }

        let defaults = WheelSettings::default();
        let wheel = WheelSettings {
            min_revolutions: parse("WHEEL_MIN_REVOLUTIONS", get("WHEEL_MIN_REVOLUTIONS"), defaults.min_revolutions)?,
            max_revolutions: parse("WHEEL_MAX_REVOLUTIONS", get("WHEEL_MAX_REVOLUTIONS"), defaults.max_revolutions)?,
            spin_duration_ms: parse("WHEEL_SPIN_DURATION_MS", get("WHEEL_SPIN_DURATION_MS"), defaults.spin_duration_ms)?,
            reset_delay_ms: parse("WHEEL_RESET_DELAY_MS", get("WHEEL_RESET_DELAY_MS"), defaults.reset_delay_ms)?,
            frame_interval_ms: parse("WHEEL_FRAME_INTERVAL_MS", get("WHEEL_FRAME_INTERVAL_MS"), defaults.frame_interval_ms)?,
        };
        if wheel.min_revolutions > wheel.max_revolutions {
            return Err(ConfigError::Invalid {
                key: "WHEEL_MIN_REVOLUTIONS",
                value: wheel.min_revolutions.to_string(),
            });
        }
        if wheel.spin_duration_ms == 0 || wheel.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "WHEEL_SPIN_DURATION_MS",
                value: "0".to_string(),
            });
        }

        let admin_ids = match get("ADMIN_USER_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| {
                    Uuid::parse_str(id).map_err(|_| ConfigError::Invalid {
                        key: "ADMIN_USER_IDS",
                        value: id.to_string(),
                    })
                })
                .collect::<Result<HashSet<_>, _>>()?,
            None => HashSet::new(),
        };

        Ok(Self {
            port: parse("PORT", get("PORT"), DEFAULT_PORT)?,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            jwt_secret: get("JWT_SECRET_KEY").ok_or(ConfigError::Missing("JWT_SECRET_KEY"))?,
            admin_ids,
            cors_origin: get("CORS_ORIGIN"),
            wheel,
        })
    }

    pub fn is_admin(&self, user_id: &Uuid) -> bool {
        self.admin_ids.contains(user_id)
    }

    pub fn actor_for(&self, user_id: UserId) -> Actor {
        Actor {
            user_id: user_id.0.to_string(),
            is_admin: self.is_admin(&user_id.0),
        }
    }
}
