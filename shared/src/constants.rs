pub const API_BASE_PATH: &str = "/api/wheel";

// Spin animation
pub const SPIN_DURATION_MS: u64 = 5000;
pub const MIN_REVOLUTIONS: u32 = 10;
pub const MAX_REVOLUTIONS: u32 = 15;

// Finished -> Idle cooldown
pub const RESET_DELAY_MS: u64 = 7000;

// How often the server advances a running spin
pub const FRAME_INTERVAL_MS: u64 = 50;

pub const MIN_DISPLAY_NAME_LENGTH: usize = 1;
pub const MAX_DISPLAY_NAME_LENGTH: usize = 32;

pub const INVALID_DISPLAY_NAME_ERROR: &str = "Display name must be 1-32 characters of letters, numbers, spaces or _ . ' -";
pub const INAPPROPRIATE_DISPLAY_NAME_ERROR: &str = "Display name contains inappropriate language";
pub const EMPTY_POOL_ERROR: &str = "No accepted participants to spin for";

// Broadcast channels
pub const WHEEL_CHANNEL: &str = "wheel";
pub const ROSTER_CHANNEL: &str = "roster";

// Data-access collections
pub const PARTICIPANTS_COLLECTION: &str = "participants";
pub const ROUNDS_COLLECTION: &str = "rounds";
pub const WINNERS_COLLECTION: &str = "winners";
