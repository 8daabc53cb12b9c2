pub mod constants;
pub mod error;
pub mod profanity;
pub mod rate_limit;
pub mod roster;
pub mod shared_wheel_game;
pub mod spin_animator;
pub mod validation;
pub mod wheel_selector;

pub use error::{WheelError, WheelResult};
