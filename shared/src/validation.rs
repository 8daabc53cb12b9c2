use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use validator::ValidationError;

use crate::constants::{
    INAPPROPRIATE_DISPLAY_NAME_ERROR, INVALID_DISPLAY_NAME_ERROR, MAX_DISPLAY_NAME_LENGTH,
    MIN_DISPLAY_NAME_LENGTH,
};
use crate::profanity::ProfanityFilter;

static DISPLAY_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}\p{N}_.'\- ]+$").unwrap());

/// Trims and collapses runs of whitespace into single spaces.
pub fn normalize_display_name(display_name: &str) -> String {
    display_name.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn validate_display_name(display_name: &str) -> Result<(), ValidationError> {
    let length = display_name.trim().chars().count();
    if length < MIN_DISPLAY_NAME_LENGTH
        || length > MAX_DISPLAY_NAME_LENGTH
        || !DISPLAY_NAME_PATTERN.is_match(display_name)
    {
        let mut error = ValidationError::new("invalid_display_name");
        error.message = Some(Cow::Borrowed(INVALID_DISPLAY_NAME_ERROR));
        return Err(error);
    }
    if ProfanityFilter::validate_display_name(display_name).is_err() {
        let mut error = ValidationError::new("inappropriate_display_name");
        error.message = Some(Cow::Borrowed(INAPPROPRIATE_DISPLAY_NAME_ERROR));
        return Err(error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_display_name() {
        assert_eq!(normalize_display_name("  Alice \t  Smith  "), "Alice Smith");
        assert_eq!(normalize_display_name("   "), "");
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Alice").is_ok());
        assert!(validate_display_name("Zoë O'Neil-Smith").is_ok());
        assert!(validate_display_name("").is_err());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name(&"x".repeat(33)).is_err());
        assert!(validate_display_name("<script>").is_err());
        assert!(validate_display_name("bell\u{7}").is_err());
        let err = validate_display_name("fuck").unwrap_err();
        assert_eq!(err.code, "inappropriate_display_name");
    }
}
