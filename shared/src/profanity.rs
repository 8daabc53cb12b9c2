use rustrict::CensorStr;

#[derive(Debug)]
pub struct ProfanityFilter;

impl ProfanityFilter {
    pub fn validate_display_name(display_name: &str) -> Result<(), String> {
        if display_name.is_inappropriate() {
            return Err(format!("Inappropriate language detected: {}", display_name.censor()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_names_pass() {
        for name in ["Alice", "Bob the Builder", "Dana_42"] {
            assert!(ProfanityFilter::validate_display_name(name).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_profane_name_rejected() {
        assert!(ProfanityFilter::validate_display_name("fuck").is_err());
    }
}
