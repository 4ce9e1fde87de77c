//! Custom validation functions shared across configuration sections.

use validator::ValidationError;

/// Topic and group names follow broker naming conventions: non-empty,
/// at most 249 characters, alphanumerics plus `.`, `_` and `-`.
pub fn validate_stream_name(name: &str) -> Result<(), ValidationError> {
    let valid = !name.is_empty()
        && name.len() <= 249
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_stream_name"))
    }
}

/// The alarm message key is a short fixed tag.
pub fn validate_alarm_key(key: &str) -> Result<(), ValidationError> {
    if !key.is_empty() && key.len() <= 32 && key.is_ascii() {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_alarm_key"))
    }
}
