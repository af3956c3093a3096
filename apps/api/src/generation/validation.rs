//! Request-shape checks for paid endpoints.
//!
//! These run before the ledger is touched: a rejected request never costs credits.
//! Lengths are counted in characters, not bytes.

use crate::errors::AppError;

pub const MAX_RESUME_TEXT_CHARS: usize = 20_000;
pub const MAX_JOB_DESCRIPTION_CHARS: usize = 10_000;
/// Limit on each of the optional cover-letter fields (motivation, highlight).
pub const MAX_COVER_LETTER_EXTRA_CHARS: usize = 500;
pub const MAX_STYLE_CHARS: usize = 50;
pub const MAX_HIRING_MANAGER_CHARS: usize = 100;
pub const MAX_REFINE_HTML_CHARS: usize = 100_000;
pub const MAX_REFINE_INSTRUCTION_CHARS: usize = 1_000;

/// Rejects blank input and input longer than `max` characters.
pub fn require_text(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    limit_text(field, value, max)
}

/// Rejects input longer than `max` characters. Blank is allowed.
pub fn limit_text(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    let len = value.chars().count();
    if len > max {
        return Err(AppError::Validation(format!(
            "{field} exceeds {max} characters ({len} given)"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_text_rejects_blank() {
        let err = require_text("job_description", "   \n", 10).unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg.contains("job_description")));
    }

    #[test]
    fn test_require_text_accepts_exact_limit() {
        assert!(require_text("instruction", &"a".repeat(10), 10).is_ok());
    }

    #[test]
    fn test_limit_text_rejects_one_over() {
        let too_long = "a".repeat(MAX_COVER_LETTER_EXTRA_CHARS + 1);
        let err = limit_text("motivation", &too_long, MAX_COVER_LETTER_EXTRA_CHARS).unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg.contains("500")));
    }

    #[test]
    fn test_limit_text_counts_chars_not_bytes() {
        // 5 characters, 10 bytes
        assert!(limit_text("highlight", "ééééé", 5).is_ok());
    }

    #[test]
    fn test_limit_text_allows_empty() {
        assert!(limit_text("highlight", "", 5).is_ok());
    }
}
