use std::borrow::Cow;

use rust_decimal::Decimal;
use validator::ValidationError;

/// Maximum length of a model identifier
pub const MAX_MODEL_NAME_LENGTH: usize = 128;

/// Validate that a money amount or unit price is not negative.
pub fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut err = ValidationError::new("negative_amount");
        err.message = Some(Cow::Borrowed("Amounts cannot be negative"));
        return Err(err);
    }
    Ok(())
}

/// Validate a model identifier.
///
/// Ensures the name is not empty or whitespace-only. Names are matched
/// case-insensitively, so casing is not restricted here.
pub fn validate_model_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("empty_model_name");
        err.message = Some(Cow::Borrowed(
            "Model names cannot be empty or whitespace-only",
        ));
        return Err(err);
    }
    if name.len() > MAX_MODEL_NAME_LENGTH {
        let mut err = ValidationError::new("model_name_too_long");
        err.message = Some(Cow::Owned(format!(
            "Model names cannot exceed {} characters",
            MAX_MODEL_NAME_LENGTH
        )));
        return Err(err);
    }
    Ok(())
}
