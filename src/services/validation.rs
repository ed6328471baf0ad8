//! Form field validation shared by case intake, voter edits and profiles.

use std::sync::LazyLock;

use regex::Regex;

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\+?[0-9]{7,15}$").expect("phone regex"));
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;

/// A single rejected form field. `field` names the JSON key.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, thiserror::Error)]
#[error("{field}: {message}")]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

/// Trim and require a non-empty value no longer than `max` characters.
///
/// # Errors
///
/// Returns a [`FieldError`] for blank or over-long input.
pub fn required(field: &'static str, value: &str, max: usize) -> Result<String, FieldError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FieldError::new(field, "is required"));
    }
    if trimmed.chars().count() > max {
        return Err(FieldError::new(field, format!("must be at most {max} characters")));
    }
    Ok(trimmed.to_owned())
}

/// Trim an optional value; blank becomes `None`.
///
/// # Errors
///
/// Returns a [`FieldError`] if the value exceeds `max` characters.
pub fn optional(field: &'static str, value: Option<&str>, max: usize) -> Result<Option<String>, FieldError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) if v.chars().count() > max => Err(FieldError::new(field, format!("must be at most {max} characters"))),
        Some(v) => Ok(Some(v.to_owned())),
    }
}

/// Strip common separators from a phone number.
#[must_use]
pub fn strip_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect()
}

/// Normalize and validate a phone number.
///
/// # Errors
///
/// Returns a [`FieldError`] if the number is missing or malformed.
pub fn phone(field: &'static str, raw: &str) -> Result<String, FieldError> {
    let stripped = strip_phone(raw.trim());
    if stripped.is_empty() {
        return Err(FieldError::new(field, "is required"));
    }
    if !PHONE_RE.is_match(&stripped) {
        return Err(FieldError::new(field, "must be 7 to 15 digits, optionally prefixed by +"));
    }
    Ok(stripped)
}

/// Validate an optional email address; blank becomes `None`.
///
/// # Errors
///
/// Returns a [`FieldError`] if a non-blank value is malformed.
pub fn optional_email(field: &'static str, raw: Option<&str>) -> Result<Option<String>, FieldError> {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if !is_valid_email(value) {
        return Err(FieldError::new(field, "is not a valid email address"));
    }
    Ok(Some(value.to_ascii_lowercase()))
}

#[must_use]
pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

/// Parse a closed set of string values into an enum.
///
/// # Errors
///
/// Returns a [`FieldError`] listing accepted values.
pub fn one_of<T>(field: &'static str, raw: &str, parse: fn(&str) -> Option<T>, accepted: &[&str]) -> Result<T, FieldError> {
    parse(raw.trim()).ok_or_else(|| FieldError::new(field, format!("must be one of: {}", accepted.join(", "))))
}

/// Serde helper for patch bodies: an absent key stays `None`, an explicit
/// `null` becomes `Some(None)`. Use with `#[serde(default, deserialize_with = ...)]`.
///
/// # Errors
///
/// Propagates the inner deserializer's error.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de>,
{
    <Option<T> as serde::Deserialize>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
#[path = "validation_test.rs"]
mod tests;
