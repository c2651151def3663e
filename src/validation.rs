// src/validation.rs

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .unwrap_or_else(|e| panic!("email pattern must compile: {e}"))
});

/// Per-field validation failures, keyed by field name.
///
/// Only the first failure for a field is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Re-key every entry under `prefix.` (used when nested payloads fail).
    pub fn prefixed(self, prefix: &str) -> Self {
        Self(
            self.0
                .into_iter()
                .map(|(k, v)| (format!("{prefix}.{k}"), v))
                .collect(),
        )
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 255 && EMAIL_RE.is_match(email)
}

/// Trim, and turn blank strings into `None`.
pub fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Required text field: must be present, non-blank, and within `min..=max` chars.
pub fn required_text(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<&str>,
    min: usize,
    max: usize,
    required_msg: &str,
) -> Option<String> {
    let Some(v) = clean(value) else {
        errors.add(field, required_msg);
        return None;
    };
    check_len(errors, field, &v, min, max);
    Some(v)
}

/// Optional text field: blank means absent.
pub fn optional_text(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<&str>,
    max: usize,
) -> Option<String> {
    let v = clean(value)?;
    check_len(errors, field, &v, 0, max);
    Some(v)
}

pub fn check_len(errors: &mut FieldErrors, field: &str, value: &str, min: usize, max: usize) {
    let n = value.chars().count();
    if n < min {
        errors.add(field, format!("{field} must be at least {min} characters"));
    } else if n > max {
        errors.add(field, format!("{field} cannot exceed {max} characters"));
    }
}

pub fn optional_email(errors: &mut FieldErrors, field: &str, value: Option<&str>) -> Option<String> {
    let v = clean(value)?;
    if !is_valid_email(&v) {
        errors.add(field, "Please provide a valid email address");
    }
    Some(v)
}

/// Parses an enumerated value; records `field must be one of: ...` on failure.
pub fn optional_enum<T: FromStr>(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<&str>,
    allowed: &[&str],
) -> Option<T> {
    let v = clean(value)?;
    match v.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            errors.add(field, format!("{field} must be one of: {}", allowed.join(", ")));
            None
        }
    }
}

/// Accepts `YYYY-MM-DD`, or a datetime whose date part is `YYYY-MM-DD`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let v = value.trim();
    let date_part = v.get(..10).unwrap_or(v);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

pub fn optional_date(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<&str>,
    invalid_msg: &str,
) -> Option<NaiveDate> {
    let v = clean(value)?;
    match parse_date(&v) {
        Some(d) => Some(d),
        None => {
            errors.add(field, invalid_msg);
            None
        }
    }
}

/* -------------------------
   Partial updates
--------------------------*/

/// Distinguishes an absent field from an explicit `null`.
/// - absent => `None` (via `#[serde(default)]`)
/// - `null` => `Some(None)`
/// - value  => `Some(Some(value))`
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let inner = Option::<T>::deserialize(deserializer)?;
    Ok(Some(inner))
}

/// Nullable text in a patch: blank clears the column.
pub fn patch_text(
    errors: &mut FieldErrors,
    field: &str,
    value: &Option<Option<String>>,
    max: usize,
) -> Option<Option<String>> {
    match value {
        None => None,
        Some(v) => Some(optional_text(errors, field, v.as_deref(), max)),
    }
}

pub fn patch_email(
    errors: &mut FieldErrors,
    field: &str,
    value: &Option<Option<String>>,
) -> Option<Option<String>> {
    match value {
        None => None,
        Some(v) => Some(optional_email(errors, field, v.as_deref())),
    }
}

pub fn patch_enum<T: FromStr>(
    errors: &mut FieldErrors,
    field: &str,
    value: &Option<Option<String>>,
    allowed: &[&str],
) -> Option<Option<T>> {
    match value {
        None => None,
        Some(v) => Some(optional_enum(errors, field, v.as_deref(), allowed)),
    }
}

pub fn patch_date(
    errors: &mut FieldErrors,
    field: &str,
    value: &Option<Option<String>>,
    invalid_msg: &str,
) -> Option<Option<NaiveDate>> {
    match value {
        None => None,
        Some(v) => Some(optional_date(errors, field, v.as_deref(), invalid_msg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("front.desk@cpc-clinic.in"));
        assert!(is_valid_email("a+b@example.co.uk"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("missing@tld"));
        assert!(!is_valid_email("@example.com"));
    }

    #[test]
    fn test_required_text_blank_is_missing() {
        let mut errors = FieldErrors::new();
        assert_eq!(required_text(&mut errors, "name", Some("   "), 1, 255, "Name is required"), None);
        assert_eq!(errors.get("name"), Some("Name is required"));
    }

    #[test]
    fn test_length_bounds() {
        let mut errors = FieldErrors::new();
        required_text(&mut errors, "phone", Some("12345"), 10, 20, "Phone number is required");
        assert!(errors.contains("phone"));

        let mut errors = FieldErrors::new();
        let long = "x".repeat(256);
        optional_text(&mut errors, "notes", Some(&long), 255);
        assert!(errors.contains("notes"));
    }

    #[test]
    fn test_first_error_wins_and_prefix() {
        let mut errors = FieldErrors::new();
        errors.add("phone", "first");
        errors.add("phone", "second");
        let errors = errors.prefixed("patient");
        assert_eq!(errors.get("patient.phone"), Some("first"));
    }

    #[test]
    fn test_parse_date_accepts_datetime_prefix() {
        assert_eq!(parse_date("2025-01-01"), NaiveDate::from_ymd_opt(2025, 1, 1));
        assert_eq!(parse_date("2025-01-01 10:30:00"), NaiveDate::from_ymd_opt(2025, 1, 1));
        assert_eq!(parse_date("01/02/2025"), None);
        assert_eq!(parse_date("2025-02-30"), None);
    }
}
