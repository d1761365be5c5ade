//! Recipient address handling.
//!
//! Addresses are only checked for the basic `user@domain.tld` shape; the
//! delivery channel performs the strict RFC 5322 parse when a message is
//! actually built.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

/// Maximum accepted length for an address (RFC 5321 path limit).
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Basic `local@domain.tld` shape: no whitespace, exactly one `@`, and a dot
/// somewhere in the domain part.
pub const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(EMAIL_PATTERN).expect("valid regex"));

/// Trim and lowercase an address. Enrollments are keyed on this form.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Check that `email` has a plausible address shape.
pub fn validate_email(email: &str) -> Result<(), CoreError> {
    if email.is_empty() {
        return Err(CoreError::Validation("Email must not be empty".to_string()));
    }
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(CoreError::Validation(format!(
            "Email exceeds maximum length of {MAX_EMAIL_LENGTH} characters"
        )));
    }
    if !EMAIL_RE.is_match(email) {
        return Err(CoreError::Validation("Invalid email format".to_string()));
    }
    Ok(())
}

/// Normalize then validate, returning the canonical address.
pub fn parse_email(raw: &str) -> Result<String, CoreError> {
    let email = normalize_email(raw);
    validate_email(&email)?;
    Ok(email)
}

/// The part of the address before `@`, used as a greeting fallback.
pub fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}
