//! Client-side input checks run before anything reaches the network.

use crate::auth::types::NewUserDetails;
use crate::error::ValidationError;

pub const NAME_MIN_LEN: usize = 2;
pub const USERNAME_MIN_LEN: usize = 2;
pub const USERNAME_MAX_LEN: usize = 30;

/// Trim and sanity-check an email address.
///
/// Accepts `local@domain.tld`: exactly one `@`, no whitespace, and a dot
/// inside the domain that is neither its first nor last character.
pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    let invalid = || ValidationError::new("email", "Enter a valid email address.");

    let email = email.trim();
    if email.is_empty() || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }

    let dot = domain.rfind('.').ok_or_else(invalid)?;
    if dot == 0 || dot == domain.len() - 1 || domain.starts_with('.') {
        return Err(invalid());
    }

    Ok(email.to_string())
}

pub fn validate_verification_code(code: &str) -> Result<String, ValidationError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(ValidationError::new(
            "verificationCode",
            "Verification code is required.",
        ));
    }
    Ok(code.to_string())
}

pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().chars().count() < NAME_MIN_LEN {
        return Err(ValidationError::new("name", "Name is too short."));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let len = username.chars().count();
    if len < USERNAME_MIN_LEN {
        return Err(ValidationError::new("username", "Username is too short."));
    }
    if len > USERNAME_MAX_LEN {
        return Err(ValidationError::new("username", "Username is too long."));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ValidationError::new(
            "username",
            "Username can only contain letters, numbers, and underscores.",
        ));
    }
    Ok(())
}

impl NewUserDetails {
    /// Run every onboarding field rule, reporting the first failure.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        validate_username(&self.username)
    }
}
