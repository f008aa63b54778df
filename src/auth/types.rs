//! Session data types and backend wire formats.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Opaque bearer credential, held only in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

impl From<&str> for AccessToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for AccessToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// The logged-in user's basic profile, as returned by `GET /auth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub username: String,
    #[serde(default)]
    pub profile_picture: Option<String>,
}

/// Bridges "code requested" to "code verified" for one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSession {
    pub login_token: String,
    pub is_new_user: bool,
}

impl LoginSession {
    /// Recover a login attempt from a magic-link query string such as
    /// `token=abc&is-new-user=True`.
    ///
    /// Returns `None` when no non-empty `token` is present.
    pub fn from_query(query: &str) -> Option<Self> {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut login_token = None;
        let mut is_new_user = false;

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "token" if !value.is_empty() => login_token = Some(value.into_owned()),
                "is-new-user" => is_new_user = value == "True",
                _ => {}
            }
        }

        login_token.map(|login_token| Self {
            login_token,
            is_new_user,
        })
    }
}

/// Gender choices offered during onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Female,
    Male,
    PreferNotToSay,
}

impl Gender {
    pub const ALL: [Gender; 3] = [Gender::Female, Gender::Male, Gender::PreferNotToSay];

    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Female => "female",
            Gender::Male => "male",
            Gender::PreferNotToSay => "prefer_not_to_say",
        }
    }

    /// Human label, e.g. "Prefer not to say".
    pub fn label(self) -> &'static str {
        match self {
            Gender::Female => "Female",
            Gender::Male => "Male",
            Gender::PreferNotToSay => "Prefer not to say",
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Gender {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "female" => Ok(Gender::Female),
            "male" => Ok(Gender::Male),
            "prefer_not_to_say" => Ok(Gender::PreferNotToSay),
            _ => Err(ValidationError::new("gender", "Select a gender.")),
        }
    }
}

/// Profile fields a new user supplies alongside the verification code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewUserDetails {
    pub name: String,
    pub username: String,
    pub gender: Gender,
}

/// Outcome of a successful `verify_login`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResult {
    /// `None` if the profile fetch after verification failed (the session
    /// was then torn down again).
    pub user: Option<User>,
    pub is_new_user: bool,
}

// ---------------------------------------------------------------------------
// Wire formats
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct LoginEmailRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginEmailResponse {
    pub token: String,
    pub is_new_user: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct VerifyEmailRequest<'a> {
    pub token: &'a str,
    pub verification_code: &'a str,
    pub is_new_user: bool,
    #[serde(flatten)]
    pub details: Option<&'a NewUserDetails>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UsernameAttemptRequest<'a> {
    pub username: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UsernameAttemptResponse {
    pub available: bool,
}

/// Body of both `/auth/verify/email` and `/auth/refresh`.
#[derive(Debug, Deserialize)]
pub(crate) struct AccessTokenResponse {
    pub access_token: String,
}
