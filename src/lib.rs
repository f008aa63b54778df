//! Client-side session core for Connector.
//!
//! Email verification-code login, new-user onboarding, an in-memory access
//! token with single-flight refresh, and a reactive [`Session`] a UI renders
//! from.

pub mod auth;
pub mod config;
pub mod error;
pub mod net;
pub mod preferences;

pub use auth::{Session, SessionState};
pub use config::Config;
pub use error::{Error, ErrorKind, RefreshError, Result, ValidationError};
pub use net::ApiClient;
pub use preferences::{DarkMode, PreferenceStore};
