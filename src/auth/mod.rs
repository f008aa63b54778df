//! Email verification-code login and session management.

pub mod refresh;
pub mod session;
pub mod store;
pub mod types;
pub mod validate;

pub use refresh::RefreshCoordinator;
pub use session::{Session, SessionState};
pub use store::TokenStore;
pub use types::{AccessToken, Gender, LoginSession, NewUserDetails, SessionResult, User};
