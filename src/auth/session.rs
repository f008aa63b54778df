//! Reactive session context.
//!
//! [`Session`] owns the signed-in user and publishes [`SessionState`]
//! snapshots through a `watch` channel that a presentation layer renders
//! from. All network traffic goes through the injected [`ApiClient`].

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::auth::types::{
    AccessTokenResponse, LoginEmailRequest, LoginEmailResponse, LoginSession, NewUserDetails,
    SessionResult, User, UsernameAttemptRequest, UsernameAttemptResponse, VerifyEmailRequest,
};
use crate::auth::validate::{validate_email, validate_username, validate_verification_code};
use crate::error::{Result, ValidationError};
use crate::net::ApiClient;

const LOGIN_EMAIL_PATH: &str = "/auth/login/email";
const VERIFY_EMAIL_PATH: &str = "/auth/verify/email";
const USERNAME_ATTEMPT_PATH: &str = "/auth/attempt/username";
const USER_PATH: &str = "/auth";
const LOGOUT_PATH: &str = "/auth/logout";

/// Snapshot of what the UI needs to render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub user: Option<User>,
    pub is_authenticated: bool,
    /// True until the initial silent refresh has settled.
    pub is_loading: bool,
}

impl SessionState {
    fn sign_out(&mut self) {
        self.user = None;
        self.is_authenticated = false;
    }
}

/// Login, onboarding and logout for one logical session.
///
/// Cheap to clone; clones share state and the underlying [`ApiClient`].
#[derive(Debug, Clone)]
pub struct Session {
    api: ApiClient,
    state: Arc<watch::Sender<SessionState>>,
}

impl Session {
    /// Create a session in the loading state.
    ///
    /// Nothing is fetched until [`initialize`](Self::initialize) runs. A
    /// refresh failure on any request made through `api` signs this session
    /// out.
    pub fn new(api: ApiClient) -> Self {
        let (tx, _) = watch::channel(SessionState {
            is_loading: true,
            ..SessionState::default()
        });
        let state = Arc::new(tx);

        let weak = Arc::downgrade(&state);
        let store = Arc::clone(api.store());
        api.on_session_expired(move |err| {
            store.clear();
            if let Some(state) = weak.upgrade() {
                debug!(error = %err, "Refresh failed, signing out");
                state.send_modify(SessionState::sign_out);
            }
        });

        Self { api, state }
    }

    /// Create a session and run the initial load.
    pub async fn start(api: ApiClient) -> Self {
        let session = Self::new(api);
        session.initialize().await;
        session
    }

    /// Restore a previous login from the refresh cookie, if there is one.
    ///
    /// Always ends with `is_loading == false`. A failure here never calls the
    /// logout endpoint; there is no server session worth ending.
    #[instrument(skip(self))]
    pub async fn initialize(&self) {
        match self.api.refresh_session().await {
            Ok(_) => match self.load_user().await {
                Ok(user) => info!(username = %user.username, "Session restored"),
                Err(e) => {
                    warn!(error = %e, "Failed to fetch restored user");
                    self.api.store().clear();
                    self.state.send_modify(SessionState::sign_out);
                }
            },
            // Refresh failures that end the session already ran the expiry hook.
            Err(e) => debug!(error = %e, "No session to restore"),
        }
        self.state.send_modify(|s| s.is_loading = false);
    }

    /// Ask the backend to email a verification code.
    #[instrument(skip(self, email))]
    pub async fn request_login(&self, email: &str) -> Result<LoginSession> {
        let email = validate_email(email)?;
        let response: LoginEmailResponse = self
            .api
            .post_json(LOGIN_EMAIL_PATH, &LoginEmailRequest { email: &email })
            .await?;

        debug!(is_new_user = response.is_new_user, "Verification code requested");
        Ok(LoginSession {
            login_token: response.token,
            is_new_user: response.is_new_user,
        })
    }

    /// Exchange a verification code for an access token and load the user.
    ///
    /// New users must supply `details`; they are validated and sent along
    /// with the code. Existing users' `details` are ignored.
    #[instrument(skip(self, login_token, code, details))]
    pub async fn verify_login(
        &self,
        login_token: &str,
        code: &str,
        is_new_user: bool,
        details: Option<NewUserDetails>,
    ) -> Result<SessionResult> {
        let code = validate_verification_code(code)?;
        let details = if is_new_user {
            match details {
                Some(details) => {
                    details.validate()?;
                    Some(details)
                }
                None => return Err(ValidationError::new("name", "Name is too short.").into()),
            }
        } else {
            None
        };

        let response: AccessTokenResponse = self
            .api
            .post_json(
                VERIFY_EMAIL_PATH,
                &VerifyEmailRequest {
                    token: login_token,
                    verification_code: &code,
                    is_new_user,
                    details: details.as_ref(),
                },
            )
            .await?;
        self.api.store().set_token(response.access_token);

        let user = self.fetch_user().await;
        if let Some(user) = &user {
            info!(username = %user.username, is_new_user, "Signed in");
        }
        Ok(SessionResult { user, is_new_user })
    }

    /// Sign out. Local state is cleared even if the backend call fails.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Err(e) = self
            .api
            .post::<serde_json::Value>(LOGOUT_PATH, None)
            .await
        {
            warn!(error = %e, "Logout request failed, clearing local session anyway");
        }
        self.api.store().clear();
        self.state.send_modify(|s| {
            s.sign_out();
            s.is_loading = false;
        });
        info!("Signed out");
    }

    /// Load the current user. Any failure signs the session out.
    #[instrument(skip(self))]
    pub async fn fetch_user(&self) -> Option<User> {
        match self.load_user().await {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Failed to fetch user");
                self.logout().await;
                None
            }
        }
    }

    /// GET the current user and publish it as signed in.
    async fn load_user(&self) -> Result<User> {
        let user = self.api.get_json::<User>(USER_PATH).await?;
        self.state.send_modify(|s| {
            s.user = Some(user.clone());
            s.is_authenticated = true;
        });
        Ok(user)
    }

    /// Check whether `username` is free to claim.
    ///
    /// Returns `Ok(false)` when the backend reports it as taken.
    #[instrument(skip(self))]
    pub async fn check_username(&self, username: &str) -> Result<bool> {
        validate_username(username)?;
        let response: UsernameAttemptResponse = self
            .api
            .post_json(USERNAME_ATTEMPT_PATH, &UsernameAttemptRequest { username })
            .await?;
        Ok(response.available)
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receive every state change from now on.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }
}
