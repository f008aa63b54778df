//! In-memory access token storage.

use std::sync::{PoisonError, RwLock};

use tracing::{debug, instrument};

use crate::auth::types::AccessToken;

#[derive(Debug, Default)]
struct Slot {
    token: Option<AccessToken>,
    refresh_credential_may_exist: bool,
    /// Bumped on every write; lets a refresh detect that the session changed
    /// underneath it.
    generation: u64,
}

/// Holds the current access token for one session.
///
/// Process lifetime only: nothing here is ever written to disk. The refresh
/// credential itself lives in the HTTP client's cookie jar and is never
/// readable; `refresh_credential_may_exist` records whether the server has
/// plausibly set one.
///
/// The lock is never held across an await point.
#[derive(Debug, Default)]
pub struct TokenStore {
    inner: RwLock<Slot>,
}

impl TokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current token. Also marks the refresh credential as
    /// likely present, since the server issues both together.
    #[instrument(skip_all)]
    pub fn set_token(&self, token: impl Into<AccessToken>) {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        slot.token = Some(token.into());
        slot.refresh_credential_may_exist = true;
        slot.generation += 1;
        debug!("Access token stored");
    }

    /// Counter that changes whenever the token is set or cleared.
    pub fn generation(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Set (`Some`) or clear (`None`) the token, but only if nothing has
    /// written to the store since `generation` was read.
    ///
    /// Returns whether the write happened.
    pub(crate) fn replace_if_unchanged(&self, generation: u64, token: Option<AccessToken>) -> bool {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if slot.generation != generation {
            debug!(
                expected = generation,
                current = slot.generation,
                "Token store changed, skipping write"
            );
            return false;
        }
        slot.refresh_credential_may_exist = token.is_some();
        slot.token = token;
        slot.generation += 1;
        true
    }

    /// Current token, if any.
    pub fn token(&self) -> Option<AccessToken> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .clone()
    }

    pub fn has_token(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .is_some()
    }

    pub fn refresh_credential_may_exist(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh_credential_may_exist
    }

    /// Forget the token and the refresh credential flag.
    #[instrument(skip_all)]
    pub fn clear(&self) {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        slot.token = None;
        slot.refresh_credential_may_exist = false;
        slot.generation += 1;
        debug!("Access token cleared");
    }
}
