//! Single-flight access token refresh.
//!
//! When several in-flight requests observe an expired token at once, only the
//! first one (the leader) calls the refresh endpoint. Everyone else parks on a
//! one-shot completion handle and is released with the leader's outcome.
//!
//! # State machine
//!
//! ```text
//! Idle --first caller--> Refreshing { waiters }
//! Refreshing --later callers--> push waiter
//! Refreshing --leader settles--> Idle, every waiter resolved/rejected
//! ```
//!
//! Draining the queue and returning to `Idle` happen under the same lock that
//! guards enqueueing, so a waiter can never attach to a refresh that has
//! already settled.
//!
//! The leader records the token store's generation when it starts. If the
//! store is written in the meantime (logout, a fresh login), the outcome is
//! stale: nothing is written and every caller gets `RefreshError::Abandoned`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::auth::store::TokenStore;
use crate::auth::types::AccessToken;
use crate::error::RefreshError;

/// Default bound on how long a queued caller waits for someone else's refresh.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

type RefreshOutcome = Result<AccessToken, RefreshError>;

enum State {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

enum Role {
    Leader { generation: u64 },
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

/// Coordinates refreshes for one session's [`TokenStore`].
pub struct RefreshCoordinator {
    store: Arc<TokenStore>,
    state: Mutex<State>,
    wait_timeout: Duration,
    started: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<TokenStore>) -> Self {
        Self {
            store,
            state: Mutex::new(State::Idle),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            started: AtomicU64::new(0),
        }
    }

    /// Set how long queued callers wait before giving up.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Whether a refresh call is outstanding.
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock(), State::Refreshing { .. })
    }

    /// Number of callers parked behind the outstanding refresh.
    pub fn pending(&self) -> usize {
        match &*self.lock() {
            State::Refreshing { waiters } => waiters.len(),
            State::Idle => 0,
        }
    }

    /// Number of refresh calls actually issued so far.
    pub fn refreshes_started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Obtain a fresh access token.
    ///
    /// If no refresh is in flight, this caller becomes the leader and awaits
    /// `refresh()`; on success the token is stored, on failure the store is
    /// cleared. If a refresh is already in flight, `refresh` is dropped
    /// unpolled and the caller waits (bounded by the wait timeout) for the
    /// leader's outcome.
    pub async fn obtain_refreshed_token<F, Fut>(&self, refresh: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        let role = {
            let mut state = self.lock();
            match &mut *state {
                State::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    debug!(queued = waiters.len(), "Refresh in flight, queueing caller");
                    Role::Waiter(rx)
                }
                State::Idle => {
                    *state = State::Refreshing {
                        waiters: Vec::new(),
                    };
                    Role::Leader {
                        generation: self.store.generation(),
                    }
                }
            }
        };

        match role {
            Role::Waiter(rx) => self.wait(rx).await,
            Role::Leader { generation } => {
                self.started.fetch_add(1, Ordering::Relaxed);
                debug!(generation, "Starting token refresh");
                let guard = SettleGuard {
                    coordinator: self,
                    armed: true,
                };
                let outcome = refresh().await;
                guard.settle(outcome, generation)
            }
        }
    }

    async fn wait(&self, rx: oneshot::Receiver<RefreshOutcome>) -> RefreshOutcome {
        match tokio::time::timeout(self.wait_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RefreshError::Abandoned),
            Err(_) => {
                warn!(
                    timeout_ms = self.wait_timeout.as_millis() as u64,
                    "Gave up waiting for in-flight refresh"
                );
                Err(RefreshError::TimedOut(self.wait_timeout))
            }
        }
    }

    fn settle(&self, outcome: RefreshOutcome, generation: u64) -> RefreshOutcome {
        let (outcome, waiters) = {
            let mut state = self.lock();
            let applied = self
                .store
                .replace_if_unchanged(generation, outcome.as_ref().ok().cloned());
            let waiters = match std::mem::replace(&mut *state, State::Idle) {
                State::Refreshing { waiters } => waiters,
                State::Idle => Vec::new(),
            };
            if applied {
                (outcome, waiters)
            } else {
                (Err(RefreshError::Abandoned), waiters)
            }
        };

        match &outcome {
            Ok(_) => info!(released = waiters.len(), "Token refreshed"),
            Err(RefreshError::Abandoned) => warn!(
                released = waiters.len(),
                "Session changed during refresh, discarding outcome"
            ),
            Err(e) => warn!(error = %e, released = waiters.len(), "Token refresh failed"),
        }

        for waiter in waiters {
            // A waiter that already timed out has dropped its receiver.
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }

    fn abandon(&self) {
        let waiters = match std::mem::replace(&mut *self.lock(), State::Idle) {
            State::Refreshing { waiters } => waiters,
            State::Idle => Vec::new(),
        };
        warn!(released = waiters.len(), "Refresh dropped before settling");
        // Dropping the senders wakes every waiter with a receive error.
        drop(waiters);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &self.is_refreshing())
            .field("pending", &self.pending())
            .field("wait_timeout", &self.wait_timeout)
            .finish()
    }
}

/// Returns the coordinator to `Idle` if the leader is dropped mid-refresh.
struct SettleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl SettleGuard<'_> {
    fn settle(mut self, outcome: RefreshOutcome, generation: u64) -> RefreshOutcome {
        self.armed = false;
        self.coordinator.settle(outcome, generation)
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.coordinator.abandon();
        }
    }
}
