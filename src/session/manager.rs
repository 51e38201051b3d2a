//! The single authoritative in-memory session.
//!
//! ```text
//!   Absent ──login/restore──> Valid ──(now >= exp - skew)──> Expired
//!     ^                                                        │
//!     │                                                 ensure_valid()
//!     │                                                        v
//!     └────────────── refresh failed ─────────────────── Refreshing ──ok──> Valid
//! ```
//!
//! `Valid` versus `Expired` is computed from the clock on every read rather
//! than stored, so a timer is never needed. A refresh runs as a spawned task
//! whose result is shared among every caller of `ensure_valid()`; the task
//! finishes (and settles the state) even if all waiters are dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::store::CredentialStore;
use super::{Claims, Session};
use crate::client::Outcome;
use crate::errors::{AuthError, TransportFailure};

pub use crate::errors::AuthFailureReason;

/// Early-expiry margin applied to every validity check.
pub const DEFAULT_EXPIRY_SKEW_MS: i64 = 60_000;

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Absent,
    Valid,
    Refreshing,
    Expired,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Valid => "valid",
            Self::Refreshing => "refreshing",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Resolution of [`SessionManager::ensure_valid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    Valid(Session),
    Failed(AuthFailureReason),
}

/// Username/password pair submitted at login.
///
/// When the password was sealed with a login key, `key_id` names that key so
/// the service can unseal it.
#[derive(Clone, Default)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
    pub captcha_code: Option<String>,
    pub key_id: Option<String>,
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            captcha_code: None,
            key_id: None,
        }
    }

    pub fn with_captcha(mut self, code: impl Into<String>) -> Self {
        self.captcha_code = Some(code.into());
        self
    }
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("captcha_code", &self.captcha_code)
            .field("key_id", &self.key_id)
            .finish()
    }
}

/// The remote calls that create sessions.
///
/// Implementations talk to the transport directly, never through the request
/// pipeline, so a refresh can never recurse into another refresh.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, credentials: &LoginCredentials) -> Result<Session, AuthError>;
    async fn refresh(&self, refresh_credential: &str) -> Result<Session, AuthError>;
}

/// Read-only view used to gate navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub is_authenticated: bool,
    pub claims: Option<Claims>,
}

/// Tunables for a [`SessionManager`].
#[derive(Clone)]
pub struct SessionOptions {
    pub expiry_skew_ms: i64,
    pub clock: Arc<dyn Clock>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            expiry_skew_ms: DEFAULT_EXPIRY_SKEW_MS,
            clock: Arc::new(SystemClock),
        }
    }
}

// ── Internal state ────────────────────────────────────────────────────

type RefreshFlight = Shared<BoxFuture<'static, Validity>>;

enum State {
    Absent,
    /// Holds a session; whether it is still valid depends on the clock.
    Active(Session),
    /// The service rejected this session's access credential.
    Stale(Session),
    Refreshing {
        previous: Session,
        flight: RefreshFlight,
    },
}

struct Guarded {
    state: State,
    /// Bumped on login, logout and restore. A refresh started under an older
    /// epoch must not write its result.
    epoch: u64,
}

struct Inner {
    guarded: Mutex<Guarded>,
    /// Orders store writes. Never held while waiting on `guarded`'s owner.
    persisting: Mutex<()>,
    store: CredentialStore,
    authenticator: Arc<dyn Authenticator>,
    clock: Arc<dyn Clock>,
    skew_ms: i64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Guarded> {
        // No invariant spans a panic point, so a poisoned lock is still usable.
        self.guarded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `session` (or clear the store for `None`) unless the state has
    /// moved past `epoch` since. Called with `guarded` unlocked so storage
    /// I/O never blocks readers of the session.
    fn persist(&self, epoch: u64, session: Option<&Session>) {
        let _order = self.persisting.lock().unwrap_or_else(PoisonError::into_inner);
        if self.lock().epoch != epoch {
            debug!("session changed before it was persisted; skipping write");
            return;
        }
        match session {
            Some(session) => self.store.save(session),
            None => self.store.clear(),
        }
    }

    fn is_expired(&self, session: &Session) -> bool {
        self.clock.now_epoch_ms() >= session.expires_at_epoch_ms - self.skew_ms
    }

    fn complete_refresh(&self, epoch: u64, result: Result<Session, AuthError>) -> Validity {
        let mut guarded = self.lock();
        if guarded.epoch != epoch || !matches!(guarded.state, State::Refreshing { .. }) {
            debug!("refresh finished after the session changed; discarding its result");
            return match &guarded.state {
                State::Active(session) => Validity::Valid(session.clone()),
                _ => Validity::Failed(AuthFailureReason::LoggedOut),
            };
        }

        match result {
            Ok(session) => {
                guarded.state = State::Active(session.clone());
                drop(guarded);
                info!(
                    expires_at_epoch_ms = session.expires_at_epoch_ms,
                    "session refreshed"
                );
                self.persist(epoch, Some(&session));
                Validity::Valid(session)
            }
            Err(e) => {
                guarded.state = State::Absent;
                drop(guarded);
                warn!(error = %e, "session refresh failed; clearing session");
                self.persist(epoch, None);
                Validity::Failed(e.into())
            }
        }
    }
}

// ── SessionManager ────────────────────────────────────────────────────

/// Owns the session. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        store: CredentialStore,
        options: SessionOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                guarded: Mutex::new(Guarded {
                    state: State::Absent,
                    epoch: 0,
                }),
                persisting: Mutex::new(()),
                store,
                authenticator,
                clock: options.clock,
                skew_ms: options.expiry_skew_ms,
            }),
        }
    }

    pub fn expiry_skew_ms(&self) -> i64 {
        self.inner.skew_ms
    }

    /// Load a previously saved session from the credential store.
    ///
    /// The expiry is re-derived from the stored access credential. A session
    /// past its expiry is kept so that the next `ensure_valid()` refreshes it.
    pub fn restore(&self) -> SessionStatus {
        let Some(stored) = self.inner.store.load() else {
            debug!("no stored session");
            return self.status();
        };

        match Session::from_credentials(stored.access_credential, stored.refresh_credential) {
            Ok(session) => {
                self.replace_state(State::Active(session));
                let status = self.status();
                info!(%status, "session restored from storage");
                status
            }
            Err(e) => {
                warn!(error = %e, "stored credential is malformed; clearing");
                let epoch = self.replace_state(State::Absent);
                self.inner.persist(epoch, None);
                SessionStatus::Absent
            }
        }
    }

    /// Exchange a username and password for a session.
    pub async fn login(&self, credentials: &LoginCredentials) -> Outcome<Session> {
        match self.inner.authenticator.login(credentials).await {
            Ok(session) => {
                let epoch = self.replace_state(State::Active(session.clone()));
                self.inner.persist(epoch, Some(&session));
                info!(username = %credentials.username, "logged in");
                Outcome::Success(session)
            }
            Err(err) => {
                match &err {
                    AuthError::Rejected { code, .. } => info!(%code, "login rejected"),
                    AuthError::Malformed(e) => {
                        warn!(error = %e, "login returned a malformed credential")
                    }
                    AuthError::Transport(_) => {}
                }
                err.into()
            }
        }
    }

    /// Explicit logout. Any in-flight refresh is orphaned and its result
    /// discarded.
    pub fn logout(&self) {
        self.clear("logged out");
    }

    /// Force re-authentication, e.g. after the service rejected a freshly
    /// refreshed credential.
    pub fn invalidate(&self) {
        self.clear("session invalidated");
    }

    fn clear(&self, why: &'static str) {
        let epoch = self.replace_state(State::Absent);
        self.inner.persist(epoch, None);
        info!("{}", why);
    }

    /// Start a new epoch with `state`, orphaning any in-flight refresh.
    fn replace_state(&self, state: State) -> u64 {
        let mut guarded = self.inner.lock();
        guarded.epoch += 1;
        guarded.state = state;
        guarded.epoch
    }

    /// Mark the session expired because the service rejected
    /// `rejected_access_credential`.
    ///
    /// Only demotes the session if that credential is still current; a
    /// rejection of an already-replaced credential is ignored so concurrent
    /// rejections lead to one refresh.
    pub fn expire(&self, rejected_access_credential: &str) {
        let mut guarded = self.inner.lock();
        if let State::Active(session) = &guarded.state
            && session.access_credential == rejected_access_credential
        {
            let session = session.clone();
            guarded.state = State::Stale(session);
            debug!("service rejected the current credential; marked expired");
        }
    }

    pub fn status(&self) -> SessionStatus {
        let guarded = self.inner.lock();
        match &guarded.state {
            State::Absent => SessionStatus::Absent,
            State::Refreshing { .. } => SessionStatus::Refreshing,
            State::Stale(_) => SessionStatus::Expired,
            State::Active(session) if self.inner.is_expired(session) => SessionStatus::Expired,
            State::Active(_) => SessionStatus::Valid,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status() == SessionStatus::Valid
    }

    pub fn session_view(&self) -> SessionView {
        let guarded = self.inner.lock();
        let session = match &guarded.state {
            State::Absent => None,
            State::Active(s) | State::Stale(s) => Some(s),
            State::Refreshing { previous, .. } => Some(previous),
        };
        SessionView {
            is_authenticated: session.is_some(),
            claims: session.and_then(|s| s.claims().ok()),
        }
    }

    /// Resolve to a session that is valid right now, refreshing first if
    /// needed. Concurrent callers share a single refresh.
    pub async fn ensure_valid(&self) -> Validity {
        let flight = {
            let mut guarded = self.inner.lock();
            match &guarded.state {
                State::Absent => return Validity::Failed(AuthFailureReason::NoSession),
                State::Active(session) if !self.inner.is_expired(session) => {
                    return Validity::Valid(session.clone());
                }
                State::Refreshing { flight, .. } => {
                    debug!("joining in-flight refresh");
                    flight.clone()
                }
                State::Active(session) | State::Stale(session) => {
                    let stale = session.clone();
                    let flight = self.start_refresh(&stale, guarded.epoch);
                    guarded.state = State::Refreshing {
                        previous: stale,
                        flight: flight.clone(),
                    };
                    flight
                }
            }
        };
        flight.await
    }

    fn start_refresh(&self, session: &Session, epoch: u64) -> RefreshFlight {
        info!("session expired; refreshing");
        let inner = Arc::clone(&self.inner);
        let refresh_credential = session.refresh_credential.clone();
        let task = tokio::spawn(async move {
            let result = inner.authenticator.refresh(&refresh_credential).await;
            inner.complete_refresh(epoch, result)
        });

        let inner = Arc::clone(&self.inner);
        async move {
            match task.await {
                Ok(validity) => validity,
                Err(e) => {
                    warn!(error = %e, "refresh task did not complete");
                    inner.complete_refresh(
                        epoch,
                        Err(AuthError::Transport(TransportFailure::Request(
                            "refresh task aborted".to_string(),
                        ))),
                    )
                }
            }
        }
        .boxed()
        .shared()
    }
}
