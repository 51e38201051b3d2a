//! Typed error hierarchy for the cards client core.
//!
//! Remote failures never surface as `Err` from the request pipeline or the
//! board engine; those are folded into [`crate::client::Outcome`]. The enums
//! here cover the local failure modes underneath:
//! - `ClaimError`: an access credential that cannot be decoded
//! - `StorageError`: durable key-value storage failures (always swallowed)
//! - `TransportFailure`: no usable response reached the client
//! - `AuthError`: login/refresh calls that did not yield a session
//! - `AuthFailureReason`: why a request was answered with `AuthFailure`
//! - `RemoteFailure`: a non-success outcome lifted into an error
//! - `BoardError`: drag events that do not fit the local board

use std::path::PathBuf;

use thiserror::Error;

/// Failure to decode an access credential into claims.
///
/// Callers treat every variant exactly like an expired credential.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("Malformed credential: {reason}")]
    MalformedCredential { reason: String },
}

impl ClaimError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedCredential {
            reason: reason.into(),
        }
    }
}

/// Errors from the durable key-value storage backing the credential store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read storage file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write storage file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage contents are not valid JSON: {0}")]
    Corrupt(#[source] serde_json::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// A call that never produced a usable response.
///
/// Never retried by the pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportFailure {
    #[error("Request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Could not connect to the service: {0}")]
    Connect(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Service returned an unreadable response (HTTP {status}): {message}")]
    InvalidResponse { status: u16, message: String },
}

/// Errors from the login and refresh calls made on behalf of the session
/// manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Service rejected the credentials ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error(transparent)]
    Transport(#[from] TransportFailure),

    #[error(transparent)]
    Malformed(#[from] ClaimError),
}

/// Why a session could not be established or renewed.
///
/// Every variant routes the user back to re-authentication.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthFailureReason {
    #[error("Not logged in")]
    NoSession,

    #[error("Session credential is malformed")]
    MalformedCredential,

    #[error("Session refresh was rejected ({code}): {message}")]
    RefreshRejected { code: String, message: String },

    #[error("Session refresh failed: {0}")]
    RefreshTransport(TransportFailure),

    #[error("Service rejected the refreshed session")]
    RejectedAfterRefresh,

    #[error("Logged out while the request was waiting")]
    LoggedOut,
}

impl From<AuthError> for AuthFailureReason {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Rejected { code, message } => Self::RefreshRejected { code, message },
            AuthError::Transport(failure) => Self::RefreshTransport(failure),
            AuthError::Malformed(_) => Self::MalformedCredential,
        }
    }
}

/// A non-success [`crate::client::Outcome`] lifted into an error, for callers
/// that want `?` propagation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteFailure {
    #[error("{message}")]
    Business { code: String, message: String },

    #[error("Authentication required: {0}")]
    Auth(AuthFailureReason),

    #[error("Connectivity problem: {0}")]
    Transport(TransportFailure),
}

/// Drag events that cannot be applied to the local board.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BoardError {
    #[error("No board is loaded")]
    NoBoard,

    #[error("Column {id} not found on the board")]
    ColumnNotFound { id: i64 },

    #[error("Index {index} is out of range for a list of {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Card drag is missing its {side} column")]
    MissingParent { side: &'static str },
}
