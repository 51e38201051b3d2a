//! Session ownership: credential persistence, claim decoding and the single
//! authoritative in-memory session.
//!
//! ```text
//!  login / refresh ──> SessionManager ──save/clear──> CredentialStore ──> KeyValueStorage
//!                           │
//!                           └── decode ──> claims::decode (expiry + subject)
//! ```
//!
//! Nothing outside [`manager::SessionManager`] mutates a [`Session`]; every
//! other component asks for one through `ensure_valid()`.

pub mod claims;
pub mod clock;
pub mod manager;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::errors::ClaimError;

pub use claims::Claims;
pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{
    AuthFailureReason, Authenticator, DEFAULT_EXPIRY_SKEW_MS, LoginCredentials, SessionManager,
    SessionOptions, SessionStatus, SessionView, Validity,
};
pub use store::{
    CredentialStore, FileStorage, KeyValueStorage, MemoryStorage, SESSION_STORAGE_KEY,
};

/// The access/refresh credential pair plus the expiry decoded from the
/// access credential.
///
/// Replaced wholesale on every refresh, never patched field by field.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_credential: String,
    pub refresh_credential: String,
    pub expires_at_epoch_ms: i64,
}

impl Session {
    /// Build a session, taking the expiry from the access credential's own
    /// `exp` claim.
    pub fn from_credentials(
        access_credential: impl Into<String>,
        refresh_credential: impl Into<String>,
    ) -> Result<Self, ClaimError> {
        let access_credential = access_credential.into();
        let claims = claims::decode(&access_credential)?;
        Ok(Self {
            access_credential,
            refresh_credential: refresh_credential.into(),
            expires_at_epoch_ms: claims.expires_at_epoch_ms,
        })
    }

    /// Decode the claims carried by the current access credential.
    pub fn claims(&self) -> Result<Claims, ClaimError> {
        claims::decode(&self.access_credential)
    }
}

// Credentials stay out of logs and panic messages.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_credential", &"<redacted>")
            .field("refresh_credential", &"<redacted>")
            .field("expires_at_epoch_ms", &self.expires_at_epoch_ms)
            .finish()
    }
}
