//! Remote access: HTTP transport, envelope classification, the
//! authenticated request pipeline and typed board and account calls.
//!
//! ```text
//!  BoardApi / UserApi ──> RequestPipeline ──ensure_valid──> SessionManager ──refresh──> OAuthClient
//!                    │                                                          │
//!                    └──────────────── Transport (reqwest) <────────────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod pipeline;
pub mod transport;
pub mod user;
pub mod wire;

use std::sync::Arc;

use anyhow::{Context, Result};

pub use api::BoardApi;
pub use auth::{
    LoginKey, OAuthClient, PasswordSealer, RsaPasswordSealer, TokenResponse, seal_credentials,
};
pub use pipeline::{Outcome, RequestPipeline, RequestSpec};
pub use transport::{
    Body, DEFAULT_TIMEOUT_MS, HttpRequest, HttpResponse, Method, ReqwestTransport, Transport,
};
pub use user::UserApi;

use crate::board::BoardEngine;
use crate::config::CardsConfig;
use crate::errors::TransportFailure;
use crate::session::{
    CredentialStore, FileStorage, LoginCredentials, Session, SessionManager, SessionOptions,
    SessionStatus,
};

/// Everything a front end needs, wired over one transport and one session.
#[derive(Clone)]
pub struct CardsClient {
    auth: Arc<OAuthClient>,
    session: SessionManager,
    boards: BoardApi,
    users: UserApi,
    /// When set, passwords leave the process only in sealed form.
    sealer: Option<Arc<dyn PasswordSealer>>,
}

impl CardsClient {
    /// Wire up from resolved configuration and restore any saved session.
    pub fn from_config(config: &CardsConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.base_url(), config.timeout_ms())
            .with_context(|| format!("Failed to build HTTP client for {}", config.base_url()))?;
        let store = CredentialStore::new(FileStorage::new(&config.storage_path));
        let options = SessionOptions {
            expiry_skew_ms: config.expiry_skew_ms(),
            ..SessionOptions::default()
        };
        let mut client = Self::from_parts(
            Arc::new(transport),
            &config.toml.service.client_id,
            &config.toml.service.client_secret,
            store,
            options,
        );
        if config.toml.service.seal_password {
            client = client.with_sealer(Arc::new(RsaPasswordSealer));
        }
        let status = client.session.restore();
        tracing::debug!(%status, storage = %config.storage_path.display(), "session restored");
        Ok(client)
    }

    pub fn from_parts(
        transport: Arc<dyn Transport>,
        client_id: &str,
        client_secret: &str,
        store: CredentialStore,
        options: SessionOptions,
    ) -> Self {
        let auth = Arc::new(OAuthClient::new(transport.clone(), client_id, client_secret));
        let session = SessionManager::new(auth.clone(), store, options);
        let pipeline = RequestPipeline::new(transport, session.clone());
        Self {
            auth,
            session,
            boards: BoardApi::new(pipeline.clone()),
            users: UserApi::new(pipeline),
            sealer: None,
        }
    }

    /// Seal passwords with a fresh login key before login and registration.
    pub fn with_sealer(mut self, sealer: Arc<dyn PasswordSealer>) -> Self {
        self.sealer = Some(sealer);
        self
    }

    pub fn auth(&self) -> &OAuthClient {
        &self.auth
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn boards(&self) -> &BoardApi {
        &self.boards
    }

    pub fn users(&self) -> &UserApi {
        &self.users
    }

    /// Log in, sealing the password first when a sealer is configured.
    pub async fn login(&self, credentials: LoginCredentials) -> Outcome<Session> {
        match self.prepare(credentials).await {
            Ok(credentials) => self.session.login(&credentials).await,
            Err(outcome) => outcome,
        }
    }

    /// Create an account, sealing the password first when a sealer is
    /// configured.
    pub async fn register(&self, credentials: LoginCredentials) -> Outcome<()> {
        match self.prepare(credentials).await {
            Ok(credentials) => self.users.register(&credentials).await,
            Err(outcome) => outcome,
        }
    }

    async fn prepare<T>(
        &self,
        credentials: LoginCredentials,
    ) -> std::result::Result<LoginCredentials, Outcome<T>> {
        let Some(sealer) = &self.sealer else {
            return Ok(credentials);
        };
        let key = self.auth.login_key().await.map_err(Outcome::from)?;
        seal_credentials(credentials, &key, sealer.as_ref()).map_err(|e| {
            // The key was served but cannot be used.
            Outcome::TransportError(TransportFailure::InvalidResponse {
                status: 200,
                message: format!("{:#}", e),
            })
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// A fresh engine backed by this client's board calls.
    pub fn board_engine(&self) -> BoardEngine {
        BoardEngine::new(Arc::new(self.boards.clone()))
    }
}
