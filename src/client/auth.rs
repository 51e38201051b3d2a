//! Token endpoint calls: password login, refresh and the login key exchange.
//!
//! These go straight to the transport. Routing them through the pipeline
//! would make a refresh depend on a valid session.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde::Deserialize;
use tracing::debug;

use super::transport::{Body, HttpRequest, Method, Transport};
use super::wire::{self, Classification, SESSION_INVALID_CODE};
use crate::errors::{AuthError, TransportFailure};
use crate::session::{Authenticator, LoginCredentials, Session};

pub const TOKEN_PATH: &str = "/oauth/token";
pub const LOGIN_KEY_PATH: &str = "/oauth/rsa";

/// Payload of a successful token call.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub jti: Option<String>,
}

impl TokenResponse {
    /// The session expiry is taken from the access credential, never from
    /// `expires_in`.
    pub fn into_session(self) -> Result<Session, AuthError> {
        Ok(Session::from_credentials(
            self.access_token,
            self.refresh_token,
        )?)
    }
}

/// Single-use public key for sealing a password before login.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginKey {
    pub public_key: String,
    pub uuid: String,
}

/// Seals a plaintext password with a login key.
pub trait PasswordSealer: Send + Sync {
    fn seal(&self, public_key: &str, password: &str) -> anyhow::Result<String>;
}

/// RSA with PKCS#1 v1.5 padding, the scheme the service's login keys use.
///
/// The key arrives as base64 DER (X.509 SubjectPublicKeyInfo); PEM is
/// accepted too. The ciphertext is returned base64 encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaPasswordSealer;

impl PasswordSealer for RsaPasswordSealer {
    fn seal(&self, public_key: &str, password: &str) -> anyhow::Result<String> {
        let public_key = public_key.trim();
        let key = if public_key.starts_with("-----BEGIN") {
            RsaPublicKey::from_public_key_pem(public_key)
                .context("Login key is not a PEM RSA public key")?
        } else {
            let der = STANDARD
                .decode(public_key)
                .context("Login key is not valid base64")?;
            RsaPublicKey::from_public_key_der(&der).context("Login key is not an RSA public key")?
        };
        let sealed = key
            .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, password.as_bytes())
            .context("Password does not fit the login key")?;
        Ok(STANDARD.encode(sealed))
    }
}

/// Replace the password with its sealed form and record which key sealed it.
pub fn seal_credentials(
    credentials: LoginCredentials,
    key: &LoginKey,
    sealer: &dyn PasswordSealer,
) -> anyhow::Result<LoginCredentials> {
    let sealed = sealer
        .seal(&key.public_key, &credentials.password)
        .context("Failed to seal password with login key")?;
    Ok(LoginCredentials {
        password: sealed,
        key_id: Some(key.uuid.clone()),
        ..credentials
    })
}

// ── OAuthClient ───────────────────────────────────────────────────────

pub struct OAuthClient {
    transport: Arc<dyn Transport>,
    client_id: String,
    client_secret: String,
}

impl OAuthClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Fetch a fresh login key. Keys are single-use.
    pub async fn login_key(&self) -> Result<LoginKey, AuthError> {
        let request = HttpRequest {
            method: Method::Get,
            path: LOGIN_KEY_PATH.to_string(),
            query: Vec::new(),
            body: Body::Empty,
            bearer: None,
        };
        let response = self.transport.send(request).await?;
        match wire::classify_response(response.status, &response.body) {
            Ok(Classification::Success(data)) => serde_json::from_value(data).map_err(|e| {
                AuthError::Transport(TransportFailure::InvalidResponse {
                    status: response.status,
                    message: e.to_string(),
                })
            }),
            Ok(Classification::SessionInvalid) => Err(AuthError::Rejected {
                code: SESSION_INVALID_CODE.to_string(),
                message: "login key request was rejected".to_string(),
            }),
            Ok(Classification::Business { code, message }) => {
                Err(AuthError::Rejected { code, message })
            }
            Err(message) => Err(AuthError::Transport(TransportFailure::InvalidResponse {
                status: response.status,
                message,
            })),
        }
    }

    fn grant_form(&self, grant_type: &str) -> Vec<(String, String)> {
        vec![
            ("grant_type".to_string(), grant_type.to_string()),
            ("client_id".to_string(), self.client_id.clone()),
            ("client_secret".to_string(), self.client_secret.clone()),
        ]
    }

    async fn token_call(&self, form: Vec<(String, String)>) -> Result<Session, AuthError> {
        let request = HttpRequest {
            method: Method::Post,
            path: TOKEN_PATH.to_string(),
            query: Vec::new(),
            body: Body::Form(form),
            bearer: None,
        };
        let response = self.transport.send(request).await?;
        let status = response.status;

        match wire::classify_response(status, &response.body) {
            Ok(Classification::Success(data)) => {
                let token: TokenResponse = serde_json::from_value(data).map_err(|e| {
                    TransportFailure::InvalidResponse {
                        status,
                        message: format!("token payload: {}", e),
                    }
                })?;
                token.into_session()
            }
            Ok(Classification::SessionInvalid) => Err(AuthError::Rejected {
                code: SESSION_INVALID_CODE.to_string(),
                message: "credentials were rejected".to_string(),
            }),
            Ok(Classification::Business { code, message }) => {
                Err(AuthError::Rejected { code, message })
            }
            // Some deployments answer the token endpoint without the envelope.
            Err(envelope_err) => match serde_json::from_slice::<TokenResponse>(&response.body) {
                Ok(token) if (200..300).contains(&status) => token.into_session(),
                _ => Err(AuthError::Transport(TransportFailure::InvalidResponse {
                    status,
                    message: envelope_err,
                })),
            },
        }
    }
}

#[async_trait]
impl Authenticator for OAuthClient {
    async fn login(&self, credentials: &LoginCredentials) -> Result<Session, AuthError> {
        let mut form = self.grant_form("password");
        form.push(("username".to_string(), credentials.username.clone()));
        form.push(("password".to_string(), credentials.password.clone()));
        if let Some(code) = &credentials.captcha_code {
            form.push(("captcha_code".to_string(), code.clone()));
        }
        if let Some(key_id) = &credentials.key_id {
            form.push(("rsa_uuid".to_string(), key_id.clone()));
        }
        debug!(username = %credentials.username, "requesting password grant");
        self.token_call(form).await
    }

    async fn refresh(&self, refresh_credential: &str) -> Result<Session, AuthError> {
        let mut form = self.grant_form("refresh_token");
        form.push(("refresh_token".to_string(), refresh_credential.to_string()));
        debug!("requesting refresh grant");
        self.token_call(form).await
    }
}
