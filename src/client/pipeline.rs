//! The request pipeline wrapped around every authenticated call.
//!
//! ```text
//!  execute(spec)
//!    ├─ ensure_valid() ── Failed ──────────────────────> AuthFailure
//!    ├─ send(bearer) ──── no response ─────────────────> TransportError
//!    ├─ classify ──────── "000" ───────────────────────> Success(data)
//!    │                ├── other code ──────────────────> BusinessError
//!    │                └── "A401" / HTTP 401
//!    │                       ├─ expire(credential) + ensure_valid()
//!    │                       └─ send once more ─ rejected again ─> AuthFailure
//!    └─ (never a second retry)
//! ```

use std::sync::Arc;

use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::Value;
use tracing::{debug, warn};

use super::transport::{Body, HttpRequest, Method, Transport};
use super::wire::{self, Classification};
use crate::errors::{AuthError, AuthFailureReason, RemoteFailure, TransportFailure};
use crate::session::{SessionManager, Validity};

// ── Outcome ───────────────────────────────────────────────────────────

/// Typed result of a remote call. Remote failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T> {
    Success(T),
    /// The service understood the request and refused it. `message` is
    /// user-facing.
    BusinessError { code: String, message: String },
    AuthFailure(AuthFailureReason),
    TransportError(TransportFailure),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Success(value) => Outcome::Success(f(value)),
            Self::BusinessError { code, message } => Outcome::BusinessError { code, message },
            Self::AuthFailure(reason) => Outcome::AuthFailure(reason),
            Self::TransportError(failure) => Outcome::TransportError(failure),
        }
    }

    pub fn into_result(self) -> Result<T, RemoteFailure> {
        match self {
            Self::Success(value) => Ok(value),
            Self::BusinessError { code, message } => Err(RemoteFailure::Business { code, message }),
            Self::AuthFailure(reason) => Err(RemoteFailure::Auth(reason)),
            Self::TransportError(failure) => Err(RemoteFailure::Transport(failure)),
        }
    }
}

/// Token endpoint errors in the shape every other call reports.
impl<T> From<AuthError> for Outcome<T> {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Rejected { code, message } => Self::BusinessError { code, message },
            AuthError::Transport(failure) => Self::TransportError(failure),
            AuthError::Malformed(_) => Self::AuthFailure(AuthFailureReason::MalformedCredential),
        }
    }
}

// ── RequestSpec ───────────────────────────────────────────────────────

/// Description of one remote call, replayable for the single retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Body,
    /// Dispatch without a credential and without session handling.
    pub skip_auth: bool,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: Body::Empty,
            skip_auth: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Body::Json(body);
        self
    }

    pub fn form<K: Into<String>, V: Into<String>>(
        mut self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.body = Body::Form(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    fn to_http(&self, bearer: Option<&str>) -> HttpRequest {
        HttpRequest {
            method: self.method,
            path: self.path.clone(),
            query: self.query.clone(),
            body: self.body.clone(),
            bearer: bearer.map(str::to_string),
        }
    }
}

// ── RequestPipeline ───────────────────────────────────────────────────

enum Attempt {
    Done(Outcome<Value>),
    SessionInvalid,
}

/// Attaches credentials, classifies responses and performs the bounded
/// single retry after a refresh. Cheap to clone.
#[derive(Clone)]
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    session: SessionManager,
}

impl RequestPipeline {
    pub fn new(transport: Arc<dyn Transport>, session: SessionManager) -> Self {
        Self { transport, session }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Run a call and decode its `data` into `T`.
    pub async fn execute<T: DeserializeOwned>(&self, spec: &RequestSpec) -> Outcome<T> {
        match self.execute_value(spec).await {
            Outcome::Success(data) => match serde_json::from_value(data) {
                Ok(value) => Outcome::Success(value),
                Err(e) => {
                    warn!(path = %spec.path, error = %e, "response data has an unexpected shape");
                    Outcome::TransportError(TransportFailure::InvalidResponse {
                        status: 200,
                        message: e.to_string(),
                    })
                }
            },
            Outcome::BusinessError { code, message } => Outcome::BusinessError { code, message },
            Outcome::AuthFailure(reason) => Outcome::AuthFailure(reason),
            Outcome::TransportError(failure) => Outcome::TransportError(failure),
        }
    }

    /// Run a call whose success carries no meaningful body.
    pub async fn execute_unit(&self, spec: &RequestSpec) -> Outcome<()> {
        self.execute::<IgnoredAny>(spec).await.map(|_| ())
    }

    async fn execute_value(&self, spec: &RequestSpec) -> Outcome<Value> {
        if spec.skip_auth {
            return match self.attempt(spec, None).await {
                Attempt::Done(outcome) => outcome,
                Attempt::SessionInvalid => Outcome::AuthFailure(AuthFailureReason::NoSession),
            };
        }

        let credential = match self.session.ensure_valid().await {
            Validity::Valid(session) => session.access_credential,
            Validity::Failed(reason) => return Outcome::AuthFailure(reason),
        };

        match self.attempt(spec, Some(&credential)).await {
            Attempt::Done(outcome) => return outcome,
            Attempt::SessionInvalid => {
                debug!(path = %spec.path, "credential rejected; refreshing before one retry");
            }
        }

        self.session.expire(&credential);
        let fresh = match self.session.ensure_valid().await {
            Validity::Valid(session) => session.access_credential,
            Validity::Failed(reason) => return Outcome::AuthFailure(reason),
        };

        match self.attempt(spec, Some(&fresh)).await {
            Attempt::Done(outcome) => outcome,
            Attempt::SessionInvalid => {
                warn!(path = %spec.path, "refreshed credential rejected; forcing re-authentication");
                self.session.invalidate();
                Outcome::AuthFailure(AuthFailureReason::RejectedAfterRefresh)
            }
        }
    }

    async fn attempt(&self, spec: &RequestSpec, bearer: Option<&str>) -> Attempt {
        let response = match self.transport.send(spec.to_http(bearer)).await {
            Ok(response) => response,
            Err(failure) => {
                debug!(path = %spec.path, error = %failure, "transport failure");
                return Attempt::Done(Outcome::TransportError(failure));
            }
        };

        match wire::classify_response(response.status, &response.body) {
            Ok(Classification::Success(data)) => Attempt::Done(Outcome::Success(data)),
            Ok(Classification::SessionInvalid) => Attempt::SessionInvalid,
            Ok(Classification::Business { code, message }) => {
                debug!(path = %spec.path, %code, "business error");
                Attempt::Done(Outcome::BusinessError { code, message })
            }
            Err(message) => Attempt::Done(Outcome::TransportError(
                TransportFailure::InvalidResponse {
                    status: response.status,
                    message,
                },
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::HttpResponse;
    use crate::errors::AuthError;
    use crate::session::claims::tests::credential_with;
    use crate::session::{
        Authenticator, CredentialStore, LoginCredentials, ManualClock, Session, SessionOptions,
        SessionStatus,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const EXP_SECONDS: i64 = 1_800_000_000;

    fn session(tag: &str, exp_seconds: i64) -> Session {
        let access = credential_with(serde_json::json!({"exp": exp_seconds, "id": 1, "jti": tag}));
        Session::from_credentials(access, format!("refresh-{}", tag)).unwrap()
    }

    struct CountingAuth {
        refreshes: AtomicUsize,
        next: Session,
    }

    #[async_trait]
    impl Authenticator for CountingAuth {
        async fn login(&self, _c: &LoginCredentials) -> Result<Session, AuthError> {
            Ok(session("login", EXP_SECONDS))
        }
        async fn refresh(&self, _r: &str) -> Result<Session, AuthError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(self.next.clone())
        }
    }

    /// Replays canned responses and records the bearer of each request.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportFailure>>>,
        seen_bearers: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedTransport {
        fn with(responses: Vec<Result<HttpResponse, TransportFailure>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen_bearers: Mutex::default(),
            }
        }

        fn calls(&self) -> usize {
            self.seen_bearers.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
            self.seen_bearers.lock().unwrap().push(request.bearer.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportFailure::Request("script exhausted".into())))
        }
    }

    fn ok(body: serde_json::Value) -> Result<HttpResponse, TransportFailure> {
        Ok(HttpResponse {
            status: 200,
            body: body.to_string().into_bytes(),
        })
    }

    fn unauthorized() -> Result<HttpResponse, TransportFailure> {
        Ok(HttpResponse {
            status: 401,
            body: Vec::new(),
        })
    }

    async fn pipeline_with(
        transport: Arc<ScriptedTransport>,
        now_ms: i64,
    ) -> (RequestPipeline, Arc<CountingAuth>, Session) {
        let auth = Arc::new(CountingAuth {
            refreshes: AtomicUsize::new(0),
            next: session("fresh", EXP_SECONDS + 3600),
        });
        let manager = SessionManager::new(
            auth.clone(),
            CredentialStore::in_memory(),
            SessionOptions {
                clock: Arc::new(ManualClock::new(now_ms)),
                ..SessionOptions::default()
            },
        );
        let initial = match manager.login(&LoginCredentials::new("u", "p")).await {
            Outcome::Success(s) => s,
            other => panic!("login failed: {:?}", other),
        };
        (RequestPipeline::new(transport, manager), auth, initial)
    }

    const NOW_VALID: i64 = EXP_SECONDS * 1000 - 600_000;

    // ── classification ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_success_decodes_data() {
        let transport = Arc::new(ScriptedTransport::with(vec![ok(
            serde_json::json!({"code": "000", "msg": "", "data": [1, 2, 3]}),
        )]));
        let (pipeline, auth, initial) = pipeline_with(transport.clone(), NOW_VALID).await;

        let outcome: Outcome<Vec<i32>> = pipeline.execute(&RequestSpec::get("/kanban")).await;
        assert_eq!(outcome, Outcome::Success(vec![1, 2, 3]));
        assert_eq!(auth.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(
            transport.seen_bearers.lock().unwrap()[0].as_deref(),
            Some(initial.access_credential.as_str())
        );
    }

    #[tokio::test]
    async fn test_business_error_is_surfaced_without_retry() {
        let transport = Arc::new(ScriptedTransport::with(vec![ok(
            serde_json::json!({"code": "B001", "msg": "移动失败"}),
        )]));
        let (pipeline, _, _) = pipeline_with(transport.clone(), NOW_VALID).await;

        let outcome = pipeline.execute_unit(&RequestSpec::put("/kanban/card/order")).await;
        assert_eq!(
            outcome,
            Outcome::BusinessError {
                code: "B001".into(),
                message: "移动失败".into()
            }
        );
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::with(vec![Err(
            TransportFailure::Timeout { timeout_ms: 15000 },
        )]));
        let (pipeline, _, _) = pipeline_with(transport.clone(), NOW_VALID).await;

        let outcome = pipeline.execute_unit(&RequestSpec::get("/kanban")).await;
        assert_eq!(
            outcome,
            Outcome::TransportError(TransportFailure::Timeout { timeout_ms: 15000 })
        );
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_body_is_invalid_response() {
        let transport = Arc::new(ScriptedTransport::with(vec![Ok(HttpResponse {
            status: 502,
            body: b"Bad Gateway".to_vec(),
        })]));
        let (pipeline, _, _) = pipeline_with(transport, NOW_VALID).await;

        let outcome = pipeline.execute_unit(&RequestSpec::get("/kanban")).await;
        assert!(matches!(
            outcome,
            Outcome::TransportError(TransportFailure::InvalidResponse { status: 502, .. })
        ));
    }

    #[tokio::test]
    async fn test_unit_call_ignores_data() {
        let transport = Arc::new(ScriptedTransport::with(vec![ok(
            serde_json::json!({"code": "000", "data": {"whatever": true}}),
        )]));
        let (pipeline, _, _) = pipeline_with(transport, NOW_VALID).await;
        assert!(pipeline.execute_unit(&RequestSpec::delete("/kanban")).await.is_success());
    }

    // ── session handling ─────────────────────────────────────────────

    #[tokio::test]
    async fn test_session_invalid_refreshes_and_retries_once() {
        let transport = Arc::new(ScriptedTransport::with(vec![
            ok(serde_json::json!({"code": "A401", "msg": "token invalid"})),
            ok(serde_json::json!({"code": "000", "data": 7})),
        ]));
        let (pipeline, auth, initial) = pipeline_with(transport.clone(), NOW_VALID).await;

        let outcome: Outcome<i32> = pipeline.execute(&RequestSpec::get("/kanban")).await;
        assert_eq!(outcome, Outcome::Success(7));
        assert_eq!(auth.refreshes.load(Ordering::SeqCst), 1);

        let bearers = transport.seen_bearers.lock().unwrap().clone();
        assert_eq!(bearers.len(), 2);
        assert_eq!(bearers[0].as_deref(), Some(initial.access_credential.as_str()));
        assert_eq!(
            bearers[1].as_deref(),
            Some(auth.next.access_credential.as_str())
        );
    }

    #[tokio::test]
    async fn test_permanent_rejection_stops_after_one_retry() {
        let transport = Arc::new(ScriptedTransport::with(vec![unauthorized(), unauthorized()]));
        let (pipeline, auth, _) = pipeline_with(transport.clone(), NOW_VALID).await;

        let outcome = pipeline.execute_unit(&RequestSpec::get("/kanban")).await;
        assert_eq!(
            outcome,
            Outcome::AuthFailure(AuthFailureReason::RejectedAfterRefresh)
        );
        assert_eq!(transport.calls(), 2);
        assert_eq!(auth.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.session().status(), SessionStatus::Absent);
    }

    #[tokio::test]
    async fn test_expired_session_refreshes_before_dispatch() {
        let transport = Arc::new(ScriptedTransport::with(vec![ok(
            serde_json::json!({"code": "000", "data": null}),
        )]));
        let (pipeline, auth, _) =
            pipeline_with(transport.clone(), EXP_SECONDS * 1000 - 30_000).await;

        assert!(pipeline.execute_unit(&RequestSpec::get("/kanban")).await.is_success());
        assert_eq!(auth.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(
            transport.seen_bearers.lock().unwrap()[0].as_deref(),
            Some(auth.next.access_credential.as_str())
        );
    }

    #[tokio::test]
    async fn test_no_session_short_circuits_without_network() {
        let transport = Arc::new(ScriptedTransport::default());
        let (pipeline, _, _) = pipeline_with(transport.clone(), NOW_VALID).await;
        pipeline.session().logout();

        let outcome = pipeline.execute_unit(&RequestSpec::get("/kanban")).await;
        assert_eq!(outcome, Outcome::AuthFailure(AuthFailureReason::NoSession));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_skip_auth_sends_no_bearer_and_never_refreshes() {
        let transport = Arc::new(ScriptedTransport::with(vec![unauthorized()]));
        let (pipeline, auth, _) = pipeline_with(transport.clone(), NOW_VALID).await;

        let outcome = pipeline
            .execute_unit(&RequestSpec::get("/oauth/rsa").skip_auth())
            .await;
        assert_eq!(outcome, Outcome::AuthFailure(AuthFailureReason::NoSession));
        assert_eq!(transport.seen_bearers.lock().unwrap()[0], None);
        assert_eq!(auth.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.session().status(), SessionStatus::Valid);
    }

    // ── Outcome helpers ──────────────────────────────────────────────

    #[test]
    fn test_outcome_into_result() {
        let failed: Outcome<()> = Outcome::BusinessError {
            code: "B1".into(),
            message: "nope".into(),
        };
        assert_eq!(
            failed.into_result(),
            Err(RemoteFailure::Business {
                code: "B1".into(),
                message: "nope".into()
            })
        );
        assert_eq!(Outcome::Success(3).map(|n| n * 2).into_result(), Ok(6));
    }

    #[test]
    fn test_request_spec_builder() {
        let spec = RequestSpec::post("/kanban/collect")
            .query("kanbanId", 5)
            .query("isCollected", true);
        assert_eq!(spec.method, Method::Post);
        assert_eq!(
            spec.query,
            vec![
                ("kanbanId".to_string(), "5".to_string()),
                ("isCollected".to_string(), "true".to_string())
            ]
        );
        assert!(!spec.skip_auth);
    }
}
