//! In-process fake of the board service for integration tests.
//!
//! Mints unsigned credentials whose expiry follows a shared `ManualClock`,
//! so tests can move time forward on both sides at once.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use serde_json::{Value, json};

use hardcore_cards::board::{Board, Card, Column};
use hardcore_cards::client::{CardsClient, ReqwestTransport};
use hardcore_cards::session::{Clock, CredentialStore, ManualClock, SessionOptions};

/// 2027-01-15T08:00:00Z
pub const START_MS: i64 = 1_800_000_000_000;
/// Lifetime of every minted access credential.
pub const ACCESS_LIFETIME_MS: i64 = 3_600_000;

#[derive(Default)]
pub struct Counters {
    pub logins: AtomicUsize,
    /// Password grants whose password arrived sealed.
    pub sealed_logins: AtomicUsize,
    pub refreshes: AtomicUsize,
    /// Non-token calls, including rejected ones.
    pub api_calls: AtomicUsize,
}

pub struct FakeState {
    pub clock: ManualClock,
    pub counters: Counters,
    /// Access credentials the service currently honors.
    pub live_access: Mutex<HashSet<String>>,
    pub live_refresh: Mutex<HashSet<String>>,
    pub board: Mutex<Board>,
    /// Reject every bearer, even freshly minted ones.
    pub reject_all_bearers: AtomicBool,
    pub reject_refresh: AtomicBool,
    /// Answer session-invalid as an `A401` envelope instead of HTTP 401.
    pub envelope_unauthorized: AtomicBool,
    /// Refuse the next N move calls with a business error.
    pub refuse_moves: AtomicUsize,
    pub refresh_delay: Mutex<Duration>,
    /// Delay before answering board list calls.
    pub stall: Mutex<Duration>,
    /// Outstanding single-use login keys by id.
    pub login_keys: Mutex<HashMap<String, RsaPrivateKey>>,
    /// Registered accounts, username to plaintext password.
    pub accounts: Mutex<HashMap<String, String>>,
    minted: AtomicUsize,
}

pub struct FakeService {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
}

impl FakeService {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState {
            clock: ManualClock::new(START_MS),
            counters: Counters::default(),
            live_access: Mutex::default(),
            live_refresh: Mutex::default(),
            board: Mutex::new(sample_board()),
            reject_all_bearers: AtomicBool::new(false),
            reject_refresh: AtomicBool::new(false),
            envelope_unauthorized: AtomicBool::new(false),
            refuse_moves: AtomicUsize::new(0),
            refresh_delay: Mutex::new(Duration::from_millis(50)),
            stall: Mutex::new(Duration::ZERO),
            login_keys: Mutex::default(),
            accounts: Mutex::default(),
            minted: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/oauth/token", post(token))
            .route("/oauth/rsa", get(login_key))
            .route("/user/register", post(register))
            .route("/user/check-username", get(check_username))
            .route("/kanban", get(list_boards))
            .route("/kanban/content", get(board_content))
            .route("/kanban/column/order", put(move_column))
            .route("/kanban/card/order", put(move_card))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// A client wired to this service, sharing its clock.
    pub fn client(&self) -> CardsClient {
        self.client_with_timeout(5_000)
    }

    pub fn client_with_timeout(&self, timeout_ms: u64) -> CardsClient {
        let transport = ReqwestTransport::new(self.base_url(), timeout_ms).unwrap();
        CardsClient::from_parts(
            Arc::new(transport),
            "fic",
            "fic",
            CredentialStore::in_memory(),
            SessionOptions {
                clock: Arc::new(self.state.clock.clone()),
                ..SessionOptions::default()
            },
        )
    }

    /// A client that seals passwords with this service's login keys.
    pub fn sealing_client(&self) -> CardsClient {
        self.client()
            .with_sealer(Arc::new(hardcore_cards::client::RsaPasswordSealer))
    }

    /// A client that is already logged in.
    pub async fn logged_in_client(&self) -> CardsClient {
        let client = self.client();
        let outcome = client
            .session()
            .login(&hardcore_cards::session::LoginCredentials::new("ada", "secret"))
            .await;
        assert!(outcome.is_success(), "login failed: {:?}", outcome);
        client
    }

    pub fn refreshes(&self) -> usize {
        self.state.counters.refreshes.load(Ordering::SeqCst)
    }

    pub fn api_calls(&self) -> usize {
        self.state.counters.api_calls.load(Ordering::SeqCst)
    }

    pub fn board(&self) -> Board {
        self.state.board.lock().unwrap().clone()
    }
}

/// Three columns: 10 [100..=103], 20 [200, 201], 30 [].
pub fn sample_board() -> Board {
    let column = |id: i64, position: i64, cards: &[i64]| Column {
        id,
        board_id: 1,
        title: format!("column {}", id),
        position,
        cards: cards
            .iter()
            .enumerate()
            .map(|(i, &card)| Card {
                id: card,
                column_id: id,
                title: format!("card {}", card),
                content: String::new(),
                position: i as i64,
            })
            .collect(),
    };
    Board {
        id: 1,
        title: "Sprint".into(),
        color_tag: "#4a90d9".into(),
        is_starred: false,
        columns: vec![
            column(10, 0, &[100, 101, 102, 103]),
            column(20, 1, &[200, 201]),
            column(30, 2, &[]),
        ],
    }
}

pub fn card_ids(board: &Board, column: i64) -> Vec<i64> {
    board
        .column(column)
        .map(|c| c.cards.iter().map(|card| card.id).collect())
        .unwrap_or_default()
}

// ── handlers ──────────────────────────────────────────────────────────

fn envelope(data: Value) -> Response {
    Json(json!({"code": "000", "msg": "", "data": data})).into_response()
}

fn business(code: &str, msg: &str) -> Response {
    Json(json!({"code": code, "msg": msg, "data": null})).into_response()
}

fn mint(state: &FakeState) -> (String, String) {
    let n = state.minted.fetch_add(1, Ordering::SeqCst);
    let exp_seconds = (state.clock.now_epoch_ms() + ACCESS_LIFETIME_MS) / 1000;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        json!({
            "exp": exp_seconds,
            "id": 7,
            "user_name": "ada",
            "authorities": ["ROLE_USER"],
            "jti": format!("jti-{}", n),
        })
        .to_string(),
    );
    let access = format!("{}.{}.sig", header, payload);
    let refresh = format!("refresh-{}", n);
    state.live_access.lock().unwrap().insert(access.clone());
    state.live_refresh.lock().unwrap().insert(refresh.clone());
    (access, refresh)
}

async fn login_key(State(state): State<Arc<FakeState>>) -> Response {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let der = private.to_public_key().to_public_key_der().unwrap();
    let uuid = format!("rsa-{}", state.minted.fetch_add(1, Ordering::SeqCst));
    state
        .login_keys
        .lock()
        .unwrap()
        .insert(uuid.clone(), private);
    envelope(json!({"publicKey": STANDARD.encode(der.as_bytes()), "uuid": uuid}))
}

/// The plaintext password, unsealing it when a key id came along. `None`
/// when the key is unknown or already used, or the ciphertext is bad.
fn unseal(state: &FakeState, password: &str, key_id: Option<&str>) -> Option<String> {
    let Some(key_id) = key_id else {
        return Some(password.to_string());
    };
    let private = state.login_keys.lock().unwrap().remove(key_id)?;
    let ciphertext = STANDARD.decode(password).ok()?;
    let plain = private.decrypt(Pkcs1v15Encrypt, &ciphertext).ok()?;
    String::from_utf8(plain).ok()
}

async fn token(
    State(state): State<Arc<FakeState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    match form.get("grant_type").map(String::as_str) {
        Some("password") => {
            state.counters.logins.fetch_add(1, Ordering::SeqCst);
            let key_id = form.get("rsa_uuid").map(String::as_str);
            if key_id.is_some() {
                state.counters.sealed_logins.fetch_add(1, Ordering::SeqCst);
            }
            let presented = form.get("password").map(String::as_str).unwrap_or_default();
            let Some(password) = unseal(&state, presented, key_id) else {
                return business("A0220", "密钥已失效，请重新登录");
            };
            let username = form.get("username").cloned().unwrap_or_default();
            let registered = state.accounts.lock().unwrap().get(&username).cloned();
            if password != "secret" && registered.as_deref() != Some(password.as_str()) {
                return business("A0210", "用户名或密码错误");
            }
        }
        Some("refresh_token") => {
            state.counters.refreshes.fetch_add(1, Ordering::SeqCst);
            let delay = *state.refresh_delay.lock().unwrap();
            tokio::time::sleep(delay).await;
            let presented = form.get("refresh_token").cloned().unwrap_or_default();
            let known = state.live_refresh.lock().unwrap().remove(&presented);
            if !known || state.reject_refresh.load(Ordering::SeqCst) {
                return business("A0230", "refresh token expired");
            }
        }
        _ => return business("A0400", "unsupported grant_type"),
    }
    let (access, refresh) = mint(&state);
    envelope(json!({"access_token": access, "refresh_token": refresh, "token_type": "bearer"}))
}

async fn register(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Response {
    let username = body["username"].as_str().unwrap_or_default().to_string();
    let presented = body["password"].as_str().unwrap_or_default();
    let Some(password) = unseal(&state, presented, body["rsaUuid"].as_str()) else {
        return business("A0220", "密钥已失效");
    };
    let mut accounts = state.accounts.lock().unwrap();
    if accounts.contains_key(&username) {
        return business("A0111", "邮箱已存在");
    }
    accounts.insert(username, password);
    envelope(Value::Null)
}

async fn check_username(
    State(state): State<Arc<FakeState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let username = query.get("username").cloned().unwrap_or_default();
    let exists = state.accounts.lock().unwrap().contains_key(&username);
    envelope(json!({"message": "检查完成", "exists": exists}))
}

/// `Some(response)` when the bearer is not acceptable.
fn check_bearer(state: &FakeState, headers: &HeaderMap) -> Option<Response> {
    state.counters.api_calls.fetch_add(1, Ordering::SeqCst);
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();

    let live = state.live_access.lock().unwrap().contains(&bearer);
    let unexpired = hardcore_cards::session::claims::decode(&bearer)
        .map(|c| c.expires_at_epoch_ms > state.clock.now_epoch_ms())
        .unwrap_or(false);
    if live && unexpired && !state.reject_all_bearers.load(Ordering::SeqCst) {
        return None;
    }
    if state.envelope_unauthorized.load(Ordering::SeqCst) {
        Some(business("A401", "访问令牌无效或已过期"))
    } else {
        Some(StatusCode::UNAUTHORIZED.into_response())
    }
}

async fn list_boards(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    if let Some(rejection) = check_bearer(&state, &headers) {
        return rejection;
    }
    let stall = *state.stall.lock().unwrap();
    if !stall.is_zero() {
        tokio::time::sleep(stall).await;
    }
    let board = state.board.lock().unwrap().clone();
    envelope(json!([{
        "kanbanId": board.id,
        "title": board.title,
        "color": board.color_tag,
        "collected": board.is_starred,
    }]))
}

async fn board_content(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(rejection) = check_bearer(&state, &headers) {
        return rejection;
    }
    let board = state.board.lock().unwrap().clone();
    if query.get("kanbanId") != Some(&board.id.to_string()) {
        return business("B0404", "看板不存在");
    }
    // Served in the persistence shape, positions as doubles.
    let columns: Vec<Value> = board
        .columns
        .iter()
        .map(|column| {
            json!({
                "columnId": column.id,
                "kanbanId": column.board_id,
                "columnTitle": column.title,
                "columnOrder": column.position as f64,
                "cards": column.cards.iter().map(|card| json!({
                    "cardId": card.id,
                    "columnId": card.column_id,
                    "title": card.title,
                    "content": card.content,
                    "orderInColumn": card.position as f64,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    envelope(json!({
        "baseInfo": {"kanbanId": board.id, "title": board.title, "color": board.color_tag,
                     "collected": board.is_starred},
        "columns": columns,
        "cooperating": false,
    }))
}

fn refuse_move(state: &FakeState) -> Option<Response> {
    let refused = state
        .refuse_moves
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    refused.then(|| business("B0300", "移动失败，请刷新后重试"))
}

async fn move_column(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejection) = check_bearer(&state, &headers) {
        return rejection;
    }
    if let Some(refusal) = refuse_move(&state) {
        return refusal;
    }
    let id = body["entityId"].as_i64().unwrap_or_default();
    let to = body["newPosition"].as_i64().unwrap_or_default() as usize;
    let mut board = state.board.lock().unwrap();
    let Some(from) = board.column_index(id) else {
        return business("B0404", "列不存在");
    };
    let column = board.columns.remove(from);
    let to = to.min(board.columns.len());
    board.columns.insert(to, column);
    for (i, column) in board.columns.iter_mut().enumerate() {
        column.position = i as i64;
    }
    envelope(Value::Null)
}

async fn move_card(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejection) = check_bearer(&state, &headers) {
        return rejection;
    }
    if let Some(refusal) = refuse_move(&state) {
        return refusal;
    }
    let id = body["entityId"].as_i64().unwrap_or_default();
    let to = body["newPosition"].as_i64().unwrap_or_default() as usize;
    let parent = body["newParentId"].as_i64().unwrap_or_default();

    let mut board = state.board.lock().unwrap();
    let Some(dst) = board.column_index(parent) else {
        return business("B0404", "列不存在");
    };
    let Some((src, from)) = board.columns.iter().enumerate().find_map(|(ci, column)| {
        column
            .cards
            .iter()
            .position(|card| card.id == id)
            .map(|pos| (ci, pos))
    }) else {
        return business("B0404", "卡片不存在");
    };
    let mut card = board.columns[src].cards.remove(from);
    card.column_id = parent;
    let to = to.min(board.columns[dst].cards.len());
    board.columns[dst].cards.insert(to, card);
    for column in board.columns.iter_mut() {
        for (i, card) in column.cards.iter_mut().enumerate() {
            card.position = i as i64;
        }
    }
    envelope(Value::Null)
}
