//! In-process merch shop used as a load target in tests and local runs.
//!
//! Implements `POST /api/auth`, `GET /api/info`, `GET /api/buy/{item}` and
//! `POST /api/sendCoin` with bearer tokens, plus knobs for injecting failures.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub mod shop;

use shop::{Shop, ShopError};

pub const PATH_AUTH: &str = "/api/auth";
pub const PATH_INFO: &str = "/api/info";
pub const PATH_BUY: &str = "/api/buy/{item}";
pub const PATH_SEND_COIN: &str = "/api/sendCoin";

#[derive(Debug, Clone)]
pub struct ShopConfig {
    pub initial_coins: i64,
    /// Every Nth auth request answers 500.
    pub auth_failure_every: Option<u64>,
    /// Every auth request answers 401.
    pub reject_auth: bool,
    /// Fixed delay added to every response.
    pub delay: Option<Duration>,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            initial_coins: shop::INITIAL_COINS,
            auth_failure_every: None,
            reject_auth: false,
            delay: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShopStats {
    auth_total: Arc<AtomicU64>,
    auth_injected_failures: Arc<AtomicU64>,
    info_total: Arc<AtomicU64>,
    buy_total: Arc<AtomicU64>,
    send_coin_total: Arc<AtomicU64>,
    self_transfers: Arc<AtomicU64>,
    unauthorized_total: Arc<AtomicU64>,
}

fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

impl ShopStats {
    pub fn auth_total(&self) -> u64 {
        self.auth_total.load(Ordering::Relaxed)
    }

    pub fn auth_injected_failures(&self) -> u64 {
        self.auth_injected_failures.load(Ordering::Relaxed)
    }

    pub fn info_total(&self) -> u64 {
        self.info_total.load(Ordering::Relaxed)
    }

    pub fn buy_total(&self) -> u64 {
        self.buy_total.load(Ordering::Relaxed)
    }

    pub fn send_coin_total(&self) -> u64 {
        self.send_coin_total.load(Ordering::Relaxed)
    }

    pub fn self_transfers(&self) -> u64 {
        self.self_transfers.load(Ordering::Relaxed)
    }

    pub fn unauthorized_total(&self) -> u64 {
        self.unauthorized_total.load(Ordering::Relaxed)
    }

    pub fn requests_total(&self) -> u64 {
        self.auth_total() + self.info_total() + self.buy_total() + self.send_coin_total()
    }
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<ShopConfig>,
    shop: Arc<Mutex<Shop>>,
    stats: ShopStats,
}

impl AppState {
    pub fn new(config: ShopConfig) -> Self {
        Self {
            shop: Arc::new(Mutex::new(Shop::new(config.initial_coins))),
            config: Arc::new(config),
            stats: ShopStats::default(),
        }
    }

    pub fn stats(&self) -> &ShopStats {
        &self.stats
    }

    async fn pause(&self) {
        if let Some(d) = self.config.delay {
            sleep(d).await;
        }
    }

    fn caller(&self, headers: &HeaderMap) -> Result<String, Response> {
        let user = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .and_then(|token| self.shop.lock().user_for_token(token.trim()));

        user.ok_or_else(|| {
            bump(&self.stats.unauthorized_total);
            error_response(StatusCode::UNAUTHORIZED, "unauthorized")
        })
    }
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "errors": message.to_string() }))).into_response()
}

fn shop_error(err: ShopError) -> Response {
    let status = match err {
        ShopError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        _ => StatusCode::BAD_REQUEST,
    };
    error_response(status, err)
}

#[derive(Debug, Deserialize)]
struct AuthRequest {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendCoinRequest {
    #[serde(alias = "recipient")]
    to_user: String,
    amount: i64,
}

async fn handle_auth(State(state): State<AppState>, body: axum::body::Bytes) -> Response {
    let n = bump(&state.stats.auth_total);
    state.pause().await;

    if state.config.reject_auth {
        return error_response(StatusCode::UNAUTHORIZED, "auth rejected");
    }
    if let Some(every) = state.config.auth_failure_every
        && every > 0
        && n % every == 0
    {
        bump(&state.stats.auth_injected_failures);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "injected failure");
    }

    let req: AuthRequest = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err),
    };
    if req.username.is_empty() || req.password.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "username and password are required");
    }

    match state.shop.lock().authenticate(&req.username, &req.password) {
        Ok(token) => Json(json!({ "token": token })).into_response(),
        Err(err) => shop_error(err),
    }
}

async fn handle_info(State(state): State<AppState>, headers: HeaderMap) -> Response {
    bump(&state.stats.info_total);
    state.pause().await;

    let user = match state.caller(&headers) {
        Ok(u) => u,
        Err(res) => return res,
    };
    match state.shop.lock().info(&user) {
        Some(info) => Json(info).into_response(),
        None => error_response(StatusCode::UNAUTHORIZED, "unknown user"),
    }
}

async fn handle_buy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(item): Path<String>,
) -> Response {
    bump(&state.stats.buy_total);
    state.pause().await;

    let user = match state.caller(&headers) {
        Ok(u) => u,
        Err(res) => return res,
    };
    match state.shop.lock().buy(&user, &item) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => shop_error(err),
    }
}

async fn handle_send_coin(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    bump(&state.stats.send_coin_total);
    state.pause().await;

    let user = match state.caller(&headers) {
        Ok(u) => u,
        Err(res) => return res,
    };
    let req: SendCoinRequest = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err),
    };
    if req.to_user == user {
        bump(&state.stats.self_transfers);
    }

    match state.shop.lock().send_coin(&user, &req.to_user, req.amount) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => shop_error(err),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(PATH_AUTH, post(handle_auth))
        .route(PATH_INFO, get(handle_info))
        .route(PATH_BUY, get(handle_buy))
        .route(PATH_SEND_COIN, post(handle_send_coin))
        .with_state(state)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: ShopStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(ShopConfig::default()).await
    }

    pub async fn start_with(config: ShopConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = AppState::new(config);
        let stats = state.stats().clone();
        let app = router(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn stats(&self) -> &ShopStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
