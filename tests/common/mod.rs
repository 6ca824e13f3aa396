// In-process mock of the hosted backend: auth endpoints plus one table,
// guarded like a table with owner-only write policies.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use portfolio_cms::auth::{GoTrueProvider, SessionManager};
use portfolio_cms::store::PostgrestStore;
use portfolio_cms::{PortfolioApp, PortfolioClient};

pub const ANON_KEY: &str = "test-anon-key";
pub const TABLE: &str = "app_universal";
pub const TAG: &str = "fa_a_um_template_de_";

struct Account {
    id: String,
    password: String,
}

#[derive(Default)]
struct Data {
    accounts: HashMap<String, Account>,
    /// access token -> email
    access: HashMap<String, String>,
    /// refresh token -> email
    refresh: HashMap<String, String>,
    rows: Vec<Value>,
}

pub struct MockState {
    data: Mutex<Data>,
    next_id: AtomicI64,
    /// Lifetime of issued access tokens, in seconds
    token_ttl: AtomicI64,
    pub require_confirmation: AtomicBool,
    pub failing: AtomicBool,
    pub table_requests: AtomicUsize,
}

impl MockState {
    pub fn set_token_ttl(&self, secs: i64) {
        self.token_ttl.store(secs, Ordering::SeqCst);
    }

    /// Put a row straight into the table, bypassing policies
    pub fn seed_row(&self, collection: &str, data: Value) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.data.lock().unwrap().rows.push(json!({
            "id": id,
            "collection": collection,
            "data": data,
            "created_at": "2024-01-01T00:00:00Z"
        }));
        id
    }

    pub fn row_count(&self) -> usize {
        self.data.lock().unwrap().rows.len()
    }

    pub fn is_token_live(&self, access_token: &str) -> bool {
        self.data.lock().unwrap().access.contains_key(access_token)
    }

    fn issue(&self, data: &mut Data, email: &str) -> Value {
        let id = data.accounts[email].id.clone();
        let access = format!("at-{}", uuid::Uuid::new_v4().simple());
        let refresh = format!("rt-{}", uuid::Uuid::new_v4().simple());
        data.access.insert(access.clone(), email.to_string());
        data.refresh.insert(refresh.clone(), email.to_string());

        let ttl = self.token_ttl.load(Ordering::SeqCst);
        json!({
            "access_token": access,
            "token_type": "bearer",
            "expires_in": ttl,
            "expires_at": chrono::Utc::now().timestamp() + ttl,
            "refresh_token": refresh,
            "user": { "id": id, "aud": "authenticated", "email": email }
        })
    }
}

pub struct MockBackend {
    pub base_url: url::Url,
    pub state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl MockBackend {
    pub async fn spawn() -> Result<Self> {
        let state = Arc::new(MockState {
            data: Mutex::new(Data::default()),
            next_id: AtomicI64::new(1),
            token_ttl: AtomicI64::new(3600),
            require_confirmation: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            table_requests: AtomicUsize::new(0),
        });

        let router = Router::new()
            .route("/auth/v1/token", post(token))
            .route("/auth/v1/signup", post(signup))
            .route("/auth/v1/logout", post(logout))
            .route("/rest/v1/:table", get(select_rows).post(insert_rows).delete(delete_rows))
            .with_state(state.clone());

        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .context("failed to bind mock backend")?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        let base_url = url::Url::parse(&format!("http://127.0.0.1:{}", port))?;
        Ok(Self { base_url, state, handle })
    }

    pub fn provider(&self) -> GoTrueProvider {
        GoTrueProvider::new(self.base_url.clone(), ANON_KEY)
    }

    pub fn store(&self) -> PostgrestStore {
        PostgrestStore::new(self.base_url.clone(), ANON_KEY)
    }

    /// Full client stack against this backend
    pub fn app(&self) -> PortfolioApp {
        let sessions = SessionManager::new(Arc::new(self.provider()), Duration::from_secs(5));
        let client = PortfolioClient::new(Arc::new(self.store()))
            .with_table(TABLE)
            .with_sessions(sessions.clone())
            .with_request_timeout(Duration::from_secs(5));
        PortfolioApp::new(sessions, client, TAG)
    }
}

/// Base URL nothing listens on
pub fn unreachable_url() -> url::Url {
    let port = portpicker::pick_unused_port().expect("free port");
    url::Url::parse(&format!("http://127.0.0.1:{}", port)).expect("valid url")
}

fn error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn check_apikey(headers: &HeaderMap) -> Option<Response> {
    match headers.get("apikey").and_then(|v| v.to_str().ok()) {
        Some(ANON_KEY) => None,
        _ => Some(error(StatusCode::UNAUTHORIZED, json!({ "message": "Invalid API key" }))),
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn token(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejection) = check_apikey(&headers) {
        return rejection;
    }
    if state.failing.load(Ordering::SeqCst) {
        return error(StatusCode::SERVICE_UNAVAILABLE, json!({ "message": "maintenance" }));
    }

    let mut data = state.data.lock().unwrap();
    match query.get("grant_type").map(String::as_str) {
        Some("password") => {
            let email = body["email"].as_str().unwrap_or_default().trim().to_ascii_lowercase();
            let password = body["password"].as_str().unwrap_or_default();
            let valid = data.accounts.get(&email).is_some_and(|a| a.password == password);
            if valid {
                let session = state.issue(&mut data, &email);
                Json(session).into_response()
            } else {
                error(
                    StatusCode::BAD_REQUEST,
                    json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" }),
                )
            }
        }
        Some("refresh_token") => {
            let token = body["refresh_token"].as_str().unwrap_or_default();
            match data.refresh.remove(token) {
                Some(email) => {
                    let session = state.issue(&mut data, &email);
                    Json(session).into_response()
                }
                None => error(
                    StatusCode::BAD_REQUEST,
                    json!({ "error": "invalid_grant", "error_description": "Invalid Refresh Token: Refresh Token Not Found" }),
                ),
            }
        }
        _ => error(StatusCode::BAD_REQUEST, json!({ "error": "unsupported_grant_type" })),
    }
}

async fn signup(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejection) = check_apikey(&headers) {
        return rejection;
    }

    let email = body["email"].as_str().unwrap_or_default().trim().to_ascii_lowercase();
    let password = body["password"].as_str().unwrap_or_default().to_string();

    let mut data = state.data.lock().unwrap();
    if data.accounts.contains_key(&email) {
        return error(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "code": 422, "error_code": "user_already_exists", "msg": "User already registered" }),
        );
    }
    if password.len() < 6 {
        return error(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "code": 422, "error_code": "weak_password", "msg": "Password should be at least 6 characters." }),
        );
    }

    let id = uuid::Uuid::new_v4().to_string();
    data.accounts.insert(email.clone(), Account { id: id.clone(), password });

    if state.require_confirmation.load(Ordering::SeqCst) {
        return Json(json!({
            "id": id,
            "aud": "authenticated",
            "email": email,
            "confirmation_sent_at": chrono::Utc::now().to_rfc3339()
        }))
        .into_response();
    }

    let session = state.issue(&mut data, &email);
    Json(session).into_response()
}

async fn logout(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if let Some(rejection) = check_apikey(&headers) {
        return rejection;
    }
    if state.failing.load(Ordering::SeqCst) {
        return error(StatusCode::SERVICE_UNAVAILABLE, json!({ "message": "maintenance" }));
    }

    let mut data = state.data.lock().unwrap();
    match bearer(&headers).and_then(|t| data.access.remove(&t)) {
        Some(email) => {
            data.refresh.retain(|_, owner| owner != &email);
            StatusCode::NO_CONTENT.into_response()
        }
        None => error(StatusCode::UNAUTHORIZED, json!({ "msg": "invalid JWT" })),
    }
}

fn table_guard(state: &MockState, headers: &HeaderMap, table: &str) -> Option<Response> {
    state.table_requests.fetch_add(1, Ordering::SeqCst);
    if let Some(rejection) = check_apikey(headers) {
        return Some(rejection);
    }
    if state.failing.load(Ordering::SeqCst) {
        return Some(error(StatusCode::SERVICE_UNAVAILABLE, json!({ "message": "maintenance" })));
    }
    if table != TABLE {
        return Some(error(
            StatusCode::NOT_FOUND,
            json!({ "code": "42P01", "message": format!("relation \"public.{}\" does not exist", table) }),
        ));
    }
    None
}

/// Email behind a user token; the anon key maps to no one
fn caller(data: &Data, headers: &HeaderMap) -> Option<String> {
    bearer(headers).and_then(|t| data.access.get(&t).cloned())
}

fn eq_filter<'a>(query: &'a HashMap<String, String>, column: &str) -> Option<&'a str> {
    query.get(column).and_then(|v| v.strip_prefix("eq."))
}

async fn select_rows(
    State(state): State<Arc<MockState>>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(rejection) = table_guard(&state, &headers, &table) {
        return rejection;
    }

    let data = state.data.lock().unwrap();
    let rows: Vec<Value> = data
        .rows
        .iter()
        .filter(|row| match eq_filter(&query, "collection") {
            Some(tag) => row["collection"] == tag,
            None => true,
        })
        .cloned()
        .collect();
    Json(rows).into_response()
}

async fn insert_rows(
    State(state): State<Arc<MockState>>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejection) = table_guard(&state, &headers, &table) {
        return rejection;
    }

    let mut data = state.data.lock().unwrap();
    let email = match caller(&data, &headers) {
        Some(email) => email,
        None => return error(StatusCode::UNAUTHORIZED, json!({ "code": "42501", "message": "permission denied for table app_universal" })),
    };

    let mut created = Vec::new();
    for row in body.as_array().cloned().unwrap_or_default() {
        if row["data"]["email"].as_str().map(str::to_ascii_lowercase) != Some(email.clone()) {
            return error(
                StatusCode::FORBIDDEN,
                json!({ "code": "42501", "message": "new row violates row-level security policy for table \"app_universal\"" }),
            );
        }
        let stored = json!({
            "id": state.next_id.fetch_add(1, Ordering::SeqCst),
            "collection": row["collection"],
            "data": row["data"],
            "created_at": chrono::Utc::now().to_rfc3339()
        });
        data.rows.push(stored.clone());
        created.push(stored);
    }

    let representation = headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("return=representation"));
    if representation {
        (StatusCode::CREATED, Json(created)).into_response()
    } else {
        StatusCode::CREATED.into_response()
    }
}

async fn delete_rows(
    State(state): State<Arc<MockState>>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(rejection) = table_guard(&state, &headers, &table) {
        return rejection;
    }

    let mut data = state.data.lock().unwrap();
    let email = match caller(&data, &headers) {
        Some(email) => email,
        None => return error(StatusCode::UNAUTHORIZED, json!({ "code": "42501", "message": "permission denied for table app_universal" })),
    };
    let id = match eq_filter(&query, "id") {
        Some(id) => id.to_string(),
        None => return error(StatusCode::BAD_REQUEST, json!({ "message": "DELETE requires a filter" })),
    };

    // Rows owned by someone else are invisible to the delete
    data.rows.retain(|row| {
        let matches = row["id"].to_string() == id || row["id"].as_str() == Some(id.as_str());
        let owned = row["data"]["email"].as_str().map(str::to_ascii_lowercase) == Some(email.clone());
        !(matches && owned)
    });
    StatusCode::NO_CONTENT.into_response()
}
