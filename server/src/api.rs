//! # REST API
//!
//! Builds the axum router that exposes the tracker's HTTP interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! Credentials ride request headers: `x-password` carries the shared
//! secret, `x-session-token` carries a bearer session. Read endpoints are
//! open; every mutating endpoint passes through the auth gate first.
//!
//! ## Endpoints
//!
//! | Method | Path                     | Auth | Description                    |
//! |--------|--------------------------|------|--------------------------------|
//! | GET    | `/health`                | no   | Liveness probe                 |
//! | POST   | `/api/auth`              | no   | Exchange secret for a session  |
//! | GET    | `/api/session/validate`  | no   | Check a session token          |
//! | GET    | `/api/kids`              | no   | Kids with current balances     |
//! | POST   | `/api/kids`              | yes  | Create a kid                   |
//! | PUT    | `/api/kids/:id`          | yes  | Rename / restyle a kid         |
//! | DELETE | `/api/kids/:id`          | yes  | Delete a kid                   |
//! | GET    | `/api/transactions`      | no   | Recent history, newest first   |
//! | POST   | `/api/transactions`      | yes  | Apply a signed point delta     |
//! | GET    | `/api/tags`              | no   | Active tags, alphabetical      |
//! | POST   | `/api/tags`              | yes  | Create a tag                   |
//! | PUT    | `/api/tags/:name`        | yes  | Rename a tag                   |
//! | DELETE | `/api/tags/:name`        | yes  | Delete a tag                   |

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tally_core::auth::{AuthGate, Credentials};
use tally_core::ledger::{LedgerEntry, LedgerError, LedgerService};
use tally_core::query::{HistoryFilter, HistoryRow, Queries};
use tally_core::registry::{Category, EntityRegistry, RegistryError, Subject, SubjectDraft};
use tally_core::session::SessionStore;

use crate::metrics::SharedMetrics;

/// Header carrying the shared secret.
const HEADER_SECRET: &str = "x-password";

/// Header carrying a bearer session token.
const HEADER_TOKEN: &str = "x-session-token";

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone — every component shares the storage engine internally.
#[derive(Clone)]
pub struct AppState {
    /// Subject and tag records.
    pub registry: EntityRegistry,
    /// The single write path for point deltas.
    pub ledger: LedgerService,
    /// Read-only display views.
    pub queries: Queries,
    /// Session issuance for the auth endpoint.
    pub sessions: SessionStore,
    /// The gate in front of every mutating endpoint.
    pub gate: AuthGate,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
///
/// The returned router is ready to be served on the configured port.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/auth", post(auth_handler))
        .route("/api/session/validate", get(session_validate_handler))
        .route("/api/kids", get(list_kids_handler).post(create_kid_handler))
        .route(
            "/api/kids/:id",
            axum::routing::put(update_kid_handler).delete(delete_kid_handler),
        )
        .route(
            "/api/transactions",
            get(list_transactions_handler).post(create_transaction_handler),
        )
        .route("/api/tags", get(list_tags_handler).post(create_tag_handler))
        .route(
            "/api/tags/:name",
            axum::routing::put(rename_tag_handler).delete(delete_tag_handler),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Wire Types
// ---------------------------------------------------------------------------

/// Response payload for `POST /api/auth`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(rename = "sessionToken")]
    pub session_token: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: String,
}

/// A kid on the wire: a subject with its balance rendered as `points`.
#[derive(Debug, Serialize, Deserialize)]
pub struct KidResponse {
    pub id: u64,
    pub name: String,
    pub initials: String,
    pub color: String,
    pub points: i64,
}

impl From<Subject> for KidResponse {
    fn from(s: Subject) -> Self {
        Self {
            id: s.id,
            name: s.name,
            initials: s.label,
            color: s.color,
            points: s.balance,
        }
    }
}

/// Request body for `POST /api/kids` and `PUT /api/kids/:id`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct KidRequest {
    pub name: Option<String>,
    pub initials: Option<String>,
    pub color: Option<String>,
}

/// Request body for `POST /api/transactions`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub kid_id: u64,
    pub points: i64,
    pub tag: Option<String>,
    pub note: Option<String>,
}

/// One ledger entry on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct EntryResponse {
    pub id: u64,
    pub kid_id: u64,
    pub points: i64,
    pub tag: String,
    pub note: Option<String>,
    pub timestamp_ms: i64,
}

impl From<LedgerEntry> for EntryResponse {
    fn from(e: LedgerEntry) -> Self {
        Self {
            id: e.id,
            kid_id: e.subject_id,
            points: e.delta,
            tag: e.category,
            note: e.note,
            timestamp_ms: e.timestamp_ms,
        }
    }
}

/// Response payload for `POST /api/transactions`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub success: bool,
    pub kid: KidResponse,
    pub entry: EntryResponse,
}

/// The kid snapshot attached to a history row, absent for orphans.
#[derive(Debug, Serialize, Deserialize)]
pub struct KidRef {
    pub name: String,
    pub initials: String,
    pub color: String,
}

/// One denormalized history row on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryRowResponse {
    pub id: u64,
    pub kid_id: u64,
    pub kid: Option<KidRef>,
    pub points: i64,
    pub tag: String,
    pub note: Option<String>,
    pub timestamp_ms: i64,
}

impl From<HistoryRow> for HistoryRowResponse {
    fn from(r: HistoryRow) -> Self {
        Self {
            id: r.id,
            kid_id: r.subject_id,
            kid: r.subject.map(|s| KidRef {
                name: s.name,
                initials: s.label,
                color: s.color,
            }),
            points: r.delta,
            tag: r.category,
            note: r.note,
            timestamp_ms: r.timestamp_ms,
        }
    }
}

/// Query parameters for `GET /api/transactions`.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub kid_id: Option<u64>,
    pub limit: Option<usize>,
}

/// A tag on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct TagResponse {
    pub name: String,
    pub color: String,
    pub positive: bool,
}

impl From<Category> for TagResponse {
    fn from(c: Category) -> Self {
        Self {
            name: c.name,
            color: c.color,
            positive: c.positive,
        }
    }
}

/// Request body for `POST /api/tags`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
    pub color: Option<String>,
    pub positive: Option<bool>,
}

/// Request body for `PUT /api/tags/:name`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RenameTagRequest {
    pub name: String,
}

/// Generic success body for deletions and renames.
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Auth Plumbing
// ---------------------------------------------------------------------------

/// Pulls both credential channels out of the request headers.
fn credentials_from_headers(headers: &HeaderMap) -> Credentials {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Credentials {
        token: header_str(HEADER_TOKEN),
        secret: header_str(HEADER_SECRET),
    }
}

/// Runs the auth gate over a mutating request. `Err` carries the ready
/// 401 response.
fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let credentials = credentials_from_headers(headers);
    if state.gate.authorize(&credentials) {
        Ok(())
    } else {
        state.metrics.auth_denied_total.inc();
        Err(error_response(StatusCode::UNAUTHORIZED, "unauthorized"))
    }
}

/// Deserializes a mutating request's body. Bodies arrive as raw bytes so
/// the auth gate runs before any parsing — a malformed body without
/// credentials is still a 401, not a 400.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("invalid request body: {e}"),
        )
    })
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Maps a registry failure onto its HTTP shape.
fn registry_error(e: RegistryError) -> Response {
    let status = match &e {
        RegistryError::SubjectNotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::CategoryExists(_) => StatusCode::CONFLICT,
        RegistryError::EmptyName | RegistryError::InvalidColor(_) | RegistryError::InvalidLabel(_) => {
            StatusCode::BAD_REQUEST
        }
        RegistryError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("registry failure: {e}");
    }
    error_response(status, e.to_string())
}

/// Maps a ledger failure onto its HTTP shape.
fn ledger_error(e: LedgerError) -> Response {
    let status = match &e {
        LedgerError::ZeroDelta | LedgerError::Overflow { .. } => StatusCode::BAD_REQUEST,
        LedgerError::SubjectNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("ledger failure: {e}");
    }
    error_response(status, e.to_string())
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    tracing::error!("request failed: {e}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

// ---------------------------------------------------------------------------
// Handlers — Health & Auth
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the server is alive.
///
/// This is the liveness probe for orchestrators (k8s, systemd, etc.).
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `POST /api/auth` — exchanges the shared secret for a session token.
///
/// The secret arrives in the `x-password` header. On success a fresh
/// long-lived session is issued; on a wrong or missing secret the
/// response is a plain 401 with no hint beyond "denied".
async fn auth_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let presented = headers
        .get(HEADER_SECRET)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !state.gate.secret_matches(presented) {
        state.metrics.auth_denied_total.inc();
        return error_response(StatusCode::UNAUTHORIZED, "invalid password");
    }

    match state.sessions.issue() {
        Ok(session) => {
            state.metrics.sessions_issued_total.inc();
            Json(AuthResponse {
                success: true,
                session_token: session.token,
                expires_at: session.expires_at.to_rfc3339(),
            })
            .into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// `GET /api/session/validate` — checks the `x-session-token` header.
///
/// Lets a client decide at startup whether its remembered token still
/// works, without attempting a mutation.
async fn session_validate_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = headers
        .get(HEADER_TOKEN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if state.sessions.is_valid(token) {
        Json(serde_json::json!({ "valid": true })).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "valid": false })),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers — Kids
// ---------------------------------------------------------------------------

/// `GET /api/kids` — all kids with current balances, in creation order.
async fn list_kids_handler(State(state): State<AppState>) -> Response {
    match state.queries.list_subjects() {
        Ok(subjects) => {
            state.metrics.subjects.set(subjects.len() as i64);
            let kids: Vec<KidResponse> = subjects.into_iter().map(KidResponse::from).collect();
            Json(kids).into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// `POST /api/kids` — creates a kid. Every field is optional; the
/// registry fills in defaults.
async fn create_kid_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(denied) = require_auth(&state, &headers) {
        return denied;
    }
    let req: KidRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(rejected) => return rejected,
    };

    let draft = SubjectDraft {
        name: req.name,
        label: req.initials,
        color: req.color,
    };
    match state.registry.create_subject(draft) {
        Ok(subject) => (StatusCode::CREATED, Json(KidResponse::from(subject))).into_response(),
        Err(e) => registry_error(e),
    }
}

/// `PUT /api/kids/:id` — renames and/or restyles a kid. Absent fields
/// are left untouched; one bad field rejects the whole request with
/// nothing written. 404 for unknown ids.
async fn update_kid_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(denied) = require_auth(&state, &headers) {
        return denied;
    }
    let req: KidRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(rejected) => return rejected,
    };

    match state.registry.update_subject(
        id,
        req.name.as_deref(),
        req.color.as_deref(),
        req.initials.as_deref(),
    ) {
        Ok(subject) => Json(KidResponse::from(subject)).into_response(),
        Err(e) => registry_error(e),
    }
}

/// `DELETE /api/kids/:id` — deletes a kid under the configured history
/// policy. 404 for unknown ids.
async fn delete_kid_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = require_auth(&state, &headers) {
        return denied;
    }

    match state.registry.remove_subject(id) {
        Ok(()) => Json(SuccessResponse { success: true }).into_response(),
        Err(e) => registry_error(e),
    }
}

// ---------------------------------------------------------------------------
// Handlers — Transactions
// ---------------------------------------------------------------------------

/// `POST /api/transactions` — applies a signed point delta to a kid.
///
/// The one write path into the ledger. Zero deltas are rejected with
/// 400, unknown kids with 404; an omitted tag lands in the default
/// category.
async fn create_transaction_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(denied) = require_auth(&state, &headers) {
        return denied;
    }
    let req: TransactionRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(rejected) => return rejected,
    };

    let timer = state.metrics.apply_latency_seconds.start_timer();
    let result = state.ledger.apply_delta(
        req.kid_id,
        req.points,
        req.tag.as_deref(),
        req.note.as_deref(),
    );
    timer.observe_duration();

    match result {
        Ok(applied) => {
            state.metrics.entries_applied_total.inc();
            Json(ApplyResponse {
                success: true,
                kid: KidResponse::from(applied.subject),
                entry: EntryResponse::from(applied.entry),
            })
            .into_response()
        }
        Err(e) => ledger_error(e),
    }
}

/// `GET /api/transactions` — recent history, newest first, optionally
/// filtered by `kid_id` and capped by `limit`.
async fn list_transactions_handler(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let filter = HistoryFilter {
        subject_id: params.kid_id,
        limit: params.limit,
    };
    match state.queries.list_history(filter) {
        Ok(rows) => {
            let rows: Vec<HistoryRowResponse> =
                rows.into_iter().map(HistoryRowResponse::from).collect();
            Json(rows).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// Handlers — Tags
// ---------------------------------------------------------------------------

/// `GET /api/tags` — all active tags, alphabetical.
async fn list_tags_handler(State(state): State<AppState>) -> Response {
    match state.queries.list_categories() {
        Ok(categories) => {
            let tags: Vec<TagResponse> = categories.into_iter().map(TagResponse::from).collect();
            Json(tags).into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// `POST /api/tags` — creates a tag. 409 when the name is taken.
async fn create_tag_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(denied) = require_auth(&state, &headers) {
        return denied;
    }
    let req: CreateTagRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(rejected) => return rejected,
    };

    let color = req
        .color
        .unwrap_or_else(|| tally_core::config::DEFAULT_CATEGORY_COLOR.to_string());
    match state
        .registry
        .create_category(&req.name, &color, req.positive.unwrap_or(false))
    {
        Ok(category) => (StatusCode::CREATED, Json(TagResponse::from(category))).into_response(),
        Err(e) => registry_error(e),
    }
}

/// `PUT /api/tags/:name` — renames a tag. A missing old name is a quiet
/// success; a taken new name is 409. History keeps the old name.
async fn rename_tag_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(denied) = require_auth(&state, &headers) {
        return denied;
    }
    let req: RenameTagRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(rejected) => return rejected,
    };

    match state.registry.rename_category(&name, &req.name) {
        Ok(()) => Json(SuccessResponse { success: true }).into_response(),
        Err(e) => registry_error(e),
    }
}

/// `DELETE /api/tags/:name` — removes a tag from the selectable set.
/// Idempotent; never touches history.
async fn delete_tag_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = require_auth(&state, &headers) {
        return denied;
    }

    match state.registry.remove_category(&name) {
        Ok(()) => Json(SuccessResponse { success: true }).into_response(),
        Err(e) => registry_error(e),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tally_core::ledger::BalancePolicy;
    use tally_core::store::{HistoryPolicy, TrackerDb};
    use tower::ServiceExt;

    const SECRET: &str = "parent123";

    /// Creates a test AppState backed by a temporary in-memory database.
    fn test_app_state() -> AppState {
        let db = Arc::new(TrackerDb::open_temporary().expect("temp db"));
        let sessions = SessionStore::new(Arc::clone(&db));
        AppState {
            registry: EntityRegistry::new(Arc::clone(&db), HistoryPolicy::Retain),
            ledger: LedgerService::new(Arc::clone(&db), BalancePolicy::AllowNegative),
            queries: Queries::new(Arc::clone(&db)),
            gate: AuthGate::new(sessions.clone(), SECRET),
            sessions,
            metrics: Arc::new(crate::metrics::TrackerMetrics::new()),
        }
    }

    /// Creates a test AppState with the default kids and tags seeded.
    fn test_app_state_seeded() -> AppState {
        let state = test_app_state();
        state.registry.ensure_defaults().expect("seed defaults");
        state
    }

    /// Sends a request with optional JSON body and auth headers, returns
    /// (status, body_bytes).
    async fn send(
        router: &Router,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
        auth: &[(&str, &str)],
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(path);
        for (name, value) in auth {
            builder = builder.header(*name, *value);
        }
        let req = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        send(router, "GET", path, None, &[]).await
    }

    fn secret_header() -> [(&'static str, &'static str); 1] {
        [(HEADER_SECRET, SECRET)]
    }

    // -- 1. Health endpoint ---------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    // -- 2. Auth issues a session for the right secret ------------------------

    #[tokio::test]
    async fn auth_with_correct_secret_issues_session() {
        let state = test_app_state();
        let router = create_router(state.clone());

        let (status, body) = send(&router, "POST", "/api/auth", None, &secret_header()).await;
        assert_eq!(status, StatusCode::OK);

        let resp: AuthResponse = serde_json::from_slice(&body).unwrap();
        assert!(resp.success);
        assert_eq!(resp.session_token.len(), 64);
        assert!(state.sessions.is_valid(&resp.session_token));
    }

    // -- 3. Auth rejects wrong and missing secrets ----------------------------

    #[tokio::test]
    async fn auth_rejects_wrong_and_missing_secret() {
        let router = create_router(test_app_state());

        let (status, _) =
            send(&router, "POST", "/api/auth", None, &[(HEADER_SECRET, "nope")]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&router, "POST", "/api/auth", None, &[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // -- 4. Session validation ------------------------------------------------

    #[tokio::test]
    async fn session_validate_reports_live_and_dead_tokens() {
        let state = test_app_state();
        let token = state.sessions.issue().unwrap().token;
        let router = create_router(state);

        let (status, body) = send(
            &router,
            "GET",
            "/api/session/validate",
            None,
            &[(HEADER_TOKEN, token.as_str())],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["valid"], true);

        let forged = "0".repeat(64);
        let (status, body) = send(
            &router,
            "GET",
            "/api/session/validate",
            None,
            &[(HEADER_TOKEN, forged.as_str())],
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["valid"], false);
    }

    // -- 5. Kids list reflects the seeded defaults ----------------------------

    #[tokio::test]
    async fn kids_list_shows_seeded_defaults() {
        let router = create_router(test_app_state_seeded());
        let (status, body) = get(&router, "/api/kids").await;

        assert_eq!(status, StatusCode::OK);
        let kids: Vec<KidResponse> = serde_json::from_slice(&body).unwrap();
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].name, "Kid 1");
        assert_eq!(kids[0].initials, "K1");
        assert_eq!(kids[0].points, 0);
    }

    // -- 6. Mutations require credentials -------------------------------------

    #[tokio::test]
    async fn mutations_are_rejected_without_credentials() {
        let router = create_router(test_app_state_seeded());

        let cases = [
            ("POST", "/api/kids", Some(serde_json::json!({}))),
            ("PUT", "/api/kids/1", Some(serde_json::json!({"name": "X"}))),
            ("DELETE", "/api/kids/1", None),
            (
                "POST",
                "/api/transactions",
                Some(serde_json::json!({"kid_id": 1, "points": 5})),
            ),
            ("POST", "/api/tags", Some(serde_json::json!({"name": "T"}))),
            (
                "PUT",
                "/api/tags/TV",
                Some(serde_json::json!({"name": "Screens"})),
            ),
            ("DELETE", "/api/tags/TV", None),
        ];
        for (method, path, body) in cases {
            let (status, _) = send(&router, method, path, body, &[]).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {path}");
        }
    }

    // -- 7. A session token authorizes mutations on its own -------------------

    #[tokio::test]
    async fn session_token_alone_authorizes_mutation() {
        let state = test_app_state_seeded();
        let token = state.sessions.issue().unwrap().token;
        let router = create_router(state);

        let (status, body) = send(
            &router,
            "POST",
            "/api/transactions",
            Some(serde_json::json!({"kid_id": 1, "points": 10, "tag": "Chores"})),
            &[(HEADER_TOKEN, token.as_str())],
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let resp: ApplyResponse = serde_json::from_slice(&body).unwrap();
        assert!(resp.success);
        assert_eq!(resp.kid.points, 10);
    }

    // -- 8. A forged token of the right shape stays out ------------------------

    #[tokio::test]
    async fn forged_token_is_rejected() {
        let router = create_router(test_app_state_seeded());
        let forged = "a1b2".repeat(16);

        let (status, _) = send(
            &router,
            "POST",
            "/api/transactions",
            Some(serde_json::json!({"kid_id": 1, "points": 10})),
            &[(HEADER_TOKEN, forged.as_str())],
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // -- 9. Kid creation with defaults and explicit fields ---------------------

    #[tokio::test]
    async fn create_kid_fills_defaults() {
        let router = create_router(test_app_state());

        let (status, body) = send(
            &router,
            "POST",
            "/api/kids",
            Some(serde_json::json!({})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let kid: KidResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(kid.name, "Kid 1");
        assert_eq!(kid.initials, "K1");

        let (status, body) = send(
            &router,
            "POST",
            "/api/kids",
            Some(serde_json::json!({"name": "Alice Smith"})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let kid: KidResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(kid.name, "Alice Smith");
        assert_eq!(kid.initials, "AS");
    }

    // -- 10. Kid creation rejects malformed display fields ---------------------

    #[tokio::test]
    async fn create_kid_rejects_bad_color_and_initials() {
        let router = create_router(test_app_state());

        let (status, _) = send(
            &router,
            "POST",
            "/api/kids",
            Some(serde_json::json!({"color": "red"})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &router,
            "POST",
            "/api/kids",
            Some(serde_json::json!({"initials": "ABC"})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- 11. Kid update and 404 for unknown ids --------------------------------

    #[tokio::test]
    async fn update_kid_renames_and_404s_for_unknown() {
        let router = create_router(test_app_state_seeded());

        let (status, body) = send(
            &router,
            "PUT",
            "/api/kids/1",
            Some(serde_json::json!({"name": "Maya", "color": "#112233"})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let kid: KidResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(kid.name, "Maya");
        assert_eq!(kid.color, "#112233");
        assert_eq!(kid.initials, "K1", "untouched fields survive");

        let (status, _) = send(
            &router,
            "PUT",
            "/api/kids/99",
            Some(serde_json::json!({"name": "Ghost"})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // -- 11b. Kid update is all-or-nothing -------------------------------------

    #[tokio::test]
    async fn update_kid_with_one_bad_field_writes_nothing() {
        let router = create_router(test_app_state_seeded());

        let (status, _) = send(
            &router,
            "PUT",
            "/api/kids/1",
            Some(serde_json::json!({"name": "Renamed", "initials": "TOOLONG"})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // The valid name next to the invalid initials must not have landed.
        let (_, body) = get(&router, "/api/kids").await;
        let kids: Vec<KidResponse> = serde_json::from_slice(&body).unwrap();
        assert_eq!(kids[0].name, "Kid 1");
        assert_eq!(kids[0].initials, "K1");
    }

    // -- 11c. Missing credentials outrank a malformed body ---------------------

    #[tokio::test]
    async fn malformed_body_without_credentials_is_still_401() {
        let router = create_router(test_app_state_seeded());

        for (method, path) in [
            ("POST", "/api/kids"),
            ("PUT", "/api/kids/1"),
            ("POST", "/api/transactions"),
            ("POST", "/api/tags"),
            ("PUT", "/api/tags/TV"),
        ] {
            let req = Request::builder()
                .method(method)
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap();
            let resp = router.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{method} {path}");
        }
    }

    // -- 12. Kid deletion leaves orphaned history ------------------------------

    #[tokio::test]
    async fn delete_kid_orphans_its_history() {
        let state = test_app_state_seeded();
        state
            .ledger
            .apply_delta(1, 5, Some("Chores"), None)
            .unwrap();
        let router = create_router(state);

        let (status, _) = send(&router, "DELETE", "/api/kids/1", None, &secret_header()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&router, "DELETE", "/api/kids/1", None, &secret_header()).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "second delete finds nothing");

        let (_, body) = get(&router, "/api/transactions").await;
        let rows: Vec<HistoryRowResponse> = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].kid.is_none(), "orphan row has no kid snapshot");
    }

    // -- 13. Transaction lifecycle: earn, spend, feed --------------------------

    #[tokio::test]
    async fn earn_and_spend_show_up_newest_first() {
        let router = create_router(test_app_state_seeded());

        let (status, _) = send(
            &router,
            "POST",
            "/api/transactions",
            Some(serde_json::json!({"kid_id": 1, "points": 10, "tag": "Chores"})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &router,
            "POST",
            "/api/transactions",
            Some(serde_json::json!({"kid_id": 1, "points": -3, "tag": "TV", "note": "movie"})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let resp: ApplyResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.kid.points, 7);

        let (_, body) = get(&router, "/api/transactions").await;
        let rows: Vec<HistoryRowResponse> = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].points, -3);
        assert_eq!(rows[0].tag, "TV");
        assert_eq!(rows[0].note.as_deref(), Some("movie"));
        assert_eq!(rows[1].points, 10);
    }

    // -- 14. Transaction validation: zero delta and unknown kid ----------------

    #[tokio::test]
    async fn transaction_rejects_zero_points_and_unknown_kid() {
        let router = create_router(test_app_state_seeded());

        let (status, _) = send(
            &router,
            "POST",
            "/api/transactions",
            Some(serde_json::json!({"kid_id": 1, "points": 0})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &router,
            "POST",
            "/api/transactions",
            Some(serde_json::json!({"kid_id": 424242, "points": 5})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // -- 15. Omitted tag lands in the default category -------------------------

    #[tokio::test]
    async fn omitted_tag_defaults_to_general() {
        let router = create_router(test_app_state_seeded());

        let (_, body) = send(
            &router,
            "POST",
            "/api/transactions",
            Some(serde_json::json!({"kid_id": 1, "points": 2})),
            &secret_header(),
        )
        .await;
        let resp: ApplyResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.entry.tag, "General");
    }

    // -- 16. History filtering and limit ---------------------------------------

    #[tokio::test]
    async fn history_filters_by_kid_and_respects_limit() {
        let state = test_app_state_seeded();
        for i in 1..=5 {
            state.ledger.apply_delta(1, i, None, None).unwrap();
        }
        state.ledger.apply_delta(2, 100, None, None).unwrap();
        let router = create_router(state);

        let (_, body) = get(&router, "/api/transactions?kid_id=1&limit=3").await;
        let rows: Vec<HistoryRowResponse> = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.kid_id == 1));
        assert_eq!(rows[0].points, 5, "newest first");
    }

    // -- 17. Tags list is alphabetical with the seeded set ---------------------

    #[tokio::test]
    async fn tags_list_is_alphabetical() {
        let router = create_router(test_app_state_seeded());
        let (status, body) = get(&router, "/api/tags").await;

        assert_eq!(status, StatusCode::OK);
        let tags: Vec<TagResponse> = serde_json::from_slice(&body).unwrap();
        assert_eq!(tags.len(), 5);
        let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    // -- 18. Tag creation and duplicate conflict -------------------------------

    #[tokio::test]
    async fn create_tag_conflicts_on_duplicate() {
        let router = create_router(test_app_state());

        let (status, body) = send(
            &router,
            "POST",
            "/api/tags",
            Some(serde_json::json!({"name": "Homework", "color": "#123456", "positive": true})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let tag: TagResponse = serde_json::from_slice(&body).unwrap();
        assert!(tag.positive);

        let (status, _) = send(
            &router,
            "POST",
            "/api/tags",
            Some(serde_json::json!({"name": "Homework"})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    // -- 19. Tag rename: success, quiet no-op, and conflict --------------------

    #[tokio::test]
    async fn rename_tag_handles_all_outcomes() {
        let router = create_router(test_app_state_seeded());

        let (status, _) = send(
            &router,
            "PUT",
            "/api/tags/TV",
            Some(serde_json::json!({"name": "Screens"})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // Renaming a tag that no longer exists is a quiet success.
        let (status, _) = send(
            &router,
            "PUT",
            "/api/tags/TV",
            Some(serde_json::json!({"name": "Telly"})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // Renaming onto a taken name conflicts.
        let (status, _) = send(
            &router,
            "PUT",
            "/api/tags/Screens",
            Some(serde_json::json!({"name": "Chores"})),
            &secret_header(),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    // -- 20. Tag deletion is idempotent and never rewrites history -------------

    #[tokio::test]
    async fn delete_tag_is_idempotent_and_history_keeps_the_name() {
        let state = test_app_state_seeded();
        state.ledger.apply_delta(1, 3, Some("TV"), None).unwrap();
        let router = create_router(state);

        let (status, _) = send(&router, "DELETE", "/api/tags/TV", None, &secret_header()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&router, "DELETE", "/api/tags/TV", None, &secret_header()).await;
        assert_eq!(status, StatusCode::OK, "second delete is still a success");

        let (_, body) = get(&router, "/api/transactions").await;
        let rows: Vec<HistoryRowResponse> = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows[0].tag, "TV");
    }
}
