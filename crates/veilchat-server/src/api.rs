use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use veilchat_store::{
    Conversation, ConversationUpdate, ConversationView, Database, Message, MessagePage,
    MessageStatus, NewConversation, NewMessage, NewUser, ParticipantRole, ParticipantView,
    PinMetadata, PinRecord, PinView, ProfileUpdate, Reaction, ReactionToggle, Report,
    ReportStatus, User, UserRole,
};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{throttle, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub config: Arc<ServerConfig>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Run a store call on the blocking pool while holding the connection.
    async fn with_db<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Database) -> veilchat_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let db = db
                .lock()
                .map_err(|_| ServerError::Internal("database lock poisoned".into()))?;
            f(&db).map_err(ServerError::from)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("blocking task failed: {e}")))?
    }

    /// Like [`AppState::with_db`], resolving the bearer session first.
    async fn as_caller<T, F>(&self, headers: &HeaderMap, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Database, &User) -> veilchat_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let token = bearer(headers).map(str::to_owned);
        self.with_db(move |db| {
            let caller = db.resolve_principal(token.as_deref())?;
            f(db, &caller)
        })
        .await
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/admin/sessions", post(admin_issue_session))
        .route("/admin/users", get(admin_list_users))
        .route("/admin/reports", get(admin_list_reports))
        .route("/admin/reports/:id/review", post(admin_review_report))
        .route("/me", get(me).patch(update_me))
        .route("/me/online", post(set_online))
        .route("/me/logout", post(logout))
        .route("/users/by-wallet/:address", get(user_by_wallet))
        .route("/users/search", get(search_users))
        .route(
            "/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route("/conversations/public", post(public_conversation))
        .route(
            "/conversations/:id",
            get(get_conversation).patch(update_conversation),
        )
        .route(
            "/conversations/:id/participants",
            post(add_participant).get(list_participants),
        )
        .route("/conversations/:id/read", post(mark_read))
        .route(
            "/conversations/:id/messages",
            post(send_message).get(list_messages),
        )
        .route(
            "/messages/:id",
            get(get_message).patch(edit_message).delete(delete_message),
        )
        .route(
            "/messages/:id/reactions",
            post(toggle_reaction).get(list_reactions),
        )
        .route("/messages/:id/status", put(set_status))
        .route("/messages/:id/reports", post(report_message))
        .route("/pins", post(pin_content).get(list_all_pins))
        .route("/pins/mine", get(list_my_pins))
        .route("/pins/:cid", delete(unpin_content))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            throttle,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request / response bodies ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct Created {
    id: Uuid,
}

#[derive(Deserialize)]
struct SessionRequest {
    #[serde(flatten)]
    user: NewUser,
    #[serde(default)]
    role: Option<UserRole>,
}

#[derive(Serialize)]
struct SessionResponse {
    token: String,
    user: User,
}

#[derive(Deserialize)]
struct OnlineRequest {
    is_online: bool,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
struct AddParticipantRequest {
    user_id: Uuid,
    #[serde(default)]
    role: Option<ParticipantRole>,
}

#[derive(Deserialize)]
struct MarkReadRequest {
    #[serde(default)]
    at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct PageQuery {
    limit: Option<i64>,
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct EditRequest {
    content: String,
}

#[derive(Deserialize)]
struct ReactionRequest {
    emoji: String,
}

#[derive(Deserialize)]
struct StatusRequest {
    status: MessageStatus,
}

#[derive(Deserialize)]
struct ReportRequest {
    reason: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct PinRequest {
    cid: String,
    #[serde(flatten)]
    meta: PinMetadata,
}

#[derive(Deserialize)]
struct ReportFilter {
    status: Option<ReportStatus>,
}

#[derive(Deserialize)]
struct ReviewRequest {
    status: ReportStatus,
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get("authorization")?.to_str().ok()?;
    Some(auth.strip_prefix("Bearer ").unwrap_or(auth).trim())
}

fn done(key: &str) -> Json<serde_json::Value> {
    let mut body = serde_json::Map::new();
    body.insert(key.to_string(), serde_json::Value::Bool(true));
    Json(serde_json::Value::Object(body))
}

// ─── Health ───

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Admin ───

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let token = bearer(headers).unwrap_or("");

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

/// Mint a session for a wallet the upstream auth service has verified.
async fn admin_issue_session(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let response = state
        .with_db(move |db| {
            let mut user = db.upsert_user(&req.user)?;
            if let Some(role) = req.role {
                db.set_user_role(user.id, role)?;
                user = db.get_user(user.id)?;
            }
            let token = db.issue_session(user.id)?;
            Ok(SessionResponse { token, user })
        })
        .await?;

    info!(user = %response.user.id, "Admin issued session");
    Ok((StatusCode::CREATED, Json(response)))
}

async fn admin_list_users(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, ServerError> {
    let users = state
        .as_caller(&headers, |db, me| db.list_all_users(me))
        .await?;
    Ok(Json(users))
}

async fn admin_list_reports(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(filter): Query<ReportFilter>,
) -> Result<Json<Vec<Report>>, ServerError> {
    let reports = state
        .as_caller(&headers, move |db, me| db.list_reports(me, filter.status))
        .await?;
    Ok(Json(reports))
}

async fn admin_review_report(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<Report>, ServerError> {
    let report = state
        .as_caller(&headers, move |db, me| db.review_report(id, me, req.status))
        .await?;
    Ok(Json(report))
}

// ─── Users ───

async fn me(headers: HeaderMap, State(state): State<AppState>) -> Result<Json<User>, ServerError> {
    let user = state.as_caller(&headers, |_, me| Ok(me.clone())).await?;
    Ok(Json(user))
}

async fn update_me(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<User>, ServerError> {
    let user = state
        .as_caller(&headers, move |db, me| db.update_profile(me, &update))
        .await?;
    Ok(Json(user))
}

async fn set_online(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<OnlineRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state
        .as_caller(&headers, move |db, me| db.set_online_status(me, req.is_online))
        .await?;
    Ok(done("updated"))
}

async fn logout(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let token = bearer(&headers)
        .map(str::to_owned)
        .ok_or(ServerError::Unauthorized)?;
    let revoked = state.with_db(move |db| db.revoke_session(&token)).await?;
    if !revoked {
        return Err(ServerError::Unauthorized);
    }
    Ok(done("revoked"))
}

async fn user_by_wallet(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Option<User>>, ServerError> {
    let user = state
        .with_db(move |db| db.find_user_by_wallet(&address))
        .await?;
    Ok(Json(user))
}

async fn search_users(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<User>>, ServerError> {
    let users = state
        .as_caller(&headers, move |db, _| db.search_users(&query.q))
        .await?;
    Ok(Json(users))
}

// ─── Conversations ───

async fn create_conversation(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(new): Json<NewConversation>,
) -> Result<(StatusCode, Json<Created>), ServerError> {
    let id = state
        .as_caller(&headers, move |db, me| db.create_conversation(me, &new))
        .await?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

async fn list_conversations(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationView>>, ServerError> {
    let views = state
        .as_caller(&headers, |db, me| db.list_conversations(me))
        .await?;
    Ok(Json(views))
}

async fn public_conversation(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Created>, ServerError> {
    let id = state
        .as_caller(&headers, |db, me| db.get_or_create_public_conversation(me))
        .await?;
    Ok(Json(Created { id }))
}

async fn get_conversation(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationView>, ServerError> {
    let view = state
        .as_caller(&headers, move |db, me| db.get_conversation(id, me))
        .await?;
    Ok(Json(view))
}

async fn update_conversation(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<ConversationUpdate>,
) -> Result<Json<Conversation>, ServerError> {
    let conversation = state
        .as_caller(&headers, move |db, me| {
            db.update_conversation(id, me, &update)
        })
        .await?;
    Ok(Json(conversation))
}

async fn add_participant(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddParticipantRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ServerError> {
    let role = req.role.unwrap_or(ParticipantRole::Member);
    state
        .as_caller(&headers, move |db, me| {
            db.add_participant(id, me, req.user_id, role)
        })
        .await?;
    Ok((StatusCode::CREATED, done("added")))
}

async fn list_participants(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ParticipantView>>, ServerError> {
    let participants = state
        .as_caller(&headers, move |db, me| db.list_participants(id, me))
        .await?;
    Ok(Json(participants))
}

async fn mark_read(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<MarkReadRequest>>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let at = body
        .and_then(|Json(req)| req.at)
        .unwrap_or_else(Utc::now);
    state
        .as_caller(&headers, move |db, me| db.mark_read(id, me, at))
        .await?;
    Ok(done("read"))
}

// ─── Messages ───

async fn send_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(new): Json<NewMessage>,
) -> Result<(StatusCode, Json<Created>), ServerError> {
    let message_id = state
        .as_caller(&headers, move |db, me| db.send_message(me, id, &new))
        .await?;
    Ok((StatusCode::CREATED, Json(Created { id: message_id })))
}

async fn list_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<Json<MessagePage>, ServerError> {
    let page = state
        .as_caller(&headers, move |db, me| {
            db.list_messages(id, me, page.limit, page.cursor.as_deref())
        })
        .await?;
    Ok(Json(page))
}

async fn get_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Message>, ServerError> {
    let message = state
        .as_caller(&headers, move |db, me| db.get_message(id, me))
        .await?;
    Ok(Json(message))
}

async fn edit_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EditRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state
        .as_caller(&headers, move |db, me| db.edit_message(id, me, &req.content))
        .await?;
    Ok(done("edited"))
}

async fn delete_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state
        .as_caller(&headers, move |db, me| db.delete_message(id, me))
        .await?;
    Ok(done("deleted"))
}

async fn toggle_reaction(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReactionRequest>,
) -> Result<Json<ReactionToggle>, ServerError> {
    let outcome = state
        .as_caller(&headers, move |db, me| db.toggle_reaction(id, me, &req.emoji))
        .await?;
    Ok(Json(outcome))
}

async fn list_reactions(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Reaction>>, ServerError> {
    let reactions = state
        .as_caller(&headers, move |db, me| db.list_reactions(id, me))
        .await?;
    Ok(Json(reactions))
}

async fn set_status(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state
        .as_caller(&headers, move |db, me| {
            db.set_message_status(id, me, req.status)
        })
        .await?;
    Ok(done("updated"))
}

async fn report_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReportRequest>,
) -> Result<(StatusCode, Json<Created>), ServerError> {
    let report_id = state
        .as_caller(&headers, move |db, me| {
            db.report_message(id, me, &req.reason, req.description.as_deref())
        })
        .await?;
    Ok((StatusCode::CREATED, Json(Created { id: report_id })))
}

// ─── Pins ───

async fn pin_content(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<PinRequest>,
) -> Result<Json<Created>, ServerError> {
    let id = state
        .as_caller(&headers, move |db, me| db.pin_content(me, &req.cid, &req.meta))
        .await?;
    Ok(Json(Created { id }))
}

async fn unpin_content(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state
        .as_caller(&headers, move |db, me| db.unpin_content(&cid, me))
        .await?;
    Ok(done("unpinned"))
}

async fn list_all_pins(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<PinView>>, ServerError> {
    let pins = state
        .as_caller(&headers, |db, me| db.list_all_pins(me))
        .await?;
    Ok(Json(pins))
}

async fn list_my_pins(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<PinRecord>>, ServerError> {
    let pins = state
        .as_caller(&headers, |db, me| db.list_my_pins(me))
        .await?;
    Ok(Json(pins))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::rate_limit::Quota;

    const ADMIN_TOKEN: &str = "test-admin-token";

    fn app() -> Router {
        let config = ServerConfig {
            admin_token: Some(ADMIN_TOKEN.into()),
            ..ServerConfig::default()
        };
        let state = AppState {
            db: Arc::new(Mutex::new(Database::open_in_memory().unwrap())),
            rate_limiter: RateLimiter::new(Quota {
                per_sec: config.rate_per_sec,
                burst: config.rate_burst,
            }),
            config: Arc::new(config),
        };
        build_router(state)
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn login(app: &Router, name: &str, role: Option<&str>) -> (String, Uuid) {
        let (status, body) = call(
            app,
            Method::POST,
            "/admin/sessions",
            Some(ADMIN_TOKEN),
            Some(json!({
                "wallet_address": format!("0x{name}"),
                "display_name": name,
                "role": role,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let token = body["token"].as_str().unwrap().to_string();
        let id = body["user"]["id"].as_str().unwrap().parse().unwrap();
        (token, id)
    }

    async fn direct(app: &Router, token: &str, with: Uuid) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/conversations",
            Some(token),
            Some(json!({ "kind": "direct", "participant_ids": [with] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = app();
        let (status, body) = call(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn requests_without_session_are_unauthorized() {
        let app = app();
        for uri in ["/me", "/conversations", "/pins/mine"] {
            let (status, body) = call(&app, Method::GET, uri, None, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["error"], "Not authenticated");
        }
        let (status, _) = call(&app, Method::GET, "/me", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn session_minting_needs_the_admin_token() {
        let app = app();
        let (status, _) = call(
            &app,
            Method::POST,
            "/admin/sessions",
            Some("wrong"),
            Some(json!({ "wallet_address": "0xalice" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (token, id) = login(&app, "alice", None).await;
        let (status, body) = call(&app, Method::GET, "/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id.to_string());
        assert_eq!(body["wallet_address"], "0xalice");

        let (status, _) = call(&app, Method::POST, "/me/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::GET, "/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn conversation_and_message_flow() {
        let app = app();
        let (alice, _) = login(&app, "alice", None).await;
        let (bob, bob_id) = login(&app, "bob", None).await;
        let (mallory, _) = login(&app, "mallory", None).await;
        let conv = direct(&app, &alice, bob_id).await;
        let messages = format!("/conversations/{conv}/messages");

        let (status, body) = call(
            &app,
            Method::POST,
            &messages,
            Some(&bob),
            Some(json!({ "kind": "text", "content": "hello alice" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let msg = body["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            Method::POST,
            &messages,
            Some(&bob),
            Some(json!({ "kind": "text", "content": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

        let (status, page) = call(&app, Method::GET, &messages, Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["messages"].as_array().unwrap().len(), 1);
        assert_eq!(page["messages"][0]["content"], "hello alice");
        assert_eq!(page["messages"][0]["sender"]["display_name"], "bob");
        assert!(page["next_cursor"].is_null());

        let (status, _) = call(&app, Method::GET, &messages, Some(&mallory), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            Method::PATCH,
            &format!("/messages/{msg}"),
            Some(&alice),
            Some(json!({ "content": "not mine" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, listed) = call(&app, Method::GET, "/conversations", Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed[0]["last_message"], "hello alice");
        assert_eq!(listed[0]["unread_count"], 1);

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/conversations/{conv}/read"),
            Some(&alice),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, view) = call(
            &app,
            Method::GET,
            &format!("/conversations/{conv}"),
            Some(&alice),
            None,
        )
        .await;
        assert_eq!(view["unread_count"], 0);
    }

    #[tokio::test]
    async fn cursor_pages_through_history() {
        let app = app();
        let (alice, _) = login(&app, "alice", None).await;
        let (_, bob_id) = login(&app, "bob", None).await;
        let conv = direct(&app, &alice, bob_id).await;
        let messages = format!("/conversations/{conv}/messages");

        for i in 0..5 {
            call(
                &app,
                Method::POST,
                &messages,
                Some(&alice),
                Some(json!({ "kind": "text", "content": format!("m{i}") })),
            )
            .await;
        }

        let (_, first) = call(
            &app,
            Method::GET,
            &format!("{messages}?limit=3"),
            Some(&alice),
            None,
        )
        .await;
        assert_eq!(first["messages"][0]["content"], "m2");
        let cursor = first["next_cursor"].as_str().unwrap();

        let (_, second) = call(
            &app,
            Method::GET,
            &format!("{messages}?limit=3&cursor={cursor}"),
            Some(&alice),
            None,
        )
        .await;
        let contents: Vec<&str> = second["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, ["m0", "m1"]);
        assert!(second["next_cursor"].is_null());
    }

    #[tokio::test]
    async fn public_conversation_is_shared() {
        let app = app();
        let (alice, _) = login(&app, "alice", None).await;
        let (bob, _) = login(&app, "bob", None).await;

        let (_, a) = call(&app, Method::POST, "/conversations/public", Some(&alice), None).await;
        let (_, b) = call(&app, Method::POST, "/conversations/public", Some(&bob), None).await;
        assert_eq!(a["id"], b["id"]);
    }

    #[tokio::test]
    async fn reaction_toggles_over_http() {
        let app = app();
        let (alice, _) = login(&app, "alice", None).await;
        let (bob, bob_id) = login(&app, "bob", None).await;
        let conv = direct(&app, &alice, bob_id).await;
        let (_, sent) = call(
            &app,
            Method::POST,
            &format!("/conversations/{conv}/messages"),
            Some(&alice),
            Some(json!({ "kind": "text", "content": "hi" })),
        )
        .await;
        let uri = format!("/messages/{}/reactions", sent["id"].as_str().unwrap());

        let thumbs = || Some(json!({ "emoji": "👍" }));
        let (_, on) = call(&app, Method::POST, &uri, Some(&bob), thumbs()).await;
        let (_, off) = call(&app, Method::POST, &uri, Some(&bob), thumbs()).await;
        assert_eq!(on["applied"], true);
        assert_eq!(off["applied"], false);
    }

    #[tokio::test]
    async fn pins_dedup_and_admin_unpin() {
        let app = app();
        let (alice, _) = login(&app, "alice", None).await;
        let (root, _) = login(&app, "root", Some("admin")).await;
        let pin = json!({ "cid": "bafy123", "filename": "cat.png", "size": 42 });

        let (_, first) = call(&app, Method::POST, "/pins", Some(&alice), Some(pin.clone())).await;
        let (_, again) = call(&app, Method::POST, "/pins", Some(&alice), Some(pin)).await;
        assert_eq!(first["id"], again["id"]);

        let (status, _) = call(&app, Method::GET, "/pins", Some(&alice), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app, Method::DELETE, "/pins/bafy123", Some(&alice), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, Method::DELETE, "/pins/bafy123", Some(&root), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, mine) = call(&app, Method::GET, "/pins/mine", Some(&alice), None).await;
        assert_eq!(mine, json!([]));

        let (status, _) = call(&app, Method::DELETE, "/pins/missing", Some(&root), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reports_reach_the_admin_queue() {
        let app = app();
        let (alice, _) = login(&app, "alice", None).await;
        let (bob, bob_id) = login(&app, "bob", None).await;
        let (root, _) = login(&app, "root", Some("admin")).await;
        let conv = direct(&app, &alice, bob_id).await;
        let (_, sent) = call(
            &app,
            Method::POST,
            &format!("/conversations/{conv}/messages"),
            Some(&alice),
            Some(json!({ "kind": "text", "content": "rude" })),
        )
        .await;

        let (status, report) = call(
            &app,
            Method::POST,
            &format!("/messages/{}/reports", sent["id"].as_str().unwrap()),
            Some(&bob),
            Some(json!({ "reason": "harassment" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, queue) = call(
            &app,
            Method::GET,
            "/admin/reports?status=pending",
            Some(&root),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(queue[0]["id"], report["id"]);

        let (status, reviewed) = call(
            &app,
            Method::POST,
            &format!("/admin/reports/{}/review", report["id"].as_str().unwrap()),
            Some(&root),
            Some(json!({ "status": "resolved" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reviewed["status"], "resolved");
    }
}
