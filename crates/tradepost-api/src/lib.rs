use axum::{
    extract::Request,
    http::{Method, StatusCode},
    middleware::{from_fn, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use tradepost_core::AppState;

pub mod error;
pub mod middleware;
pub mod routes;

pub fn build_router() -> Router<AppState> {
    let cors = build_cors_layer();
    Router::new()
        // Health
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        // Conversations
        .route(
            "/api/v1/conversations",
            get(routes::conversations::list_conversations),
        )
        .route(
            "/api/v1/conversations/with/{user_id}",
            get(routes::conversations::key_with),
        )
        .route(
            "/api/v1/conversations/{key}/messages",
            get(routes::conversations::get_history),
        )
        .route(
            "/api/v1/conversations/{key}/read",
            post(routes::conversations::mark_all_read),
        )
        // Notifications
        .route(
            "/api/v1/notifications",
            get(routes::notifications::list_unread).post(routes::notifications::create),
        )
        .route(
            "/api/v1/notifications/stats",
            get(routes::notifications::stats),
        )
        .route(
            "/api/v1/notifications/{key}/read",
            post(routes::notifications::mark_all_read),
        )
        .route(
            "/api/v1/notifications/{key}/{notif_id}/read",
            post(routes::notifications::mark_read),
        )
        .route(
            "/api/v1/notifications/{key}/{notif_id}",
            delete(routes::notifications::delete),
        )
        // Middleware layers
        .layer(cors)
        .layer(from_fn(rate_limit_middleware))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn build_cors_layer() -> tower_http::cors::CorsLayer {
    // The marketplace web client may be served from any origin (storefront
    // embeds included), so the API stays origin-agnostic.
    tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "tradepost" })),
    )
}

async fn metrics() -> impl IntoResponse {
    let requests = REQUEST_COUNT.load(Ordering::Relaxed);
    let limited = RATE_LIMITED_COUNT.load(Ordering::Relaxed);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        format!(
            "tradepost_up 1\ntradepost_http_requests_total {}\ntradepost_http_rate_limited_total {}\n",
            requests, limited
        ),
    )
}

const MAX_REQUESTS_PER_SECOND: u32 = 120;

static RATE_LIMIT_STATE: OnceLock<Mutex<HashMap<String, (i64, u32)>>> = OnceLock::new();
static REQUEST_COUNT: AtomicU64 = AtomicU64::new(0);
static RATE_LIMITED_COUNT: AtomicU64 = AtomicU64::new(0);

fn rate_limit_state() -> &'static Mutex<HashMap<String, (i64, u32)>> {
    RATE_LIMIT_STATE.get_or_init(|| Mutex::new(HashMap::new()))
}

async fn rate_limit_middleware(req: Request, next: Next) -> Response {
    REQUEST_COUNT.fetch_add(1, Ordering::Relaxed);
    let now = chrono::Utc::now().timestamp();
    let key = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("local")
        .to_string();

    let allowed = {
        let mut map = match rate_limit_state().lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = map.entry(key).or_insert((now, 0));
        if entry.0 != now {
            *entry = (now, 0);
        }
        if entry.1 >= MAX_REQUESTS_PER_SECOND {
            false
        } else {
            entry.1 += 1;
            true
        }
    };

    if !allowed {
        RATE_LIMITED_COUNT.fetch_add(1, Ordering::Relaxed);
        return crate::error::ApiError::RateLimited.into_response();
    }

    next.run(req).await
}
