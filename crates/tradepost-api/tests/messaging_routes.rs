use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use tradepost_core::{AppConfig, AppState};
use tradepost_db::conversations::{self, NewMessage};
use tradepost_models::message::MessageKind;

const JWT_SECRET: &str = "integration-test-secret";

struct TestContext {
    app: Router,
    state: AppState,
}

impl TestContext {
    async fn new() -> anyhow::Result<Self> {
        let db = tradepost_db::create_pool("sqlite::memory:", 1).await?;
        tradepost_db::run_migrations(&db).await?;

        let state = AppState::new(
            db,
            AppConfig {
                jwt_secret: Some(JWT_SECRET.to_string()),
            },
        );
        let app = tradepost_api::build_router().with_state(state.clone());
        Ok(Self { app, state })
    }

    fn token_for(&self, user_id: &str) -> String {
        tradepost_core::auth::create_token(user_id, JWT_SECRET, 3600).expect("token")
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> anyhow::Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(user) = user {
            builder = builder.header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.token_for(user)),
            );
        }
        let request = match body {
            Some(value) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(value.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value))
    }

    async fn seed_message(&self, sender: &str, receiver: &str, body: &str) {
        let key = tradepost_core::convkey::conversation_key(sender, receiver);
        conversations::append(
            &self.state.db,
            &key,
            NewMessage {
                sender_id: sender.to_string(),
                receiver_id: receiver.to_string(),
                sender_display: sender.to_uppercase(),
                receiver_display: receiver.to_uppercase(),
                body: body.to_string(),
                kind: MessageKind::Text,
            },
        )
        .await
        .expect("seed message");
    }
}

#[tokio::test]
async fn requests_without_a_token_are_rejected() {
    let ctx = TestContext::new().await.unwrap();
    let (status, _) = ctx
        .request_json(Method::GET, "/api/v1/conversations", None, None)
        .await
        .unwrap();
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn history_is_scoped_to_participants() {
    let ctx = TestContext::new().await.unwrap();
    ctx.seed_message("bob", "carol", "private").await;

    let (status, _) = ctx
        .request_json(
            Method::GET,
            "/api/v1/conversations/bob_carol/messages",
            Some("alice"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = ctx
        .request_json(
            Method::GET,
            "/api/v1/conversations/bob_carol/messages",
            Some("carol"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalMessages"], 1);
}

#[tokio::test]
async fn conversation_listing_and_read_flow() {
    let ctx = TestContext::new().await.unwrap();
    ctx.seed_message("bob", "alice", "is the bike still for sale?")
        .await;
    ctx.seed_message("bob", "alice", "I can pick it up today")
        .await;

    let (status, body) = ctx
        .request_json(Method::GET, "/api/v1/conversations", Some("alice"), None)
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    let conversations = body["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["counterpart"], "bob");
    assert_eq!(conversations[0]["unreadCount"], 2);
    assert_eq!(
        conversations[0]["lastBody"],
        "I can pick it up today"
    );

    let (status, body) = ctx
        .request_json(
            Method::POST,
            "/api/v1/conversations/alice_bob/read",
            Some("alice"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 2);

    // Second pass is a no-op.
    let (_, body) = ctx
        .request_json(
            Method::POST,
            "/api/v1/conversations/alice_bob/read",
            Some("alice"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(body["updated"], 0);

    let (_, body) = ctx
        .request_json(Method::GET, "/api/v1/conversations", Some("alice"), None)
        .await
        .unwrap();
    assert_eq!(body["conversations"][0]["unreadCount"], 0);
}

#[tokio::test]
async fn history_pages_report_metadata_past_the_end() {
    let ctx = TestContext::new().await.unwrap();
    for i in 1..=5 {
        ctx.seed_message("alice", "bob", &format!("m{i}")).await;
    }

    let (status, body) = ctx
        .request_json(
            Method::GET,
            "/api/v1/conversations/alice_bob/messages?page=1&page_size=2",
            Some("bob"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalPages"], 3);
    assert_eq!(body["hasMore"], true);
    // Newest first within the page.
    assert_eq!(body["messages"][0]["body"], "m5");

    let (status, body) = ctx
        .request_json(
            Method::GET,
            "/api/v1/conversations/alice_bob/messages?page=9&page_size=2",
            Some("bob"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"].as_array().unwrap().len(), 0);
    assert_eq!(body["totalMessages"], 5);
    assert_eq!(body["hasMore"], false);
}

#[tokio::test]
async fn key_derivation_is_symmetric_and_rejects_self() {
    let ctx = TestContext::new().await.unwrap();

    let (status, body) = ctx
        .request_json(
            Method::GET,
            "/api/v1/conversations/with/bob",
            Some("alice"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "alice_bob");

    let (_, body) = ctx
        .request_json(
            Method::GET,
            "/api/v1/conversations/with/alice",
            Some("bob"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(body["key"], "alice_bob");

    let (status, _) = ctx
        .request_json(
            Method::GET,
            "/api/v1/conversations/with/alice",
            Some("alice"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn notification_lifecycle_across_the_routes() {
    let ctx = TestContext::new().await.unwrap();

    let (status, created) = ctx
        .request_json(
            Method::POST,
            "/api/v1/notifications",
            Some("alice"),
            Some(json!({ "toUser": "bob", "body": "your listing got an offer", "kind": "alert" })),
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    let notif_id = created["notification"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["notification"]["conversationKey"], "alice_bob");

    let (_, body) = ctx
        .request_json(Method::GET, "/api/v1/notifications", Some("bob"), None)
        .await
        .unwrap();
    assert_eq!(body["count"], 1);

    let (_, body) = ctx
        .request_json(Method::GET, "/api/v1/notifications/stats", Some("bob"), None)
        .await
        .unwrap();
    assert_eq!(body["stats"]["unread"], 1);

    let (status, _) = ctx
        .request_json(
            Method::POST,
            &format!("/api/v1/notifications/alice_bob/{notif_id}/read"),
            Some("bob"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);

    let (_, body) = ctx
        .request_json(Method::GET, "/api/v1/notifications/stats", Some("bob"), None)
        .await
        .unwrap();
    assert_eq!(body["stats"]["unread"], 0);
    assert_eq!(body["stats"]["read"], 1);

    let (status, _) = ctx
        .request_json(
            Method::DELETE,
            &format!("/api/v1/notifications/alice_bob/{notif_id}"),
            Some("bob"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);

    let (status, _) = ctx
        .request_json(
            Method::POST,
            &format!("/api/v1/notifications/alice_bob/{notif_id}/read"),
            Some("bob"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversize_notification_bodies_are_rejected() {
    let ctx = TestContext::new().await.unwrap();
    let (status, _) = ctx
        .request_json(
            Method::POST,
            "/api/v1/notifications",
            Some("alice"),
            Some(json!({ "toUser": "bob", "body": "x".repeat(501) })),
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
