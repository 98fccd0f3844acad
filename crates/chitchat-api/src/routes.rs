use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    http::HeaderMap,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use tracing::debug;

use chitchat_gateway::handle_connection;
use chitchat_types::api::HealthResponse;

use crate::auth::{self, verify_token};
use crate::error::{ApiError, ApiResult};
use crate::messages;
use crate::middleware::{bearer_token, require_auth};
use crate::state::AppState;
use crate::users;

/// The full HTTP surface. Callers add transport layers (CORS, tracing).
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route(
            "/user",
            get(users::get_profile)
                .put(users::update_profile)
                .delete(users::delete_profile),
        )
        .route("/users", get(users::list_users))
        .route("/users/by-email", get(users::get_user_by_email))
        .route("/users/{username}", get(users::get_user_by_username))
        .route(
            "/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/messages/{id}/delivered", post(messages::mark_delivered))
        .route("/messages/{id}/read", post(messages::mark_read))
        .route(
            "/messages/{id}",
            put(messages::edit_message).delete(messages::delete_message),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // The upgrade authenticates itself: browsers cannot set headers on a
    // websocket handshake, so the token may also arrive as `?token=`.
    let ws_route = Router::new().route("/ws", get(ws_upgrade));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        connections: state.registry.connection_count().await,
    })
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let token = bearer_token(&headers)
        .or(query.token.as_deref())
        .ok_or(ApiError::Unauthenticated)?;
    let claims = verify_token(&state.auth, token)?;

    // Deactivated accounts keep valid tokens until expiry.
    state
        .store
        .active_user(claims.sub)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!("Websocket upgrade rejected for {}: {}", claims.sub, rejection);
            return Ok(rejection.into_response());
        }
    };

    let registry = state.registry.clone();
    let heartbeat = state.heartbeat;
    let store = state.store.clone();
    Ok(ws
        .on_upgrade(move |socket| {
            let user_id = claims.sub;
            // Re-checked once registered, in case a deactivation ran meanwhile.
            let still_active =
                async move { matches!(store.active_user(user_id).await, Ok(Some(_))) };
            handle_connection(socket, registry, heartbeat, user_id, claims.username, still_active)
        })
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::testing::Fixture;

    async fn call(
        fx: &Fixture,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let resp = router(fx.state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn register(fx: &Fixture, name: &str) -> (i64, String) {
        let (status, body) = call(
            fx,
            Method::POST,
            "/register",
            None,
            Some(json!({
                "username": name,
                "email": format!("{name}@example.com"),
                "password": "hunter2hunter2",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        (
            body["user"]["id"].as_i64().unwrap(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn register_send_and_fetch_conversation() {
        let fx = Fixture::new();
        let (_, alice) = register(&fx, "alice").await;
        let (bob_id, bob) = register(&fx, "bob").await;

        let (status, login) = call(
            &fx,
            Method::POST,
            "/login",
            None,
            Some(json!({ "email": "bob@example.com", "password": "hunter2hunter2" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(login["user"]["username"], "bob");

        let (status, sent) = call(
            &fx,
            Method::POST,
            "/messages",
            Some(&alice),
            Some(json!({ "receiver_id": bob_id, "content": "hi bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(sent["is_delivered"], false);

        let alice_id = sent["sender_id"].as_i64().unwrap();
        let (status, list) = call(
            &fx,
            Method::GET,
            &format!("/messages?peer_id={alice_id}"),
            Some(&bob),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list[0]["content"], "hi bob");
        assert_eq!(list[0]["is_delivered"], true);
    }

    #[tokio::test]
    async fn protected_routes_require_a_valid_token() {
        let fx = Fixture::new();

        let (status, body) = call(&fx, Method::GET, "/messages?peer_id=1", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = call(&fx, Method::GET, "/user", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn edit_by_non_sender_is_not_found() {
        let fx = Fixture::new();
        let (a, b) = (fx.user("alice"), fx.user("bob"));
        let sent = fx
            .delivery()
            .send_message(a, crate::testing::send_req(b, "hi"))
            .await
            .unwrap();

        let token = fx.token(b, "bob");
        let (status, _) = call(
            &fx,
            Method::PUT,
            &format!("/messages/{}", sent.id),
            Some(&token),
            Some(json!({ "content": "edited" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let token = fx.token(a, "alice");
        let (status, body) = call(
            &fx,
            Method::DELETE,
            &format!("/messages/{}", sent.id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Message deleted");
        assert_eq!(body["id"], sent.id);
    }

    #[tokio::test]
    async fn malformed_input_is_bad_request() {
        let fx = Fixture::new();
        let a = fx.user("alice");
        let token = fx.token(a, "alice");

        let (status, _) = call(&fx, Method::GET, "/messages", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &fx,
            Method::POST,
            "/messages/not-a-number/read",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &fx,
            Method::GET,
            "/users/by-email?email=",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn profile_update_and_deactivation() {
        let fx = Fixture::new();
        let a = fx.user("alice");
        fx.user("bob");
        let token = fx.token(a, "alice");

        let (status, body) = call(
            &fx,
            Method::PUT,
            "/user",
            Some(&token),
            Some(json!({ "first_name": "Alice" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["first_name"], "Alice");
        assert_eq!(body["email"], "alice@example.com");

        let (status, _) = call(
            &fx,
            Method::PUT,
            "/user",
            Some(&token),
            Some(json!({ "email": "bob@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(&fx, Method::GET, "/users/bob", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "bob");

        let mut live = fx.registry.register(a).await;
        let (status, _) = call(&fx, Method::DELETE, "/user", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(live.outbound.recv().await.is_none());

        let (status, _) = call(&fx, Method::GET, "/user", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ws_without_token_is_unauthorized() {
        let fx = Fixture::new();
        let (status, _) = call(&fx, Method::GET, "/ws", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&fx, Method::GET, "/ws?token=nope", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_reports_live_connections() {
        let fx = Fixture::new();
        let a = fx.user("alice");
        let _live = fx.registry.register(a).await;

        let (status, body) = call(&fx, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok", "connections": 1 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_registrations_yield_one_created() {
        let fx = Fixture::new();
        let body = json!({
            "username": "carol",
            "email": "carol@example.com",
            "password": "hunter2hunter2",
        })
        .to_string();

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let app = router(fx.state.clone());
                let req = Request::builder()
                    .method(Method::POST)
                    .uri("/register")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.clone()))
                    .unwrap();
                tokio::spawn(async move { app.oneshot(req).await.unwrap().status() })
            })
            .collect();

        let mut statuses = Vec::new();
        for attempt in attempts {
            statuses.push(attempt.await.unwrap());
        }
        let created = statuses.iter().filter(|s| **s == StatusCode::CREATED).count();
        let conflicts = statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count();
        assert_eq!(created, 1, "{statuses:?}");
        assert_eq!(conflicts, 7, "{statuses:?}");
    }

    mod websocket {
        use super::*;
        use std::net::SocketAddr;
        use std::time::Duration;

        use chitchat_types::events::GatewayEvent;
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::Message as WsMessage;
        use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

        type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

        async fn serve(fx: &Fixture) -> SocketAddr {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let app = router(fx.state.clone());
            tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
            addr
        }

        /// Next gateway event, or `None` once the server closes.
        async fn next_event(ws: &mut Client) -> Option<GatewayEvent> {
            let read = async {
                while let Some(frame) = ws.next().await {
                    match frame {
                        Ok(WsMessage::Text(text)) => {
                            return Some(serde_json::from_str(text.as_str()).unwrap());
                        }
                        Ok(WsMessage::Close(_)) | Err(_) => return None,
                        Ok(_) => {}
                    }
                }
                None
            };
            tokio::time::timeout(Duration::from_secs(5), read).await.unwrap()
        }

        async fn wait_for_connections(fx: &Fixture, expected: usize) {
            for _ in 0..200 {
                if fx.registry.connection_count().await == expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("expected {expected} live connections");
        }

        #[tokio::test]
        async fn websocket_session_uses_token_identity() {
            let fx = Fixture::new();
            let (a, b) = (fx.user("alice"), fx.user("bob"));
            let addr = serve(&fx).await;

            let url = format!("ws://{addr}/ws?token={}", fx.token(b, "bob"));
            let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

            assert_eq!(
                next_event(&mut ws).await,
                Some(GatewayEvent::Ready {
                    user_id: b,
                    username: "bob".into()
                })
            );
            assert!(fx.registry.lookup(b).await.is_some());

            let sent = fx
                .delivery()
                .send_message(a, crate::testing::send_req(b, "over the wire"))
                .await
                .unwrap();
            assert_eq!(next_event(&mut ws).await, Some(GatewayEvent::MessageCreate(sent)));

            ws.close(None).await.unwrap();
            wait_for_connections(&fx, 0).await;
        }

        #[tokio::test]
        async fn deactivation_evicts_a_live_session() {
            let fx = Fixture::new();
            let a = fx.user("alice");
            let token = fx.token(a, "alice");
            let addr = serve(&fx).await;

            let url = format!("ws://{addr}/ws?token={token}");
            let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
            assert!(matches!(next_event(&mut ws).await, Some(GatewayEvent::Ready { .. })));

            let (status, _) = call(&fx, Method::DELETE, "/user", Some(&token), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(next_event(&mut ws).await, None);
            wait_for_connections(&fx, 0).await;

            // The token still verifies, but the account is gone.
            let refused = match tokio_tungstenite::connect_async(url.as_str()).await {
                Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => resp.status().as_u16(),
                Err(e) => panic!("unexpected handshake error: {e}"),
                Ok(_) => panic!("deactivated account was upgraded"),
            };
            assert_eq!(refused, StatusCode::UNAUTHORIZED.as_u16());
        }
    }
}
