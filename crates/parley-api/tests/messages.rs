/// Integration tests: drive the REST router end to end against an in-memory
/// database, with a `Presence` registry standing in for live WebSocket
/// sessions so push fan-out can be observed.
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use parley_api::{AppState, AppStateInner, router};
use parley_db::Database;
use parley_gateway::presence::Presence;
use parley_types::events::GatewayEvent;

fn test_app() -> (Router, AppState) {
    let state: AppState = Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        presence: Presence::new(),
        jwt_secret: "test-secret".into(),
    });
    (router(state.clone()), state)
}

async fn body_json(res: Response<Body>) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn register_user(app: &Router, username: &str) -> (Uuid, String) {
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "username": username, "password": "password123" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let body = body_json(res).await;
    let user_id = body["user_id"].as_str().unwrap().parse().unwrap();
    let token = body["token"].as_str().unwrap().to_string();
    (user_id, token)
}

async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    token: &str,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token));
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    app.clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap()
}

async fn send_message(app: &Router, token: &str, to: Uuid, text: &str) -> Response<Body> {
    request(
        app,
        "POST",
        &format!("/messages/send/{}", to),
        token,
        Some(json!({ "message": text })),
    )
    .await
}

#[tokio::test]
async fn send_updates_unread_counts_and_mark_read_zeroes_them() {
    let (app, _state) = test_app();
    let (alice_id, alice_token) = register_user(&app, "alice").await;
    let (bob_id, bob_token) = register_user(&app, "bob").await;

    let res = send_message(&app, &alice_token, bob_id, "hi").await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let created = body_json(res).await;
    assert_eq!(created["content"], "hi");
    assert_eq!(created["senderId"], alice_id.to_string());
    assert_eq!(created["read"], false);

    let res = request(&app, "GET", "/messages/unread/counts", &bob_token, None).await;
    let counts = body_json(res).await;
    assert_eq!(counts[alice_id.to_string()], 1);

    send_message(&app, &alice_token, bob_id, "hi again").await;
    let res = request(&app, "GET", "/messages/unread/counts", &bob_token, None).await;
    let counts = body_json(res).await;
    assert_eq!(counts[alice_id.to_string()], 2);

    // Bob has sent nothing, so Alice sees a zero entry for the conversation
    let res = request(&app, "GET", "/messages/unread/counts", &alice_token, None).await;
    let counts = body_json(res).await;
    assert_eq!(counts[bob_id.to_string()], 0);

    let res = request(
        &app,
        "PUT",
        &format!("/messages/read/{}", alice_id),
        &bob_token,
        None,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = request(&app, "GET", "/messages/unread/counts", &bob_token, None).await;
    let counts = body_json(res).await;
    assert_eq!(counts[alice_id.to_string()], 0);

    // Idempotent: marking again is a no-op, not an error
    let res = request(
        &app,
        "PUT",
        &format!("/messages/read/{}", alice_id),
        &bob_token,
        None,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = request(&app, "GET", "/messages/unread/counts", &bob_token, None).await;
    let counts = body_json(res).await;
    assert_eq!(counts[alice_id.to_string()], 0);
}

#[tokio::test]
async fn history_is_symmetric_and_ordered() {
    let (app, _state) = test_app();
    let (alice_id, alice_token) = register_user(&app, "alice").await;
    let (bob_id, bob_token) = register_user(&app, "bob").await;

    send_message(&app, &alice_token, bob_id, "one").await;
    send_message(&app, &bob_token, alice_id, "two").await;
    send_message(&app, &alice_token, bob_id, "three").await;

    // Both sides see the same conversation in send order
    for (token, counterpart) in [(&alice_token, bob_id), (&bob_token, alice_id)] {
        let res = request(&app, "GET", &format!("/messages/{}", counterpart), token, None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let messages = body_json(res).await;
        let contents: Vec<&str> = messages
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, ["one", "two", "three"]);
    }

    // No conversation yet -> empty array, not an error
    let (carol_id, _) = register_user(&app, "carol").await;
    let res = request(&app, "GET", &format!("/messages/{}", carol_id), &alice_token, None).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await, json!([]));
}

#[tokio::test]
async fn mark_read_without_conversation_is_not_found() {
    let (app, _state) = test_app();
    let (_alice_id, alice_token) = register_user(&app, "alice").await;
    let (bob_id, _) = register_user(&app, "bob").await;

    let res = request(
        &app,
        "PUT",
        &format!("/messages/read/{}", bob_id),
        &alice_token,
        None,
    )
    .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_message_is_rejected_before_any_write() {
    let (app, _state) = test_app();
    let (_alice_id, alice_token) = register_user(&app, "alice").await;
    let (bob_id, _) = register_user(&app, "bob").await;

    let res = send_message(&app, &alice_token, bob_id, "   ").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Nothing persisted: no conversation was created
    let res = request(&app, "GET", &format!("/messages/{}", bob_id), &alice_token, None).await;
    assert_eq!(body_json(res).await, json!([]));
}

#[tokio::test]
async fn online_receiver_gets_new_message_then_unread_update() {
    let (app, state) = test_app();
    let (alice_id, alice_token) = register_user(&app, "alice").await;
    let (bob_id, _bob_token) = register_user(&app, "bob").await;

    // Bob is connected
    let (_session, mut bob_rx) = state.presence.register(bob_id).await;

    let res = send_message(&app, &alice_token, bob_id, "hello").await;
    assert_eq!(res.status(), StatusCode::CREATED);

    match bob_rx.recv().await.unwrap() {
        GatewayEvent::NewMessage(message) => {
            assert_eq!(message.content, "hello");
            assert_eq!(message.sender_id, alice_id);
            assert_eq!(message.receiver_id, bob_id);
            assert!(!message.read);
        }
        other => panic!("expected newMessage first, got {:?}", other),
    }

    match bob_rx.recv().await.unwrap() {
        GatewayEvent::UnreadCountUpdate(counts) => {
            assert_eq!(counts.get(&alice_id), Some(&1));
        }
        other => panic!("expected unreadCountUpdate second, got {:?}", other),
    }
}

#[tokio::test]
async fn mark_read_pushes_receipt_and_zeroed_badge() {
    let (app, state) = test_app();
    let (alice_id, alice_token) = register_user(&app, "alice").await;
    let (bob_id, bob_token) = register_user(&app, "bob").await;

    send_message(&app, &alice_token, bob_id, "hello").await;

    // Both sides connected
    let (_alice_session, mut alice_rx) = state.presence.register(alice_id).await;
    let (_bob_session, mut bob_rx) = state.presence.register(bob_id).await;

    let res = request(
        &app,
        "PUT",
        &format!("/messages/read/{}", alice_id),
        &bob_token,
        None,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    // Alice (the sender) gets the read receipt
    match alice_rx.recv().await.unwrap() {
        GatewayEvent::MessagesRead {
            conversation_id,
            read_by,
        } => {
            assert_ne!(conversation_id, Uuid::nil());
            assert_eq!(read_by, bob_id);
        }
        other => panic!("expected messagesRead, got {:?}", other),
    }

    // Bob's own session gets its badge zeroed without polling
    match bob_rx.recv().await.unwrap() {
        GatewayEvent::UnreadCountUpdate(counts) => {
            assert_eq!(counts.get(&alice_id), Some(&0));
        }
        other => panic!("expected unreadCountUpdate, got {:?}", other),
    }
}

#[tokio::test]
async fn offline_receiver_gets_no_push_but_pull_is_ground_truth() {
    let (app, state) = test_app();
    let (alice_id, alice_token) = register_user(&app, "alice").await;
    let (bob_id, bob_token) = register_user(&app, "bob").await;

    assert!(state.presence.online_users().await.is_empty());

    let res = send_message(&app, &alice_token, bob_id, "missed you").await;
    assert_eq!(res.status(), StatusCode::CREATED);

    // Bob connects later and pulls: the count comes from the store
    let res = request(&app, "GET", "/messages/unread/counts", &bob_token, None).await;
    let counts = body_json(res).await;
    assert_eq!(counts[alice_id.to_string()], 1);
}

#[tokio::test]
async fn recent_messages_capped_at_fifty_newest_first() {
    let (app, _state) = test_app();
    let (_alice_id, alice_token) = register_user(&app, "alice").await;
    let (bob_id, _) = register_user(&app, "bob").await;

    for i in 0..60 {
        let res = send_message(&app, &alice_token, bob_id, &format!("msg {}", i)).await;
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    let res = request(&app, "GET", "/messages/recent/all", &alice_token, None).await;
    assert_eq!(res.status(), StatusCode::OK);
    let summaries = body_json(res).await;
    let summaries = summaries.as_array().unwrap();

    assert_eq!(summaries.len(), 50);
    assert_eq!(summaries[0]["content"], "msg 59");
    assert_eq!(summaries[0]["senderName"], "alice");
    assert_eq!(summaries[0]["receiverName"], "bob");

    // Newest first. Timestamps may collide at microsecond resolution; the
    // store breaks ties by insertion order, so index order is authoritative
    // and timestamps only need to be non-increasing.
    for (i, pair) in summaries.windows(2).enumerate() {
        let newer = pair[0]["createdAt"].as_str().unwrap();
        let older = pair[1]["createdAt"].as_str().unwrap();
        assert!(newer >= older, "expected descending: {} >= {}", newer, older);
        assert_eq!(pair[0]["content"], format!("msg {}", 59 - i));
        assert_eq!(pair[1]["content"], format!("msg {}", 58 - i));
    }
}

#[tokio::test]
async fn message_routes_require_a_token() {
    let (app, _state) = test_app();

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/messages/unread/counts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn users_listing_excludes_the_caller() {
    let (app, _state) = test_app();
    let (_alice_id, alice_token) = register_user(&app, "alice").await;
    register_user(&app, "bob").await;
    register_user(&app, "carol").await;

    let res = request(&app, "GET", "/users", &alice_token, None).await;
    assert_eq!(res.status(), StatusCode::OK);
    let users = body_json(res).await;
    let names: Vec<&str> = users
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["username"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["bob", "carol"]);
}
