use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::Path,
    http::{Request, StatusCode, header},
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use pairchat::{
    AppState, app, db,
    hub::Hub,
    model::{User, UserId},
    rooms::LocalRouter,
    session::USER_ID,
    store::{MessageStore, SqliteStore},
};
use serde_json::{Value, json};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message, client::IntoClientRequest},
};
use tower::ServiceExt;
use tower_sessions::{MemoryStore, Session, SessionManagerLayer};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    app: Router,
    store: SqliteStore,
}

impl Server {
    async fn new() -> Self {
        let store = SqliteStore::new(db::connect_in_memory().await.unwrap());
        let hub = Hub::new(store.clone(), Arc::new(LocalRouter::new()));

        // stands in for the login flow that fills the session
        let app = Router::new()
            .route("/login/{user_id}", get(login))
            .merge(app(AppState { hub }))
            .layer(SessionManagerLayer::new(MemoryStore::default()).with_secure(false));
        Self { app, store }
    }

    async fn user(&self, name: &str) -> User {
        self.store.create_user(name, &format!("{name}@example.com")).await.unwrap()
    }

    async fn cookie_for(&self, user: &User) -> String {
        let response = self.call(Request::get(format!("/login/{}", user.id)).body(Body::empty()).unwrap()).await;
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_owned()
    }

    async fn call(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::get(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        body_of(self.call(request.body(Body::empty()).unwrap()).await).await
    }

    async fn post_json(&self, uri: &str, cookie: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        body_of(self.call(request).await).await
    }

    async fn listen(&self) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = self.app.clone();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("ws://{addr}")
    }
}

async fn login(session: Session, Path(user_id): Path<UserId>) -> StatusCode {
    session.insert(USER_ID, user_id).await.unwrap();
    StatusCode::NO_CONTENT
}

async fn body_of(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn open_socket(url: String, cookie: Option<&str>) -> Result<Socket, tungstenite::Error> {
    let mut request = url.into_client_request()?;
    if let Some(cookie) = cookie {
        request.headers_mut().insert(header::COOKIE.as_str(), cookie.parse().unwrap());
    }
    Ok(connect_async(request).await?.0)
}

async fn next_frame(socket: &mut Socket) -> Option<Message> {
    timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("no frame within 5s")
        .map(|frame| frame.unwrap())
}

async fn next_event(socket: &mut Socket, kind: &str) -> Value {
    loop {
        let frame = next_frame(socket).await.expect("socket closed");
        if !frame.is_text() {
            continue;
        }
        let event: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        if event["type"] == kind {
            return event;
        }
    }
}

#[tokio::test]
async fn anonymous_requests_are_unauthorized() {
    let server = Server::new().await;
    let alice = server.user("alice").await;

    let (status, body) = server.get(&format!("/api/chat/get_messages/{}", alice.id), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");

    let (status, _) = server.get(&format!("/chat/{}", alice.id), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bad_requests_and_unknown_users() {
    let server = Server::new().await;
    let alice = server.user("alice").await;
    let bob = server.user("bob").await;
    let cookie = server.cookie_for(&alice).await;

    let (status, body) = server.get(&format!("/chat/{}", alice.id), Some(&cookie)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"status": "error", "message": "You cannot chat with yourself."}));

    let (status, _) = server.get("/chat/999", Some(&cookie)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server.get("/api/chat/get_messages/999", Some(&cookie)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server.post_json("/api/chat/send_message", &cookie, json!({"receiver_id": bob.id})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::post("/api/chat/send_message")
        .header(header::COOKIE, &cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{oops"))
        .unwrap();
    assert_eq!(server.call(request).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn send_then_poll_over_http() {
    let server = Server::new().await;
    let alice = server.user("alice").await;
    let bob = server.user("bob").await;
    let alice_cookie = server.cookie_for(&alice).await;
    let bob_cookie = server.cookie_for(&bob).await;

    let (status, sent) = server
        .post_json("/api/chat/send_message", &alice_cookie, json!({"receiver_id": bob.id, "message": "hello"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["status"], "success");
    assert_eq!(sent["message"]["content"], "hello");

    let uri = format!("/api/chat/get_messages/{}", alice.id);
    let (status, polled) = server.get(&uri, Some(&bob_cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(polled["messages"][0]["type"], "chat_message");
    assert_eq!(polled["messages"][0]["message_id"], sent["message"]["id"]);

    let (_, again) = server.get(&uri, Some(&bob_cookie)).await;
    assert_eq!(again, json!({"messages": []}));
}

#[tokio::test]
async fn anonymous_socket_is_closed_straight_away() {
    let server = Server::new().await;
    let alice = server.user("alice").await;
    let url = server.listen().await;

    let mut socket = open_socket(format!("{url}/chat/{}/ws", alice.id), None).await.unwrap();
    assert!(matches!(next_frame(&mut socket).await, Some(Message::Close(_)) | None));
}

#[tokio::test]
async fn identity_outage_fails_the_upgrade() {
    let server = Server::new().await;
    let alice = server.user("alice").await;
    let bob = server.user("bob").await;
    let cookie = server.cookie_for(&alice).await;
    let url = server.listen().await;

    server.store.pool().close().await;
    match open_socket(format!("{url}/chat/{}/ws", bob.id), Some(&cookie)).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 500),
        Err(err) => panic!("expected an http error, got {err}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }
}

#[tokio::test]
async fn two_sockets_exchange_a_message() {
    let server = Server::new().await;
    let alice = server.user("alice").await;
    let bob = server.user("bob").await;
    let alice_cookie = server.cookie_for(&alice).await;
    let bob_cookie = server.cookie_for(&bob).await;
    let url = server.listen().await;

    let mut alice_socket = open_socket(format!("{url}/chat/{}/ws", bob.id), Some(&alice_cookie)).await.unwrap();
    let joined = next_event(&mut alice_socket, "user_status").await;
    assert_eq!(joined["user_id"], alice.id);

    let mut bob_socket = open_socket(format!("{url}/chat/{}/ws", alice.id), Some(&bob_cookie)).await.unwrap();
    let joined = next_event(&mut alice_socket, "user_status").await;
    assert_eq!((joined["user_id"].clone(), joined["is_online"].clone()), (json!(bob.id), json!(true)));

    // binary frames carrying JSON are accepted like text
    let frame = json!({"type": "chat_message", "message": "hi bob", "receiver_id": bob.id});
    alice_socket.send(Message::binary(frame.to_string().into_bytes())).await.unwrap();

    let received = next_event(&mut bob_socket, "chat_message").await;
    assert_eq!(received["message"], "hi bob");
    assert_eq!(received["sender_id"], alice.id);
    assert_eq!(received["sender_username"], "alice");
    assert_eq!(server.store.unread_count(alice.id, bob.id).await.unwrap(), 1);

    bob_socket.send(Message::text(json!({"type": "mark_read", "sender_id": alice.id}).to_string())).await.unwrap();
    let receipt = next_event(&mut alice_socket, "messages_read").await;
    assert_eq!(receipt["reader_id"], bob.id);

    bob_socket.close(None).await.unwrap();
    let left = next_event(&mut alice_socket, "user_status").await;
    assert_eq!((left["user_id"].clone(), left["is_online"].clone()), (json!(bob.id), json!(false)));
}
