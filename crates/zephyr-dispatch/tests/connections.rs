//! WebSocket, TCP and RPC dispatch, and route reloading.

use std::fs;
use std::path::Path;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde_json::json;
use zephyr_core::{handler_fn, into_parts, BoxFuture, ConnectionState, Json, RequestContext};
use zephyr_dispatch::{
    DispatchError, Dispatcher, HttpRoute, TcpCommand, TcpContext, TcpHandler,
};
use zephyr_router::ProtocolType;
use zephyr_ws::{CloseCode, Connection, Message, WebSocketRoute, WsContext};

fn touch(root: &Path, relative: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, "").unwrap();
}

/// Joins the room named by the path and relays messages to it.
struct Room;

impl WebSocketRoute for Room {
    fn on_open<'a>(&'a self, ctx: &'a mut WsContext) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let room = ctx.param("room").unwrap_or("lobby").to_string();
            ctx.subscribe(&room);
        })
    }

    fn on_message<'a>(&'a self, ctx: &'a mut WsContext, message: Message) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let room = ctx.param("room").unwrap_or("lobby").to_string();
            ctx.publish(&room, message);
        })
    }
}

/// Upper-cases every chunk and hangs up on `quit`.
struct Shout;

impl TcpHandler for Shout {
    fn on_open<'a>(&'a self, ctx: &'a mut TcpContext) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let _ = ctx.write("ready\n");
        })
    }

    fn on_data<'a>(&'a self, ctx: &'a mut TcpContext, data: Bytes) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if &data[..] == b"quit" {
                let _ = ctx.end(Some(Bytes::from_static(b"bye\n")));
            } else {
                let _ = ctx.write(data.to_ascii_uppercase());
            }
        })
    }
}

#[tokio::test]
async fn test_websocket_topics_reach_every_member() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "rooms/[room]/socket.rs");
    let dispatcher = Dispatcher::builder(dir.path())
        .websocket("/rooms/[room]", Room)
        .build();

    let (alice, mut alice_rx) = Connection::channel();
    let (bob, mut bob_rx) = Connection::channel();
    let mut alice = dispatcher
        .handle_websocket("/rooms/rust", None, HeaderMap::new(), alice)
        .await
        .unwrap();
    let _bob = dispatcher
        .handle_websocket("/rooms/rust", Some("nick=bob"), HeaderMap::new(), bob)
        .await
        .unwrap();
    assert_eq!(dispatcher.topics().subscriber_count("rust"), 2);
    assert_eq!(alice.state(), ConnectionState::Open);

    alice.handle(Message::text("hi")).await;
    assert_eq!(alice.state(), ConnectionState::Active);
    assert_eq!(alice_rx.recv().await, Some(Message::text("hi")));
    assert_eq!(bob_rx.recv().await, Some(Message::text("hi")));

    alice.close(None).await;
    assert_eq!(alice.state(), ConnectionState::Closed);
    assert_eq!(dispatcher.topics().subscriber_count("rust"), 1);
}

#[tokio::test]
async fn test_websocket_without_route_is_closed() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::builder(dir.path()).build();

    let (connection, mut outbound) = Connection::channel();
    let err = dispatcher
        .handle_websocket("/nowhere", None, HeaderMap::new(), connection)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::NoRoute { protocol: ProtocolType::WebSocket, .. }
    ));

    let Some(Message::Close(Some(frame))) = outbound.recv().await else {
        panic!("expected a close frame");
    };
    assert_eq!(frame.close_code(), Some(CloseCode::PolicyViolation));
}

#[tokio::test]
async fn test_tcp_connection_runs_handler() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "tcp/handler.rs");
    let dispatcher = Dispatcher::builder(dir.path().join("routes"))
        .tcp_dir(dir.path().join("tcp"))
        .tcp("/", Shout)
        .build();

    let (ctx, mut outbound) = TcpContext::channel(None);
    let mut session = dispatcher.handle_tcp(ctx).await.unwrap();
    assert_eq!(
        outbound.recv().await,
        Some(TcpCommand::Write(Bytes::from_static(b"ready\n")))
    );

    session.data(Bytes::from_static(b"hello")).await;
    assert_eq!(
        outbound.recv().await,
        Some(TcpCommand::Write(Bytes::from_static(b"HELLO")))
    );

    session.data(Bytes::from_static(b"quit")).await;
    assert_eq!(
        outbound.recv().await,
        Some(TcpCommand::End(Some(Bytes::from_static(b"bye\n"))))
    );
    assert!(session.context().is_ended());
}

#[tokio::test]
async fn test_tcp_disabled_ends_connection() {
    let dir = tempfile::tempdir().unwrap();
    // Handler files inside the API tree are not TCP routes.
    touch(dir.path(), "routes/handler.rs");
    let dispatcher = Dispatcher::builder(dir.path().join("routes"))
        .tcp("/", Shout)
        .build();

    let (ctx, mut outbound) = TcpContext::channel(None);
    let err = dispatcher.handle_tcp(ctx).await.unwrap_err();
    assert!(matches!(err, DispatchError::NoRoute { protocol: ProtocolType::Tcp, .. }));
    assert_eq!(outbound.recv().await, Some(TcpCommand::End(None)));
}

#[tokio::test]
async fn test_rpc_ignores_method() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "rpc/[procedure]/rpc.rs");
    let dispatcher = Dispatcher::builder(dir.path())
        .rpc(
            "/rpc/[procedure]",
            handler_fn(|ctx: RequestContext| async move {
                Json(json!({ "procedure": ctx.param("procedure"), "method": ctx.method().as_str() }))
            }),
        )
        .build();

    for method in [Method::GET, Method::POST] {
        let ctx = RequestContext::builder(method.clone(), "/rpc/users.list").build();
        let (parts, body) = into_parts(dispatcher.handle_rpc(ctx).await).await;
        assert_eq!(parts.status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({ "procedure": "users.list", "method": method.as_str() }));
    }

    let missing = RequestContext::builder(Method::POST, "/rpc").build();
    assert_eq!(dispatcher.handle_rpc(missing).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reload_picks_up_new_routes() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "a/route.rs");
    // No handler registered for this one.
    touch(dir.path(), "orphan/route.rs");
    let dispatcher = Dispatcher::builder(dir.path())
        .http("/a", HttpRoute::new().get(handler_fn(|_: RequestContext| async { "a" })))
        .http("/b", HttpRoute::new().get(handler_fn(|_: RequestContext| async { "b" })))
        .build();

    assert_eq!(dispatcher.routes().await.len(), 1);
    let get = |uri: &str| RequestContext::builder(Method::GET, uri).build();
    assert_eq!(dispatcher.handle_http(get("/b")).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(dispatcher.handle_http(get("/orphan")).await.status(), StatusCode::NOT_FOUND);

    touch(dir.path(), "b/route.rs");
    assert_eq!(dispatcher.reload().await, 2);
    assert_eq!(dispatcher.handle_http(get("/b")).await.status(), StatusCode::OK);
    assert_eq!(dispatcher.route_cache_stats().unwrap().size, 1);
}
