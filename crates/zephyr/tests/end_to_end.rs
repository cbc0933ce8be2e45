//! A small application assembled from configuration, served end to end.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use http::{Method, StatusCode};
use serde_json::{json, Value};
use zephyr::core::into_parts;
use zephyr::prelude::*;

fn touch(root: &Path, relative: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, "").unwrap();
}

fn load_config(root: &Path) -> ZephyrConfig {
    let source = format!(
        r#"
[server]
api_dir = "{api}"

[cors]
origin = ["https://app.example"]
credentials = true

[cache]
enabled = true
ttl = 60

[coalesce]
enabled = true
retention_ms = 50

[telemetry.logging]
enabled = false
"#,
        api = root.join("routes").display(),
    );
    ConfigLoader::new()
        .with_string(&source, "toml")
        .unwrap()
        .load()
        .unwrap()
}

fn get(uri: &str) -> RequestContext {
    RequestContext::builder(Method::GET, uri)
        .header("origin", "https://app.example")
        .build()
}

async fn json_body(response: Response) -> (StatusCode, Value) {
    let (parts, body) = into_parts(response).await;
    (parts.status, serde_json::from_slice(&body).unwrap())
}

/// A shared list of notes per board, edited over WebSocket.
struct Board {
    layer: SyncLayer<Vec<String>>,
}

impl WebSocketRoute for Board {
    fn on_open<'a>(&'a self, ctx: &'a mut WsContext) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Ok(notes) = self.layer.join(ctx).await {
                let _ = ctx.send_json(&json!({ "type": "snapshot", "data": notes }));
            }
        })
    }

    fn on_message<'a>(&'a self, ctx: &'a mut WsContext, message: Message) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Some(note) = message.as_text().map(str::to_owned) else {
                return;
            };
            let _ = self
                .layer
                .update(ctx, |notes| {
                    let mut next = notes.clone();
                    next.push(note);
                    next
                })
                .await;
        })
    }

    fn on_close<'a>(
        &'a self,
        ctx: &'a mut WsContext,
        _frame: Option<CloseFrame>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.layer.leave(ctx).await;
        })
    }
}

#[tokio::test]
async fn test_configured_http_app() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "routes/products/route.rs");
    touch(dir.path(), "routes/products/[sku]/route.rs");
    let config = load_config(dir.path());

    let lookups = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&lookups);
    let dispatcher = DispatcherBuilder::from_config(&config)
        .http(
            "/products",
            HttpRoute::new().get(handler_fn(|_: RequestContext| async {
                Json(json!(["anvil", "rocket"]))
            })),
        )
        .http(
            "/products/[sku]",
            HttpRoute::new()
                .get(handler_fn(move |ctx: RequestContext| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Json(json!({ "sku": ctx.param("sku") }))
                    }
                }))
                .config(RouteConfig::new().params(|value: &Value| {
                    match value["sku"].as_str() {
                        Some(sku) if sku.chars().all(|c| c.is_ascii_alphanumeric()) => {
                            Ok(value.clone())
                        }
                        _ => Err(ValidationError::new("must be alphanumeric").at("sku")),
                    }
                })),
        )
        .build();

    let response = dispatcher.handle_http(get("/products")).await;
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://app.example"
    );
    assert_eq!(
        response.headers()["access-control-allow-credentials"],
        "true"
    );
    let (status, body) = json_body(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["anvil", "rocket"]));

    for _ in 0..3 {
        let (status, body) = json_body(dispatcher.handle_http(get("/products/a1")).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "sku": "a1" }));
    }
    assert_eq!(lookups.load(Ordering::SeqCst), 1);

    let bad = dispatcher.handle_http(get("/products/a-1")).await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_synchronized_board_over_websocket() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "routes/boards/[board]/socket.rs");
    let config = load_config(dir.path());

    let layer = SyncLayer::builder(Vec::<String>::new).build();
    let dispatcher = DispatcherBuilder::from_config(&config)
        .websocket(
            "/boards/[board]",
            Board {
                layer: layer.clone(),
            },
        )
        .build();

    let (ann, mut ann_rx) = Connection::channel();
    let (ben, mut ben_rx) = Connection::channel();
    let mut ann = dispatcher
        .handle_websocket("/boards/7", None, http::HeaderMap::new(), ann)
        .await
        .unwrap();
    let mut ben = dispatcher
        .handle_websocket("/boards/7", None, http::HeaderMap::new(), ben)
        .await
        .unwrap();

    let snapshot: Value = ann_rx.recv().await.unwrap().parse_json().unwrap();
    assert_eq!(snapshot, json!({ "type": "snapshot", "data": [] }));
    let _ = ben_rx.recv().await;

    ann.handle(Message::text("buy milk")).await;
    for rx in [&mut ann_rx, &mut ben_rx] {
        let frame: Value = rx.recv().await.unwrap().parse_json().unwrap();
        assert_eq!(frame, json!({ "type": "update", "data": ["buy milk"] }));
    }
    assert_eq!(layer.subscriber_count("/boards/7").await, 2);

    ann.close(None).await;
    ben.close(None).await;
    assert_eq!(layer.stats().await.key_count(), 0);
}
