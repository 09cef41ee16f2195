//! End-to-end tests: a real listener, a real WebSocket client, the memory backend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use mapscout::automation::memory::{sample_catalogue, MemoryLauncher};
use mapscout::{ConnectionRegistry, ScraperConfig};
use mapscout_server::AppState;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
}

fn fast_config() -> ScraperConfig {
    ScraperConfig {
        probe_timeout: Duration::from_millis(30),
        poll_interval: Duration::from_millis(2),
        feed_timeout: Duration::from_millis(30),
        scroll_settle: Duration::ZERO,
        pacing_min: Duration::ZERO,
        pacing_max: Duration::ZERO,
        replace_grace: Duration::ZERO,
        ..ScraperConfig::default()
    }
}

async fn start_server(launcher: &MemoryLauncher) -> TestServer {
    start_server_with_static(launcher, None).await
}

async fn start_server_with_static(
    launcher: &MemoryLauncher,
    static_dir: Option<std::path::PathBuf>,
) -> TestServer {
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::new(launcher.clone()),
        fast_config(),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let state = AppState {
        registry: registry.clone(),
    };
    let task = tokio::spawn(async move {
        mapscout_server::run(listener, state, static_dir.as_deref(), async {
            let _ = rx.await;
        })
        .await
    });
    TestServer {
        addr,
        registry,
        shutdown: Some(tx),
        task,
    }
}

async fn connect(server: &TestServer) -> Client {
    let (client, _) = connect_async(format!("ws://{}/ws", server.addr))
        .await
        .expect("WebSocket handshake failed");
    client
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string())).await.unwrap();
}

/// Next JSON frame from the server.
async fn next_frame(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(10), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("server sent invalid JSON");
        }
    }
}

async fn frames_until_stopped(client: &mut Client) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let frame = next_frame(client).await;
        let stopped = frame == json!({"type": "status", "payload": "STOPPED"});
        frames.push(frame);
        if stopped {
            return frames;
        }
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_start_streams_rows_then_stops() {
    let launcher = MemoryLauncher::new(sample_catalogue(6)).page_size(4);
    let server = start_server(&launcher).await;
    let mut client = connect(&server).await;

    send_json(
        &mut client,
        json!({"action": "start", "keyword": "coffee shops", "headless": true, "ignoreUrls": []}),
    )
    .await;
    let frames = frames_until_stopped(&mut client).await;

    assert_eq!(frames[0], json!({"type": "status", "payload": "RUNNING"}));
    assert_eq!(frames[1], json!({"type": "log", "payload": "> Starting 'coffee shops'..."}));

    let rows: Vec<&Value> = frames.iter().filter(|f| f["type"] == "row").collect();
    assert_eq!(rows.len(), 6);
    for row in rows {
        let payload = row["payload"].as_object().unwrap();
        assert_eq!(payload.len(), 6);
        assert!(payload.values().all(|v| v.as_str().is_some_and(|s| !s.is_empty())));
    }

    let image = frames.iter().find(|f| f["type"] == "image").unwrap();
    assert_eq!(image["payload"], "iVBORw0KGgo=");

    assert_eq!(
        next_frame(&mut client).await,
        json!({"type": "log", "payload": "Scraper stopped."})
    );
}

#[tokio::test]
async fn test_invalid_frames_are_ignored() {
    let launcher = MemoryLauncher::new(sample_catalogue(1));
    let server = start_server(&launcher).await;
    let mut client = connect(&server).await;

    client.send(Message::Text("not json".into())).await.unwrap();
    send_json(&mut client, json!({"action": "pause"})).await;
    send_json(&mut client, json!({"action": "stop"})).await;

    assert_eq!(
        next_frame(&mut client).await,
        json!({"type": "log", "payload": "> Stop requested."})
    );
    assert_eq!(
        next_frame(&mut client).await,
        json!({"type": "status", "payload": "STOPPED"})
    );
    assert_eq!(launcher.stats().launches(), 0);
}

#[tokio::test]
async fn test_disconnect_stops_session() {
    let launcher = MemoryLauncher::new(sample_catalogue(50)).click_delay(Duration::from_millis(20));
    let server = start_server(&launcher).await;
    let mut client = connect(&server).await;

    send_json(&mut client, json!({"action": "start", "keyword": "tea", "headless": true})).await;
    loop {
        if next_frame(&mut client).await["type"] == "row" {
            break;
        }
    }
    drop(client);

    let registry = server.registry.clone();
    eventually(|| {
        let registry = registry.clone();
        async move { registry.connection_count().await == 0 }
    })
    .await;
    assert_eq!(launcher.stats().launches(), 1);
    assert_eq!(launcher.stats().releases(), 1);
}

async fn http_get(addr: SocketAddr, path: &str) -> (String, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    (head.to_string(), body.to_string())
}

#[tokio::test]
async fn test_static_frontend_served() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>mapscout</h1>").unwrap();
    std::fs::write(dir.path().join("app.js"), "console.log('ok');").unwrap();

    let launcher = MemoryLauncher::new(Vec::new());
    let server = start_server_with_static(&launcher, Some(dir.path().to_path_buf())).await;

    let (head, body) = http_get(server.addr, "/").await;
    assert!(head.starts_with("HTTP/1.1 200"));
    assert_eq!(body, "<h1>mapscout</h1>");

    let (_, body) = http_get(server.addr, "/app.js").await;
    assert_eq!(body, "console.log('ok');");

    // Client-side routes fall back to the index page.
    let (head, body) = http_get(server.addr, "/results/42").await;
    assert!(head.starts_with("HTTP/1.1 200"));
    assert_eq!(body, "<h1>mapscout</h1>");

    let (_, body) = http_get(server.addr, "/health").await;
    assert!(body.contains("\"status\":\"ok\""));
}

#[tokio::test]
async fn test_health_reports_counts() {
    let launcher = MemoryLauncher::new(sample_catalogue(50)).click_delay(Duration::from_millis(20));
    let server = start_server(&launcher).await;
    let mut client = connect(&server).await;
    send_json(&mut client, json!({"action": "start", "keyword": "tea", "headless": true})).await;
    assert_eq!(next_frame(&mut client).await["payload"], "RUNNING");

    let (head, body) = http_get(server.addr, "/health").await;
    assert!(head.starts_with("HTTP/1.1 200"));
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
    assert_eq!(health["sessions"], 1);
}

#[tokio::test]
async fn test_shutdown_stops_running_sessions() {
    let launcher = MemoryLauncher::new(sample_catalogue(50)).click_delay(Duration::from_millis(20));
    let mut server = start_server(&launcher).await;
    let mut client = connect(&server).await;

    send_json(&mut client, json!({"action": "start", "keyword": "late", "headless": true})).await;
    loop {
        if next_frame(&mut client).await["type"] == "row" {
            break;
        }
    }

    if let Some(tx) = server.shutdown.take() {
        let _ = tx.send(());
    }
    tokio::time::timeout(Duration::from_secs(10), server.task)
        .await
        .expect("server did not shut down")
        .unwrap()
        .unwrap();

    assert_eq!(server.registry.connection_count().await, 0);
    assert_eq!(launcher.stats().releases(), launcher.stats().launches());
}
