//! In-process stand-in for the processing service, plus small async helpers.

use crate::model::{ChannelEvent, CorrelationMode, RunConfig};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Multipart, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

pub(crate) fn config_for(base_url: &str) -> RunConfig {
    RunConfig {
        base_url: base_url.to_string(),
        upload_path: "/upload/".into(),
        ws_path: "/ws".into(),
        results_path: "/processed_videos/".into(),
        connect_timeout: Duration::from_secs(2),
        upload_timeout: Duration::from_secs(10),
        reconnect_delay: None,
        correlation: CorrelationMode::Lenient,
        user_agent: "vproc-test".into(),
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ReceivedUpload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub upload_id: Option<String>,
}

#[derive(Debug, Clone)]
enum Push {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

#[derive(Clone)]
struct CollabState {
    pushes: broadcast::Sender<Push>,
    uploads: Arc<Mutex<Vec<ReceivedUpload>>>,
    upload_hits: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
    reject_with: Arc<Mutex<Option<StatusCode>>>,
    ack_filename: Arc<Mutex<Option<String>>>,
    upload_delay: Arc<Mutex<Duration>>,
}

/// Fake processing service: `POST /upload/` records multipart uploads and
/// `/ws` relays whatever the test pushes to every connected client.
pub(crate) struct FakeCollaborator {
    pub base_url: String,
    state: CollabState,
}

impl FakeCollaborator {
    pub async fn spawn() -> Self {
        std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake collaborator");
        let addr = listener.local_addr().expect("local addr");
        let (pushes, _) = broadcast::channel(256);
        let state = CollabState {
            pushes,
            uploads: Arc::new(Mutex::new(Vec::new())),
            upload_hits: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
            total: Arc::new(AtomicUsize::new(0)),
            reject_with: Arc::new(Mutex::new(None)),
            ack_filename: Arc::new(Mutex::new(None)),
            upload_delay: Arc::new(Mutex::new(Duration::ZERO)),
        };
        let app = Router::new()
            .route("/upload/", post(handle_upload))
            .route("/ws", get(handle_ws))
            .with_state(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn push(&self, text: impl Into<String>) {
        let _ = self.state.pushes.send(Push::Text(text.into()));
    }

    pub fn push_json(&self, value: serde_json::Value) {
        self.push(value.to_string());
    }

    pub fn push_binary(&self, data: Vec<u8>) {
        let _ = self.state.pushes.send(Push::Binary(data));
    }

    /// Drop every open socket without a closing handshake.
    pub fn close_connections(&self) {
        let _ = self.state.pushes.send(Push::Close);
    }

    pub fn live_connections(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub fn total_connections(&self) -> usize {
        self.state.total.load(Ordering::SeqCst)
    }

    pub fn upload_hits(&self) -> usize {
        self.state.upload_hits.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<ReceivedUpload> {
        self.state.uploads.lock().unwrap().clone()
    }

    pub fn reject_uploads(&self, status: StatusCode) {
        *self.state.reject_with.lock().unwrap() = Some(status);
    }

    pub fn ack_as(&self, filename: &str) {
        *self.state.ack_filename.lock().unwrap() = Some(filename.to_string());
    }

    pub fn delay_uploads(&self, delay: Duration) {
        *self.state.upload_delay.lock().unwrap() = delay;
    }
}

async fn handle_upload(
    State(state): State<CollabState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    state.upload_hits.fetch_add(1, Ordering::SeqCst);
    let mut received = ReceivedUpload {
        file_name: None,
        content_type: None,
        bytes: Vec::new(),
        upload_id: None,
    };
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        match field.name() {
            Some("file") => {
                received.file_name = field.file_name().map(|s| s.to_string());
                received.content_type = field.content_type().map(|s| s.to_string());
                received.bytes = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
                    .to_vec();
            }
            Some("upload_id") => {
                received.upload_id = field.text().await.ok();
            }
            _ => {}
        }
    }

    let delay = *state.upload_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let reject_with = *state.reject_with.lock().unwrap();
    if let Some(status) = reject_with {
        return Err((status, "processing service unavailable".into()));
    }

    let filename = state
        .ack_filename
        .lock()
        .unwrap()
        .clone()
        .or_else(|| received.file_name.clone())
        .unwrap_or_default();
    state.uploads.lock().unwrap().push(received);
    Ok(Json(serde_json::json!({
        "message": "Video uploaded successfully!",
        "filename": filename,
    })))
}

async fn handle_ws(ws: WebSocketUpgrade, State(state): State<CollabState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay_pushes(state, socket))
}

async fn relay_pushes(state: CollabState, socket: WebSocket) {
    let mut pushes = state.pushes.subscribe();
    state.total.fetch_add(1, Ordering::SeqCst);
    state.live.fetch_add(1, Ordering::SeqCst);

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            push = pushes.recv() => {
                let msg = match push {
                    Ok(Push::Text(text)) => Message::Text(text),
                    Ok(Push::Binary(data)) => Message::Binary(data),
                    Ok(Push::Close) | Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                };
                if sender.send(msg).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.live.fetch_sub(1, Ordering::SeqCst);
}

/// Write `contents` to a fresh temp dir as `name`. Keep the dir alive while the file is used.
pub(crate) fn temp_video(name: &str, contents: &[u8]) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("write temp video");
    (dir, path)
}

/// Poll `check` until it holds, failing the test after five seconds.
pub(crate) async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub(crate) async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for channel event")
        .expect("channel event stream ended")
}
