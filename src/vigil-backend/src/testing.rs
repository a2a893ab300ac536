//! In-process fake backend for client tests

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// One multipart alarm as received by the fake
#[derive(Debug, Clone, Default)]
pub struct ReceivedAlarm {
    pub fields: HashMap<String, String>,
    pub file: Option<Vec<u8>>,
    pub file_content_type: Option<String>,
}

/// Shared, scriptable state behind the fake routes
pub struct FakeBackend {
    pub logins: AtomicUsize,
    pub device_calls: AtomicUsize,
    pub channel_calls: AtomicUsize,
    pub login_code: AtomicI64,
    pub reject_tokens: AtomicBool,
    pub alarm_status: AtomicU16,
    issued: AtomicUsize,
    valid_token: Mutex<String>,
    pub devices: Mutex<Value>,
    /// Channel payloads keyed by internal device id; missing ids answer 500
    pub channels: Mutex<HashMap<i64, Value>>,
    pub alarms: Mutex<Vec<ReceivedAlarm>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            logins: AtomicUsize::new(0),
            device_calls: AtomicUsize::new(0),
            channel_calls: AtomicUsize::new(0),
            login_code: AtomicI64::new(0),
            reject_tokens: AtomicBool::new(false),
            alarm_status: AtomicU16::new(200),
            issued: AtomicUsize::new(0),
            valid_token: Mutex::new(String::new()),
            devices: Mutex::new(json!([])),
            channels: Mutex::new(HashMap::new()),
            alarms: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBackend {
    pub fn with_devices(self, devices: Value) -> Self {
        *self.devices.lock().unwrap() = devices;
        self
    }

    pub fn with_channels(self, internal_id: i64, channels: Value) -> Self {
        self.channels.lock().unwrap().insert(internal_id, channels);
        self
    }

    /// Invalidate the issued token as if it had expired server-side
    pub fn expire_token(&self) {
        *self.valid_token.lock().unwrap() = "expired".to_string();
    }

    pub fn alarms(&self) -> Vec<ReceivedAlarm> {
        self.alarms.lock().unwrap().clone()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.reject_tokens.load(Ordering::SeqCst) {
            return false;
        }
        let expected = format!("Bearer {}", self.valid_token.lock().unwrap());
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == expected)
            .unwrap_or(false)
    }
}

pub struct RunningBackend {
    pub base_url: String,
    pub state: Arc<FakeBackend>,
}

pub async fn spawn_backend(fake: FakeBackend) -> RunningBackend {
    let state = Arc::new(fake);
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/devices", get(devices))
        .route("/api/devices/:id/channels", get(channels))
        .route("/api/alarms", post(alarm))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    RunningBackend {
        base_url: format!("http://{}", addr),
        state,
    }
}

async fn login(State(state): State<Arc<FakeBackend>>, Json(_body): Json<Value>) -> Response {
    state.logins.fetch_add(1, Ordering::SeqCst);
    let code = state.login_code.load(Ordering::SeqCst);
    if code != 0 {
        return Json(json!({"code": code, "message": "bad credentials", "data": null}))
            .into_response();
    }

    let n = state.issued.fetch_add(1, Ordering::SeqCst) + 1;
    let token = format!("token-{}", n);
    *state.valid_token.lock().unwrap() = token.clone();
    Json(json!({
        "code": 0,
        "message": "ok",
        "data": {"token": token, "username": "admin", "role": "ADMIN", "expiresAt": "2099-01-01T00:00:00Z"}
    }))
    .into_response()
}

async fn devices(State(state): State<Arc<FakeBackend>>, headers: HeaderMap) -> Response {
    state.device_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(state.devices.lock().unwrap().clone()).into_response()
}

async fn channels(
    State(state): State<Arc<FakeBackend>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    state.channel_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.channels.lock().unwrap().get(&id) {
        Some(payload) => Json(payload.clone()).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn alarm(
    State(state): State<Arc<FakeBackend>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let mut received = ReceivedAlarm::default();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            received.file_content_type = field.content_type().map(|s| s.to_string());
            received.file = Some(field.bytes().await.unwrap().to_vec());
        } else {
            received.fields.insert(name, field.text().await.unwrap());
        }
    }
    state.alarms.lock().unwrap().push(received);

    let status = StatusCode::from_u16(state.alarm_status.load(Ordering::SeqCst)).unwrap();
    status.into_response()
}
