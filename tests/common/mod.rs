#![allow(dead_code)]

//! In-process mock of the Janus HTTP transport with the streaming plugin.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use janus_stream::JanusConfig;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

pub const SECRET: &str = "s3cret";
pub const FIRST_SESSION_ID: u64 = 123;
pub const FIRST_HANDLE_ID: u64 = 456;
pub const SEEDED_MOUNTPOINT: u64 = 789;
pub const OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=Mountpoint 789\r\n";

/// How long a GET is held open before answering `keepalive`.
const POLL_HOLD: Duration = Duration::from_millis(150);

struct Inner {
    next_session: u64,
    next_handle: u64,
    next_mountpoint: u64,
    live_sessions: Vec<u64>,
    mountpoints: Vec<Value>,
    queue: VecDeque<Value>,
    posts: Vec<(String, Value)>,
    sessions_created: usize,
    sessions_destroyed: usize,
    attaches: usize,
    gets: usize,
    get_failures_remaining: usize,
    fail_all_gets: bool,
    create_status: String,
    mount_status: String,
    watch_sdp: Option<String>,
    drop_watch_events: bool,
}

pub struct MockState {
    inner: Mutex<Inner>,
    notify: Notify,
}

pub struct MockJanus {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockJanus {
    pub async fn start() -> Self {
        let state = Arc::new(MockState {
            inner: Mutex::new(Inner {
                next_session: FIRST_SESSION_ID,
                next_handle: FIRST_HANDLE_ID,
                next_mountpoint: 1000,
                live_sessions: Vec::new(),
                mountpoints: vec![json!({
                    "id": SEEDED_MOUNTPOINT,
                    "description": "seeded",
                    "type": "live",
                })],
                queue: VecDeque::new(),
                posts: Vec::new(),
                sessions_created: 0,
                sessions_destroyed: 0,
                attaches: 0,
                gets: 0,
                get_failures_remaining: 0,
                fail_all_gets: false,
                create_status: "success".into(),
                mount_status: "success".into(),
                watch_sdp: Some(OFFER_SDP.into()),
                drop_watch_events: false,
            }),
            notify: Notify::new(),
        });

        let app = Router::new()
            .route("/janus/", post(gateway_post))
            .route("/janus/{session}", get(long_poll).post(session_post))
            .route("/janus/{session}/", post(session_post))
            .route("/janus/{session}/{handle}", post(handle_post))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// Client config for this gateway with a fast poll backoff.
    pub fn config(&self) -> JanusConfig {
        let mut config = JanusConfig::new(self.host(), SECRET);
        config.request_timeout_secs = 5;
        config.poll.backoff_ms = 10;
        config
    }
}

impl MockState {
    pub fn set_create_status(&self, status: &str) {
        self.inner.lock().create_status = status.into();
    }

    /// Status the streaming `create` message answers with.
    pub fn set_mount_status(&self, status: &str) {
        self.inner.lock().mount_status = status.into();
    }

    pub fn fail_next_gets(&self, n: usize) {
        self.inner.lock().get_failures_remaining = n;
    }

    pub fn fail_all_gets(&self, fail: bool) {
        self.inner.lock().fail_all_gets = fail;
    }

    pub fn set_watch_sdp(&self, sdp: Option<&str>) {
        self.inner.lock().watch_sdp = sdp.map(str::to_string);
    }

    pub fn drop_watch_events(&self, drop: bool) {
        self.inner.lock().drop_watch_events = drop;
    }

    /// Queue an arbitrary event for the next long-poll.
    pub fn push_event(&self, event: Value) {
        self.inner.lock().queue.push_back(event);
        self.notify.notify_waiters();
    }

    pub fn sessions_created(&self) -> usize {
        self.inner.lock().sessions_created
    }

    pub fn sessions_destroyed(&self) -> usize {
        self.inner.lock().sessions_destroyed
    }

    pub fn attaches(&self) -> usize {
        self.inner.lock().attaches
    }

    pub fn gets(&self) -> usize {
        self.inner.lock().gets
    }

    pub fn live_sessions(&self) -> Vec<u64> {
        self.inner.lock().live_sessions.clone()
    }

    /// Every POST as `(path after /janus/, body)`.
    pub fn posts(&self) -> Vec<(String, Value)> {
        self.inner.lock().posts.clone()
    }

    /// POST bodies whose `janus` field is `kind`.
    pub fn posts_of(&self, kind: &str) -> Vec<Value> {
        self.posts()
            .into_iter()
            .map(|(_, body)| body)
            .filter(|body| body["janus"] == kind)
            .collect()
    }

    /// Plugin message bodies (`body` of `janus: "message"` posts).
    pub fn messages(&self) -> Vec<Value> {
        self.posts_of("message")
            .into_iter()
            .map(|body| body["body"].clone())
            .collect()
    }
}

fn transaction(body: &Value) -> Value {
    body.get("transaction").cloned().unwrap_or(Value::Null)
}

fn error(body: &Value, code: u64, reason: &str) -> Json<Value> {
    Json(json!({
        "janus": "error",
        "transaction": transaction(body),
        "error": {"code": code, "reason": reason},
    }))
}

fn authorized(body: &Value) -> bool {
    body.get("apisecret").and_then(Value::as_str) == Some(SECRET)
}

async fn gateway_post(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Json<Value> {
    let mut inner = state.inner.lock();
    inner.posts.push((String::new(), body.clone()));
    if !authorized(&body) {
        return error(&body, 403, "Unauthorized request (wrong or missing secret/token)");
    }
    if body["janus"] != "create" {
        return error(&body, 453, "Unhandled request at this path");
    }
    if inner.create_status != "success" {
        return Json(json!({
            "janus": inner.create_status.clone(),
            "transaction": transaction(&body),
            "error": {"code": 490, "reason": "session creation refused"},
        }));
    }

    let id = inner.next_session;
    inner.next_session += 1;
    inner.sessions_created += 1;
    inner.live_sessions.push(id);
    Json(json!({"janus": "success", "transaction": transaction(&body), "data": {"id": id}}))
}

async fn session_post(
    State(state): State<Arc<MockState>>,
    Path(session): Path<u64>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut inner = state.inner.lock();
    inner.posts.push((format!("{session}/"), body.clone()));
    if !authorized(&body) {
        return error(&body, 403, "Unauthorized request (wrong or missing secret/token)");
    }
    if !inner.live_sessions.contains(&session) {
        return error(&body, 458, &format!("No such session {session}"));
    }

    match body["janus"].as_str() {
        Some("attach") => {
            if body["plugin"] != "janus.plugin.streaming" {
                return error(&body, 460, "No such plugin");
            }
            let id = inner.next_handle;
            inner.next_handle += 1;
            inner.attaches += 1;
            Json(json!({
                "janus": "success",
                "session_id": session,
                "transaction": transaction(&body),
                "data": {"id": id},
            }))
        }
        Some("destroy") => {
            inner.live_sessions.retain(|s| *s != session);
            inner.sessions_destroyed += 1;
            Json(json!({"janus": "success", "session_id": session, "transaction": transaction(&body)}))
        }
        _ => error(&body, 453, "Unhandled request at this path"),
    }
}

async fn handle_post(
    State(state): State<Arc<MockState>>,
    Path((session, handle)): Path<(u64, u64)>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let response = {
        let mut inner = state.inner.lock();
        inner.posts.push((format!("{session}/{handle}"), body.clone()));
        if !authorized(&body) {
            return error(&body, 403, "Unauthorized request (wrong or missing secret/token)");
        }
        if !inner.live_sessions.contains(&session) {
            return error(&body, 458, &format!("No such session {session}"));
        }
        match body["janus"].as_str() {
            Some("message") => plugin_message(&mut inner, session, handle, &body),
            Some("trickle") | Some("hangup") => json!({
                "janus": "ack",
                "session_id": session,
                "transaction": transaction(&body),
            }),
            Some("detach") => json!({
                "janus": "success",
                "session_id": session,
                "transaction": transaction(&body),
            }),
            _ => return error(&body, 453, "Unhandled request at this path"),
        }
    };
    state.notify.notify_waiters();
    Json(response)
}

fn synchronous(session: u64, handle: u64, body: &Value, data: Value) -> Value {
    json!({
        "janus": "success",
        "session_id": session,
        "sender": handle,
        "transaction": transaction(body),
        "plugindata": {"plugin": "janus.plugin.streaming", "data": data},
    })
}

fn event(session: u64, handle: u64, body: &Value, data: Value) -> Value {
    json!({
        "janus": "event",
        "session_id": session,
        "sender": handle,
        "transaction": transaction(body),
        "plugindata": {"plugin": "janus.plugin.streaming", "data": data},
    })
}

fn ack(session: u64, body: &Value) -> Value {
    json!({"janus": "ack", "session_id": session, "transaction": transaction(body)})
}

fn plugin_message(inner: &mut Inner, session: u64, handle: u64, body: &Value) -> Value {
    let request = &body["body"];
    let mountpoint = request.get("id").and_then(Value::as_u64);
    let known = |inner: &Inner, id: Option<u64>| {
        id.is_some_and(|id| inner.mountpoints.iter().any(|m| m["id"] == id))
    };

    match request["request"].as_str() {
        Some("create") if inner.mount_status != "success" => json!({
            "janus": inner.mount_status.clone(),
            "session_id": session,
            "transaction": transaction(body),
            "error": {"code": 490, "reason": "mountpoint creation refused"},
        }),
        Some("create") => {
            let id = mountpoint.unwrap_or_else(|| {
                let id = inner.next_mountpoint;
                inner.next_mountpoint += 1;
                id
            });
            let description = request["metadata"].as_str().unwrap_or("").to_string();
            inner.mountpoints.push(json!({
                "id": id,
                "description": description,
                "type": request["type"].clone(),
            }));
            synchronous(
                session,
                handle,
                body,
                json!({
                    "streaming": "created",
                    "created": description,
                    "permanent": false,
                    "stream": {"id": id, "type": "live", "description": description},
                }),
            )
        }
        Some("list") => synchronous(
            session,
            handle,
            body,
            json!({"streaming": "list", "list": inner.mountpoints.clone()}),
        ),
        Some("destroy") => {
            if !known(&*inner, mountpoint) {
                return synchronous(
                    session,
                    handle,
                    body,
                    json!({"error_code": 455, "error": format!("No such mountpoint/stream {}", request["id"])}),
                );
            }
            inner.mountpoints.retain(|m| m["id"] != request["id"]);
            synchronous(
                session,
                handle,
                body,
                json!({"streaming": "destroyed", "destroyed": request["id"].clone()}),
            )
        }
        Some("watch") => {
            if inner.drop_watch_events {
                return ack(session, body);
            }
            let exists = known(&*inner, mountpoint);
            let mut pushed = if exists {
                event(
                    session,
                    handle,
                    body,
                    json!({"streaming": "event", "result": {"status": "preparing"}}),
                )
            } else {
                event(
                    session,
                    handle,
                    body,
                    json!({"error_code": 455, "error": format!("No such mountpoint/stream {}", request["id"])}),
                )
            };
            if exists {
                if let Some(sdp) = &inner.watch_sdp {
                    pushed["jsep"] = json!({"type": "offer", "sdp": sdp});
                }
            }
            inner.queue.push_back(pushed);
            ack(session, body)
        }
        Some("start") => {
            inner.queue.push_back(event(
                session,
                handle,
                body,
                json!({"streaming": "event", "result": {"status": "starting"}}),
            ));
            ack(session, body)
        }
        Some("stop") => ack(session, body),
        _ => synchronous(
            session,
            handle,
            body,
            json!({"error_code": 451, "error": "Invalid request"}),
        ),
    }
}

async fn long_poll(
    State(state): State<Arc<MockState>>,
    Path(session): Path<u64>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    {
        let mut inner = state.inner.lock();
        inner.gets += 1;
        if inner.fail_all_gets {
            return (StatusCode::INTERNAL_SERVER_ERROR, "gateway exploded").into_response();
        }
        if inner.get_failures_remaining > 0 {
            inner.get_failures_remaining -= 1;
            return (StatusCode::INTERNAL_SERVER_ERROR, "gateway exploded").into_response();
        }
        if query.get("apisecret").map(String::as_str) != Some(SECRET) {
            return Json(json!({
                "janus": "error",
                "error": {"code": 403, "reason": "Unauthorized request (wrong or missing secret/token)"},
            }))
            .into_response();
        }
        if !inner.live_sessions.contains(&session) {
            return Json(json!({
                "janus": "error",
                "session_id": session,
                "error": {"code": 458, "reason": format!("No such session {session}")},
            }))
            .into_response();
        }
    }

    let deadline = tokio::time::Instant::now() + POLL_HOLD;
    loop {
        let notified = state.notify.notified();
        let next = state.inner.lock().queue.pop_front();
        if let Some(event) = next {
            return Json(event).into_response();
        }
        if tokio::time::timeout_at(deadline, notified).await.is_err() {
            return Json(json!({"janus": "keepalive"})).into_response();
        }
    }
}

/// Poll `check` every 10ms until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
