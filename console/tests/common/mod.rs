//! Shared harness: a console router wired to the real leak agent and the
//! `file-handles attach` helper binary.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use fhd_console::{router, Activator, ConsoleState, DiagnosticsAgent, HelperCommand, LeakAgentLibrary};
use leak_agent::attach::AttachListener;
use tower::ServiceExt;

pub const TOKEN: &str = "test-admin-token";

static LISTENER: OnceLock<AttachListener> = OnceLock::new();

pub fn console() -> Router {
    LISTENER.get_or_init(|| AttachListener::start().expect("attach listener should bind"));

    let agent: Arc<dyn DiagnosticsAgent> = Arc::new(LeakAgentLibrary);
    let helper = HelperCommand::new(env!("CARGO_BIN_EXE_file-handles"), vec!["attach".to_string()]);
    let activator = Activator::new(agent.clone(), helper, Duration::from_secs(30));
    router(ConsoleState::new(agent, activator, Some(TOKEN.to_string())))
}

pub struct Reply {
    pub status: StatusCode,
    pub content_type: String,
    pub body: String,
}

pub async fn send(app: &Router, request: Request<Body>) -> Reply {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    Reply {
        status,
        content_type,
        body: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

pub async fn activate(app: &Router, opts: &str) -> Reply {
    let request = Request::builder()
        .method("POST")
        .uri("/manage/file-handles/activate")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!("opts={}", form_encode(opts))))
        .unwrap();
    send(app, request).await
}

/// Records of the current dump, one `<description> by thread:...` entry each.
pub async fn get_open_descriptors(app: &Router) -> Vec<String> {
    let reply = send(app, get("/manage/file-handles")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(
        reply.content_type.starts_with("text/plain"),
        "expected a dump, got {}",
        reply.content_type
    );
    // The first chunk is the "N descriptors are open" header.
    reply
        .body
        .split("\n#")
        .skip(1)
        .map(|record| {
            record
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start()
                .to_string()
        })
        .collect()
}

pub fn thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string()
}

fn form_encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}
