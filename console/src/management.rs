//! Management console: HTTP routes for the open file handle view
//!
//! `GET  /manage/file-handles`           live dump, or the "not running" page
//! `POST /manage/file-handles/activate`  attach the leak agent (`opts` field)
//! `GET  /manage`                        management links
//!
//! Everything under `/manage` requires the admin bearer token.

use std::io;
use std::sync::Arc;

use axum::{
    extract::{Form, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::activator::{Activation, Activator, HelperCommand};
use crate::config::ConsoleConfig;
use crate::error::ConsoleError;
use crate::report::{report, Report};
use crate::residency::{DiagnosticsAgent, LeakAgentLibrary};

/// Navigation entry shown on the management index
#[derive(Debug, Clone, Serialize)]
pub struct ManagementLink {
    pub icon: &'static str,
    pub display_name: &'static str,
    pub url_name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
}

pub const FILE_HANDLES_LINK: ManagementLink = ManagementLink {
    icon: "help.png",
    display_name: "Open File Handles",
    url_name: "file-handles",
    description: "Monitor the current open file handles on the server process",
    category: "troubleshooting",
};

/// Shared state for the management routes
#[derive(Clone)]
pub struct ConsoleState {
    agent: Arc<dyn DiagnosticsAgent>,
    activator: Arc<Activator>,
    admin_token: Option<Arc<str>>,
}

impl ConsoleState {
    pub fn new(
        agent: Arc<dyn DiagnosticsAgent>,
        activator: Activator,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            agent,
            activator: Arc::new(activator),
            admin_token: admin_token.map(Arc::from),
        }
    }

    /// Production wiring: the `leak_agent` registry plus the configured helper
    pub fn from_config(config: &ConsoleConfig) -> io::Result<Self> {
        let agent: Arc<dyn DiagnosticsAgent> = Arc::new(LeakAgentLibrary);
        let helper = match &config.activation.helper_program {
            Some(program) => HelperCommand::new(program, config.activation.helper_args.clone()),
            None => HelperCommand::current_exe()?,
        };
        let activator = Activator::new(agent.clone(), helper, config.activation.timeout());
        Ok(Self::new(agent, activator, config.security.admin_token.clone()))
    }
}

pub fn router(state: ConsoleState) -> Router {
    let manage = Router::new()
        .route("/manage", get(list_links))
        .route("/manage/file-handles", get(file_handles))
        .route("/manage/file-handles/activate", post(activate))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/api/health", get(health))
        .merge(manage)
        .with_state(state)
}

/// Serve the management routes on `addr` until the listener fails
pub async fn start_management_server(addr: &str, state: ConsoleState) -> anyhow::Result<()> {
    if state.admin_token.is_none() {
        warn!("No admin token configured; management routes will reject every request");
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Management console listening on http://{addr}");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

// --- Admin check ---

async fn require_admin(
    State(state): State<ConsoleState>,
    request: Request,
    next: Next,
) -> Result<Response, ConsoleError> {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let authorized = match (state.admin_token.as_deref(), presented) {
        (Some(expected), Some(token)) => token_matches(expected, token),
        _ => false,
    };

    if !authorized {
        warn!("Rejected unauthorized request to {}", request.uri().path());
        return Err(ConsoleError::NotAuthorized);
    }
    Ok(next.run(request).await)
}

fn token_matches(expected: &str, presented: &str) -> bool {
    let (a, b) = (expected.as_bytes(), presented.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// --- Handlers ---

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn list_links() -> Json<Vec<ManagementLink>> {
    Json(vec![FILE_HANDLES_LINK])
}

/// Dump the currently open handles
async fn file_handles(State(state): State<ConsoleState>) -> Result<Response, ConsoleError> {
    match report(state.agent.as_ref()).map_err(ConsoleError::Report)? {
        Report::NotActivated => Ok(Html(NOT_RUNNING_HTML).into_response()),
        Report::Dump(dump) => Ok((
            [(header::CONTENT_TYPE, "text/plain;charset=UTF-8")],
            dump,
        )
            .into_response()),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ActivateParams {
    #[serde(default)]
    opts: Option<String>,
}

/// Activate the file leak detector
async fn activate(
    State(state): State<ConsoleState>,
    Query(query): Query<ActivateParams>,
    form: Option<Form<ActivateParams>>,
) -> Result<&'static str, ConsoleError> {
    let opts = form.and_then(|Form(p)| p.opts).or(query.opts);
    info!("Activation requested (opts: {:?})", opts.as_deref().unwrap_or_default());

    match state.activator.activate(opts.as_deref()).await? {
        Activation::Activated => Ok("Successfully activated file leak detector"),
        Activation::AlreadyActive => Ok("File leak detector is already activated"),
    }
}

const NOT_RUNNING_HTML: &str = r##"<!DOCTYPE html>
<html>
<head>
    <title>Open File Handles</title>
    <meta charset="utf-8">
    <style>
        body { font-family: 'SF Mono', 'Fira Code', monospace; background: #0a0e1a; color: #e0e0e0; padding: 20px; }
        h1 { color: #00d4ff; }
        .card { background: #111827; border: 1px solid #1e3a5f; border-radius: 8px; padding: 16px; max-width: 720px; }
        input { background: #111827; color: #e0e0e0; border: 1px solid #1e3a5f; padding: 8px; width: 100%; font-family: inherit; }
        button { background: #1e3a5f; color: #e0e0e0; border: 1px solid #00d4ff; padding: 8px 20px; margin-top: 10px; cursor: pointer; }
    </style>
</head>
<body>
    <h1>Open File Handles</h1>
    <div class="card" id="not-running">
        <p>The file leak detector is not running in this process.</p>
        <p>Activating it attaches the leak agent; handles opened from then on are
        recorded together with the thread and stack that opened them.</p>
        <form method="post" action="file-handles/activate">
            <label for="opts">Agent options (optional, e.g. <code>threshold=200,maxframes=16</code>)</label>
            <input type="text" id="opts" name="opts">
            <button type="submit">Activate</button>
        </form>
    </div>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches() {
        assert!(token_matches("abc", "abc"));
        assert!(!token_matches("abc", "abd"));
        assert!(!token_matches("abc", "abcd"));
        assert!(!token_matches("abc", ""));
    }

    #[test]
    fn test_link_metadata() {
        assert_eq!(FILE_HANDLES_LINK.url_name, "file-handles");
        assert_eq!(FILE_HANDLES_LINK.display_name, "Open File Handles");
        assert_eq!(FILE_HANDLES_LINK.category, "troubleshooting");
    }

    #[test]
    fn test_not_running_page_posts_to_activate() {
        assert!(NOT_RUNNING_HTML.contains("action=\"file-handles/activate\""));
        assert!(NOT_RUNNING_HTML.contains("name=\"opts\""));
    }
}
