//! Socket-based attach mechanism
//!
//! The host process listens on `$TMPDIR/.leak_agent_<pid>`. A helper process
//! connects, sends one JSON request line and reads one JSON response line.
//! Connections are served one at a time on a dedicated thread, so concurrent
//! attach attempts are serialized.

use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::AttachError;
use crate::options::AgentOptions;

const IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request {
    Load { options: Option<String> },
}

#[derive(Debug, Serialize, Deserialize)]
struct Response {
    ok: bool,
    message: String,
}

/// Where the attach listener of process `pid` lives
pub fn socket_path(pid: u32) -> PathBuf {
    std::env::temp_dir().join(format!(".leak_agent_{pid}"))
}

/// Host side of the attach protocol
pub struct AttachListener {
    path: PathBuf,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AttachListener {
    /// Listen at the well-known path for the current process
    pub fn start() -> io::Result<Self> {
        Self::bind(socket_path(std::process::id()))
    }

    pub fn bind(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed stale attach socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(&path)?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();

        let handle = std::thread::Builder::new()
            .name("leak-agent-attach".to_string())
            .spawn(move || {
                for stream in listener.incoming() {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    match stream {
                        Ok(stream) => {
                            if let Err(e) = serve(stream) {
                                warn!("Attach request failed: {e}");
                            }
                        }
                        Err(e) => warn!("Attach listener accept failed: {e}"),
                    }
                }
            })?;

        info!("Attach listener ready at {}", path.display());
        Ok(Self {
            path,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AttachListener {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        // Wake the accept loop so it observes the flag.
        let _ = UnixStream::connect(&self.path);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

fn serve(stream: UnixStream) -> io::Result<()> {
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;

    let mut line = String::new();
    BufReader::new(&stream).read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }

    let response = match serde_json::from_str::<Request>(&line) {
        Ok(Request::Load { options }) => load(options.as_deref()),
        Err(e) => Response {
            ok: false,
            message: format!("Malformed attach request: {e}"),
        },
    };

    let mut stream = stream;
    let mut payload = serde_json::to_string(&response)?;
    payload.push('\n');
    stream.write_all(payload.as_bytes())?;
    stream.flush()
}

fn load(options: Option<&str>) -> Response {
    let parsed = AgentOptions::parse(options.unwrap_or_default());
    if parsed.is_ok() && crate::installed().is_some() {
        return Response {
            ok: true,
            message: "Leak agent is already installed".to_string(),
        };
    }

    match parsed.and_then(crate::install) {
        Ok(_) => {
            info!("Leak agent installed (options: {:?})", options.unwrap_or_default());
            Response {
                ok: true,
                message: "Leak agent installed".to_string(),
            }
        }
        Err(e) => {
            warn!("Leak agent refused to start: {e}");
            Response {
                ok: false,
                message: e.to_string(),
            }
        }
    }
}

/// Attach the agent to process `pid`, returning the listener's message
pub fn attach(pid: u32, options: Option<&str>) -> Result<String, AttachError> {
    attach_at(&socket_path(pid), pid, options)
}

pub fn attach_at(path: &Path, pid: u32, options: Option<&str>) -> Result<String, AttachError> {
    let mut stream = UnixStream::connect(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => AttachError::NoListener {
            pid,
            path: path.to_path_buf(),
        },
        _ => AttachError::Io(e),
    })?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;

    let request = Request::Load {
        options: options.map(String::from),
    };
    let mut payload = serde_json::to_string(&request)?;
    payload.push('\n');
    stream.write_all(payload.as_bytes())?;
    stream.flush()?;

    let mut line = String::new();
    BufReader::new(&stream).read_line(&mut line)?;
    let response: Response = serde_json::from_str(&line)?;

    if response.ok {
        Ok(response.message)
    } else {
        Err(AttachError::Rejected(response.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_names_pid() {
        let path = socket_path(4242);
        assert!(path.ends_with(".leak_agent_4242"));
    }

    #[test]
    fn test_no_listener() {
        let dir = tempfile::tempdir().unwrap();
        let err = attach_at(&dir.path().join("missing"), 1, None).unwrap_err();
        assert!(matches!(err, AttachError::NoListener { pid: 1, .. }));
    }

    #[test]
    fn test_attach_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attach.sock");
        let listener = AttachListener::bind(&path).unwrap();

        let err = attach_at(listener.path(), 7, Some("threshold=lots")).unwrap_err();
        match err {
            AttachError::Rejected(message) => {
                assert!(message.contains("threshold"));
                assert!(message.contains("Usage:"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let message = attach_at(listener.path(), 7, None).unwrap();
        assert!(message.contains("installed"));
        assert!(crate::installed().is_some());

        // Once resident, further attaches succeed without reinstalling.
        let again = attach_at(listener.path(), 7, Some("maxframes=4")).unwrap();
        assert!(again.contains("already installed"));
        assert!(attach_at(listener.path(), 7, Some("bogus")).is_err());
    }

    #[test]
    fn test_malformed_request_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let listener = AttachListener::bind(dir.path().join("attach.sock")).unwrap();

        let mut stream = UnixStream::connect(listener.path()).unwrap();
        stream.write_all(b"{\"op\":\"unload\"}\n").unwrap();
        let mut line = String::new();
        BufReader::new(&stream).read_line(&mut line).unwrap();
        let response: Response = serde_json::from_str(&line).unwrap();
        assert!(!response.ok);
        assert!(response.message.contains("Malformed"));
    }

    #[test]
    fn test_drop_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attach.sock");
        let listener = AttachListener::bind(&path).unwrap();
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());
    }
}
