//! Agent activation through a throwaway helper process
//!
//! The helper owns the attach call, so the host never performs it itself.
//! Its stdout and stderr share one pipe that is drained while we wait for it
//! to exit; reading only after exit could deadlock on a full pipe buffer.

use std::io;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::error::ActivationError;
use crate::residency::DiagnosticsAgent;

/// Outcome of a successful activation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Activated,
    AlreadyActive,
}

/// One activation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    pub pid: u32,
    pub options: Option<String>,
}

impl ActivationRequest {
    /// Blank options are treated as absent; anything else is kept as given.
    pub fn new(pid: u32, options: Option<&str>) -> Self {
        let options = options
            .filter(|o| !o.trim().is_empty())
            .map(String::from);
        Self { pid, options }
    }
}

/// How to launch the helper: `program args... <pid> [options]`
#[derive(Debug, Clone)]
pub struct HelperCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl HelperCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The running executable in helper mode
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, vec!["attach".to_string()]))
    }

    fn argv(&self, request: &ActivationRequest) -> Vec<String> {
        let mut argv = self.args.clone();
        argv.push(request.pid.to_string());
        if let Some(options) = &request.options {
            argv.push(options.clone());
        }
        argv
    }
}

/// Exit status and merged output of a finished helper
#[derive(Debug)]
struct HelperOutput {
    success: bool,
    output: String,
}

pub struct Activator {
    agent: Arc<dyn DiagnosticsAgent>,
    helper: HelperCommand,
    timeout: Duration,
}

impl Activator {
    pub fn new(agent: Arc<dyn DiagnosticsAgent>, helper: HelperCommand, timeout: Duration) -> Self {
        Self {
            agent,
            helper,
            timeout,
        }
    }

    /// Attach the agent to this process unless it is already resident.
    ///
    /// Blocks the caller for the helper's whole lifetime, bounded by the
    /// configured timeout. A failed attach is not retried.
    pub async fn activate(&self, options: Option<&str>) -> Result<Activation, ActivationError> {
        if self.agent.is_resident() {
            info!("File leak detector already active, skipping attach");
            return Ok(Activation::AlreadyActive);
        }

        let request = ActivationRequest::new(std::process::id(), options);
        let result = self.run_helper(&request).await?;

        if !result.success {
            let err = ActivationError::Failed {
                output: result.output,
            };
            warn!("{err}");
            return Err(err);
        }

        info!("File leak detector activated for pid {}", request.pid);
        Ok(Activation::Activated)
    }

    async fn run_helper(&self, request: &ActivationRequest) -> Result<HelperOutput, ActivationError> {
        let (reader, writer) = merged_pipe().map_err(ActivationError::Spawn)?;
        let stderr_writer = writer.try_clone().map_err(ActivationError::Spawn)?;

        let argv = self.helper.argv(request);
        info!(
            "Spawning attach helper: {} {}",
            self.helper.program.display(),
            argv.join(" ")
        );

        let mut command = tokio::process::Command::new(&self.helper.program);
        command
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(stderr_writer))
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(ActivationError::Spawn)?;
        // Our copies of the write end must go, or the read below never sees EOF.
        drop(command);

        let mut pipe = tokio::fs::File::from_std(std::fs::File::from(reader));
        let mut captured = Vec::new();

        let finished = {
            let drain = pipe.read_to_end(&mut captured);
            let wait = child.wait();
            tokio::time::timeout(self.timeout, async { tokio::join!(drain, wait) }).await
        };

        match finished {
            Ok((read, status)) => {
                read.map_err(ActivationError::Io)?;
                let status = status.map_err(ActivationError::Io)?;
                let mut output = String::from_utf8_lossy(&captured).into_owned();
                if status.code().is_none() {
                    output.push_str(&format!("\nattach helper terminated abnormally: {status}"));
                }
                Ok(HelperOutput {
                    success: status.success(),
                    output,
                })
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill hung attach helper: {e}");
                }
                let err = ActivationError::TimedOut {
                    secs: self.timeout.as_secs(),
                    output: String::from_utf8_lossy(&captured).into_owned(),
                };
                warn!("{err}");
                Err(err)
            }
        }
    }
}

/// One pipe serving as both stdout and stderr of the helper
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn merged_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC).map_err(io::Error::from)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn merged_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use std::os::fd::AsRawFd;

    let (reader, writer) = nix::unistd::pipe().map_err(io::Error::from)?;
    for fd in [&reader, &writer] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(io::Error::from)?;
    }
    Ok((reader, writer))
}
