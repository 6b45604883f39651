//! leak-agent: tracks open handles inside the current process
//!
//! The agent is process-wide and set once: after [`install`] succeeds it stays
//! resident until the process exits. Handles opened through [`tracked`] are
//! recorded with their opening thread, time and backtrace; [`Agent::dump`]
//! writes them out as text.
//!
//! Installation normally happens from outside the process: the host runs an
//! [`attach::AttachListener`] and a helper process calls [`attach::attach`].

use std::sync::OnceLock;

pub mod agent;
pub mod attach;
pub mod error;
pub mod options;
pub mod tracked;

pub use agent::{Agent, Record};
pub use error::{AgentError, AttachError};
pub use options::AgentOptions;

static AGENT: OnceLock<Agent> = OnceLock::new();

/// The resident agent, if one has been installed
pub fn installed() -> Option<&'static Agent> {
    AGENT.get()
}

/// Install the agent. Installing again returns the resident agent unchanged.
pub fn install(options: AgentOptions) -> Result<&'static Agent, AgentError> {
    if let Some(agent) = AGENT.get() {
        return Ok(agent);
    }
    let agent = Agent::new(options)?;
    Ok(AGENT.get_or_init(|| agent))
}
