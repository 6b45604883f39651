//! Residency lookup for the diagnostics agent
//!
//! The console never holds the agent directly. It goes through
//! [`DiagnosticsAgent`], whose production implementation resolves the agent
//! from the process-wide registry in `leak_agent`.

use std::io::{self, Write};

/// Capability surface the console needs from a diagnostics agent
pub trait DiagnosticsAgent: Send + Sync {
    fn is_resident(&self) -> bool;

    /// Write the agent's live report into `sink`. Writes nothing when the
    /// agent is not resident.
    fn dump(&self, sink: &mut dyn Write) -> io::Result<()>;
}

/// Adapter over the process-global `leak_agent` registry
#[derive(Debug, Default, Clone, Copy)]
pub struct LeakAgentLibrary;

impl DiagnosticsAgent for LeakAgentLibrary {
    fn is_resident(&self) -> bool {
        leak_agent::installed().is_some()
    }

    fn dump(&self, sink: &mut dyn Write) -> io::Result<()> {
        match leak_agent::installed() {
            Some(agent) => agent.dump(sink),
            None => Ok(()),
        }
    }
}
