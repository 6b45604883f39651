//! Report proxy: the agent's dump, or a marker when it is not running

use std::io;

use crate::residency::DiagnosticsAgent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    NotActivated,
    /// The agent's dump, byte for byte
    Dump(Vec<u8>),
}

/// Fetch the live dump. Only a failing sink is an error; an absent agent is
/// reported as [`Report::NotActivated`].
pub fn report(agent: &dyn DiagnosticsAgent) -> io::Result<Report> {
    if !agent.is_resident() {
        return Ok(Report::NotActivated);
    }

    let mut buf = Vec::new();
    agent.dump(&mut buf)?;
    Ok(Report::Dump(buf))
}
