//! File handles console: activates the leak agent and serves its dump
//!
//! Typical flow for an admin: `GET /manage/file-handles` shows the "not
//! running" page, `POST /manage/file-handles/activate` attaches the agent via
//! a helper process, and the next `GET` returns the live dump.

pub mod activator;
pub mod config;
pub mod error;
pub mod helper;
pub mod management;
pub mod report;
pub mod residency;

pub use activator::{Activation, ActivationRequest, Activator, HelperCommand};
pub use config::{load_config, ConsoleConfig};
pub use error::{ActivationError, ConsoleError};
pub use management::{router, start_management_server, ConsoleState};
pub use report::{report, Report};
pub use residency::{DiagnosticsAgent, LeakAgentLibrary};
