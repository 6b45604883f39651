//! Helper mode: attach the leak agent to another process and exit
//!
//! Everything printed here ends up in the activating process's error message,
//! since this process's own output goes nowhere else.

use std::process::ExitCode;

use leak_agent::attach;
use leak_agent::AttachError;

pub fn run(pid: u32, options: Option<&str>) -> ExitCode {
    println!("Attaching leak agent to process {pid}");

    match attach::attach(pid, options) {
        Ok(message) => {
            println!("{message}");
            ExitCode::SUCCESS
        }
        Err(AttachError::Rejected(message)) => {
            eprintln!("Agent failed to start!");
            eprintln!("{message}");
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("Failed to attach to process {pid}: {e}");
            ExitCode::from(2)
        }
    }
}
