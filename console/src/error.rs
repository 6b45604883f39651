//! Console error types and their HTTP rendering

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::io;
use thiserror::Error;

/// Why an activation attempt failed
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error(
        "Failed to activate file leak detector. Perhaps the parameters were incorrect. \
         Look for 'Agent failed to start!' in the output below. Additional logs:\n{output}"
    )]
    Failed { output: String },

    #[error(
        "Timed out after {secs}s waiting for the attach helper to finish. Additional logs:\n{output}"
    )]
    TimedOut { secs: u64, output: String },

    #[error("Failed to launch attach helper: {0}")]
    Spawn(#[source] io::Error),

    #[error("I/O error while waiting for attach helper: {0}")]
    Io(#[source] io::Error),
}

/// Errors surfaced by the management routes
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("Administrative access is required")]
    NotAuthorized,

    #[error(transparent)]
    Activation(#[from] ActivationError),

    #[error("Failed to produce handle report: {0}")]
    Report(#[source] io::Error),
}

impl ConsoleError {
    pub fn status(&self) -> StatusCode {
        match self {
            ConsoleError::NotAuthorized => StatusCode::FORBIDDEN,
            ConsoleError::Activation(_) | ConsoleError::Report(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ConsoleError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain;charset=UTF-8")],
            self.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_message_keeps_output() {
        let err = ActivationError::Failed {
            output: "Agent failed to start!\nUnknown option: bogus".to_string(),
        };
        let message = err.to_string();
        assert!(message.starts_with("Failed to activate file leak detector."));
        assert!(message.ends_with("Agent failed to start!\nUnknown option: bogus"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ConsoleError::NotAuthorized.status(), StatusCode::FORBIDDEN);
        let err = ConsoleError::from(ActivationError::Failed {
            output: String::new(),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_activation_error_is_transparent() {
        let inner = ActivationError::TimedOut {
            secs: 3,
            output: "partial".to_string(),
        };
        let expected = inner.to_string();
        assert_eq!(ConsoleError::from(inner).to_string(), expected);
    }
}
