//! Caller-visible error taxonomy.
//!
//! Every failure a request can end in maps to one variant here. The
//! `Display` text is exactly the `error` string returned to callers.

use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;
use crate::validator::Rejection;

/// Terminal failure of a request.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Request body did not carry a usable `script`.
    #[error("{0}")]
    BadRequest(String),

    /// Submission does not parse as Python.
    #[error("{0}")]
    Syntax(String),

    /// Missing entry point or denylist hit.
    #[error("{0}")]
    Policy(String),

    /// Neither strategy could start the interpreter.
    #[error("Execution error: {0}")]
    Launch(String),

    #[error("Script execution timed out ({} seconds)", .limit.as_secs())]
    Timeout { limit: Duration },

    /// The child flooded stdout or stderr and was killed.
    #[error("Script output exceeded the {limit} byte limit")]
    OutputLimit { limit: u64 },

    /// `main()` raised, or the unit exited non-zero.
    #[error("{message}")]
    Runtime {
        message: String,
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    /// Child output did not end in the expected JSON line.
    #[error("Failed to parse script output")]
    Protocol {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    #[error("Internal server error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ExecError {
    /// Short machine-readable name, used as a log field.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Syntax(_) => "syntax_error",
            Self::Policy(_) => "policy_violation",
            Self::Launch(_) => "launch_error",
            Self::Timeout { .. } => "timeout",
            Self::OutputLimit { .. } => "output_limit",
            Self::Runtime { .. } => "runtime_fault",
            Self::Protocol { .. } => "protocol_error",
            Self::Internal(_) => "internal",
        }
    }

    /// Output captured before the failure, as `(stdout, stderr)`.
    ///
    /// `None` when execution never started or the fault was internal.
    pub fn captured(&self) -> Option<(&str, &str)> {
        match self {
            Self::Runtime { stdout, stderr, .. } | Self::Protocol { stdout, stderr, .. } => {
                Some((stdout, stderr))
            }
            Self::Timeout { .. } | Self::OutputLimit { .. } | Self::Launch(_) => Some(("", "")),
            Self::BadRequest(_) | Self::Syntax(_) | Self::Policy(_) | Self::Internal(_) => None,
        }
    }

    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<Rejection> for ExecError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Syntax(_) => Self::Syntax(rejection.to_string()),
            Rejection::MissingEntryPoint | Rejection::Denylisted(_) => {
                Self::Policy(rejection.to_string())
            }
        }
    }
}

impl From<BackendError> for ExecError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Launch(reason) => Self::Launch(reason),
            BackendError::Timeout { limit } => Self::Timeout { limit },
            BackendError::OutputLimit { limit } => Self::OutputLimit { limit },
            BackendError::Internal(e) => Self::Internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_reports_script_limit() {
        let err = ExecError::Timeout {
            limit: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "Script execution timed out (30 seconds)");
        assert_eq!(err.captured(), Some(("", "")));
    }

    #[test]
    fn output_limit_is_script_owned() {
        let err: ExecError = BackendError::OutputLimit { limit: 16 }.into();
        assert_eq!(err.to_string(), "Script output exceeded the 16 byte limit");
        assert_eq!(err.kind(), "output_limit");
        assert!(!err.is_internal());
    }

    #[test]
    fn rejections_map_to_syntax_or_policy() {
        let syntax: ExecError = Rejection::Syntax("unexpected EOF".into()).into();
        assert_eq!(syntax.kind(), "syntax_error");
        assert!(syntax.to_string().starts_with("Invalid Python syntax"));

        let policy: ExecError = Rejection::Denylisted("eval(").into();
        assert_eq!(policy.kind(), "policy_violation");
        assert!(policy.captured().is_none());
    }

    #[test]
    fn internal_errors_hide_nothing_but_the_chain() {
        let err = ExecError::Internal(anyhow::anyhow!("disk full").context("Failed to write unit"));
        assert_eq!(
            err.to_string(),
            "Internal server error: Failed to write unit: disk full"
        );
        assert!(err.is_internal());
    }
}
