//! Outcome interpretation and the caller-facing response envelope.
//!
//! The wrapped unit reports through one JSON line at the end of its stdout.
//! [`interpret`] turns raw process output into an [`ExecutionOutcome`];
//! [`ResponseEnvelope`] is what callers see.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::backend::{describe_exit, ExecutionLimits, ProcessOutput};
use crate::error::ExecError;

/// A run whose `main()` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed {
    /// `main()`'s return value, `null` when it returned `None`.
    pub result: Value,
    /// Output printed during `main()`.
    pub stdout: String,
    /// Not part of the public envelope.
    pub stderr: String,
    pub exit_code: i32,
}

/// Terminal state of one request.
pub type ExecutionOutcome = Result<Completed, ExecError>;

/// What the unit's JSON line said.
#[derive(Debug, PartialEq)]
enum Report {
    Returned { result: Value, stdout: String },
    Raised { message: String, stdout: String },
}

/// Classify the raw output of a child that ran the unit.
///
/// The last non-empty stdout line must be the unit's JSON report; anything
/// else is a protocol error whatever the exit code. A missing report after
/// the script used up its time limit means nsjail killed it, which is a
/// timeout rather than a protocol error.
pub fn interpret(output: ProcessOutput, limits: &ExecutionLimits) -> ExecutionOutcome {
    let Some(report) = parse_report(&output.stdout) else {
        if output.elapsed >= limits.time_limit {
            return Err(ExecError::Timeout {
                limit: limits.time_limit,
            });
        }
        return Err(ExecError::Protocol {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
        });
    };

    match (output.exit_code, report) {
        (Some(0), Report::Returned { result, stdout }) => Ok(Completed {
            result,
            stdout,
            stderr: output.stderr,
            exit_code: 0,
        }),
        (exit_code, Report::Raised { message, stdout }) => Err(ExecError::Runtime {
            message,
            stdout,
            stderr: output.stderr,
            exit_code,
        }),
        (exit_code, Report::Returned { stdout, .. }) => Err(ExecError::Runtime {
            message: format!("Script execution failed ({})", describe_exit(exit_code)),
            stdout,
            stderr: output.stderr,
            exit_code,
        }),
    }
}

fn parse_report(stdout: &str) -> Option<Report> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    let Value::Object(mut fields) = serde_json::from_str::<Value>(line.trim()).ok()? else {
        return None;
    };

    let stdout = match fields.remove("stdout") {
        Some(Value::String(s)) => s,
        None => String::new(),
        Some(_) => return None,
    };

    if let Some(error) = fields.remove("error") {
        let message = match error {
            Value::String(s) => s,
            other => other.to_string(),
        };
        return Some(Report::Raised { message, stdout });
    }

    let result = fields.remove("result")?;
    Some(Report::Returned { result, stdout })
}

/// Caller-facing response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResponseEnvelope {
    Success {
        result: Value,
        stdout: String,
    },
    Failure {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
    },
}

impl ResponseEnvelope {
    /// Map an outcome onto the public contract, dropping internal fields.
    pub fn from_outcome(outcome: &ExecutionOutcome) -> Self {
        match outcome {
            Ok(done) => Self::Success {
                result: done.result.clone(),
                stdout: done.stdout.clone(),
            },
            Err(e) => Self::from_error(e),
        }
    }

    pub fn from_error(err: &ExecError) -> Self {
        let captured = err.captured();
        Self::Failure {
            error: err.to_string(),
            stdout: captured.map(|(out, _)| out.to_string()),
            stderr: captured.map(|(_, err)| err.to_string()),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// JSON object form of the envelope.
    pub fn to_json(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
