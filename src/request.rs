//! Request body checks shared by the HTTP and MCP surfaces.

use serde_json::Value;

use crate::error::ExecError;

/// Pull the submission out of a parsed request body.
pub fn extract_script(body: &Value) -> Result<&str, ExecError> {
    let Value::Object(fields) = body else {
        return Err(ExecError::BadRequest("Request must be JSON".into()));
    };
    let Some(script) = fields.get("script") else {
        return Err(ExecError::BadRequest(
            "Request must contain 'script' field".into(),
        ));
    };
    check_script(script.as_str())
}

/// Reject missing, non-string and empty submissions.
///
/// Whitespace-only text passes and is left to the validator, which reports
/// the missing `main()`.
pub fn check_script(script: Option<&str>) -> Result<&str, ExecError> {
    match script {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(ExecError::BadRequest(
            "Script must be a non-empty string".into(),
        )),
    }
}
