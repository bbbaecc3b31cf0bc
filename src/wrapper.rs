//! Wrapped unit generation.
//!
//! A submission is never run as-is. It is embedded as a string literal in a
//! small driver program that runs it as its own module, calls `main()` once
//! with stdout redirected to a buffer, and prints a single JSON line
//! describing the outcome. That line is the only channel the daemon reads.

use std::fmt;

/// Written to stderr by the driver before any submitted code runs.
///
/// Its presence proves the interpreter started the unit, which separates
/// sandbox launch failures from script-caused failures.
pub const LAUNCH_MARKER: &str = "__safe_exec_unit_started__";

/// Module name the submission runs under. Anything but `__main__`, so an
/// `if __name__ == "__main__": main()` guard stays inert.
pub const MODULE_NAME: &str = "__script__";

const SOURCE_SLOT: &str = "__SOURCE_LITERAL__";
const MARKER_SLOT: &str = "__LAUNCH_MARKER__";
const MODULE_SLOT: &str = "__MODULE_NAME__";

const DRIVER_TEMPLATE: &str = r#"import io
import json
import os
import sys
import types
from contextlib import redirect_stdout

sys.stderr.write("__LAUNCH_MARKER__\n")
sys.stderr.flush()

_SOURCE = __SOURCE_LITERAL__
_real_stdout = sys.stdout
_capture = io.StringIO()


def _emit(line, status):
    _real_stdout.write("\n" + line + "\n")
    _real_stdout.flush()
    try:
        sys.stderr.flush()
    except Exception:
        pass
    os._exit(status)


def _describe(exc):
    try:
        message = str(exc)
    except Exception:
        message = ""
    return message or type(exc).__name__


def _classify(value):
    if value is None or isinstance(value, (dict, list, str, int, float, bool)):
        return value
    return str(value)


try:
    _module = types.ModuleType("__MODULE_NAME__")
    _module.__file__ = "<script>"
    sys.modules["__MODULE_NAME__"] = _module
    exec(compile(_SOURCE, "<script>", "exec"), _module.__dict__)
    with redirect_stdout(_capture):
        _result = _module.main()
    _line = json.dumps(
        {"result": _classify(_result), "stdout": _capture.getvalue()},
        allow_nan=False,
        default=str,
    )
except BaseException as exc:
    _emit(json.dumps({"error": _describe(exc), "stdout": _capture.getvalue()}), 1)
else:
    _emit(_line, 0)
"#;

/// Generated program embedding one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedUnit {
    source: String,
}

impl WrappedUnit {
    /// Full text of the driver program.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for WrappedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Wrap a submission into a standalone driver program.
///
/// The submission is embedded verbatim: a JSON string literal is also a valid
/// Python string literal, so no re-indentation or escaping of the script
/// itself takes place.
pub fn wrap(script: &str) -> WrappedUnit {
    // Serializing a &str cannot fail.
    let literal = serde_json::to_string(script).unwrap_or_default();

    let source = DRIVER_TEMPLATE
        .replace(MARKER_SLOT, LAUNCH_MARKER)
        .replace(MODULE_SLOT, MODULE_NAME)
        .replace(SOURCE_SLOT, &literal);

    WrappedUnit { source }
}
