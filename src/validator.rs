//! Static pre-execution screen for submitted scripts.
//!
//! The screen parses the submission, requires a runnable `main()` entry point
//! and rejects a fixed list of literal substrings. The substring check is a
//! secondary filter only: aliasing, string building or indirect calls walk
//! straight past it. The sandbox is the security boundary and this list is
//! not meant to be complete.
//!
//! The parser follows the Python 3.11 grammar. Newer syntax such as PEP 701
//! f-strings that reuse the enclosing quote (`f"{d["a"]}"`) is reported as a
//! syntax error even when the configured interpreter would accept it.

use std::fmt;

use rustpython_parser::{ast, Parse};

/// Literal substrings that reject a submission wherever they appear,
/// comments and string literals included.
pub const DENYLIST: &[&str] = &[
    "import subprocess",
    "from subprocess import",
    "os.system(",
    "eval(",
    "exec(",
    "__import__(",
    "os.listdir(",
    "os.chdir(",
    "open(",
    "file(",
    "glob.glob(",
    "import glob",
];

/// Name of the required entry point.
pub const ENTRY_POINT: &str = "main";

/// Why a submission was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Parser message.
    Syntax(String),
    MissingEntryPoint,
    /// The denylisted substring that matched.
    Denylisted(&'static str),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(message) => write!(f, "Invalid Python syntax: {message}"),
            Self::MissingEntryPoint => write!(
                f,
                "Script must define a top-level {ENTRY_POINT}() function that takes no arguments"
            ),
            Self::Denylisted(pattern) => {
                write!(f, "Dangerous import/function '{pattern}' is not allowed")
            }
        }
    }
}

/// Result of screening one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Accepted,
    Rejected(Rejection),
}

impl ValidationVerdict {
    pub const fn accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Human-readable rejection reason, `None` when accepted.
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Accepted => None,
            Self::Rejected(rejection) => Some(rejection.to_string()),
        }
    }
}

/// Screen a submission. Checks run in order: syntax, entry point, denylist.
pub fn validate(source: &str) -> ValidationVerdict {
    let suite = match ast::Suite::parse(source, "<script>") {
        Ok(suite) => suite,
        Err(e) => return ValidationVerdict::Rejected(Rejection::Syntax(e.to_string())),
    };

    if !suite.iter().any(is_runnable_entry_point) {
        return ValidationVerdict::Rejected(Rejection::MissingEntryPoint);
    }

    if let Some(pattern) = DENYLIST.iter().copied().find(|p| source.contains(p)) {
        return ValidationVerdict::Rejected(Rejection::Denylisted(pattern));
    }

    ValidationVerdict::Accepted
}

/// A top-level `def main(...)` callable with no arguments.
///
/// Parameters are fine as long as they all have defaults; `*args` and
/// `**kwargs` are fine too. `async def` does not qualify since calling it
/// yields a coroutine rather than running the body.
fn is_runnable_entry_point(stmt: &ast::Stmt) -> bool {
    let ast::Stmt::FunctionDef(def) = stmt else {
        return false;
    };
    if def.name.as_str() != ENTRY_POINT {
        return false;
    }

    let args = &def.args;
    args.posonlyargs
        .iter()
        .chain(&args.args)
        .chain(&args.kwonlyargs)
        .all(|arg| arg.default.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejection(source: &str) -> Rejection {
        match validate(source) {
            ValidationVerdict::Rejected(r) => r,
            ValidationVerdict::Accepted => panic!("expected rejection for {source:?}"),
        }
    }

    #[test]
    fn accepts_plain_main() {
        let verdict = validate("def main():\n    return {\"a\": 1}\n");
        assert!(verdict.accepted());
        assert!(verdict.reason().is_none());
    }

    #[test]
    fn accepts_main_with_defaults_and_varargs() {
        let source = "def main(x=1, *args, y=2, **kwargs):\n    return x + y\n";
        assert_eq!(validate(source), ValidationVerdict::Accepted);
    }

    #[test]
    fn accepts_helpers_and_imports() {
        let source = r#"
import json
import math

def helper(n):
    return math.sqrt(n)

def main():
    print(json.dumps({"n": helper(16)}))
"#;
        assert!(validate(source).accepted());
    }

    #[test]
    fn rejects_syntax_error() {
        let r = rejection("def main(:\n    pass\n");
        assert!(matches!(r, Rejection::Syntax(_)));
        assert!(r.to_string().starts_with("Invalid Python syntax: "));
    }

    #[test]
    fn rejects_fstring_reusing_enclosing_quote() {
        let source = "def main():\n    d = {'a': 1}\n    return f\"{d[\"a\"]}\"\n";
        assert!(matches!(rejection(source), Rejection::Syntax(_)));

        // The pre-3.12 spelling is fine
        let source = "def main():\n    d = {'a': 1}\n    return f\"{d['a']}\"\n";
        assert!(validate(source).accepted());
    }

    #[test]
    fn rejects_missing_main() {
        assert_eq!(
            rejection("def run():\n    return 1\n"),
            Rejection::MissingEntryPoint
        );
        assert_eq!(rejection("x = 1\n"), Rejection::MissingEntryPoint);
        assert_eq!(rejection(""), Rejection::MissingEntryPoint);
    }

    #[test]
    fn rejects_main_requiring_arguments() {
        assert_eq!(
            rejection("def main(data):\n    return data\n"),
            Rejection::MissingEntryPoint
        );
        assert_eq!(
            rejection("def main(*, key):\n    return key\n"),
            Rejection::MissingEntryPoint
        );
    }

    #[test]
    fn rejects_nested_main() {
        let in_class = "class Job:\n    def main(self):\n        return 1\n";
        assert_eq!(rejection(in_class), Rejection::MissingEntryPoint);

        let in_function = "def outer():\n    def main():\n        return 1\n    return main\n";
        assert_eq!(rejection(in_function), Rejection::MissingEntryPoint);
    }

    #[test]
    fn rejects_async_main() {
        let source = "async def main():\n    return 1\n";
        assert_eq!(rejection(source), Rejection::MissingEntryPoint);
    }

    #[test]
    fn rejects_every_denylisted_pattern() {
        for &pattern in DENYLIST {
            let source = format!("def main():\n    # {pattern}\n    return 1\n");
            assert_eq!(
                rejection(&source),
                Rejection::Denylisted(pattern),
                "pattern {pattern:?} slipped through"
            );
        }
    }

    #[test]
    fn denylist_matches_literal_text_only() {
        // Substring match: `reopen(` contains `open(`
        let source = "def reopen(x):\n    return x\n\ndef main():\n    return reopen(1)\n";
        assert_eq!(rejection(source), Rejection::Denylisted("open("));

        // Aliasing defeats it; the sandbox is the real boundary
        let aliased = "import os\n\ndef main():\n    run = getattr(os, 'sys' + 'tem')\n    return 1\n";
        assert!(validate(aliased).accepted());
    }

    #[test]
    fn missing_main_reported_before_denylist() {
        let source = "import subprocess\n";
        assert_eq!(rejection(source), Rejection::MissingEntryPoint);
    }

    #[test]
    fn denylist_reason_names_pattern() {
        let r = rejection("import glob\n\ndef main():\n    return 1\n");
        assert_eq!(
            r.to_string(),
            "Dangerous import/function 'import glob' is not allowed"
        );
    }
}
