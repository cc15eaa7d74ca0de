//! Interpreter error classification
//!
//! Turns the stderr and exit status of a finished script into a
//! [`FailureCategory`] plus a short headline used in the diagnostic section
//! of the next prompt.

use crate::feedback::outcome::FailureCategory;
use regex::Regex;
use std::sync::LazyLock;

/// Python parse-time errors (raised before any statement runs)
static PY_SYNTAX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(SyntaxError|IndentationError|TabError)\b")
        .expect("PY_SYNTAX_PATTERN regex should compile")
});

/// POSIX shell parse errors (`sh: 1: Syntax error: ...`, `syntax error near ...`)
static SHELL_SYNTAX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bsyntax error\b").expect("SHELL_SYNTAX_PATTERN regex should compile")
});

/// A traceback header or a bare `SomethingError: message` line
static RUNTIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(Traceback \(most recent call last\)|[A-Za-z_][\w.]*(Error|Exception)\b)")
        .expect("RUNTIME_PATTERN regex should compile")
});

/// The final exception line of a traceback, e.g. `ModuleNotFoundError: No module named 'bigfile'`
static EXCEPTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([A-Za-z_][\w.]*(?:Error|Exception|Exit|Interrupt|Warning))(?::\s*(.*))?$")
        .expect("EXCEPTION_LINE regex should compile")
});

/// Classifies interpreter output into the shared failure taxonomy
pub struct InterpreterErrorParser;

impl InterpreterErrorParser {
    /// Classify a finished process. Only meaningful for failed runs.
    ///
    /// `exit_code` is `None` when the process was terminated by a signal.
    pub fn classify(exit_code: Option<i32>, stderr: &str) -> FailureCategory {
        if PY_SYNTAX_PATTERN.is_match(stderr) || SHELL_SYNTAX_PATTERN.is_match(stderr) {
            return FailureCategory::Syntax;
        }
        if RUNTIME_PATTERN.is_match(stderr) {
            return FailureCategory::Runtime;
        }
        match exit_code {
            Some(0) => FailureCategory::Unknown,
            // Non-zero exit or killed by a signal
            _ => FailureCategory::Runtime,
        }
    }

    /// The last exception line in stderr, if one is present
    pub fn headline(stderr: &str) -> Option<String> {
        EXCEPTION_LINE
            .captures_iter(stderr)
            .last()
            .map(|caps| caps[0].trim().to_string())
    }

    /// Keep the last `max_chars` characters, cutting at a line boundary when possible.
    ///
    /// Tracebacks end with the actual error, so the tail is the part worth keeping.
    pub fn tail(text: &str, max_chars: usize) -> String {
        let total = text.chars().count();
        if total <= max_chars {
            return text.to_string();
        }
        let skip = total - max_chars;
        let tail: String = text.chars().skip(skip).collect();
        let trimmed = match tail.find('\n') {
            Some(idx) if idx + 1 < tail.len() => &tail[idx + 1..],
            _ => tail.as_str(),
        };
        format!("[... {} earlier characters omitted ...]\n{}", skip, trimmed)
    }
}
