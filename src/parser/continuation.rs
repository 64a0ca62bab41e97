use once_cell::sync::Lazy;
use regex::Regex;

static STACK_FRAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s+(?:at\s+\S|File\s+")"#).expect("valid regex"));

/// `Namespace.TypeException: message` at the start of a line
pub(crate) static EXCEPTION_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:--->\s*)?((?:[A-Za-z_][A-Za-z0-9_]*\.)*[A-Za-z_][A-Za-z0-9_]*(?:Exception|Error))(?:\s*:\s*(.*))?$")
        .expect("valid regex")
});

static INNER_EXCEPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:--->|inner exception)").expect("valid regex"));

static END_OF_EXCEPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*--- end of (?:inner exception )?stack trace").expect("valid regex"));

/// Why a line was classified as part of the previous entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationKind {
    StackFrame,
    ExceptionType,
    InnerException,
    EndOfException,
    Unrecognized,
}

/// Classify a line that did not match the primary grammar.
///
/// Returns `None` only for blank lines.
pub fn classify(line: &str) -> Option<ContinuationKind> {
    if line.trim().is_empty() {
        return None;
    }
    let kind = if STACK_FRAME.is_match(line) {
        ContinuationKind::StackFrame
    } else if EXCEPTION_PREFIX.is_match(line) && !line.trim_start().starts_with("--->") {
        ContinuationKind::ExceptionType
    } else if INNER_EXCEPTION.is_match(line) {
        ContinuationKind::InnerException
    } else if END_OF_EXCEPTION.is_match(line) {
        ContinuationKind::EndOfException
    } else {
        ContinuationKind::Unrecognized
    };
    Some(kind)
}

/// Exception type and message from the first line that names one
pub fn extract_exception(lines: &[String]) -> Option<(String, Option<String>)> {
    lines.iter().find_map(|line| {
        let caps = EXCEPTION_PREFIX.captures(line)?;
        let exception_type = caps[1].to_string();
        let message = caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .filter(|m| !m.is_empty());
        Some((exception_type, message))
    })
}
