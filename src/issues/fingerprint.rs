use once_cell::sync::Lazy;
use regex::Regex;

/// Longest pattern kept; anything past this is not part of the signature
const MAX_PATTERN_CHARS: usize = 500;

// Order matters: each pass must not see the placeholders of an earlier one
static VOLATILE_TOKENS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
            "<uuid>",
        ),
        (
            r"\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2})?(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?)?",
            "<timestamp>",
        ),
        (r"\b\d{1,2}:\d{2}:\d{2}(?:[.,]\d+)?\b", "<timestamp>"),
        (r#"\b[A-Za-z]:[\\/][^\s'"]*"#, "<path>"),
        (r#"(?:\\\\|/)[^\s'"/\\]+(?:[/\\][^\s'"]*)?"#, "<path>"),
        (r"\b0x[0-9a-fA-F]+\b", "<hex>"),
        (r"\b[0-9a-fA-F]{16,}\b", "<hex>"),
        (r"\d+(?:\.\d+)?", "<n>"),
    ]
    .into_iter()
    .map(|(pattern, placeholder)| (Regex::new(pattern).expect("valid regex"), placeholder))
    .collect()
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Reduce a message to a stable signature by replacing volatile tokens
/// (UUIDs, timestamps, paths, hex ids, numbers) with placeholders.
///
/// The exception type is only used to fill an empty message.
pub fn normalize_error_pattern(message: &str, exception_type: Option<&str>) -> String {
    let mut pattern = message.to_string();
    for (re, placeholder) in VOLATILE_TOKENS.iter() {
        pattern = re.replace_all(&pattern, *placeholder).into_owned();
    }
    let pattern = WHITESPACE.replace_all(pattern.trim(), " ");

    let pattern = if pattern.is_empty() {
        exception_type.unwrap_or_default().to_string()
    } else {
        pattern.into_owned()
    };

    match pattern.char_indices().nth(MAX_PATTERN_CHARS) {
        Some((idx, _)) => pattern[..idx].to_string(),
        None => pattern,
    }
}

/// Stable hash over (source, pattern, exception type)
pub fn fingerprint(source: &str, error_pattern: &str, exception_type: Option<&str>) -> String {
    let input = format!(
        "{}|{}|{}",
        source,
        error_pattern,
        exception_type.unwrap_or_default()
    );
    format!("{:x}", md5::compute(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_and_timestamp_do_not_change_pattern() {
        let a = normalize_error_pattern(
            "Download 3f2504e0-4f89-11d3-9a0c-0305e82c3301 failed at 2024-01-15T10:00:00Z",
            None,
        );
        let b = normalize_error_pattern(
            "Download 7c9e6679-7425-40de-944b-e07fc1f90ae7 failed at 2024-03-02 18:22:41.123",
            None,
        );
        assert_eq!(a, b);
        assert_eq!(a, "Download <uuid> failed at <timestamp>");
    }

    #[test]
    fn test_paths_and_numbers_stripped() {
        assert_eq!(
            normalize_error_pattern("Access to the path '/tv/Show/S01E02.mkv' is denied", None),
            "Access to the path '<path>' is denied"
        );
        assert_eq!(
            normalize_error_pattern(r"Could not find C:\Media\Movies\film.mkv", None),
            "Could not find <path>"
        );
        assert_eq!(
            normalize_error_pattern("Retry 3 of 10 after 2.5s", None),
            "Retry <n> of <n> after <n>s"
        );
    }

    #[test]
    fn test_whitespace_collapsed_and_empty_message() {
        assert_eq!(normalize_error_pattern("  a   b \t c ", None), "a b c");
        assert_eq!(
            normalize_error_pattern("", Some("System.IO.IOException")),
            "System.IO.IOException"
        );
    }

    #[test]
    fn test_fingerprint_stable_and_distinct() {
        let p = normalize_error_pattern("database is locked", None);
        let a = fingerprint("Db", &p, Some("SQLiteException"));
        assert_eq!(a, fingerprint("Db", &p, Some("SQLiteException")));
        assert_eq!(a.len(), 32);
        assert_ne!(a, fingerprint("Api", &p, Some("SQLiteException")));
        assert_ne!(a, fingerprint("Db", &p, None));
    }
}
