//! Free-form string sanitation.
//!
//! Sanitation normalizes, it never rejects: truncate to the length bound,
//! strip NUL and C0 control characters (tab, newline, carriage return
//! survive), then remove SQL-injection and HTML-script substrings. Every
//! change is logged so operators can see what was altered. Arguments whose
//! values must survive verbatim (e.g. literal attack indicators) disable
//! pattern stripping and keep only the length and control-character rules.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// Default length bound for a sanitized argument.
pub const DEFAULT_MAX_LENGTH: usize = 1000;

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC|UNION)\b",
        r"(--|/\*|\*/)",
        r"(?i)\b(OR|AND)\s+\d+\s*=\s*\d+",
        r"(?i)\b(OR|AND)\s+'[^']*'\s*=\s*'[^']*'",
        r#"(?i)\b(OR|AND)\s+"[^"]*"\s*=\s*"[^"]*""#,
        r"(?is)<script\b[^>]*>.*?</script>",
        r"(?i)</?script[^>]*>",
        r"(?i)javascript:",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static sanitizer pattern compiles"))
    .collect()
});

/// Knobs for [`sanitize_with`].
#[derive(Debug, Clone, Copy)]
pub struct SanitizeOptions {
    /// Truncation bound, in characters.
    pub max_length: usize,
    /// Whether to remove injection-pattern substrings. Disabled for
    /// arguments that carry literal indicators.
    pub strip_patterns: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            strip_patterns: true,
        }
    }
}

/// Sanitize with default options and an explicit length bound.
pub fn sanitize_string(value: &str, max_length: usize) -> String {
    sanitize_with(
        value,
        SanitizeOptions {
            max_length,
            strip_patterns: true,
        },
    )
}

/// Sanitize a free-form string. Returns the normalized value; logs at WARN
/// when anything changed.
pub fn sanitize_with(value: &str, options: SanitizeOptions) -> String {
    let mut out: String = value.chars().take(options.max_length).collect();

    out.retain(|c| c >= ' ' || c == '\t' || c == '\n' || c == '\r');

    if options.strip_patterns {
        for pattern in INJECTION_PATTERNS.iter() {
            if pattern.is_match(&out) {
                out = pattern.replace_all(&out, "").into_owned();
            }
        }
    }

    let out = out.trim().to_string();
    if out != value {
        warn!(
            original_len = value.len(),
            sanitized_len = out.len(),
            "sanitized free-form input"
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_clean_input_passes_through() {
        assert_eq!(sanitize_string("192.0.2.17 scan burst", 100), "192.0.2.17 scan burst");
    }

    #[test]
    fn test_truncates_to_bound() {
        let long = "a".repeat(50);
        assert_eq!(sanitize_string(&long, 10).len(), 10);
    }

    #[test]
    fn test_strips_control_characters_keeps_whitespace() {
        let input = "line1\nline2\tend\u{0}\u{7}";
        assert_eq!(sanitize_string(input, 100), "line1\nline2\tend");
    }

    #[test]
    fn test_removes_sql_keywords_and_comments() {
        let input = "query; DROP TABLE events; -- cleanup";
        let out = sanitize_string(input, 100);
        assert!(!out.to_uppercase().contains("DROP"));
        assert!(!out.contains("--"));
    }

    #[test]
    fn test_removes_tautology_probes() {
        let out = sanitize_string("name' OR 1=1", 100);
        assert!(!out.contains("OR 1=1"));
    }

    #[test]
    fn test_removes_script_tags() {
        let out = sanitize_string("<script>alert(1)</script>hello", 100);
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_exact_mode_keeps_indicator_text() {
        // Literal probe strings survive when pattern stripping is off; only
        // length and control rules apply.
        let indicator = "GET /index.php?id=1 OR 1=1";
        let out = sanitize_with(
            indicator,
            SanitizeOptions {
                max_length: 100,
                strip_patterns: false,
            },
        );
        assert_eq!(out, indicator);
    }

    #[test]
    fn test_trims_leading_and_trailing_whitespace() {
        assert_eq!(sanitize_string("  padded  ", 100), "padded");
    }
}
