use std::sync::LazyLock;

use regex::Regex;

const WITHHELD: &str = "[log message withheld]";

struct Redaction {
    pattern: Result<Regex, regex::Error>,
    replacement: &'static str,
}

static REDACTIONS: LazyLock<Vec<Redaction>> = LazyLock::new(|| {
    [
        (r#"(?i)"authorization":\s*"[^"]*""#, r#""authorization": "[REDACTED]""#),
        (r#"(?i)"cookie":\s*"[^"]*""#, r#""cookie": "[REDACTED]""#),
        (r#"(?i)"token":\s*"[^"]*""#, r#""token": "[REDACTED]""#),
        (r#"(?i)\bBearer\s+[^\s"]+"#, "Bearer [REDACTED]"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| Redaction {
        pattern: Regex::new(pattern),
        replacement,
    })
    .collect()
});

/// Redact credentials from text headed for the logs
///
/// Covers `authorization`, `cookie` and `token` JSON fields and bare
/// `Bearer` tokens. The whole message is withheld when a redaction pattern
/// failed to compile.
pub fn sanitize_log_message(message: &str) -> String {
    REDACTIONS.iter().fold(message.to_owned(), |acc, redaction| match &redaction.pattern {
        Ok(re) => re.replace_all(&acc, redaction.replacement).into_owned(),
        Err(e) => {
            tracing::error!(error = %e, "redaction pattern failed to compile");
            WITHHELD.to_owned()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_patterns_compile() {
        for redaction in REDACTIONS.iter() {
            assert!(redaction.pattern.is_ok(), "{:?}", redaction.pattern);
        }
    }

    #[test]
    fn redacts_json_credential_fields() {
        let raw = r#"{"Authorization": "Bearer abc", "cookie":"sid=1", "token": "t0k", "model": "gpt-5"}"#;
        let clean = sanitize_log_message(raw);

        assert!(!clean.contains("abc"));
        assert!(!clean.contains("sid=1"));
        assert!(!clean.contains("t0k"));
        assert!(clean.contains(r#""model": "gpt-5""#));
    }

    #[test]
    fn redacts_bearer_tokens_in_text() {
        assert_eq!(
            sanitize_log_message("request failed: header Bearer sk-live-123 rejected"),
            "request failed: header Bearer [REDACTED] rejected"
        );
    }

    #[test]
    fn leaves_clean_text_alone() {
        assert_eq!(sanitize_log_message("connection reset"), "connection reset");
    }
}
