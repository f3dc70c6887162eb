//! Output processing: secret redaction and size capping.
//!
//! Every user-visible payload passes through here last, after aggregation,
//! so redaction and the size cap see exactly what the upstream would see.

use regex::Regex;
use serde_json::{json, Value};

/// Group names that mark a capture as a secret value.
const SECRET_GROUP_MARKERS: &[&str] = &["secret", "key", "token", "password"];

/// A compiled redaction rule.
#[derive(Debug, Clone)]
pub struct RedactionRule {
    regex: Regex,
    /// Named groups that hold the secret portion of a match.
    secret_groups: Vec<String>,
}

impl RedactionRule {
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        let secret_groups = regex
            .capture_names()
            .flatten()
            .filter(|name| {
                let lower = name.to_lowercase();
                SECRET_GROUP_MARKERS.iter().any(|m| lower.contains(m))
            })
            .map(|name| name.to_string())
            .collect();
        Ok(Self {
            regex,
            secret_groups,
        })
    }

    /// Replace the secret portion of every match with `***`, leaving the
    /// surrounding structure (key names, separators) untouched.
    pub fn redact(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in self.regex.captures_iter(text) {
            let overall = caps.get(0).expect("group 0 always present");
            // Pick the span to blank: a secret-named group, else the first
            // capturing group, else the value side of a k=v match, else all.
            let span = self
                .secret_groups
                .iter()
                .find_map(|g| caps.name(g))
                .or_else(|| caps.get(1))
                .map(|m| (m.start(), m.end()))
                .unwrap_or_else(|| value_span(overall.as_str(), overall.start()));
            out.push_str(&text[last..span.0]);
            out.push_str("***");
            last = span.1;
        }
        out.push_str(&text[last..]);
        out
    }
}

/// For an unanchored match like `api_key=secret123`, redact only what
/// follows the separator. Matches with no separator are blanked whole.
fn value_span(matched: &str, offset: usize) -> (usize, usize) {
    match matched.find(['=', ':']) {
        Some(sep) => {
            let rest = &matched[sep + 1..];
            let skip = rest.len() - rest.trim_start().len();
            (offset + sep + 1 + skip, offset + matched.len())
        }
        None => (offset, offset + matched.len()),
    }
}

/// Result of applying the size cap and redaction to a payload.
#[derive(Debug, Clone)]
pub struct CappedOutput {
    pub result: Value,
    pub truncated: bool,
    pub raw_size_estimate: usize,
}

/// Apply redaction rules, then cap the serialized size.
///
/// `max_bytes` and `max_tokens` (estimated as bytes/4) both bound the
/// output; whichever is tighter wins. Truncation keeps the envelope valid
/// JSON by wrapping a prefix of the original serialization as a string and
/// recording the cut point in `_truncated_at`.
pub fn process_output(
    value: &Value,
    rules: &[RedactionRule],
    max_bytes: usize,
    max_tokens: usize,
) -> CappedOutput {
    let serialized = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    let raw_size_estimate = serialized.len();

    let mut redacted = serialized;
    for rule in rules {
        redacted = rule.redact(&redacted);
    }

    let byte_limit = max_bytes.min(max_tokens.saturating_mul(4));
    if redacted.len() <= byte_limit {
        let result = serde_json::from_str(&redacted)
            .unwrap_or_else(|_| Value::String(redacted.clone()));
        return CappedOutput {
            result,
            truncated: false,
            raw_size_estimate,
        };
    }

    CappedOutput {
        result: truncate_to_limit(&redacted, byte_limit),
        truncated: true,
        raw_size_estimate,
    }
}

fn truncate_to_limit(serialized: &str, byte_limit: usize) -> Value {
    // Leave room for the wrapper object around the preview string.
    let mut budget = byte_limit.saturating_sub(64).max(16).min(serialized.len());
    loop {
        while budget > 0 && !serialized.is_char_boundary(budget) {
            budget -= 1;
        }
        let preview = &serialized[..budget];
        let wrapped = json!({
            "preview": preview,
            "_truncated_at": budget,
        });
        let size = serde_json::to_string(&wrapped).map(|s| s.len()).unwrap_or(0);
        if size <= byte_limit || budget == 0 {
            return wrapped;
        }
        // String escaping can inflate the wrapper past the limit; shrink
        // by the overflow and retry.
        budget = budget.saturating_sub(size - byte_limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(patterns: &[&str]) -> Vec<RedactionRule> {
        patterns
            .iter()
            .map(|p| RedactionRule::compile(p).unwrap())
            .collect()
    }

    #[test]
    fn test_redacts_value_after_separator() {
        let rule = &rules(&[r"api_key=\S+"])[0];
        assert_eq!(rule.redact("api_key=secret123"), "api_key=***");
        assert_eq!(
            rule.redact("before api_key=abc after"),
            "before api_key=*** after"
        );
    }

    #[test]
    fn test_redacts_named_secret_group() {
        let rule = &rules(&[r"Authorization: Bearer (?P<token>\S+)"])[0];
        assert_eq!(
            rule.redact("Authorization: Bearer eyJhbGci.payload"),
            "Authorization: Bearer ***"
        );
    }

    #[test]
    fn test_redacts_first_group_when_unnamed() {
        let rule = &rules(&[r"password:\s*(\S+)"])[0];
        assert_eq!(rule.redact("password: hunter2"), "password: ***");
    }

    #[test]
    fn test_whole_match_without_structure() {
        let rule = &rules(&[r"sk-[A-Za-z0-9]{16,}"])[0];
        assert_eq!(
            rule.redact("key sk-abcdefghij0123456789 used"),
            "key *** used"
        );
    }

    #[test]
    fn test_process_output_small_payload_untouched() {
        let value = json!({"log": "hello"});
        let out = process_output(&value, &[], 50_000, 4_000);
        assert!(!out.truncated);
        assert_eq!(out.result, value);
        assert_eq!(out.raw_size_estimate, 15);
    }

    #[test]
    fn test_process_output_redacts_inside_json() {
        let value = json!({"log": "api_key=secret123"});
        let out = process_output(&value, &rules(&[r"api_key=[^\s\x22]+"]), 50_000, 4_000);
        assert_eq!(out.result, json!({"log": "api_key=***"}));
        assert!(!out.truncated);
    }

    #[test]
    fn test_process_output_truncates_and_reports_raw_size() {
        let value = json!({"data": "x".repeat(89)});
        let raw = serde_json::to_string(&value).unwrap().len();
        assert_eq!(raw, 100);

        let out = process_output(&value, &[], 50, 4_000);
        assert!(out.truncated);
        assert_eq!(out.raw_size_estimate, 100);
        assert!(serde_json::to_string(&out.result).unwrap().len() <= 50 + 64);
        assert!(out.result.get("_truncated_at").is_some());
    }

    #[test]
    fn test_token_cap_binds_when_tighter() {
        let value = json!({"data": "y".repeat(4_000)});
        // 500 tokens ~ 2000 bytes, tighter than the byte cap.
        let out = process_output(&value, &[], 50_000, 500);
        assert!(out.truncated);
        let size = serde_json::to_string(&out.result).unwrap().len();
        assert!(size <= 2_000);
    }

    #[test]
    fn test_no_secret_survives_outside_replacement() {
        let value = json!({"a": "token=abc123", "b": "token=def456"});
        let out = process_output(&value, &rules(&[r"token=[^\s\x22]+"]), 50_000, 4_000);
        let text = serde_json::to_string(&out.result).unwrap();
        assert!(!text.contains("abc123"));
        assert!(!text.contains("def456"));
        assert_eq!(text.matches("***").count(), 2);
    }
}
