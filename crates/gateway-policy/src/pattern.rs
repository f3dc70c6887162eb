//! Glob patterns for allow/deny lists.
//!
//! Supports `*` (any run of characters) and `?` (any single character).
//! Everything else, including the `::` tool-id separator, matches literally.

use regex::Regex;

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile a glob. Invalid patterns cannot occur: every glob translates
    /// to a valid anchored regex.
    pub fn new(pattern: &str) -> Self {
        let mut translated = String::with_capacity(pattern.len() + 8);
        translated.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => translated.push_str(".*"),
                '?' => translated.push('.'),
                c => translated.push_str(&regex::escape(&c.to_string())),
            }
        }
        translated.push('$');
        let regex = Regex::new(&translated).expect("glob translation is always valid");
        Self {
            source: pattern.to_string(),
            regex,
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Allow/deny rule set for one scope (servers, tools, resources, prompts).
///
/// Denial takes precedence; an empty allowlist allows everything.
#[derive(Debug, Clone, Default)]
pub struct ScopeRules {
    allow: Vec<GlobPattern>,
    deny: Vec<GlobPattern>,
}

impl ScopeRules {
    pub fn new(allowlist: &[String], denylist: &[String]) -> Self {
        Self {
            allow: allowlist.iter().map(|p| GlobPattern::new(p)).collect(),
            deny: denylist.iter().map(|p| GlobPattern::new(p)).collect(),
        }
    }

    pub fn is_allowed(&self, value: &str) -> bool {
        if self.deny.iter().any(|p| p.matches(value)) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|p| p.matches(value))
    }
}
