//! Wildcard name patterns.
//!
//! Tag names are matched case-insensitively. `?` matches exactly one
//! character and `*` matches any sequence, including the empty one. Both can
//! be escaped with a backslash to match literally.

use std::fmt;

use regex::{Regex, RegexBuilder};

use crate::error::CacheError;

/// A compiled wildcard pattern for tag names.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    /// Compiles a wildcard pattern.
    ///
    /// # Example
    ///
    /// ```
    /// use tagsync_core::NamePattern;
    ///
    /// let pattern = NamePattern::new("cp.mey.*").unwrap();
    /// assert!(pattern.matches("CP.MEY.TEMP"));
    /// assert!(!pattern.matches("CP.SPS.TEMP"));
    /// ```
    pub fn new(pattern: &str) -> Result<Self, CacheError> {
        let regex = RegexBuilder::new(&to_regex(pattern))
            .case_insensitive(true)
            .build()
            .map_err(|e| CacheError::invalid_argument(format!("bad name pattern '{pattern}': {e}")))?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Returns true if the whole name matches the pattern.
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// Returns the pattern as given.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Returns true if the string contains an unescaped `*` or `?`.
pub fn has_wildcard(s: &str) -> bool {
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            },
            '*' | '?' => return true,
            _ => {},
        }
    }
    false
}

/// Removes the escaping backslashes of a pattern without wildcards.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => out.push_str(&regex::escape(&next.to_string())),
                None => out.push_str(&regex::escape("\\")),
            },
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}
