//! Glob and regex matching of attribute values.
//!
//! Patterns are tried as shell globs (`*`, `?`, `[...]`, `[!...]`) first
//! and, if that does not match, as a regular expression. Both forms are
//! anchored to the whole value.

use regex::Regex;
use tracing::debug;

use drover_core::AttributeValue;

/// Whether `value` matches `pattern` as a glob or, failing that, a regex.
///
/// A pattern that is neither never matches.
pub fn pattern_matches(pattern: &str, value: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(glob) if glob.matches(value) => return true,
        Ok(_) => {}
        Err(e) => debug!(%pattern, error = %e, "pattern is not a valid glob"),
    }
    match Regex::new(&format!("^(?:{pattern})$")) {
        Ok(re) => re.is_match(value),
        Err(e) => {
            debug!(%pattern, error = %e, "pattern is not a valid regex");
            false
        }
    }
}

/// Match a text attribute, or any member of a set attribute.
///
/// Scalars and ranges never match.
pub fn value_matches(value: &AttributeValue, pattern: &str) -> bool {
    match value {
        AttributeValue::Text(text) => pattern_matches(pattern, text),
        AttributeValue::Set(items) => items.iter().any(|item| pattern_matches(pattern, item)),
        AttributeValue::Scalar(_) | AttributeValue::Ranges(_) => false,
    }
}
