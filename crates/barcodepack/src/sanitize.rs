//! Helpers for turning user input into safe file names and log fields.

/// Makes `name` safe to use as a single path component.
///
/// Path separators, control characters and characters rejected by common
/// filesystems become `_`; leading dots are dropped so the result is never
/// hidden or a parent reference. An empty result becomes `order`.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim();
    if cleaned.is_empty() {
        "order".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Strips userinfo and the query string from a URL for logging.
///
/// - `https://user:pw@host/hook?token=x` → `https://****@host/hook`
/// - `https://host/hook` → unchanged
pub fn redact_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);

    if let Some(scheme_end) = without_query.find("://") {
        let after_scheme = &without_query[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].find('@') {
            let scheme = &without_query[..scheme_end + 3];
            return format!("{}****@{}", scheme, &after_scheme[at_pos + 1..]);
        }
    }

    without_query.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_plain_order() {
        assert_eq!(sanitize_component("A-100"), "A-100");
        assert_eq!(sanitize_component("  PO 77 "), "PO 77");
    }

    #[test]
    fn test_sanitize_separators() {
        assert_eq!(sanitize_component("2025/09/01"), "2025_09_01");
        assert_eq!(sanitize_component("a\\b:c"), "a_b_c");
    }

    #[test]
    fn test_sanitize_parent_reference() {
        assert_eq!(sanitize_component(".."), "order");
        assert_eq!(sanitize_component("../etc"), "_etc");
        assert_eq!(sanitize_component(".hidden"), "hidden");
        assert_eq!(sanitize_component(""), "order");
    }

    #[test]
    fn test_redact_url_with_credentials() {
        assert_eq!(
            redact_url("https://user:pw@example.com/hook?token=abc"),
            "https://****@example.com/hook"
        );
    }

    #[test]
    fn test_redact_url_plain() {
        assert_eq!(
            redact_url("https://example.com/hook"),
            "https://example.com/hook"
        );
        assert_eq!(redact_url("https://example.com/a#frag"), "https://example.com/a");
    }

    #[test]
    fn test_redact_url_at_in_path_is_kept() {
        assert_eq!(
            redact_url("https://example.com/users/@me"),
            "https://example.com/users/@me"
        );
    }
}
