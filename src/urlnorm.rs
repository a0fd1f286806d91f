//! URL canonicalization and same-site filtering for the crawler.
//!
//! The canonical form is the crawler's dedup key: scheme and host lower-cased
//! and default ports dropped (done by [`url::Url`] on parse), fragment
//! removed, and a trailing slash stripped from every path except the root.
//! Query strings are kept since they often select different content.

use url::Url;

use crate::error::SiteChatError;

/// Parse a crawl start URL, accepting only absolute `http`/`https` URLs with a host.
pub fn parse_start_url(raw: &str) -> Result<Url, SiteChatError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| SiteChatError::Input(format!("malformed url '{}': {}", raw, e)))?;
    if !is_http(&url) {
        return Err(SiteChatError::Input(format!(
            "url must use http or https: {}",
            raw
        )));
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(SiteChatError::Input(format!("url has no host: {}", raw)));
    }
    Ok(url)
}

/// Canonical string form used as the visited-set key.
pub fn canonicalize(url: &Url) -> String {
    let mut canon = url.clone();
    canon.set_fragment(None);
    let path = canon.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        canon.set_path(path.trim_end_matches('/'));
        if canon.path().is_empty() {
            canon.set_path("/");
        }
    }
    canon.to_string()
}

/// Resolve `href` found on `base` into an absolute crawlable URL.
///
/// Returns `None` for empty hrefs, unparseable hrefs, and non-HTTP schemes
/// such as `mailto:`, `javascript:`, `tel:` and `data:`.
pub fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let joined = base.join(href).ok()?;
    if is_http(&joined) {
        Some(joined)
    } else {
        None
    }
}

/// Exact host match, including the effective port (no subdomain expansion:
/// `www.example.com` is not `example.com`).
pub fn same_host(a: &Url, b: &Url) -> bool {
    a.host_str().is_some()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_canonicalize_strips_fragment_and_trailing_slash() {
        assert_eq!(
            canonicalize(&u("https://Example.COM/docs/#intro")),
            "https://example.com/docs"
        );
        assert_eq!(
            canonicalize(&u("https://example.com/docs")),
            "https://example.com/docs"
        );
    }

    #[test]
    fn test_canonicalize_keeps_root_and_query() {
        assert_eq!(canonicalize(&u("https://example.com")), "https://example.com/");
        assert_eq!(canonicalize(&u("https://example.com/#top")), "https://example.com/");
        assert_eq!(
            canonicalize(&u("https://example.com/search?q=rust")),
            "https://example.com/search?q=rust"
        );
    }

    #[test]
    fn test_canonicalize_drops_default_port() {
        assert_eq!(
            canonicalize(&u("https://example.com:443/a/")),
            "https://example.com/a"
        );
        assert_eq!(
            canonicalize(&u("http://example.com:8080/a/")),
            "http://example.com:8080/a"
        );
    }

    #[test]
    fn test_resolve_relative_links() {
        let base = u("https://example.com/docs/guide");
        assert_eq!(
            resolve(&base, "intro").unwrap().as_str(),
            "https://example.com/docs/intro"
        );
        assert_eq!(
            resolve(&base, "/about").unwrap().as_str(),
            "https://example.com/about"
        );
        assert_eq!(
            resolve(&base, "../blog/").unwrap().as_str(),
            "https://example.com/blog/"
        );
    }

    #[test]
    fn test_resolve_rejects_non_http() {
        let base = u("https://example.com/");
        assert!(resolve(&base, "mailto:hi@example.com").is_none());
        assert!(resolve(&base, "javascript:void(0)").is_none());
        assert!(resolve(&base, "tel:+123").is_none());
        assert!(resolve(&base, "   ").is_none());
    }

    #[test]
    fn test_same_host_is_exact() {
        let start = u("https://example.com/");
        assert!(same_host(&start, &u("https://example.com/a")));
        assert!(same_host(&start, &u("https://EXAMPLE.com:443/b")));
        assert!(!same_host(&start, &u("https://www.example.com/")));
        assert!(!same_host(&start, &u("https://docs.example.com/")));
        assert!(!same_host(&start, &u("https://example.org/")));
        assert!(!same_host(&start, &u("https://example.com:8443/")));
    }

    #[test]
    fn test_parse_start_url() {
        assert!(parse_start_url("https://example.com").is_ok());
        assert!(parse_start_url("  http://example.com/path ").is_ok());
        assert!(matches!(
            parse_start_url("not a url"),
            Err(SiteChatError::Input(_))
        ));
        assert!(matches!(
            parse_start_url("ftp://example.com/"),
            Err(SiteChatError::Input(_))
        ));
        assert!(parse_start_url("mailto:someone@example.com").is_err());
    }
}
