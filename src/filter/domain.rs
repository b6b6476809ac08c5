use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Matches the host part of an address that carries no scheme
fn bare_host_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[a-zA-Z][a-zA-Z0-9+.-]*://)?([a-zA-Z0-9_.-]+)").expect("valid host regex")
    })
}

/// Extracts the domain a sub-resource request targets
///
/// The host is lowercased and a leading `www.` is removed, so that
/// `https://www.Example.com/a.js` and `example.com/b.css` both yield
/// `example.com`. Addresses without a scheme are accepted. Addresses that
/// have a scheme but no host (`data:`, `about:blank`) yield `None`.
///
/// # Examples
///
/// ```
/// use catalog_harvest::filter::request_domain;
///
/// assert_eq!(request_domain("https://www.example.com/x.js"), Some("example.com".to_string()));
/// assert_eq!(request_domain("cdn.example.com/lib.css"), Some("cdn.example.com".to_string()));
/// assert_eq!(request_domain("data:image/png;base64,AAAA"), None);
/// ```
pub fn request_domain(address: &str) -> Option<String> {
    let host = match Url::parse(address) {
        Ok(url) => url.host_str()?.to_lowercase(),
        Err(_) => bare_host_re()
            .captures(address.trim())?
            .get(1)?
            .as_str()
            .to_lowercase(),
    };

    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
