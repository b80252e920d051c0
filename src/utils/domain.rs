use url::Url;

/// Attribution key used when a URL can't be parsed.
pub const UNKNOWN_DOMAIN: &str = "unknown";

/// Schemes that belong to the browser itself. Time spent on these pages isn't attributed to
/// anything.
const INTERNAL_SCHEMES: &[&str] = &[
    "about",
    "chrome",
    "chrome-extension",
    "chrome-search",
    "devtools",
    "edge",
    "moz-extension",
    "view-source",
];

/// Extracts the hostname from a tab URL. Unparseable or host-less URLs map to
/// [UNKNOWN_DOMAIN] instead of failing.
pub fn domain_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_owned))
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| UNKNOWN_DOMAIN.to_owned())
}

/// Browser internal pages (new tab, settings, extension pages) can't be attributed.
pub fn is_internal_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(url) => INTERNAL_SCHEMES.contains(&url.scheme()),
        Err(_) => false,
    }
}
