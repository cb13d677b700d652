//! Link harvesting for the crawl path.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use url::Url;

use super::target::normalize_url;

lazy_static! {
    // Quoted or bare href attribute values
    static ref HREF_REGEX: Regex = Regex::new(
        r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'<>]+))"#
    ).unwrap();
}

/// Host of `url` without a leading `www.`, lower-cased.
pub fn site_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Whether two URLs belong to the same site (a leading `www.` is ignored).
pub fn same_site(a: &str, b: &str) -> bool {
    match (site_host(a), site_host(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Every `href` in `html`, resolved against `base` and normalized, in
/// document order without duplicates.
pub fn extract_links(base: &str, html: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    HREF_REGEX
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|m| m.as_str().trim())
        .filter(|href| !href.is_empty() && !href.starts_with('#'))
        .filter_map(|href| base.join(href).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .filter_map(|url| normalize_url(url.as_str()))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Links of `html` that stay on the same site as `site`.
pub fn same_site_links(base: &str, html: &str, site: &str) -> Vec<String> {
    extract_links(base, html)
        .into_iter()
        .filter(|link| site_host(link).as_deref() == Some(site))
        .collect()
}
