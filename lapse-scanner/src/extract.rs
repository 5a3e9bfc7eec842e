use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Internal,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    pub url: String,
    pub domain: String,
    pub kind: LinkKind,
}

/// Pulls hyperlinks out of a page and sorts them by domain.
///
/// Holds no state between calls; every page gets a fresh pass.
pub struct LinkExtractor;

impl LinkExtractor {
    /// Every `a[href]` in `html`, resolved against `base_url`.
    ///
    /// Links whose host equals the host of `base_url` are internal, everything
    /// else is external. References that cannot be resolved to an http(s) URL
    /// with a host are skipped.
    pub fn extract(base_url: &str, html: &str) -> Vec<ExtractedLink> {
        let Ok(base) = Url::parse(base_url) else {
            debug!("Cannot extract links, base URL {} does not parse", base_url);
            return Vec::new();
        };
        let Some(base_domain) = domain_of(&base) else {
            return Vec::new();
        };
        let Ok(link_selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };

        let document = Html::parse_document(html);
        let mut links = Vec::new();

        for element in document.select(&link_selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let Some(resolved) = resolve_url(&base, href) else {
                debug!("Skipping link {:?} on {}", href, base_url);
                continue;
            };
            let Some(domain) = domain_of(&resolved) else {
                debug!("Skipping host-less link {} on {}", resolved, base_url);
                continue;
            };

            let kind = if domain == base_domain {
                LinkKind::Internal
            } else {
                LinkKind::External
            };
            links.push(ExtractedLink {
                url: resolved.to_string(),
                domain,
                kind,
            });
        }

        links
    }
}

/// Lowercased host of a URL, without a trailing root dot.
pub fn domain_of(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() { None } else { Some(host) }
}

fn resolve_url(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    // Skip empty, in-page anchors and non-navigational schemes
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let mut resolved = base.join(href).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}
