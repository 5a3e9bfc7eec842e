use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use url::Url;

/// Visited URLs and checked domains for a single run.
///
/// Both sets only grow. The only way in is the check-and-insert pair below, so
/// two page tasks discovering the same URL at the same moment cannot both be
/// told to schedule it.
#[derive(Debug, Default)]
pub struct Frontier {
    visited: Mutex<HashSet<String>>,
    checked: Mutex<HashSet<String>>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the normalized form of `url` had not been seen before.
    pub fn enqueue_if_new(&self, url: &str) -> bool {
        let Some(key) = normalize_url(url) else {
            debug!("Not enqueueing unparseable URL {}", url);
            return false;
        };
        lock(&self.visited).insert(key)
    }

    /// Returns true the first time a given domain is offered.
    pub fn mark_checked_if_new(&self, domain: &str) -> bool {
        let key = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        if key.is_empty() {
            return false;
        }
        lock(&self.checked).insert(key)
    }

    pub fn visited_count(&self) -> usize {
        lock(&self.visited).len()
    }

    pub fn checked_count(&self) -> usize {
        lock(&self.checked).len()
    }
}

// A panic while holding the lock cannot leave a HashSet half-inserted.
fn lock(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Frontier key for a URL: lowercased scheme and host, default port and
/// fragment dropped, trailing slashes on the path ignored.
pub fn normalize_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();

    let mut key = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        key.push_str(&format!(":{}", port));
    }
    key.push_str(url.path().trim_end_matches('/'));
    if let Some(query) = url.query() {
        key.push('?');
        key.push_str(query);
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_normalize_ignores_trailing_slash_and_fragment() {
        let plain = normalize_url("https://a.example/docs").unwrap();
        assert_eq!(normalize_url("https://a.example/docs/").unwrap(), plain);
        assert_eq!(normalize_url("https://a.example/docs#intro").unwrap(), plain);
        assert_eq!(normalize_url("https://a.example/docs/#intro").unwrap(), plain);
    }

    #[test]
    fn test_normalize_root_with_and_without_slash() {
        assert_eq!(
            normalize_url("https://a.example").unwrap(),
            normalize_url("https://a.example/").unwrap()
        );
    }

    #[test]
    fn test_normalize_lowercases_scheme_and_host() {
        assert_eq!(
            normalize_url("HTTPS://A.Example/Path").unwrap(),
            "https://a.example/Path"
        );
    }

    #[test]
    fn test_normalize_drops_default_port_keeps_others() {
        assert_eq!(
            normalize_url("http://a.example:80/x").unwrap(),
            "http://a.example/x"
        );
        assert_eq!(
            normalize_url("http://a.example:8080/x").unwrap(),
            "http://a.example:8080/x"
        );
    }

    #[test]
    fn test_normalize_keeps_query() {
        assert_eq!(
            normalize_url("https://a.example/search/?q=rust#top").unwrap(),
            "https://a.example/search?q=rust"
        );
        assert_ne!(
            normalize_url("https://a.example/search?q=rust"),
            normalize_url("https://a.example/search?q=go")
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert_eq!(normalize_url("not a url"), None);
        assert_eq!(normalize_url("mailto:someone@a.example"), None);
    }

    #[test]
    fn test_enqueue_if_new_is_true_once_per_key() {
        let frontier = Frontier::new();
        assert!(frontier.enqueue_if_new("https://a.example/y"));
        assert!(!frontier.enqueue_if_new("https://a.example/y"));
        assert!(!frontier.enqueue_if_new("https://a.example/y/"));
        assert!(!frontier.enqueue_if_new("https://A.EXAMPLE/y#frag"));
        assert!(frontier.enqueue_if_new("https://a.example/z"));
        assert_eq!(frontier.visited_count(), 2);
    }

    #[test]
    fn test_enqueue_rejects_unparseable() {
        let frontier = Frontier::new();
        assert!(!frontier.enqueue_if_new("::::"));
        assert_eq!(frontier.visited_count(), 0);
    }

    #[test]
    fn test_mark_checked_if_new_is_true_once_per_domain() {
        let frontier = Frontier::new();
        assert!(frontier.mark_checked_if_new("b.other"));
        assert!(!frontier.mark_checked_if_new("b.other"));
        assert!(!frontier.mark_checked_if_new("B.Other"));
        assert!(!frontier.mark_checked_if_new("b.other."));
        assert!(frontier.mark_checked_if_new("c.other"));
        assert!(!frontier.mark_checked_if_new(""));
        assert_eq!(frontier.checked_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_discovery_admits_each_url_once() {
        let frontier = Arc::new(Frontier::new());
        let mut handles = Vec::new();

        // 16 "pages" that all link to the same 50 URLs, written in varying forms
        for page in 0..16 {
            let frontier = frontier.clone();
            handles.push(tokio::spawn(async move {
                let mut admitted = 0;
                for i in 0..50 {
                    let url = if page % 2 == 0 {
                        format!("https://a.example/page{}", i)
                    } else {
                        format!("https://a.example/page{}/#section", i)
                    };
                    if frontier.enqueue_if_new(&url) {
                        admitted += 1;
                    }
                    if frontier.mark_checked_if_new(&format!("d{}.other", i % 5)) {
                        admitted += 1000;
                    }
                    tokio::task::yield_now().await;
                }
                admitted
            }));
        }

        let total: usize = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .sum();

        assert_eq!(total, 50 + 5 * 1000);
        assert_eq!(frontier.visited_count(), 50);
        assert_eq!(frontier.checked_count(), 5);
    }
}
