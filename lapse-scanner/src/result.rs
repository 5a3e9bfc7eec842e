use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A URL waiting in the pending queue to be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTarget {
    pub url: String,
    pub discovered_from: Option<String>,
}

impl CrawlTarget {
    pub fn seed(url: String) -> Self {
        Self {
            url,
            discovered_from: None,
        }
    }

    pub fn discovered(url: String, parent: &str) -> Self {
        Self {
            url,
            discovered_from: Some(parent.to_string()),
        }
    }
}

/// One fetched page. `http_status` is `None` when no response was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRecord {
    pub project_id: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub http_status: Option<u16>,
}

impl CrawlRecord {
    pub fn new(project_id: &str, url: &str, http_status: Option<u16>) -> Self {
        Self {
            project_id: project_id.to_string(),
            url: url.to_string(),
            timestamp: Utc::now(),
            http_status,
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self.http_status, Some(200..=399))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Expired,
    Alive,
}

impl Verdict {
    pub fn is_expired(self) -> bool {
        self == Verdict::Expired
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Expired => "expired",
            Verdict::Alive => "alive",
        }
    }
}

/// The liveness verdict for one external domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainVerdict {
    pub project_id: String,
    pub domain: String,
    pub timestamp: DateTime<Utc>,
    pub is_expired: bool,
}

impl DomainVerdict {
    pub fn new(project_id: &str, domain: &str, verdict: Verdict) -> Self {
        Self {
            project_id: project_id.to_string(),
            domain: domain.to_string(),
            timestamp: Utc::now(),
            is_expired: verdict.is_expired(),
        }
    }
}

/// What the fetch collaborator hands back for a URL.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    /// Pages that do not declare a content type are parsed as HTML too.
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_ref()
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(true)
    }
}

/// Totals for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub pages_crawled: usize,
    pub pages_failed: usize,
    pub domains_checked: usize,
    pub domains_expired: usize,
    pub stopped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_covers_errors_and_missing_responses() {
        assert!(!CrawlRecord::new("p", "https://a.example/", Some(200)).is_failure());
        assert!(!CrawlRecord::new("p", "https://a.example/", Some(301)).is_failure());
        assert!(CrawlRecord::new("p", "https://a.example/", Some(404)).is_failure());
        assert!(CrawlRecord::new("p", "https://a.example/", Some(503)).is_failure());
        assert!(CrawlRecord::new("p", "https://a.example/", None).is_failure());
    }

    #[test]
    fn test_verdict_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Verdict::Expired).unwrap(),
            "\"expired\""
        );
        let verdict: Verdict = serde_json::from_str("\"alive\"").unwrap();
        assert_eq!(verdict, Verdict::Alive);
        assert!(DomainVerdict::new("p", "b.other", Verdict::Expired).is_expired);
    }

    #[test]
    fn test_html_detection_ignores_charset() {
        let page = FetchedPage {
            status: 200,
            final_url: "https://a.example/".to_string(),
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: String::new(),
        };
        assert!(page.is_html());
        assert!(page.is_success());

        let pdf = FetchedPage {
            content_type: Some("application/pdf".to_string()),
            ..page
        };
        assert!(!pdf.is_html());
    }

    #[test]
    fn test_missing_content_type_is_treated_as_html() {
        let page = FetchedPage {
            status: 200,
            final_url: "https://a.example/legacy".to_string(),
            content_type: None,
            body: r#"<a href="/next">next</a>"#.to_string(),
        };
        assert!(page.is_html());
    }
}
