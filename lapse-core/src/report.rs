// Report generation from database

use crate::data::{Database, Project};
use chrono::{DateTime, Utc};
use rusqlite::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str =
    "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub project: Project,
    pub summary: ReportSummary,
    pub expired_only: bool,
    pub pages: Vec<PageEntry>,
    pub domains: Vec<DomainEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub pages_crawled: usize,
    pub pages_failed: usize,
    pub domains_checked: usize,
    pub domains_expired: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageEntry {
    pub url: String,
    pub status: Option<u16>,
    pub crawled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEntry {
    pub domain: String,
    pub is_expired: bool,
    pub checked_at: DateTime<Utc>,
}

/// Collect everything a report needs for one project.
///
/// With `expired_only`, the domain list holds expired domains only and the
/// page list is left empty. Summary counts always cover the whole project.
pub fn gather_report_data(
    db: &Database,
    project_id: &str,
    expired_only: bool,
) -> Result<ReportData> {
    let project = db
        .get_project(project_id)?
        .ok_or(rusqlite::Error::QueryReturnedNoRows)?;

    let records = db.get_crawled_pages(project_id)?;
    let pages_failed = records.iter().filter(|r| r.is_failure()).count();
    let (domains_checked, domains_expired) = db.count_domains(project_id)?;

    let summary = ReportSummary {
        pages_crawled: records.len(),
        pages_failed,
        domains_checked,
        domains_expired,
    };

    let pages = if expired_only {
        Vec::new()
    } else {
        records
            .into_iter()
            .map(|r| PageEntry {
                url: r.url,
                status: r.http_status,
                crawled_at: r.timestamp,
            })
            .collect()
    };

    let domains = db
        .get_checked_domains(project_id)?
        .into_iter()
        .filter(|d| !expired_only || d.is_expired)
        .map(|d| DomainEntry {
            domain: d.domain,
            is_expired: d.is_expired,
            checked_at: d.timestamp,
        })
        .collect();

    Ok(ReportData {
        project,
        summary,
        expired_only,
        pages,
        domains,
    })
}

/// Bucket label for a page status. Pages without a response get their own.
pub fn status_class(status: Option<u16>) -> &'static str {
    match status {
        Some(100..=199) => "1xx",
        Some(200..=299) => "2xx",
        Some(300..=399) => "3xx",
        Some(400..=499) => "4xx",
        Some(500..=599) => "5xx",
        Some(_) => "other",
        None => "no response",
    }
}

pub fn generate_text_report(data: &ReportData) -> String {
    let mut report = String::new();

    // Header
    report.push_str(RULE);
    report.push_str("                         LAPSE EXPIRED DOMAIN REPORT\n");
    report.push_str(RULE);
    report.push('\n');

    report.push_str(&format!("Project:      {} ({})\n", data.project.name, data.project.id));
    report.push_str(&format!("Start URL:    {}\n", data.project.start_url));
    report.push_str(&format!(
        "Created:      {}\n",
        data.project.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    report.push('\n');

    // Summary
    report.push_str(RULE);
    report.push_str("SUMMARY\n");
    report.push_str(RULE);
    report.push('\n');
    report.push_str(&format!("  Pages crawled:    {}\n", data.summary.pages_crawled));
    report.push_str(&format!("  Failed pages:     {}\n", data.summary.pages_failed));
    report.push_str(&format!("  Domains checked:  {}\n", data.summary.domains_checked));
    report.push_str(&format!("  Expired domains:  {}\n", data.summary.domains_expired));
    report.push('\n');

    // Expired domains
    report.push_str(RULE);
    report.push_str("EXPIRED DOMAINS\n");
    report.push_str(RULE);
    report.push('\n');

    let expired: Vec<&DomainEntry> = data.domains.iter().filter(|d| d.is_expired).collect();
    if expired.is_empty() {
        report.push_str("  (none)\n");
    }
    for domain in &expired {
        report.push_str(&format!(
            "  [EXPIRED] {}  (checked {})\n",
            domain.domain,
            domain.checked_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    report.push('\n');

    if !data.expired_only {
        let alive: Vec<&DomainEntry> = data.domains.iter().filter(|d| !d.is_expired).collect();
        if !alive.is_empty() {
            report.push_str(RULE);
            report.push_str("LIVE DOMAINS\n");
            report.push_str(RULE);
            report.push('\n');
            for domain in alive {
                report.push_str(&format!("  [alive]   {}\n", domain.domain));
            }
            report.push('\n');
        }

        report.push_str(RULE);
        report.push_str("PAGES\n");
        report.push_str(RULE);
        report.push('\n');
        report.push_str(&pages_by_status_class(&data.pages));
    }

    report.push_str(RULE);
    report.push_str("\nGenerated by Lapse\n\n");

    report
}

fn pages_by_status_class(pages: &[PageEntry]) -> String {
    if pages.is_empty() {
        return "  (no pages crawled)\n\n".to_string();
    }

    let mut groups: BTreeMap<&'static str, Vec<&PageEntry>> = BTreeMap::new();
    for page in pages {
        groups.entry(status_class(page.status)).or_default().push(page);
    }

    let mut result = String::new();
    for (class, entries) in groups {
        result.push_str(&format!("## {} ({} pages)\n", class, entries.len()));
        for page in entries {
            let status = page
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "---".to_string());
            result.push_str(&format!("  {} {}\n", status, page.url));
        }
        result.push('\n');
    }

    result
}

pub fn generate_json_report(data: &ReportData) -> Result<String, serde_json::Error> {
    let pages = (!data.expired_only).then_some(&data.pages);
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "Lapse",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": Utc::now().to_rfc3339(),
                "format": "json",
                "expired_only": data.expired_only
            },
            "project": data.project,
            "summary": data.summary,
            "domains": data.domains,
            "pages": pages
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn generate_report(data: &ReportData, format: ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(data)),
        ReportFormat::Json => generate_json_report(data),
    }
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
