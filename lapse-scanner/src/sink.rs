use crate::error::Result;
use crate::result::{CrawlRecord, DomainVerdict};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Append-only destination for crawl output.
///
/// The engine logs a failed write and moves on; retrying is up to the
/// implementation.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn record_page(&self, record: &CrawlRecord) -> Result<()>;

    async fn record_domain_verdict(&self, verdict: &DomainVerdict) -> Result<()>;
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pages: Mutex<Vec<CrawlRecord>>,
    verdicts: Mutex<Vec<DomainVerdict>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pages(&self) -> Vec<CrawlRecord> {
        self.pages.lock().await.clone()
    }

    pub async fn verdicts(&self) -> Vec<DomainVerdict> {
        self.verdicts.lock().await.clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn record_page(&self, record: &CrawlRecord) -> Result<()> {
        self.pages.lock().await.push(record.clone());
        Ok(())
    }

    async fn record_domain_verdict(&self, verdict: &DomainVerdict) -> Result<()> {
        self.verdicts.lock().await.push(verdict.clone());
        Ok(())
    }
}
