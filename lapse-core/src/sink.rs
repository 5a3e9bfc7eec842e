use crate::data::Database;
use async_trait::async_trait;
use lapse_scanner::error::{Result, ScanError};
use lapse_scanner::result::{CrawlRecord, DomainVerdict};
use lapse_scanner::sink::RecordSink;
use std::sync::{Arc, Mutex};

/// Writes crawl output to the project database.
///
/// SQLite calls block, so each write runs on the blocking pool behind a
/// shared connection.
pub struct SqliteSink {
    db: Arc<Mutex<Database>>,
}

impl SqliteSink {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    async fn write<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&Database) -> rusqlite::Result<i64> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let db = db
                .lock()
                .map_err(|_| ScanError::Persistence("database lock poisoned".to_string()))?;
            op(&db)
                .map(|_| ())
                .map_err(|e| ScanError::Persistence(e.to_string()))
        })
        .await?
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn record_page(&self, record: &CrawlRecord) -> Result<()> {
        let record = record.clone();
        self.write(move |db| db.insert_crawled_page(&record)).await
    }

    async fn record_domain_verdict(&self, verdict: &DomainVerdict) -> Result<()> {
        let verdict = verdict.clone();
        self.write(move |db| db.insert_checked_domain(&verdict)).await
    }
}
