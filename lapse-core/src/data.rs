use chrono::{DateTime, Utc};
use lapse_scanner::result::{CrawlRecord, DomainVerdict};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result, Row, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub struct Database {
    conn: Connection,
}

/// A site under audit. Crawl output is grouped by project id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub start_url: String,
    pub created_at: DateTime<Utc>,
}

fn parse_timestamp(row: &Row, idx: usize) -> Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl Database {
    pub fn drop(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)?;
        // WAL sidecar files may outlive the last connection
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = path.as_os_str().to_owned();
            sidecar.push(suffix);
            match fs::remove_file(&sidecar) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Crawl tasks write while reports read
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    start_url TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- One row per fetched page, status is NULL when no response came back
CREATE TABLE IF NOT EXISTS crawled_pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id TEXT NOT NULL,
    url TEXT NOT NULL,
    crawled_at TEXT NOT NULL,
    status INTEGER,
    FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_crawled_pages_project ON crawled_pages(project_id);

-- One row per external domain checked in a run
CREATE TABLE IF NOT EXISTS checked_domains (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id TEXT NOT NULL,
    domain TEXT NOT NULL,
    checked_at TEXT NOT NULL,
    is_expired BOOLEAN NOT NULL,
    FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_checked_domains_project ON checked_domains(project_id);
CREATE INDEX IF NOT EXISTS idx_checked_domains_expired ON checked_domains(project_id, is_expired);
            ",
        )?;
        Ok(())
    }

    // Project management
    pub fn create_project(&self, name: &str, start_url: &str) -> Result<String> {
        let project_id = uuid::Uuid::new_v4().to_string();

        self.conn.execute(
            "INSERT INTO projects (id, name, start_url, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![&project_id, name, start_url, Utc::now().to_rfc3339()],
        )?;

        Ok(project_id)
    }

    /// Create the project row if it is missing. Returns true if it was created.
    pub fn ensure_project(&self, project_id: &str, start_url: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO projects (id, name, start_url, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![project_id, project_id, start_url, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, start_url, created_at FROM projects WHERE id = ?1")?;

        stmt.query_row(params![project_id], |row| {
            Ok(Project {
                id: row.get(0)?,
                name: row.get(1)?,
                start_url: row.get(2)?,
                created_at: parse_timestamp(row, 3)?,
            })
        })
        .optional()
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, start_url, created_at FROM projects ORDER BY created_at, id",
        )?;

        let projects = stmt
            .query_map([], |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    start_url: row.get(2)?,
                    created_at: parse_timestamp(row, 3)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(projects)
    }

    // Crawl output
    pub fn insert_crawled_page(&self, record: &CrawlRecord) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO crawled_pages (project_id, url, crawled_at, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                &record.project_id,
                &record.url,
                record.timestamp.to_rfc3339(),
                record.http_status,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_checked_domain(&self, verdict: &DomainVerdict) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO checked_domains (project_id, domain, checked_at, is_expired) VALUES (?1, ?2, ?3, ?4)",
            params![
                &verdict.project_id,
                &verdict.domain,
                verdict.timestamp.to_rfc3339(),
                verdict.is_expired,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_crawled_pages(&self, project_id: &str) -> Result<Vec<CrawlRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT project_id, url, crawled_at, status FROM crawled_pages WHERE project_id = ?1 ORDER BY id",
        )?;

        let pages = stmt
            .query_map(params![project_id], |row| {
                Ok(CrawlRecord {
                    project_id: row.get(0)?,
                    url: row.get(1)?,
                    timestamp: parse_timestamp(row, 2)?,
                    http_status: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(pages)
    }

    pub fn get_checked_domains(&self, project_id: &str) -> Result<Vec<DomainVerdict>> {
        let mut stmt = self.conn.prepare(
            "SELECT project_id, domain, checked_at, is_expired FROM checked_domains WHERE project_id = ?1 ORDER BY domain, id",
        )?;

        let domains = stmt
            .query_map(params![project_id], |row| {
                Ok(DomainVerdict {
                    project_id: row.get(0)?,
                    domain: row.get(1)?,
                    timestamp: parse_timestamp(row, 2)?,
                    is_expired: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(domains)
    }

    pub fn count_pages(&self, project_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM crawled_pages WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Total and expired domain counts for a project.
    pub fn count_domains(&self, project_id: &str) -> Result<(usize, usize)> {
        let (total, expired): (i64, Option<i64>) = self.conn.query_row(
            "SELECT COUNT(*), SUM(is_expired) FROM checked_domains WHERE project_id = ?1",
            params![project_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total as usize, expired.unwrap_or(0) as usize))
    }
}
