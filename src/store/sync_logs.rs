//! Sync-log collection access. Append-only: rows are created at run start
//! and mutated only by the owning orchestrator until terminal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::Result;
use crate::models::{SyncLog, SyncMode, SyncStatus};

#[derive(Debug, Clone, Default)]
pub struct SyncLogFilter {
    pub status: Option<SyncStatus>,
    pub mode: Option<SyncMode>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// 1-based.
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: u64,
    pub total_pages: u64,
}

#[derive(Debug)]
pub struct SyncLogPage {
    pub records: Vec<SyncLog>,
    pub pagination: Pagination,
}

pub struct SyncLogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SyncLogStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn create(&self, log: &SyncLog) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sync_logs (log_id, sync_type, status, start_time, end_time, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                log.log_id,
                log.sync_type.as_str(),
                log.status.as_str(),
                log.start_time.timestamp_millis(),
                log.end_time.map(|t| t.timestamp_millis()),
                serde_json::to_string(log)?,
            ],
        )?;
        Ok(())
    }

    /// Persists the orchestrator's current snapshot of a run.
    pub fn save(&self, log: &SyncLog) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sync_logs SET sync_type = ?2, status = ?3, start_time = ?4,
                    end_time = ?5, doc = ?6
             WHERE log_id = ?1",
            params![
                log.log_id,
                log.sync_type.as_str(),
                log.status.as_str(),
                log.start_time.timestamp_millis(),
                log.end_time.map(|t| t.timestamp_millis()),
                serde_json::to_string(log)?,
            ],
        )?;
        Ok(())
    }

    /// Targeted status transition, merging in updated stats and appending
    /// error entries. Terminal transitions stamp `end_time`.
    pub fn update_status(
        &self,
        log_id: &str,
        status: SyncStatus,
        stats: Option<crate::models::SyncStats>,
        errors: Option<Vec<crate::models::SyncErrorLog>>,
    ) -> Result<bool> {
        let Some(mut log) = self.find_by_id(log_id)? else {
            return Ok(false);
        };
        log.status = status;
        if let Some(stats) = stats {
            log.stats = stats;
        }
        if let Some(errors) = errors {
            log.error_logs.extend(errors);
        }
        if status.is_terminal() && log.end_time.is_none() {
            log.end_time = Some(Utc::now());
        }
        self.save(&log)?;
        Ok(true)
    }

    pub fn find_by_id(&self, log_id: &str) -> Result<Option<SyncLog>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM sync_logs WHERE log_id = ?1",
                params![log_id],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| serde_json::from_str(&d).map_err(Into::into))
            .transpose()
    }

    pub fn find_recent(&self, limit: usize) -> Result<Vec<SyncLog>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT doc FROM sync_logs ORDER BY start_time DESC LIMIT ?1",
        )?;
        let docs = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        docs.iter()
            .map(|d| serde_json::from_str(d).map_err(Into::into))
            .collect()
    }

    /// Most recent run that finished `completed`; the incremental cutoff
    /// source.
    pub fn last_successful(&self) -> Result<Option<SyncLog>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM sync_logs WHERE status = 'completed'
                 ORDER BY start_time DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| serde_json::from_str(&d).map_err(Into::into))
            .transpose()
    }

    pub fn find_filtered(&self, filter: &SyncLogFilter) -> Result<SyncLogPage> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(status) = filter.status {
            clauses.push(format!("status = ?{}", args.len() + 1));
            args.push(status.as_str().to_string().into());
        }
        if let Some(mode) = filter.mode {
            clauses.push(format!("sync_type = ?{}", args.len() + 1));
            args.push(mode.as_str().to_string().into());
        }
        if let Some(start) = filter.start_date {
            clauses.push(format!("start_time >= ?{}", args.len() + 1));
            args.push(start.timestamp_millis().into());
        }
        if let Some(end) = filter.end_date {
            clauses.push(format!("start_time <= ?{}", args.len() + 1));
            args.push(end.timestamp_millis().into());
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let limit = filter.limit.max(1);
        let page = filter.page.max(1);
        let offset = (page - 1) * limit;

        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM sync_logs {where_clause}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT doc FROM sync_logs {where_clause}
             ORDER BY start_time DESC LIMIT {limit} OFFSET {offset}"
        ))?;
        let docs = stmt
            .query_map(params_from_iter(args.iter()), |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        let records = docs
            .iter()
            .map(|d| serde_json::from_str(d).map_err(Into::into))
            .collect::<Result<Vec<SyncLog>>>()?;

        let total = total as u64;
        Ok(SyncLogPage {
            records,
            pagination: Pagination {
                page,
                limit,
                total,
                total_pages: total.div_ceil(limit as u64),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use chrono::Duration;

    fn log(id: &str, mode: SyncMode, status: SyncStatus, start: DateTime<Utc>) -> SyncLog {
        let mut log = SyncLog::open(id.to_string(), mode, serde_json::json!({}));
        log.status = status;
        log.start_time = start;
        log
    }

    #[test]
    fn last_successful_skips_failures() {
        let store = Database::open_in_memory().unwrap().sync_logs();
        let base = Utc::now();

        store
            .create(&log("s1", SyncMode::Full, SyncStatus::Completed, base))
            .unwrap();
        store
            .create(&log(
                "s2",
                SyncMode::Incremental,
                SyncStatus::Failed,
                base + Duration::minutes(10),
            ))
            .unwrap();

        let last = store.last_successful().unwrap().unwrap();
        assert_eq!(last.log_id, "s1");
    }

    #[test]
    fn update_status_merges_and_stamps_terminal_end() {
        let store = Database::open_in_memory().unwrap().sync_logs();
        let log = log("s1", SyncMode::Full, SyncStatus::Running, Utc::now());
        store.create(&log).unwrap();

        let mut stats = crate::models::SyncStats::default();
        stats.total_records = 7;
        let updated = store
            .update_status(
                "s1",
                SyncStatus::Completed,
                Some(stats),
                Some(vec![crate::models::SyncErrorLog::new(
                    "store",
                    "one flaky write",
                    None,
                )]),
            )
            .unwrap();
        assert!(updated);

        let reloaded = store.find_by_id("s1").unwrap().unwrap();
        assert_eq!(reloaded.status, SyncStatus::Completed);
        assert_eq!(reloaded.stats.total_records, 7);
        assert_eq!(reloaded.error_logs.len(), 1);
        assert!(reloaded.end_time.is_some());

        assert!(!store
            .update_status("missing", SyncStatus::Failed, None, None)
            .unwrap());
    }

    #[test]
    fn filtered_query_paginates() {
        let store = Database::open_in_memory().unwrap().sync_logs();
        let base = Utc::now();
        for i in 0..5 {
            let status = if i % 2 == 0 {
                SyncStatus::Completed
            } else {
                SyncStatus::Failed
            };
            store
                .create(&log(
                    &format!("s{i}"),
                    SyncMode::Full,
                    status,
                    base + Duration::minutes(i),
                ))
                .unwrap();
        }

        let page = store
            .find_filtered(&SyncLogFilter {
                status: Some(SyncStatus::Completed),
                page: 1,
                limit: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.pagination.total_pages, 2);
        assert_eq!(page.records.len(), 2);
        // Newest first.
        assert_eq!(page.records[0].log_id, "s4");

        let page2 = store
            .find_filtered(&SyncLogFilter {
                status: Some(SyncStatus::Completed),
                page: 2,
                limit: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page2.records.len(), 1);
        assert_eq!(page2.records[0].log_id, "s0");
    }

    #[test]
    fn date_window_filter() {
        let store = Database::open_in_memory().unwrap().sync_logs();
        let base = Utc::now();
        for i in 0..3 {
            store
                .create(&log(
                    &format!("s{i}"),
                    SyncMode::Full,
                    SyncStatus::Completed,
                    base + Duration::hours(i),
                ))
                .unwrap();
        }

        let page = store
            .find_filtered(&SyncLogFilter {
                start_date: Some(base + Duration::minutes(30)),
                end_date: Some(base + Duration::minutes(90)),
                page: 1,
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].log_id, "s1");
    }
}
