//! 审计记录
//!
//! 每个传输的文件写一行 `audit_log`。审计是可选的，没有配置数据库时用 `NoopAudit`。

pub mod models;
pub use models::*;

use crate::error::{Result, SyncError};
use crate::transport::report::{TransferReport, LOG_TIME_FORMAT};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use tracing::debug;

pub use sqlx::SqlitePool;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entries: &[AuditEntry]) -> Result<()>;

    /// 报告中的每条记录对应一条审计
    async fn record_report(&self, report: &TransferReport, action: AuditAction) -> Result<()> {
        let system = report.transport.as_str();
        let entries: Vec<AuditEntry> = report
            .records
            .iter()
            .map(|r| AuditEntry::from_record(r, system, action))
            .collect();
        self.record(&entries).await
    }
}

/// 不记录审计
pub struct NoopAudit;

#[async_trait]
impl AuditSink for NoopAudit {
    async fn record(&self, _entries: &[AuditEntry]) -> Result<()> {
        Ok(())
    }
}

pub struct SqliteAuditLog {
    pool: SqlitePool,
}

impl SqliteAuditLog {
    /// 打开（必要时创建）数据库并执行迁移
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| SyncError::Config(format!("数据库路径无效: {}", path.display())))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&format!("sqlite:{}?mode=rwc", path_str))
            .await?;
        Self::with_pool(pool).await
    }

    /// 内存数据库，单连接保证所有查询看到同一个库
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn entries(&self) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT source_file, destination_file, system, action, metadata, timestamp FROM audit_log ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                AuditEntry::try_from(row)
                    .map_err(|e| SyncError::Config(format!("审计记录损坏: {:#}", e)))
            })
            .collect()
    }
}

#[async_trait]
impl AuditSink for SqliteAuditLog {
    async fn record(&self, entries: &[AuditEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO audit_log (source_file, destination_file, system, action, metadata, timestamp)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.source_file)
            .bind(&entry.destination_file)
            .bind(&entry.system)
            .bind(entry.action.as_str())
            .bind(entry.metadata.to_string())
            .bind(entry.timestamp.format(LOG_TIME_FORMAT).to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("写入审计记录 {} 条", entries.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::report::TransferRecord;
    use crate::transport::TransportKind;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_record_report() {
        let audit = SqliteAuditLog::in_memory().await.unwrap();

        let mut report = TransferReport::new(TransportKind::Rsync);
        report.push(TransferRecord {
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            source: "PHOENIX/GENERAL/S1/a.csv".to_string(),
            destination: "user@host:/mirror/PHOENIX/GENERAL/S1/a.csv".to_string(),
        });

        audit.record_report(&report, AuditAction::Send).await.unwrap();
        audit
            .record_report(&TransferReport::new(TransportKind::Sftp), AuditAction::Receive)
            .await
            .unwrap();

        let entries = audit.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].system, "rsync");
        assert_eq!(entries[0].action, AuditAction::Send);
        assert_eq!(entries[0].timestamp, report.records[0].timestamp);
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db/audit.sqlite");
        {
            let audit = SqliteAuditLog::open(&path).await.unwrap();
            let entry = AuditEntry {
                source_file: "a".to_string(),
                destination_file: "b".to_string(),
                system: "s3".to_string(),
                action: AuditAction::Send,
                metadata: serde_json::json!({"bucket": "ampscz-dev"}),
                timestamp: NaiveDate::from_ymd_opt(2024, 3, 1)
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap(),
            };
            audit.record(&[entry]).await.unwrap();
        }

        let reopened = SqliteAuditLog::open(&path).await.unwrap();
        let entries = reopened.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metadata["bucket"], "ampscz-dev");
    }
}
