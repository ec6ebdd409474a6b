use crate::transport::report::{TransferRecord, LOG_TIME_FORMAT};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// 审计动作
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Send,
    Receive,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Send => "send",
            AuditAction::Receive => "receive",
        }
    }
}

/// 一条文件级审计记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub source_file: String,
    pub destination_file: String,
    /// 传输方式（sftp / rsync / s3）
    pub system: String,
    pub action: AuditAction,
    pub metadata: serde_json::Value,
    pub timestamp: NaiveDateTime,
}

impl AuditEntry {
    pub fn from_record(record: &TransferRecord, system: &str, action: AuditAction) -> Self {
        Self {
            source_file: record.source.clone(),
            destination_file: record.destination.clone(),
            system: system.to_string(),
            action,
            metadata: serde_json::Value::Object(Default::default()),
            timestamp: record.timestamp,
        }
    }
}

/// 数据库行结构
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditRow {
    pub source_file: String,
    pub destination_file: String,
    pub system: String,
    pub action: String,
    pub metadata: String,
    pub timestamp: String,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = anyhow::Error;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let action = match row.action.as_str() {
            "send" => AuditAction::Send,
            "receive" => AuditAction::Receive,
            other => anyhow::bail!("未知的审计动作: {}", other),
        };

        Ok(Self {
            source_file: row.source_file,
            destination_file: row.destination_file,
            system: row.system,
            action,
            metadata: serde_json::from_str(&row.metadata)?,
            timestamp: NaiveDateTime::parse_from_str(&row.timestamp, LOG_TIME_FORMAT)?,
        })
    }
}
