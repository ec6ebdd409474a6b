//! 命令行子命令

pub mod ledger;
pub mod receive;
pub mod send;

use crate::config::PipelineConfig;
use crate::core::SyncEngine;
use crate::db::SqliteAuditLog;
use std::sync::Arc;
use tracing::info;

/// 构建引擎，配置了审计数据库时同时打开
pub async fn engine(config: PipelineConfig) -> anyhow::Result<SyncEngine> {
    let audit_db = config.audit_db.clone();
    let engine = SyncEngine::new(config);

    Ok(match audit_db {
        Some(path) => {
            info!("审计数据库: {}", path.display());
            engine.with_audit(Arc::new(SqliteAuditLog::open(&path).await?))
        }
        None => engine,
    })
}
