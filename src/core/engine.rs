//! 同步引擎：一次发送 / 接收调用的完整流程
//!
//! 发送（压缩包方式）：
//! 1. 读取发送历史，以单次取得的当前时间作为窗口终点
//! 2. 扫描窗口内变更的文件并打包
//! 3. 推送压缩包，成功后才写入历史
//! 4. 追加台账、写审计

use crate::config::PipelineConfig;
use crate::core::archive;
use crate::core::history::{now_micros, TransferHistory};
use crate::core::layout::ArchiveLayout;
use crate::core::ledger::{LedgerUpdate, TransferLedgerBuilder};
use crate::core::receiver::Receiver;
use crate::core::scanner::{ChangeSetFinder, ScanScope, TransferWindow};
use crate::db::{AuditAction, AuditSink, NoopAudit};
use crate::error::{Result, SyncError};
use crate::storage::create_storage;
use crate::transport::sftp::{self, BundleSink, SftpTransport};
use crate::transport::{
    ObjectStoreSync, RsyncTransport, TransferReport, TransportKind, TransportStrategy,
    ZoneSyncOptions,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// 发送参数
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub scope: ScanScope,
    /// 对象存储方式允许的研究，空表示全部
    pub studies: Vec<String>,
    /// 对象存储方式启用的数据源，空表示全部
    pub sources: Vec<String>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            scope: ScanScope::General,
            studies: Vec::new(),
            sources: Vec::new(),
        }
    }
}

/// 发送报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReport {
    pub transport: TransportKind,
    pub started_at: DateTime<Utc>,
    /// 窗口内变更的文件数（压缩包方式）
    pub files_changed: usize,
    pub files_transferred: usize,
    pub ledger_rows: usize,
    pub duration_ms: u64,
}

fn join_error(e: tokio::task::JoinError) -> SyncError {
    SyncError::Io(std::io::Error::other(e))
}

pub struct SyncEngine {
    config: PipelineConfig,
    audit: Arc<dyn AuditSink>,
}

impl SyncEngine {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            audit: Arc::new(NoopAudit),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn layout(&self) -> ArchiveLayout {
        self.config.layout()
    }

    fn ledger(&self) -> TransferLedgerBuilder {
        TransferLedgerBuilder::new(self.layout())
    }

    /// 按配置构建传输策略，凭据缺失在任何传输开始前报错
    pub async fn build_strategy(&self, kind: TransportKind) -> Result<TransportStrategy> {
        let strategy = match kind {
            TransportKind::Sftp => {
                TransportStrategy::Sftp(Box::new(SftpTransport::from_keyring(self.config.sftp()?)?))
            }
            TransportKind::Rsync => TransportStrategy::Rsync(RsyncTransport::from_keyring(
                self.config.rsync()?,
                self.layout(),
                &self.config.rsync_binary,
            )?),
            TransportKind::ObjectStore => {
                let storage = create_storage(&self.config.object_store)
                    .await
                    .map_err(|e| SyncError::Config(format!("{:#}", e)))?;
                TransportStrategy::ObjectStore(ObjectStoreSync::new(
                    storage,
                    self.layout(),
                    self.config.transfer_log_path(),
                ))
            }
        };
        Ok(strategy)
    }

    pub async fn send(&self, strategy: &TransportStrategy, options: &SendOptions) -> Result<SendReport> {
        let started = Instant::now();
        let started_at = Utc::now();
        let root = self.config.phoenix_root.clone();
        if !root.is_dir() {
            return Err(SyncError::RootNotFound(root));
        }

        info!("开始发送: {} ({:?})", strategy.kind(), options.scope);

        let (files_changed, report, ledger) = match strategy {
            TransportStrategy::Sftp(sink) => self.send_bundle(sink.as_ref(), options.scope).await?,
            TransportStrategy::Rsync(rsync) => {
                // 镜像只覆盖 GENERAL
                if options.scope == ScanScope::Full {
                    return Err(SyncError::Config(
                        "rsync 只镜像非受限区，不支持 --full".to_string(),
                    ));
                }
                let report = rsync.send().await?;
                let ledger = self.ledger().append_report(
                    &report,
                    &self.config.transfer_log_path(),
                    &self.config.transfer_ledger_path(),
                )?;
                (report.len(), report, ledger)
            }
            TransportStrategy::ObjectStore(store) => self.send_object_store(store, options).await?,
        };

        self.audit.record_report(&report, AuditAction::Send).await?;

        let summary = SendReport {
            transport: strategy.kind(),
            started_at,
            files_changed,
            files_transferred: report.len(),
            ledger_rows: match ledger {
                LedgerUpdate::Appended(n) => n,
                LedgerUpdate::NoNewData => 0,
            },
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "发送完成: 变更 {} 个, 传输 {} 个, 台账新增 {} 行, 耗时 {}ms",
            summary.files_changed, summary.files_transferred, summary.ledger_rows, summary.duration_ms
        );
        Ok(summary)
    }

    async fn send_bundle(
        &self,
        sink: &dyn BundleSink,
        scope: ScanScope,
    ) -> Result<(usize, TransferReport, LedgerUpdate)> {
        let layout = self.layout();
        let mut history = TransferHistory::load(&self.config.send_history_path())?;

        let end = now_micros();
        let window = TransferWindow::new(history.last_timestamp(), end)?;

        let finder = ChangeSetFinder::new(layout.clone()).exclude_files([
            self.config.transfer_log_path(),
            self.config.transfer_ledger_path(),
            self.config.send_history_path(),
            self.config.receive_history_path(),
        ]);
        let changed = tokio::task::spawn_blocking(move || finder.find_changed(&window, scope))
            .await
            .map_err(join_error)??;

        let staging = tempfile::tempdir()?;
        let bundle: PathBuf = staging.path().join(format!(
            "phoenix_sync_{}_{}.tar.gz",
            end.format("%Y%m%d%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ));

        let archive_layout = layout.clone();
        let archive_files = changed.clone();
        let archive_path = bundle.clone();
        tokio::task::spawn_blocking(move || {
            archive::archive(&archive_layout, &archive_files, &archive_path)
        })
        .await
        .map_err(join_error)??;

        let report = sftp::deliver(sink, &bundle, &changed).await?;

        // 传输成功后才推进窗口
        history.record(end)?;

        let ledger = self.ledger().append_report(
            &report,
            &self.config.transfer_log_path(),
            &self.config.transfer_ledger_path(),
        )?;
        Ok((changed.len(), report, ledger))
    }

    async fn send_object_store(
        &self,
        store: &ObjectStoreSync,
        options: &SendOptions,
    ) -> Result<(usize, TransferReport, LedgerUpdate)> {
        let mut zone = ZoneSyncOptions {
            protected: false,
            studies: options.studies.clone(),
            sources: options.sources.clone(),
            selective: self.config.s3_selective_sync.clone(),
        };

        let mut report = store.sync_zone(&zone).await?;
        if options.scope == ScanScope::Full {
            zone.protected = true;
            report.extend(store.sync_zone(&zone).await?);
        }

        // 对象存储的台账以上传日志为准
        let ledger = self.ledger().build_or_update(
            store.log_path(),
            &self.config.transfer_ledger_path(),
            false,
        )?;
        Ok((report.len(), report, ledger))
    }

    /// 接收投递目录中的压缩包
    pub async fn receive(&self) -> Result<TransferReport> {
        let drop_dir = self
            .config
            .sftp()?
            .path_in_host
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| SyncError::missing_keyring("lochness_sync", "PATH_IN_HOST"))?;
        self.receive_from(PathBuf::from(drop_dir)).await
    }

    pub async fn receive_from(&self, drop_dir: PathBuf) -> Result<TransferReport> {
        let receiver = Receiver::new(self.layout(), drop_dir);
        let mut history = TransferHistory::load(&self.config.receive_history_path())?;

        let report = tokio::task::spawn_blocking(move || receiver.receive(&mut history))
            .await
            .map_err(join_error)??;

        self.audit.record_report(&report, AuditAction::Receive).await?;
        info!("接收完成: {} 个文件", report.len());
        Ok(report)
    }

    /// 从上传日志构建 / 更新台账
    pub fn update_ledger(&self, rewrite: bool) -> Result<LedgerUpdate> {
        self.ledger().build_or_update(
            &self.config.transfer_log_path(),
            &self.config.transfer_ledger_path(),
            rewrite,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::history::EPOCH_SENTINEL;
    use crate::core::ledger::load_ledger;
    use crate::core::scanner::tests::touch;
    use crate::db::SqliteAuditLog;
    use crate::storage::LocalStorage;
    use crate::transport::LocalDropSink;
    use std::fs;
    use std::path::Path;

    fn old() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2001-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn site(dir: &Path) -> PipelineConfig {
        let root = dir.join("PHOENIX");
        touch(&root.join("GENERAL/StudyA/StudyA_metadata.csv"), "id\n", old());
        touch(&root.join("GENERAL/StudyA/raw/A01/surveys/a.csv"), "a", old());
        touch(&root.join("PROTECTED/StudyA/raw/A01/mri/scan.dcm"), "dcm", old());
        PipelineConfig::new(root)
    }

    #[tokio::test]
    async fn test_first_send_picks_all_and_second_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let drop = dir.path().join("drop");
        let config = site(dir.path());
        let history_path = config.send_history_path();
        assert!(!history_path.exists());

        let engine = SyncEngine::new(config);
        let strategy = TransportStrategy::Sftp(Box::new(LocalDropSink::new(&drop)));

        let first = engine.send(&strategy, &SendOptions::default()).await.unwrap();
        assert_eq!(first.files_changed, 2);
        assert_eq!(first.ledger_rows, 2);

        let second = engine.send(&strategy, &SendOptions::default()).await.unwrap();
        assert_eq!(second.files_changed, 0);
        assert_eq!(second.ledger_rows, 0);

        let history = TransferHistory::load(&history_path).unwrap();
        let ts = history.timestamps();
        assert_eq!(ts.len(), 2);
        assert!(ts[0].timestamp() > EPOCH_SENTINEL);
        assert!(ts[0] < ts[1]);

        assert_eq!(fs::read_dir(&drop).unwrap().count(), 2);
        let ledger = load_ledger(&engine.config().transfer_ledger_path()).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.iter().all(|e| !e.protected));
    }

    #[tokio::test]
    async fn test_full_scope_send_and_receive() {
        let sender_dir = tempfile::tempdir().unwrap();
        let receiver_dir = tempfile::tempdir().unwrap();
        let drop = sender_dir.path().join("drop");

        let audit = Arc::new(SqliteAuditLog::in_memory().await.unwrap());
        let sender = SyncEngine::new(site(sender_dir.path())).with_audit(audit.clone());
        let strategy = TransportStrategy::Sftp(Box::new(LocalDropSink::new(&drop)));
        let options = SendOptions {
            scope: ScanScope::Full,
            ..Default::default()
        };
        let sent = sender.send(&strategy, &options).await.unwrap();
        assert_eq!(sent.files_changed, 3);

        let receiver = SyncEngine::new(PipelineConfig::new(receiver_dir.path().join("PHOENIX")))
            .with_audit(audit.clone());
        let received = receiver.receive_from(drop.clone()).await.unwrap();
        assert_eq!(received.len(), 3);

        let dest = receiver_dir.path().join("PHOENIX");
        assert_eq!(
            fs::read_to_string(dest.join("PROTECTED/StudyA/raw/A01/mri/scan.dcm")).unwrap(),
            "dcm"
        );
        assert!(dest.join("GENERAL/StudyA/StudyA_metadata.csv").is_file());

        let entries = audit.entries().await.unwrap();
        assert_eq!(entries.len(), 6);
        assert_eq!(
            entries.iter().filter(|e| e.action == AuditAction::Receive).count(),
            3
        );
    }

    #[tokio::test]
    async fn test_failed_transport_does_not_advance_history() {
        let dir = tempfile::tempdir().unwrap();
        let config = site(dir.path());
        let history_path = config.send_history_path();

        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let engine = SyncEngine::new(config);
        let strategy = TransportStrategy::Sftp(Box::new(LocalDropSink::new(blocker.join("drop"))));

        assert!(engine.send(&strategy, &SendOptions::default()).await.is_err());
        assert!(!history_path.exists());
    }

    #[tokio::test]
    async fn test_object_store_send_builds_ledger_from_log() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = tempfile::tempdir().unwrap();
        let mut config = site(dir.path());
        config.s3_selective_sync = vec!["mri".to_string()];
        let layout = config.layout();
        let log_path = config.transfer_log_path();

        let engine = SyncEngine::new(config);
        let storage = Arc::new(LocalStorage::new(bucket.path()).unwrap());
        let strategy =
            TransportStrategy::ObjectStore(ObjectStoreSync::new(storage, layout, &log_path));
        let options = SendOptions {
            scope: ScanScope::Full,
            ..Default::default()
        };

        let report = engine.send(&strategy, &options).await.unwrap();
        assert_eq!(report.files_transferred, 3);
        assert_eq!(report.ledger_rows, 3);
        assert!(bucket.path().join("PROTECTED/StudyA/raw/A01/mri/scan.dcm").is_file());

        let ledger = load_ledger(&engine.config().transfer_ledger_path()).unwrap();
        let mri = ledger.iter().find(|e| e.filename == "scan.dcm").unwrap();
        assert!(mri.protected);
        assert_eq!(mri.source, "PHOENIX/PROTECTED/StudyA/raw/A01/mri/scan.dcm");
        assert_eq!(mri.datatypes, "mri");

        // 没有变化时不新增上传，台账也不变
        let again = engine.send(&strategy, &options).await.unwrap();
        assert_eq!(again.files_transferred, 0);
        assert_eq!(again.ledger_rows, 0);
        assert_eq!(engine.update_ledger(false).unwrap(), LedgerUpdate::NoNewData);
    }

    #[tokio::test]
    async fn test_missing_root_and_keyring() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SyncEngine::new(PipelineConfig::new(dir.path().join("PHOENIX")));
        let strategy = TransportStrategy::Sftp(Box::new(LocalDropSink::new(dir.path())));
        assert!(matches!(
            engine.send(&strategy, &SendOptions::default()).await,
            Err(SyncError::RootNotFound(_))
        ));

        assert!(matches!(
            engine.build_strategy(TransportKind::Rsync).await,
            Err(SyncError::Config(_))
        ));
        assert!(engine.receive().await.is_err());
    }

    #[tokio::test]
    async fn test_rsync_rejects_full_scope() {
        let dir = tempfile::tempdir().unwrap();
        let config = site(dir.path());
        let keyring = crate::config::RsyncKeyring {
            id: Some("lochness".to_string()),
            server: Some("localhost".to_string()),
            phoenix_path: Some("/mirror/PHOENIX".to_string()),
        };
        let rsync = RsyncTransport::from_keyring(&keyring, config.layout(), "false").unwrap();
        let engine = SyncEngine::new(config);

        let options = SendOptions {
            scope: ScanScope::Full,
            ..Default::default()
        };
        assert!(matches!(
            engine.send(&TransportStrategy::Rsync(rsync), &options).await,
            Err(SyncError::Config(_))
        ));
        assert!(!engine.config().transfer_ledger_path().exists());
    }

    #[tokio::test]
    async fn test_history_under_root_is_not_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let drop = dir.path().join("drop");
        let mut config = site(dir.path());
        let root = config.phoenix_root.clone();
        config.lochness_sync_history_csv = Some(root.join("GENERAL/../lochness_sync_history.csv"));
        config.transfer_ledger = Some(root.join("./s3_log.csv"));

        let engine = SyncEngine::new(config);
        let strategy = TransportStrategy::Sftp(Box::new(LocalDropSink::new(&drop)));

        let first = engine.send(&strategy, &SendOptions::default()).await.unwrap();
        assert_eq!(first.files_changed, 2);
        assert!(root.join("lochness_sync_history.csv").is_file());
        assert!(root.join("s3_log.csv").is_file());

        // 历史、台账、上传日志都在根目录下且刚被改写，仍不应进入下一个窗口
        let second = engine.send(&strategy, &SendOptions::default()).await.unwrap();
        assert_eq!(second.files_changed, 0);
    }
}
