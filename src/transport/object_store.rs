//! 对象存储单向同步
//!
//! 对每个数据类型 × 允许的研究 × `<zone>/<study>/<stage>/<subject>/<datatype>`
//! 目录做一次递归同步，最后按元数据过滤规则同步 zone 下的每个研究目录
//! （元数据发布不受研究白名单限制）。
//! 远端每个目录只列一次；文件在远端不存在、大小不同或本地更新时才上传。
//! 每次上传都追加写入文本日志，日志是台账的数据来源。

use super::report::{TransferRecord, TransferReport};
use super::{datatypes_for_sources, TransportKind};
use crate::core::filter::SyncFilter;
use crate::core::layout::ArchiveLayout;
use crate::error::{Result, SyncError};
use crate::storage::{FileInfo, Storage};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 单次 zone 同步的参数
#[derive(Debug, Clone, Default)]
pub struct ZoneSyncOptions {
    /// 同步 PROTECTED（否则 GENERAL）
    pub protected: bool,
    /// 允许的研究，空表示全部
    pub studies: Vec<String>,
    /// 启用的数据源，空表示全部
    pub sources: Vec<String>,
    /// PROTECTED 下允许的数据类型
    pub selective: Vec<String>,
}

struct LocalFile {
    path: PathBuf,
    relative: String,
    size: u64,
    modified: i64,
}

pub struct ObjectStoreSync {
    storage: Arc<dyn Storage>,
    layout: ArchiveLayout,
    log_path: PathBuf,
}

fn storage_error(e: anyhow::Error) -> SyncError {
    SyncError::transport("s3", format!("{:#}", e))
}

impl ObjectStoreSync {
    pub fn new(storage: Arc<dyn Storage>, layout: ArchiveLayout, log_path: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            layout,
            log_path: log_path.into(),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// 数据目录过滤：PROTECTED 不上传录音和校验文件
    pub fn data_filter(protected: bool) -> SyncFilter {
        if protected {
            SyncFilter::new().exclude("*.mp3").exclude(".check_sum*")
        } else {
            SyncFilter::new()
        }
    }

    /// 元数据发布：只上传 `*_metadata.csv`，PROTECTED 额外上传 run sheet
    ///
    /// 排除规则放在最后，校验文件即使名字像元数据也不会被包含。
    pub fn metadata_filter(protected: bool) -> SyncFilter {
        let filter = SyncFilter::new().exclude("*").include("*_metadata.csv");
        if protected {
            filter
                .include("*Run_sheet*.csv")
                .exclude("*.mp3")
                .exclude(".check_sum*")
        } else {
            filter
        }
    }

    pub async fn sync_zone(&self, options: &ZoneSyncOptions) -> Result<TransferReport> {
        let mut datatypes = datatypes_for_sources(&options.sources)?;
        if options.protected {
            datatypes.retain(|d| options.selective.iter().any(|s| s.as_str() == *d));
        }

        let zone_dir = self.layout.zone_dir(options.protected);
        let studies = study_dirs(&zone_dir, &options.studies)?;
        let data_filter = Self::data_filter(options.protected);

        info!(
            "同步到 {}: {} (数据类型 {:?}, 研究 {} 个)",
            self.storage.name(),
            zone_dir.display(),
            datatypes,
            studies.len()
        );

        let mut report = TransferReport::new(TransportKind::ObjectStore);
        for datatype in &datatypes {
            for study_dir in &studies {
                for dir in datatype_dirs(study_dir, datatype) {
                    let records = self.sync_dir(&dir, &data_filter).await?;
                    report.records.extend(records);
                }
            }
        }

        let metadata_filter = Self::metadata_filter(options.protected);
        for study_dir in &study_dirs(&zone_dir, &[])? {
            let records = self.sync_dir(study_dir, &metadata_filter).await?;
            report.records.extend(records);
        }

        info!("对象存储同步完成，上传 {} 个文件", report.len());
        Ok(report)
    }

    /// 同步单个本地目录到远端同名前缀，返回本次上传的记录
    pub async fn sync_dir(&self, local_dir: &Path, filter: &SyncFilter) -> Result<Vec<TransferRecord>> {
        let rel_dir = local_dir
            .strip_prefix(self.layout.root())
            .map_err(|_| {
                SyncError::Config(format!(
                    "{} 不在 {} 之下",
                    local_dir.display(),
                    self.layout.root().display()
                ))
            })?
            .to_string_lossy()
            .replace('\\', "/");
        let prefix = format!("{}/", rel_dir.trim_end_matches('/'));

        let remote: HashMap<String, FileInfo> = self
            .storage
            .list_files(Some(&prefix))
            .await
            .map_err(storage_error)?
            .into_iter()
            .filter(|f| !f.is_dir)
            .map(|f| (f.path.clone(), f))
            .collect();

        let local = scan_local(local_dir.to_path_buf()).await?;
        debug!("{}: 本地 {} 个文件, 远端 {} 个", prefix, local.len(), remote.len());

        let mut records = Vec::new();
        for file in local {
            if !filter.is_included(&file.relative) {
                continue;
            }

            let key = format!("{}{}", prefix, file.relative);
            let needs_upload = match remote.get(&key) {
                None => true,
                Some(existing) => existing.size != file.size || file.modified > existing.modified_time,
            };
            if !needs_upload {
                continue;
            }

            self.storage
                .upload_file(&key, &file.path)
                .await
                .map_err(storage_error)?;

            let record = TransferRecord::now(
                file.path.to_string_lossy(),
                format!("{}/{}", self.storage.name().trim_end_matches('/'), key),
            );
            debug!("{}", record.to_log_line());
            records.push(record);
        }

        TransferReport::append_to_log(&records, &self.log_path)?;
        Ok(records)
    }
}

/// 列出 zone 下允许的研究目录
fn study_dirs(zone_dir: &Path, allowed: &[String]) -> Result<Vec<PathBuf>> {
    if !zone_dir.is_dir() {
        warn!("目录不存在，跳过: {}", zone_dir.display());
        return Ok(Vec::new());
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(zone_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if allowed.is_empty() || allowed.iter().any(|s| s == &name) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// `<study>/<stage>/<subject>/<datatype>` 形式的目录
fn datatype_dirs(study_dir: &Path, datatype: &str) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = WalkDir::new(study_dir)
        .min_depth(3)
        .max_depth(3)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.file_name() == datatype)
        .map(|e| e.into_path())
        .collect();
    dirs.sort();
    dirs
}

async fn scan_local(dir: PathBuf) -> Result<Vec<LocalFile>> {
    let files = tokio::task::spawn_blocking(move || {
        WalkDir::new(&dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                let modified = metadata
                    .modified()
                    .ok()?
                    .duration_since(std::time::UNIX_EPOCH)
                    .ok()?
                    .as_secs() as i64;
                let relative = entry
                    .path()
                    .strip_prefix(&dir)
                    .ok()?
                    .to_string_lossy()
                    .replace('\\', "/");
                Some(LocalFile {
                    path: entry.path().to_path_buf(),
                    relative,
                    size: metadata.len(),
                    modified,
                })
            })
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| SyncError::transport("s3", e.to_string()))?;

    Ok(files)
}
