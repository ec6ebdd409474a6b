//! 接收端：解包投递目录中的压缩包并合并到本地归档
//!
//! 包内路径以归档根目录名为锚点重新挂接到本地根目录下，同名文件直接覆盖。

use crate::core::archive;
use crate::core::history::{now_micros, TransferHistory};
use crate::core::layout::{strip_through_marker, ArchiveLayout};
use crate::error::{Result, SyncError};
use crate::transport::report::{TransferRecord, TransferReport};
use crate::transport::TransportKind;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[cfg(unix)]
const FILE_MODE: u32 = 0o644;
#[cfg(unix)]
const DIR_MODE: u32 = 0o755;

pub struct Receiver {
    layout: ArchiveLayout,
    drop_dir: PathBuf,
}

fn is_bundle(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.ends_with(".tar.gz") || n.ends_with(".tgz") || n.ends_with(".tar"))
}

impl Receiver {
    pub fn new(layout: ArchiveLayout, drop_dir: impl Into<PathBuf>) -> Self {
        Self {
            layout,
            drop_dir: drop_dir.into(),
        }
    }

    /// 修改时间晚于 `after` 的压缩包，按时间从旧到新
    pub fn pending_bundles(&self, after: DateTime<Utc>) -> Result<Vec<PathBuf>> {
        if !self.drop_dir.is_dir() {
            return Err(SyncError::Config(format!(
                "投递目录不存在: {}",
                self.drop_dir.display()
            )));
        }

        let mut bundles = Vec::new();
        for entry in fs::read_dir(&self.drop_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() || !is_bundle(&path) {
                continue;
            }
            let mtime: DateTime<Utc> = entry.metadata()?.modified()?.into();
            if mtime > after {
                bundles.push((mtime, path));
            }
        }

        bundles.sort();
        Ok(bundles.into_iter().map(|(_, p)| p).collect())
    }

    /// 处理所有待接收的压缩包，并以扫描开始时间记录接收历史
    pub fn receive(&self, history: &mut TransferHistory) -> Result<TransferReport> {
        let started = now_micros();
        let bundles = self.pending_bundles(history.last_timestamp())?;
        info!(
            "接收目录 {}: 待处理压缩包 {} 个",
            self.drop_dir.display(),
            bundles.len()
        );

        let mut report = TransferReport::new(TransportKind::Sftp);
        for bundle in &bundles {
            let records = self.install_bundle(bundle)?;
            info!("已合并 {} ({} 个文件)", bundle.display(), records.len());
            report.records.extend(records);
            fs::remove_file(bundle)?;
        }

        history.record(started)?;
        Ok(report)
    }

    fn install_bundle(&self, bundle: &Path) -> Result<Vec<TransferRecord>> {
        let root_name = self.layout.root_name()?;
        let root = self.layout.root();
        let staging = tempfile::tempdir()?;
        let entries = archive::extract(bundle, staging.path())?;

        let mut records = Vec::new();
        for entry in entries {
            let Some(relative) = strip_through_marker(&entry, &root_name) else {
                warn!("包内路径不含 {}，跳过: {}", root_name, entry.display());
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }

            let target = root.join(&relative);
            if let Some(parent) = target.parent() {
                create_dirs(parent)?;
            }
            fs::copy(staging.path().join(&entry), &target)?;
            set_file_mode(&target)?;
            debug!("写入 {}", target.display());

            records.push(TransferRecord::now(
                Path::new(&root_name).join(&relative).to_string_lossy().replace('\\', "/"),
                target.to_string_lossy(),
            ));
        }

        Ok(records)
    }
}

/// 逐级创建目录，新建的目录设为 0755
fn create_dirs(dir: &Path) -> Result<()> {
    let mut missing = Vec::new();
    let mut current = Some(dir);
    while let Some(path) = current {
        if path.exists() {
            break;
        }
        missing.push(path.to_path_buf());
        current = path.parent();
    }

    fs::create_dir_all(dir)?;

    #[cfg(unix)]
    for path in missing.iter().rev() {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE))?;
    }
    #[cfg(not(unix))]
    drop(missing);

    Ok(())
}

fn set_file_mode(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
