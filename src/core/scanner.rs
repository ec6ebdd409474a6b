//! 变更文件扫描
//!
//! 窗口语义为左开右闭 `(start, end]`：恰好等于 `end` 的文件属于本次窗口，
//! 下一次窗口以本次 `end` 为开区间起点，不会重复也不会遗漏。

use crate::core::layout::ArchiveLayout;
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 扫描范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanScope {
    /// 只扫描非受限区，PROTECTED 整个子树被剪枝
    General,
    /// 扫描整棵树，包括 PROTECTED
    Full,
}

impl ScanScope {
    /// `restricted_only` 为 true 时扫描整棵树
    pub fn from_restricted_only(restricted_only: bool) -> Self {
        if restricted_only {
            ScanScope::Full
        } else {
            ScanScope::General
        }
    }
}

/// 传输时间窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TransferWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(SyncError::InvalidWindow {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, mtime: DateTime<Utc>) -> bool {
        self.start < mtime && mtime <= self.end
    }
}

/// 变更文件扫描器
pub struct ChangeSetFinder {
    layout: ArchiveLayout,
    excluded: Vec<PathBuf>,
}

impl ChangeSetFinder {
    pub fn new(layout: ArchiveLayout) -> Self {
        Self {
            layout,
            excluded: Vec::new(),
        }
    }

    /// 不参与传输的文件（根目录下的上传日志、台账、历史记录）
    ///
    /// 比较前双方都规范化为绝对路径，相对路径按当前工作目录解析。
    pub fn exclude_files(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.excluded.extend(paths);
        self
    }

    /// 返回窗口内修改过的文件，路径相对于归档根目录的上级
    pub fn find_changed(&self, window: &TransferWindow, scope: ScanScope) -> Result<Vec<PathBuf>> {
        let root = self.layout.root();
        if !root.is_dir() {
            return Err(SyncError::RootNotFound(root.to_path_buf()));
        }
        // 先校验能否计算相对路径
        self.layout.parent()?;

        let canonical_root = fs::canonicalize(root)?;
        let excluded: HashSet<PathBuf> = self.excluded.iter().map(|p| normalize_path(p)).collect();
        let is_excluded = |path: &Path| {
            path.strip_prefix(root)
                .map_or(false, |rel| excluded.contains(&canonical_root.join(rel)))
        };

        let protected = self.layout.protected_zone().to_string();
        let prune_protected = scope == ScanScope::General;

        info!(
            "扫描变更文件: {} ({} ~ {}, {:?})",
            root.display(),
            window.start,
            window.end,
            scope
        );

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                !(prune_protected
                    && entry.depth() == 1
                    && entry.file_type().is_dir()
                    && entry.file_name() == protected.as_str())
            });

        let mut changed = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("遍历目录出错，跳过: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || is_excluded(entry.path()) {
                continue;
            }

            let mtime: DateTime<Utc> = match entry
                .metadata()
                .map_err(std::io::Error::from)
                .and_then(|m| m.modified())
            {
                Ok(t) => t.into(),
                Err(e) => {
                    warn!("无法读取修改时间 {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            if window.contains(mtime) {
                changed.push(self.layout.relative_to_parent(entry.path())?);
            }
        }

        if prune_protected {
            changed.retain(|p| p.file_name().map_or(true, |n| n != protected.as_str()));
        }

        changed.sort();
        debug!("窗口内变更文件 {} 个", changed.len());

        Ok(changed)
    }
}

/// 规范化为绝对路径；文件尚不存在时规范化其父目录
fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|p| p.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    }
}
