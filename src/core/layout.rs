//! PHOENIX 目录结构
//!
//! ```text
//! PHOENIX/
//! ├── GENERAL/<study>/<raw|processed>/<subject>/<datatype>/...
//! └── PROTECTED/<study>/<raw|processed>/<subject>/<datatype>/...
//! ```
//!
//! 所有待传输文件都表示为相对 `PHOENIX` 上级目录的路径（`PHOENIX/GENERAL/...`），
//! 这样在任何目标根目录下解包都能还原同样的结构。

use crate::error::{Result, SyncError};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    root: PathBuf,
    general_zone: String,
    protected_zone: String,
}

impl ArchiveLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            general_zone: "GENERAL".to_string(),
            protected_zone: "PROTECTED".to_string(),
        }
    }

    pub fn with_zones(mut self, general: &str, protected: &str) -> Self {
        self.general_zone = general.to_string();
        self.protected_zone = protected.to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn general_zone(&self) -> &str {
        &self.general_zone
    }

    pub fn protected_zone(&self) -> &str {
        &self.protected_zone
    }

    pub fn zone_dir(&self, protected: bool) -> PathBuf {
        if protected {
            self.root.join(&self.protected_zone)
        } else {
            self.root.join(&self.general_zone)
        }
    }

    /// 根目录自身的名字（如 `PHOENIX`），解包和台账归一化时用作锚点
    pub fn root_name(&self) -> Result<String> {
        self.root
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string())
            .ok_or_else(|| {
                SyncError::Config(format!("归档根目录没有名称: {}", self.root.display()))
            })
    }

    pub fn parent(&self) -> Result<&Path> {
        self.root
            .parent()
            .filter(|p| !p.as_os_str().is_empty() || self.root.is_relative())
            .ok_or_else(|| {
                SyncError::Config(format!("归档根目录没有上级目录: {}", self.root.display()))
            })
    }

    /// 绝对路径 → 相对上级目录的路径
    pub fn relative_to_parent(&self, path: &Path) -> Result<PathBuf> {
        let parent = self.parent()?;
        path.strip_prefix(parent)
            .map(|p| p.to_path_buf())
            .map_err(|_| {
                SyncError::Config(format!(
                    "{} 不在 {} 之下",
                    path.display(),
                    parent.display()
                ))
            })
    }

    /// 相对路径 → 本地绝对路径
    pub fn resolve(&self, relative: &Path) -> Result<PathBuf> {
        Ok(self.parent()?.join(relative))
    }
}

/// 截取路径中第一个 `marker` 段之后的部分，找不到锚点时返回 None
pub fn strip_through_marker(path: &Path, marker: &str) -> Option<PathBuf> {
    let mut components = path.components();
    for component in components.by_ref() {
        if let Component::Normal(name) = component {
            if name == marker {
                let rest: PathBuf = components.collect();
                return Some(rest);
            }
        }
    }
    None
}
