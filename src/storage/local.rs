use super::{FileInfo, Storage};
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// 本地目录作为对象存储（挂载盘、测试）
pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        let name = format!("file://{}", base_path.display());
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    /// 先写临时文件再重命名
    fn temp_path(full_path: &Path) -> PathBuf {
        let mut name = full_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        full_path.with_file_name(name)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>> {
        let base = prefix.map_or_else(|| self.base_path.clone(), |p| self.resolve_path(p));

        if !base.exists() {
            return Ok(Vec::new());
        }

        let base_path = self.base_path.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        let files = tokio::task::spawn_blocking(move || {
            WalkDir::new(&base)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter_map(|entry| {
                    let metadata = entry.metadata().ok()?;
                    let relative_path = entry
                        .path()
                        .strip_prefix(&base_path)
                        .ok()?
                        .to_str()?
                        .to_string();

                    // 跳过根目录本身
                    if relative_path.is_empty() {
                        return None;
                    }

                    let modified = metadata
                        .modified()
                        .ok()?
                        .duration_since(std::time::UNIX_EPOCH)
                        .ok()?
                        .as_secs() as i64;

                    Some(FileInfo {
                        path: Self::normalize_path(&relative_path),
                        size: if metadata.is_dir() { 0 } else { metadata.len() },
                        modified_time: modified,
                        is_dir: metadata.is_dir(),
                    })
                })
                .collect::<Vec<_>>()
        })
        .await?;

        Ok(files)
    }

    async fn upload_file(&self, path: &str, local: &Path) -> Result<()> {
        let full_path = self.resolve_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = Self::temp_path(&full_path);
        fs::copy(local, &temp_path).await?;
        fs::rename(&temp_path, &full_path).await?;

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
