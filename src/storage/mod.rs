//! 对象存储抽象
//!
//! 生产环境为 S3（opendal），测试和本地挂载目录用 `LocalStorage`。
//! 所有路径都是相对存储根的 `/` 分隔 key。

pub mod local;
pub mod s3;

use crate::config::ObjectStoreConfig;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use local::LocalStorage;
pub use s3::S3Storage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- list 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- 上传
pub const IO_TIMEOUT_SECS: u64 = 300;
/// 分块上传的块大小
pub const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

const DEFAULT_REGION: &str = "us-east-1";

/// 文件信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub modified_time: i64,
    pub is_dir: bool,
}

/// 存储抽象接口
#[async_trait]
pub trait Storage: Send + Sync {
    /// 递归列出前缀下的所有文件
    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>>;

    /// 上传本地文件到 `path`，已存在时覆盖
    async fn upload_file(&self, path: &str, local: &Path) -> Result<()>;

    /// 存储的 URI 形式（如 `s3://bucket/root`），用于日志和台账
    fn name(&self) -> &str;
}

/// 根据配置创建 S3 存储实例，未配置的凭据从 AWS_* 环境变量读取
pub async fn create_storage(config: &ObjectStoreConfig) -> Result<Arc<dyn Storage>> {
    let bucket = config
        .bucket
        .as_deref()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| anyhow::anyhow!("对象存储缺少 AWS_BUCKET_NAME"))?;

    let region = config
        .region
        .clone()
        .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok())
        .unwrap_or_else(|| DEFAULT_REGION.to_string());
    let access_key = config
        .access_key
        .clone()
        .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok())
        .ok_or_else(|| anyhow::anyhow!("S3 storage requires access key"))?;
    let secret_key = config
        .secret_key
        .clone()
        .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok())
        .ok_or_else(|| anyhow::anyhow!("S3 storage requires secret key"))?;

    tracing::info!("初始化S3存储: bucket={}, region={}", bucket, region);
    Ok(Arc::new(
        S3Storage::new(
            bucket,
            &region,
            &access_key,
            &secret_key,
            config.endpoint.clone(),
            config.bucket_root.clone(),
        )
        .await?,
    ) as Arc<dyn Storage>)
}
