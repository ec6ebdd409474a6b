//! 错误类型

use std::path::PathBuf;
use thiserror::Error;

/// 同步流程中的错误分类
#[derive(Debug, Error)]
pub enum SyncError {
    /// 配置缺失或非法
    #[error("配置错误: {0}")]
    Config(String),

    /// keyring 中缺少必填字段
    #[error("keyring 缺少字段: {section}.{field}")]
    MissingKeyring { section: String, field: String },

    /// 未知的数据源名称（datatype → source 查表失败）
    #[error("未知的数据源: {0}")]
    UnknownSource(String),

    #[error("归档根目录不存在或不是目录: {0}")]
    RootNotFound(PathBuf),

    #[error("无效的时间窗口: start={start} end={end}")]
    InvalidWindow { start: String, end: String },

    /// 传输失败（认证、网络、外部工具非零退出）
    #[error("传输失败 ({transport}): {message}")]
    Transport { transport: String, message: String },

    #[error("历史记录文件格式错误 {path}: {message}")]
    History { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl SyncError {
    pub fn transport(transport: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Transport {
            transport: transport.into(),
            message: message.into(),
        }
    }

    pub fn missing_keyring(section: &str, field: &str) -> Self {
        SyncError::MissingKeyring {
            section: section.to_string(),
            field: field.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
