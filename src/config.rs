//! 应用配置模块
//!
//! 配置文件为 JSON，keyring 已在外部解密后合并进来，这里只做字段访问。

use crate::core::layout::ArchiveLayout;
use crate::error::{Result, SyncError};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// SFTP 点对点传输凭据（keyring 中的 `lochness_sync` 段）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SftpKeyring {
    #[serde(rename = "HOST")]
    pub host: Option<String>,
    #[serde(rename = "USERNAME")]
    pub username: Option<String>,
    #[serde(rename = "PASSWORD")]
    pub password: Option<String>,
    #[serde(rename = "PATH_IN_HOST")]
    pub path_in_host: Option<String>,
    #[serde(rename = "PORT")]
    pub port: Option<u16>,
}

/// rsync 镜像传输凭据（keyring 中的 `rsync` 段）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RsyncKeyring {
    #[serde(rename = "ID")]
    pub id: Option<String>,
    #[serde(rename = "SERVER")]
    pub server: Option<String>,
    #[serde(rename = "PHOENIX_PATH_RSYNC")]
    pub phoenix_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Keyring {
    #[serde(default)]
    pub lochness_sync: Option<SftpKeyring>,
    #[serde(default)]
    pub rsync: Option<RsyncKeyring>,
}

/// 对象存储配置，未填写的凭据回退到 AWS_* 环境变量
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(rename = "AWS_BUCKET_NAME")]
    pub bucket: Option<String>,
    #[serde(rename = "AWS_BUCKET_ROOT")]
    pub bucket_root: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// 同步流程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub phoenix_root: PathBuf,
    #[serde(default = "default_general_zone")]
    pub general_zone: String,
    #[serde(default = "default_protected_zone")]
    pub protected_zone: String,
    /// 发送端历史记录
    #[serde(default)]
    pub lochness_sync_history_csv: Option<PathBuf>,
    /// 接收端历史记录
    #[serde(default)]
    pub lochness_receive_history_csv: Option<PathBuf>,
    /// 对象存储上传日志
    #[serde(default)]
    pub transfer_log: Option<PathBuf>,
    /// 传输台账
    #[serde(default)]
    pub transfer_ledger: Option<PathBuf>,
    /// PROTECTED 下允许同步到对象存储的数据类型
    #[serde(default)]
    pub s3_selective_sync: Vec<String>,
    #[serde(default)]
    pub keyring: Keyring,
    #[serde(flatten)]
    pub object_store: ObjectStoreConfig,
    #[serde(default = "default_rsync_binary")]
    pub rsync_binary: String,
    /// 审计数据库（SQLite），不配置则不写审计
    #[serde(default)]
    pub audit_db: Option<PathBuf>,
    /// 日志目录，默认 `<phoenix_root 的上级>/logs`
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_general_zone() -> String {
    "GENERAL".to_string()
}

fn default_protected_zone() -> String {
    "PROTECTED".to_string()
}

fn default_rsync_binary() -> String {
    "rsync".to_string()
}

impl PipelineConfig {
    /// 从配置文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("无法读取配置文件 {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| SyncError::Config(format!("配置解析失败: {}", e)))
    }

    /// 最小配置，其余字段取默认值
    pub fn new(phoenix_root: impl Into<PathBuf>) -> Self {
        Self {
            phoenix_root: phoenix_root.into(),
            general_zone: default_general_zone(),
            protected_zone: default_protected_zone(),
            lochness_sync_history_csv: None,
            lochness_receive_history_csv: None,
            transfer_log: None,
            transfer_ledger: None,
            s3_selective_sync: Vec::new(),
            keyring: Keyring::default(),
            object_store: ObjectStoreConfig::default(),
            rsync_binary: default_rsync_binary(),
            audit_db: None,
            log_dir: None,
            log: LogConfig::default(),
        }
    }

    pub fn layout(&self) -> ArchiveLayout {
        ArchiveLayout::new(&self.phoenix_root)
            .with_zones(&self.general_zone, &self.protected_zone)
    }

    /// 历史、日志等文件默认放在 PHOENIX 根目录的上级，避免被变更扫描带走
    fn sidecar(&self, name: &str) -> PathBuf {
        self.phoenix_root
            .parent()
            .map(|p| p.join(name))
            .unwrap_or_else(|| PathBuf::from(name))
    }

    pub fn send_history_path(&self) -> PathBuf {
        self.lochness_sync_history_csv
            .clone()
            .unwrap_or_else(|| self.sidecar("lochness_sync_history.csv"))
    }

    pub fn receive_history_path(&self) -> PathBuf {
        self.lochness_receive_history_csv
            .clone()
            .unwrap_or_else(|| self.sidecar("lochness_receive_history.csv"))
    }

    /// 对象存储上传日志，沿用原有位置：PHOENIX 根目录下
    pub fn transfer_log_path(&self) -> PathBuf {
        self.transfer_log
            .clone()
            .unwrap_or_else(|| self.phoenix_root.join("aws_s3_sync_stdouts.log"))
    }

    pub fn transfer_ledger_path(&self) -> PathBuf {
        self.transfer_ledger
            .clone()
            .unwrap_or_else(|| self.phoenix_root.join("s3_log.csv"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| self.sidecar("logs"))
    }

    pub fn sftp(&self) -> Result<&SftpKeyring> {
        self.keyring
            .lochness_sync
            .as_ref()
            .ok_or_else(|| SyncError::Config("keyring 缺少 lochness_sync 段".to_string()))
    }

    pub fn rsync(&self) -> Result<&RsyncKeyring> {
        self.keyring
            .rsync
            .as_ref()
            .ok_or_else(|| SyncError::Config("keyring 缺少 rsync 段".to_string()))
    }
}

/// 取必填字段，缺失即为致命错误
pub fn require<'a>(value: &'a Option<String>, section: &str, field: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SyncError::missing_keyring(section, field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_defaults() {
        let config = PipelineConfig::from_json(
            r#"{
                "phoenix_root": "/data/PHOENIX",
                "s3_selective_sync": ["actigraphy"],
                "AWS_BUCKET_NAME": "ampscz-dev",
                "AWS_BUCKET_ROOT": "TEST_PHOENIX_ROOT",
                "keyring": {
                    "lochness_sync": {
                        "HOST": "remote.example.org",
                        "USERNAME": "lochness",
                        "PASSWORD": "secret",
                        "PATH_IN_HOST": "/incoming",
                        "PORT": 22
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.general_zone, "GENERAL");
        assert_eq!(config.protected_zone, "PROTECTED");
        assert_eq!(config.object_store.bucket.as_deref(), Some("ampscz-dev"));
        assert_eq!(config.sftp().unwrap().port, Some(22));
        assert_eq!(
            config.send_history_path(),
            PathBuf::from("/data/lochness_sync_history.csv")
        );
        assert_eq!(
            config.transfer_log_path(),
            PathBuf::from("/data/PHOENIX/aws_s3_sync_stdouts.log")
        );
        assert!(config.log.enabled);
    }

    #[test]
    fn test_missing_keyring_field_is_fatal() {
        let config = PipelineConfig::new("/data/PHOENIX");
        assert!(matches!(config.rsync(), Err(SyncError::Config(_))));

        let keyring = SftpKeyring::default();
        let err = require(&keyring.host, "lochness_sync", "HOST").unwrap_err();
        assert!(matches!(err, SyncError::MissingKeyring { .. }));
    }
}
