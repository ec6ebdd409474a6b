//! 传输方式
//!
//! - `sftp`：把增量压缩包整体推送到远端站点
//! - `rsync`：把非受限区镜像到远端
//! - `s3`：按数据类型和研究逐目录同步到对象存储
//!
//! 三种方式都返回 `TransferReport`，由引擎写入台账和审计。

pub mod object_store;
pub mod report;
pub mod rsync;
pub mod sftp;

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use object_store::{ObjectStoreSync, ZoneSyncOptions};
pub use report::{ParsedLog, TransferRecord, TransferReport};
pub use rsync::RsyncTransport;
pub use sftp::{BundleSink, LocalDropSink, SftpTransport};

/// 传输方式（命令行取值 `sftp|rsync|s3`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Sftp,
    Rsync,
    #[value(name = "s3")]
    #[serde(rename = "s3")]
    ObjectStore,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Sftp => "sftp",
            TransportKind::Rsync => "rsync",
            TransportKind::ObjectStore => "s3",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 每次调用按配置构建一次的传输策略
pub enum TransportStrategy {
    Sftp(Box<dyn BundleSink>),
    Rsync(RsyncTransport),
    ObjectStore(ObjectStoreSync),
}

impl TransportStrategy {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportStrategy::Sftp(_) => TransportKind::Sftp,
            TransportStrategy::Rsync(_) => TransportKind::Rsync,
            TransportStrategy::ObjectStore(_) => TransportKind::ObjectStore,
        }
    }
}

/// 数据类型 → 产生该类型数据的数据源
pub const DATATYPE_SOURCES: &[(&str, &[&str])] = &[
    ("surveys", &["redcap", "rpms", "upenn", "onlinescoring", "icognition"]),
    ("phone", &["beiwe", "mindlamp"]),
    ("actigraphy", &["box", "mediaflux", "dropbox"]),
    ("mri", &["xnat", "box", "mediaflux", "daris"]),
    ("eeg", &["box", "mediaflux", "dropbox"]),
    ("interviews", &["box", "mediaflux", "dropbox"]),
];

fn is_known_source(source: &str) -> bool {
    DATATYPE_SOURCES
        .iter()
        .any(|(_, sources)| sources.contains(&source))
}

/// 根据启用的数据源筛选要同步的数据类型，保持表中顺序。
/// 未指定数据源时同步全部数据类型；出现未知数据源是致命错误。
pub fn datatypes_for_sources(enabled: &[String]) -> Result<Vec<&'static str>> {
    let enabled: Vec<String> = enabled.iter().map(|s| s.to_lowercase()).collect();

    if let Some(unknown) = enabled.iter().find(|s| !is_known_source(s)) {
        return Err(SyncError::UnknownSource(unknown.clone()));
    }

    Ok(DATATYPE_SOURCES
        .iter()
        .filter(|(_, sources)| {
            enabled.is_empty() || sources.iter().any(|s| enabled.iter().any(|e| e == s))
        })
        .map(|(datatype, _)| *datatype)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatypes_for_sources() {
        let all = datatypes_for_sources(&[]).unwrap();
        assert_eq!(all.len(), DATATYPE_SOURCES.len());

        let phone = datatypes_for_sources(&["MindLAMP".to_string()]).unwrap();
        assert_eq!(phone, vec!["phone"]);

        let mixed =
            datatypes_for_sources(&["redcap".to_string(), "xnat".to_string()]).unwrap();
        assert_eq!(mixed, vec!["surveys", "mri"]);
    }

    #[test]
    fn test_unknown_source_is_fatal() {
        let err = datatypes_for_sources(&["box".to_string(), "fitbit".to_string()]).unwrap_err();
        assert!(matches!(err, SyncError::UnknownSource(s) if s == "fitbit"));
    }

    #[test]
    fn test_transport_kind_names() {
        use clap::ValueEnum;
        let parsed = TransportKind::from_str("s3", true).unwrap();
        assert_eq!(parsed, TransportKind::ObjectStore);
        assert_eq!(TransportKind::Rsync.to_string(), "rsync");
    }
}
