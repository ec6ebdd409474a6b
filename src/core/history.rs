//! 传输历史记录
//!
//! 单列 CSV（`timestamp`），每次发送/接收结束追加一行 epoch 秒：
//!
//! ```text
//! timestamp
//! 1621470407.030176
//! 1621470455.635013
//! ```

use crate::error::{Result, SyncError};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 没有历史记录时的起点（1988-09-16），首次运行会选中全部文件
pub const EPOCH_SENTINEL: i64 = 590_403_600;

pub fn epoch_sentinel() -> DateTime<Utc> {
    DateTime::from_timestamp(EPOCH_SENTINEL, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// 当前时间，截断到微秒，保证写入 CSV 后能原样读回
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryRow {
    timestamp: String,
}

pub struct TransferHistory {
    path: PathBuf,
    timestamps: Vec<DateTime<Utc>>,
}

impl TransferHistory {
    /// 读取历史记录，文件不存在时返回空表
    pub fn load(path: &Path) -> Result<Self> {
        let mut timestamps = Vec::new();

        if path.is_file() {
            let mut reader = csv::Reader::from_path(path)?;
            let has_column = reader.headers()?.iter().any(|h| h == "timestamp");
            if has_column {
                for row in reader.deserialize::<HistoryRow>() {
                    let row = row?;
                    let ts = parse_epoch_secs(&row.timestamp).ok_or_else(|| {
                        SyncError::History {
                            path: path.to_path_buf(),
                            message: format!("无法解析时间戳: {}", row.timestamp),
                        }
                    })?;
                    timestamps.push(ts);
                }
            } else {
                warn!("历史记录缺少 timestamp 列，按首次运行处理: {}", path.display());
            }
        }

        debug!("加载历史记录 {} 条: {}", timestamps.len(), path.display());

        Ok(Self {
            path: path.to_path_buf(),
            timestamps,
        })
    }

    /// 上一次成功传输的时间，没有记录时为 EPOCH_SENTINEL
    pub fn last_timestamp(&self) -> DateTime<Utc> {
        self.timestamps
            .iter()
            .max()
            .copied()
            .unwrap_or_else(epoch_sentinel)
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// 追加一条记录并整体重写文件
    pub fn record(&mut self, ts: DateTime<Utc>) -> Result<()> {
        if ts <= self.last_timestamp() && !self.timestamps.is_empty() {
            warn!("新时间戳 {} 不晚于上次记录 {}", ts, self.last_timestamp());
        }
        self.timestamps.push(ts);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut writer = csv::Writer::from_path(&self.path)?;
        for ts in &self.timestamps {
            writer.serialize(HistoryRow {
                timestamp: format_epoch_secs(*ts),
            })?;
        }
        writer.flush()?;

        debug!("写入历史记录: {} ({})", self.path.display(), ts);
        Ok(())
    }
}

/// `1621470407.030176` 形式，保留微秒
pub fn format_epoch_secs(ts: DateTime<Utc>) -> String {
    let micros = ts.timestamp_micros();
    format!(
        "{}.{:06}",
        micros.div_euclid(1_000_000),
        micros.rem_euclid(1_000_000)
    )
}

/// 精确解析十进制 epoch 秒，避免浮点误差
pub fn parse_epoch_secs(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let (secs, frac) = match value.split_once('.') {
        Some((s, f)) => (s, f),
        None => (value, ""),
    };

    let secs: i64 = secs.parse().ok()?;
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut digits: String = frac.chars().take(6).collect();
    while digits.len() < 6 {
        digits.push('0');
    }
    let micros: i64 = digits.parse().ok()?;

    DateTime::from_timestamp_micros(secs.checked_mul(1_000_000)?.checked_add(micros)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let history = TransferHistory::load(&dir.path().join("none.csv")).unwrap();
        assert!(history.timestamps().is_empty());
        assert_eq!(history.last_timestamp().timestamp(), EPOCH_SENTINEL);
    }

    #[test]
    fn test_record_appends_monotonic_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/lochness_sync_history.csv");

        let first = now_micros();
        let mut history = TransferHistory::load(&path).unwrap();
        history.record(first).unwrap();

        let second = now_micros() + chrono::Duration::milliseconds(5);
        let mut history = TransferHistory::load(&path).unwrap();
        assert_eq!(history.last_timestamp(), first);
        history.record(second).unwrap();

        let history = TransferHistory::load(&path).unwrap();
        assert_eq!(history.timestamps(), &[first, second]);

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("timestamp\n"));
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_reads_legacy_float_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        fs::write(&path, "timestamp\n1621470407.030176\n1621470455.6350138\n590403600\n").unwrap();

        let history = TransferHistory::load(&path).unwrap();
        assert_eq!(history.timestamps().len(), 3);
        assert_eq!(
            format_epoch_secs(history.last_timestamp()),
            "1621470455.635013"
        );
    }

    #[test]
    fn test_missing_column_is_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        fs::write(&path, "when\n1621470407\n").unwrap();

        let history = TransferHistory::load(&path).unwrap();
        assert_eq!(history.last_timestamp(), epoch_sentinel());
    }

    #[test]
    fn test_epoch_round_trip_is_exact() {
        let ts = now_micros();
        assert_eq!(parse_epoch_secs(&format_epoch_secs(ts)), Some(ts));
        assert_eq!(parse_epoch_secs("abc"), None);
        assert_eq!(parse_epoch_secs("12.3x"), None);
    }
}
