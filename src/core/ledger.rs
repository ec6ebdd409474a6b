//! 传输台账
//!
//! 台账 CSV 每行对应一次上传，按源路径推导出 zone、研究、阶段、受试者、数据类型：
//!
//! ```text
//! PHOENIX/<zone>/<study>/<stage>/<subject>/<datatype>/.../<filename>
//! ```
//!
//! 增量构建以台账中最大的时间戳为水位线，只追加更晚的记录。
//! 所有传输方式的记录都会进入上传日志，因此 `rewrite` 可以从日志完整重建台账。

use crate::core::layout::{strip_through_marker, ArchiveLayout};
use crate::error::Result;
use crate::transport::report::{TransferRecord, TransferReport, LOG_TIME_FORMAT};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// 台账行，列名与已有台账保持一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(with = "ledger_time")]
    pub timestamp: NaiveDateTime,
    pub source: String,
    pub destination: String,
    pub filename: String,
    /// 是否位于受限区
    #[serde(deserialize_with = "zone_flag")]
    pub protected: bool,
    pub study: String,
    /// raw / processed
    pub processed: String,
    pub subject: String,
    pub datatypes: String,
}

mod ledger_time {
    use super::LOG_TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(LOG_TIME_FORMAT).to_string())
    }

    /// 兼容带小数秒或 `T` 分隔的旧格式
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        let raw = raw.trim();
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
            .map_err(serde::de::Error::custom)
    }
}

/// 旧台账的 protected 列存的是 zone 名
fn zone_flag<'de, D: serde::Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    let raw = String::deserialize(d)?;
    let raw = raw.trim();
    Ok(raw.eq_ignore_ascii_case("true") || raw == "1" || raw.eq_ignore_ascii_case("protected"))
}

const LEDGER_COLUMNS: [&str; 9] = [
    "timestamp",
    "source",
    "destination",
    "filename",
    "protected",
    "study",
    "processed",
    "subject",
    "datatypes",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerUpdate {
    NoNewData,
    Appended(usize),
}

/// 没有台账时的水位线
pub fn ledger_sentinel() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}

/// 读取台账，文件不存在时返回空
pub fn load_ledger(path: &Path) -> Result<Vec<LedgerEntry>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut entries = Vec::new();
    for row in reader.deserialize::<LedgerEntry>() {
        entries.push(row?);
    }
    Ok(entries)
}

pub struct TransferLedgerBuilder {
    layout: ArchiveLayout,
}

impl TransferLedgerBuilder {
    pub fn new(layout: ArchiveLayout) -> Self {
        Self { layout }
    }

    /// 从上传日志构建或增量更新台账；`rewrite` 时忽略已有台账整体重建
    pub fn build_or_update(
        &self,
        log_path: &Path,
        ledger_path: &Path,
        rewrite: bool,
    ) -> Result<LedgerUpdate> {
        let existing = if rewrite {
            Vec::new()
        } else {
            load_ledger(ledger_path)?
        };
        let watermark = watermark(&existing);

        if !log_path.is_file() {
            info!("上传日志不存在: {}", log_path.display());
            return Ok(LedgerUpdate::NoNewData);
        }

        let parsed = TransferReport::parse_log(BufReader::new(File::open(log_path)?), watermark)?;
        debug!(
            "解析上传日志: 新记录 {}, 已入账 {}, 无法解析 {}",
            parsed.records.len(),
            parsed.stale,
            parsed.malformed
        );

        let entries = self.entries_from_records(&parsed.records);
        if entries.is_empty() {
            return Ok(LedgerUpdate::NoNewData);
        }
        if rewrite {
            self.write_all(ledger_path, &entries)?;
            info!("重建台账 {} ({} 条)", ledger_path.display(), entries.len());
            return Ok(LedgerUpdate::Appended(entries.len()));
        }

        self.append(ledger_path, &entries)
    }

    /// 直接把结构化报告追加到台账，同时写入上传日志供重建使用
    pub fn append_report(
        &self,
        report: &TransferReport,
        log_path: &Path,
        ledger_path: &Path,
    ) -> Result<LedgerUpdate> {
        TransferReport::append_to_log(&report.records, log_path)?;
        let entries = self.entries_from_records(&report.records);
        self.append(ledger_path, &entries)
    }

    fn entries_from_records(&self, records: &[TransferRecord]) -> Vec<LedgerEntry> {
        records
            .iter()
            .filter_map(|record| {
                let entry = self.entry_from_record(record);
                if entry.is_none() {
                    debug!("无法归一化源路径，跳过: {}", record.source);
                }
                entry
            })
            .collect()
    }

    /// 源路径归一化为 `<root_name>/...` 后按目录层级推导字段
    pub fn entry_from_record(&self, record: &TransferRecord) -> Option<LedgerEntry> {
        let root_name = self.layout.root_name().ok()?;
        let relative = strip_through_marker(Path::new(&record.source), &root_name)?;
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();

        let (filename, dirs) = parts.split_last()?;
        let dir = |i: usize| dirs.get(i).cloned().unwrap_or_default();

        let source: PathBuf = Path::new(&root_name).join(&relative);
        let mut entry = LedgerEntry {
            timestamp: record.timestamp,
            source: source.to_string_lossy().replace('\\', "/"),
            destination: record.destination.clone(),
            filename: filename.clone(),
            protected: dirs.first().map_or(false, |z| z == self.layout.protected_zone()),
            study: dir(1),
            processed: dir(2),
            subject: dir(3),
            datatypes: dir(4),
        };

        // 研究级汇总文件不属于任何受试者
        if filename.contains("metadata.csv") {
            entry.processed.clear();
            entry.subject.clear();
            entry.datatypes.clear();
        }

        Some(entry)
    }

    fn append(&self, ledger_path: &Path, entries: &[LedgerEntry]) -> Result<LedgerUpdate> {
        if entries.is_empty() {
            return Ok(LedgerUpdate::NoNewData);
        }

        if let Some(parent) = ledger_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let has_header = ledger_path.is_file() && fs::metadata(ledger_path)?.len() > 0;
        if has_header && !has_current_columns(ledger_path)? {
            // 旧格式台账整体转换后再写
            let mut all = load_ledger(ledger_path)?;
            all.extend_from_slice(entries);
            self.write_all(ledger_path, &all)?;
            info!("台账已转换为当前格式并追加 {} 条", entries.len());
            return Ok(LedgerUpdate::Appended(entries.len()));
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(ledger_path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(!has_header)
            .from_writer(file);
        for entry in entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;

        info!("台账追加 {} 条: {}", entries.len(), ledger_path.display());
        Ok(LedgerUpdate::Appended(entries.len()))
    }

    fn write_all(&self, ledger_path: &Path, entries: &[LedgerEntry]) -> Result<()> {
        if let Some(parent) = ledger_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(ledger_path)?;
        for entry in entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn has_current_columns(path: &Path) -> Result<bool> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?;
    Ok(headers.iter().eq(LEDGER_COLUMNS.iter().copied()))
}

fn watermark(entries: &[LedgerEntry]) -> NaiveDateTime {
    entries
        .iter()
        .map(|e| e.timestamp)
        .max()
        .unwrap_or_else(ledger_sentinel)
}
