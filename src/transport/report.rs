//! 传输报告
//!
//! 所有传输方式都返回 `TransferReport`。对象存储方式额外把记录写成文本日志：
//!
//! ```text
//! 2024-01-01 10:00:00 upload: /data/PHOENIX/GENERAL/StudyA/a.csv to s3://bucket/root/GENERAL/StudyA/a.csv
//! ```
//!
//! 台账从日志重建时走 `parse_log`，与直接消费报告得到的记录完全一致。

use super::TransportKind;
use crate::error::Result;
use chrono::{Local, NaiveDateTime, Timelike};
use regex::Regex;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 单个文件的传输记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub timestamp: NaiveDateTime,
    pub source: String,
    pub destination: String,
}

impl TransferRecord {
    pub fn now(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            timestamp: log_now(),
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn to_log_line(&self) -> String {
        format!(
            "{} upload: {} to {}",
            self.timestamp.format(LOG_TIME_FORMAT),
            self.source,
            self.destination
        )
    }
}

/// 日志精度为秒
pub fn log_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

#[derive(Debug, Clone)]
pub struct TransferReport {
    pub transport: TransportKind,
    pub records: Vec<TransferRecord>,
}

/// 日志解析结果
#[derive(Debug, Default)]
pub struct ParsedLog {
    pub records: Vec<TransferRecord>,
    /// 含 upload 但格式不符的行数
    pub malformed: usize,
    /// 不晚于水位线而被跳过的行数
    pub stale: usize,
}

fn primary_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) upload: (\S+) to (\S+)\s*$")
            .expect("valid regex")
    })
}

/// 路径中带空格时的后备模式：目标优先按 URI 切分
fn fallback_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) upload: (.+?) to (\w+://.+?|\S+)\s*$")
            .expect("valid regex")
    })
}

/// 解析单行日志，不符合格式时返回 None
pub fn parse_log_line(line: &str) -> Option<TransferRecord> {
    let caps = primary_pattern()
        .captures(line)
        .or_else(|| fallback_pattern().captures(line))?;

    let timestamp = NaiveDateTime::parse_from_str(&caps[1], LOG_TIME_FORMAT).ok()?;
    Some(TransferRecord {
        timestamp,
        source: caps[2].trim().to_string(),
        destination: caps[3].trim().to_string(),
    })
}

impl TransferReport {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: TransferRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, other: TransferReport) {
        self.records.extend(other.records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_log_lines(&self) -> Vec<String> {
        self.records.iter().map(|r| r.to_log_line()).collect()
    }

    /// 追加写入文本日志
    pub fn append_to_log(records: &[TransferRecord], log_path: &Path) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(log_path)?;
        for record in records {
            writeln!(file, "{}", record.to_log_line())?;
        }
        file.flush()?;
        Ok(())
    }

    /// 逐行解析日志，只保留晚于 `after` 的 upload 记录；格式错误的行单独跳过
    ///
    /// 按字节读取，非 UTF-8 文件名按有损方式转换，不会中断整个解析。
    pub fn parse_log<R: BufRead>(mut reader: R, after: NaiveDateTime) -> Result<ParsedLog> {
        let mut parsed = ParsedLog::default();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.contains("upload") {
                continue;
            }

            let Some(record) = parse_log_line(line) else {
                debug!("跳过无法解析的日志行: {}", line);
                parsed.malformed += 1;
                continue;
            };

            if record.timestamp <= after {
                parsed.stale += 1;
                continue;
            }

            parsed.records.push(record);
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Cursor;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_parse_simple_line() {
        let record = parse_log_line(
            "2024-01-01 10:00:00 upload: PHOENIX/GENERAL/Study1/raw/Sub01/eeg/x.edf to s3://bucket/prefix/GENERAL/Study1/raw/Sub01/eeg/x.edf",
        )
        .unwrap();
        assert_eq!(record.timestamp, ts(10, 0, 0));
        assert_eq!(record.source, "PHOENIX/GENERAL/Study1/raw/Sub01/eeg/x.edf");
        assert_eq!(
            record.destination,
            "s3://bucket/prefix/GENERAL/Study1/raw/Sub01/eeg/x.edf"
        );
    }

    #[test]
    fn test_parse_line_with_whitespace_in_path() {
        let record = parse_log_line(
            "2024-01-01 10:00:00 upload: PHOENIX/GENERAL/S1/raw/A01/interviews/a to b.txt to s3://bkt/root/GENERAL/S1/raw/A01/interviews/a to b.txt",
        )
        .unwrap();
        assert_eq!(record.source, "PHOENIX/GENERAL/S1/raw/A01/interviews/a to b.txt");
        assert_eq!(
            record.destination,
            "s3://bkt/root/GENERAL/S1/raw/A01/interviews/a to b.txt"
        );
    }

    #[test]
    fn test_log_line_round_trip() {
        let record = TransferRecord {
            timestamp: ts(9, 30, 5),
            source: "PHOENIX/GENERAL/S1/S1_metadata.csv".to_string(),
            destination: "s3://bkt/root/GENERAL/S1/S1_metadata.csv".to_string(),
        };
        assert_eq!(parse_log_line(&record.to_log_line()), Some(record));
    }

    #[test]
    fn test_parse_log_skips_malformed_and_stale() {
        let log = "\
2024-01-01 09:00:00 upload: PHOENIX/GENERAL/a.csv to s3://b/r/GENERAL/a.csv
random noise line
2024-01-01 10:00:00 upload: missing-destination
2024-01-01 11:00:00 upload: PHOENIX/GENERAL/b.csv to s3://b/r/GENERAL/b.csv
";
        let parsed = TransferReport::parse_log(Cursor::new(log), ts(9, 0, 0)).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].source, "PHOENIX/GENERAL/b.csv");
        assert_eq!(parsed.malformed, 1);
        assert_eq!(parsed.stale, 1);
    }

    #[test]
    fn test_parse_log_survives_invalid_utf8() {
        let mut log = b"2024-01-01 10:00:00 upload: PHOENIX/GENERAL/\xff.csv to s3://b/r/GENERAL/\xff.csv\n".to_vec();
        log.extend_from_slice(b"\xfe\xfd garbage upload\r\n");
        log.extend_from_slice(
            b"2024-01-01 11:00:00 upload: PHOENIX/GENERAL/b.csv to s3://b/r/GENERAL/b.csv",
        );

        let parsed = TransferReport::parse_log(Cursor::new(log), ts(9, 0, 0)).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].source, "PHOENIX/GENERAL/\u{FFFD}.csv");
        assert_eq!(parsed.records[1].source, "PHOENIX/GENERAL/b.csv");
        assert_eq!(parsed.malformed, 1);
    }

    #[test]
    fn test_append_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("PHOENIX/aws_s3_sync_stdouts.log");
        let records = vec![TransferRecord {
            timestamp: ts(10, 0, 0),
            source: "/data/PHOENIX/GENERAL/a.csv".to_string(),
            destination: "s3://b/r/GENERAL/a.csv".to_string(),
        }];

        TransferReport::append_to_log(&records, &log_path).unwrap();
        TransferReport::append_to_log(&records, &log_path).unwrap();

        let content = fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.starts_with("2024-01-01 10:00:00 upload: /data/PHOENIX/GENERAL/a.csv to "));
    }
}
