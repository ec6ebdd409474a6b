//! rsync 镜像非受限区

use super::report::{TransferRecord, TransferReport};
use super::TransportKind;
use crate::config::{require, RsyncKeyring};
use crate::core::layout::ArchiveLayout;
use crate::error::{Result, SyncError};
use tokio::process::Command;
use tracing::{debug, info};

pub struct RsyncTransport {
    binary: String,
    id: String,
    server: String,
    remote_root: String,
    layout: ArchiveLayout,
}

impl RsyncTransport {
    pub fn from_keyring(keyring: &RsyncKeyring, layout: ArchiveLayout, binary: &str) -> Result<Self> {
        const SECTION: &str = "rsync";
        Ok(Self {
            binary: binary.to_string(),
            id: require(&keyring.id, SECTION, "ID")?.to_string(),
            server: require(&keyring.server, SECTION, "SERVER")?.to_string(),
            remote_root: require(&keyring.phoenix_path, SECTION, "PHOENIX_PATH_RSYNC")?
                .trim_end_matches('/')
                .to_string(),
            layout,
        })
    }

    fn remote_target(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.id,
            self.server,
            self.remote_root,
            self.layout.general_zone()
        )
    }

    /// 源目录带结尾 `/`，只同步目录内容
    pub fn args(&self) -> Vec<String> {
        let source = self.layout.zone_dir(false);
        vec![
            "-az".to_string(),
            "-e".to_string(),
            "ssh".to_string(),
            "--out-format=%n".to_string(),
            format!("{}/", source.display()),
            self.remote_target(),
        ]
    }

    pub async fn send(&self) -> Result<TransferReport> {
        let args = self.args();
        info!("执行 {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| SyncError::transport("rsync", format!("无法启动 {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::transport(
                "rsync",
                format!("{} ({})", stderr.trim(), output.status),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = self.report_from_output(&stdout)?;
        info!("rsync 完成，传输 {} 个文件", report.len());
        Ok(report)
    }

    /// `--out-format=%n` 每行一个相对路径，目录以 `/` 结尾
    fn report_from_output(&self, stdout: &str) -> Result<TransferReport> {
        let root_name = self.layout.root_name()?;
        let zone = self.layout.general_zone();
        let target = self.remote_target();

        let mut report = TransferReport::new(TransportKind::Rsync);
        for line in stdout.lines().map(str::trim) {
            if line.is_empty() || line == "./" || line.ends_with('/') {
                continue;
            }
            debug!("rsync: {}", line);
            report.push(TransferRecord::now(
                format!("{}/{}/{}", root_name, zone, line),
                format!("{}/{}", target, line),
            ));
        }
        Ok(report)
    }
}
