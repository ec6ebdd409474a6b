//! 点对点压缩包推送
//!
//! 生产环境通过 SFTP（`ssh2`，密码认证）推送到远端 `PATH_IN_HOST`；
//! 接收端与发送端共享挂载盘时可直接落到本地目录。

use super::report::{TransferRecord, TransferReport};
use super::TransportKind;
use crate::config::{require, SftpKeyring};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use ssh2::Session;
use std::fs::File;
use std::io;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DEFAULT_SSH_PORT: u16 = 22;
/// SSH 会话阻塞调用超时（毫秒）
const SESSION_TIMEOUT_MS: u32 = 300_000;

/// 压缩包投递目标
#[async_trait]
pub trait BundleSink: Send + Sync {
    /// 推送压缩包，返回远端位置的 URI
    async fn push(&self, bundle: &Path) -> Result<String>;

    fn describe(&self) -> String;
}

fn bundle_name(bundle: &Path) -> Result<String> {
    bundle
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .ok_or_else(|| SyncError::transport("sftp", format!("无效的压缩包路径: {}", bundle.display())))
}

/// 推送压缩包并生成报告，无论成败压缩包都会被删除
pub async fn deliver(
    sink: &dyn BundleSink,
    bundle: &Path,
    contents: &[PathBuf],
) -> Result<TransferReport> {
    let _cleanup = scopeguard::guard(bundle.to_path_buf(), |path| {
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("删除压缩包失败 {}: {}", path.display(), e);
            }
        }
    });

    info!("推送压缩包 {} → {}", bundle.display(), sink.describe());
    let destination = sink.push(bundle).await?;

    let mut report = TransferReport::new(TransportKind::Sftp);
    for rel in contents {
        report.push(TransferRecord::now(
            rel.to_string_lossy().replace('\\', "/"),
            destination.clone(),
        ));
    }
    info!("推送完成: {} ({} 个文件)", destination, report.len());

    Ok(report)
}

pub struct SftpTransport {
    host: String,
    port: u16,
    username: String,
    password: String,
    path_in_host: String,
}

impl SftpTransport {
    /// 从 keyring 构建，缺少任一必填字段即失败
    pub fn from_keyring(keyring: &SftpKeyring) -> Result<Self> {
        const SECTION: &str = "lochness_sync";
        Ok(Self {
            host: require(&keyring.host, SECTION, "HOST")?.to_string(),
            username: require(&keyring.username, SECTION, "USERNAME")?.to_string(),
            password: require(&keyring.password, SECTION, "PASSWORD")?.to_string(),
            path_in_host: require(&keyring.path_in_host, SECTION, "PATH_IN_HOST")?.to_string(),
            port: keyring.port.unwrap_or(DEFAULT_SSH_PORT),
        })
    }

    pub fn remote_path(&self, bundle_name: &str) -> String {
        format!("{}/{}", self.path_in_host.trim_end_matches('/'), bundle_name)
    }

    fn upload_blocking(
        addr: (String, u16),
        username: &str,
        password: &str,
        local: &Path,
        remote: &Path,
    ) -> std::result::Result<u64, String> {
        let tcp = TcpStream::connect((addr.0.as_str(), addr.1))
            .map_err(|e| format!("TCP 连接到 {}:{} 失败: {}", addr.0, addr.1, e))?;
        let mut sess = Session::new().map_err(|e| format!("创建 SSH 会话失败: {}", e))?;
        sess.set_tcp_stream(tcp);
        sess.set_timeout(SESSION_TIMEOUT_MS);
        sess.handshake()
            .map_err(|e| format!("SSH 握手失败: {}", e))?;
        sess.userauth_password(username, password)
            .map_err(|e| format!("认证失败: {}", e))?;

        let sftp = sess.sftp().map_err(|e| format!("打开 SFTP 通道失败: {}", e))?;
        let mut remote_file = sftp
            .create(remote)
            .map_err(|e| format!("创建远端文件 {} 失败: {}", remote.display(), e))?;
        let mut local_file =
            File::open(local).map_err(|e| format!("打开 {} 失败: {}", local.display(), e))?;

        let bytes = io::copy(&mut local_file, &mut remote_file)
            .map_err(|e| format!("写入远端文件失败: {}", e))?;
        debug!("已上传 {} 字节", bytes);
        Ok(bytes)
    }
}

#[async_trait]
impl BundleSink for SftpTransport {
    async fn push(&self, bundle: &Path) -> Result<String> {
        let remote = self.remote_path(&bundle_name(bundle)?);

        let addr = (self.host.clone(), self.port);
        let username = self.username.clone();
        let password = self.password.clone();
        let local = bundle.to_path_buf();
        let remote_path = PathBuf::from(&remote);

        tokio::task::spawn_blocking(move || {
            Self::upload_blocking(addr, &username, &password, &local, &remote_path)
        })
        .await
        .map_err(|e| SyncError::transport("sftp", e.to_string()))?
        .map_err(|e| SyncError::transport("sftp", e))?;

        Ok(format!("sftp://{}:{}{}", self.host, self.port, remote))
    }

    fn describe(&self) -> String {
        format!("sftp://{}@{}:{}{}", self.username, self.host, self.port, self.path_in_host)
    }
}

/// 直接复制到本地（共享挂载）目录
pub struct LocalDropSink {
    dir: PathBuf,
}

impl LocalDropSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl BundleSink for LocalDropSink {
    async fn push(&self, bundle: &Path) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.dir.join(bundle_name(bundle)?);
        tokio::fs::copy(bundle, &target).await?;
        Ok(format!("file://{}", target.display()))
    }

    fn describe(&self) -> String {
        format!("file://{}", self.dir.display())
    }
}
