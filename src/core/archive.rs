//! 打包 / 解包
//!
//! 包内路径与传入的相对路径完全一致（`PHOENIX/GENERAL/...`）。源文件按
//! `<根目录上级>/<相对路径>` 显式解析，不切换进程工作目录。

use crate::core::layout::ArchiveLayout;
use crate::error::{Result, SyncError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 将相对路径列表打包为 tar.gz，列表为空时生成一个合法的空包
pub fn archive(layout: &ArchiveLayout, relative_paths: &[PathBuf], out_path: &Path) -> Result<()> {
    let base = layout.parent()?;

    let file = File::create(out_path)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for rel in relative_paths {
        if rel.is_absolute() {
            return Err(SyncError::Config(format!(
                "打包路径必须是相对路径: {}",
                rel.display()
            )));
        }
        debug!("加入压缩包: {}", rel.display());
        builder.append_path_with_name(base.join(rel), rel)?;
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    info!(
        "已生成压缩包 {} ({} 个文件)",
        out_path.display(),
        relative_paths.len()
    );
    Ok(())
}

/// 解包到指定目录，返回包内的文件条目（相对路径）
pub fn extract(bundle: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let reader = BufReader::new(File::open(bundle)?);
    let gzipped = bundle
        .to_str()
        .map_or(false, |name| name.ends_with(".gz") || name.ends_with(".tgz"));

    let mut entries = Vec::new();
    if gzipped {
        unpack(tar::Archive::new(GzDecoder::new(reader)), dest_dir, &mut entries)?;
    } else {
        unpack(tar::Archive::new(reader), dest_dir, &mut entries)?;
    }

    debug!("解包 {} → {} 个文件", bundle.display(), entries.len());
    Ok(entries)
}

fn unpack<R: std::io::Read>(
    mut archive: tar::Archive<R>,
    dest_dir: &Path,
    entries: &mut Vec<PathBuf>,
) -> Result<()> {
    archive.set_preserve_mtime(true);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let is_file = entry.header().entry_type().is_file();
        // unpack_in 拒绝 .. 等越界路径
        if entry.unpack_in(dest_dir)? && is_file {
            entries.push(path);
        }
    }
    Ok(())
}
