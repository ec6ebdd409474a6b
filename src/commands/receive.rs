use crate::config::PipelineConfig;
use anyhow::Context;
use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct ReceiveArgs {
    /// 投递目录，默认取 keyring 中的 PATH_IN_HOST
    #[arg(long)]
    pub drop_dir: Option<PathBuf>,
}

pub async fn run(config: PipelineConfig, args: &ReceiveArgs) -> anyhow::Result<()> {
    let engine = super::engine(config).await?;
    let report = match &args.drop_dir {
        Some(dir) => engine.receive_from(dir.clone()).await,
        None => engine.receive().await,
    }
    .context("接收失败")?;

    println!("received {} file(s)", report.len());
    Ok(())
}
