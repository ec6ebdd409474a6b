use crate::config::PipelineConfig;
use crate::core::LedgerUpdate;
use clap::Args;

#[derive(Debug, Args)]
pub struct LedgerArgs {
    /// 忽略已有台账，从日志整体重建
    #[arg(long)]
    pub rewrite: bool,
}

pub async fn run(config: PipelineConfig, args: &LedgerArgs) -> anyhow::Result<()> {
    let engine = super::engine(config).await?;
    match engine.update_ledger(args.rewrite)? {
        LedgerUpdate::NoNewData => println!("no new data"),
        LedgerUpdate::Appended(n) => println!(
            "{} row(s) written to {}",
            n,
            engine.config().transfer_ledger_path().display()
        ),
    }
    Ok(())
}
