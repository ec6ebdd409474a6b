use crate::config::PipelineConfig;
use crate::core::{ScanScope, SendOptions};
use crate::transport::TransportKind;
use anyhow::Context;
use clap::Args;

#[derive(Debug, Args)]
pub struct SendArgs {
    /// 传输方式
    #[arg(long, value_enum)]
    pub transport: TransportKind,

    /// 同时传输 PROTECTED
    #[arg(long)]
    pub full: bool,

    /// 对象存储方式只同步这些研究
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub studies: Vec<String>,

    /// 对象存储方式启用的数据源
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub sources: Vec<String>,
}

impl SendArgs {
    pub fn options(&self) -> SendOptions {
        SendOptions {
            scope: ScanScope::from_restricted_only(self.full),
            studies: self.studies.clone(),
            sources: self.sources.clone(),
        }
    }
}

pub async fn run(config: PipelineConfig, args: &SendArgs) -> anyhow::Result<()> {
    let engine = super::engine(config).await?;
    let strategy = engine
        .build_strategy(args.transport)
        .await
        .context("构建传输方式失败")?;

    let report = engine
        .send(&strategy, &args.options())
        .await
        .with_context(|| format!("发送失败 ({})", args.transport))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        send: SendArgs,
    }

    #[test]
    fn test_parse_send_args() {
        let cli = Cli::parse_from([
            "send",
            "--transport",
            "s3",
            "--full",
            "--studies",
            "StudyA,StudyB",
            "--sources",
            "box",
            "xnat",
        ]);
        assert_eq!(cli.send.transport, TransportKind::ObjectStore);
        let options = cli.send.options();
        assert_eq!(options.scope, ScanScope::Full);
        assert_eq!(options.studies, vec!["StudyA", "StudyB"]);
        assert_eq!(options.sources, vec!["box", "xnat"]);
    }
}
