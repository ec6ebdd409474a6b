use clap::{Parser, Subcommand};
use phoenix_sync::commands::{self, ledger::LedgerArgs, receive::ReceiveArgs, send::SendArgs};
use phoenix_sync::logging::init_logging;
use phoenix_sync::PipelineConfig;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "phoenix-sync", version, about = "PHOENIX 站点间同步与传输台账")]
struct Cli {
    /// 配置文件（JSON）
    #[arg(long)]
    config: PathBuf,

    /// 输出调试日志
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 发送增量数据
    Send(SendArgs),
    /// 接收投递目录中的压缩包
    Receive(ReceiveArgs),
    /// 从上传日志构建传输台账
    Ledger(LedgerArgs),
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = PipelineConfig::load(&cli.config)?;
    init_logging(&config.log, &config.log_dir(), cli.debug);

    match &cli.command {
        Command::Send(args) => commands::send::run(config, args).await,
        Command::Receive(args) => commands::receive::run(config, args).await,
        Command::Ledger(args) => commands::ledger::run(config, args).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("错误: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
