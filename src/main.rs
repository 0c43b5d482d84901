//! Stream Notify Center CLI
//!
//! 通知引擎的命令行外壳：回放事件流、查看与清理持久化的通知历史。

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use stream_notify_center::{
    DeliveryRouter, EngineConfig, FileSlot, Notification, NotificationEngine, NotificationSink,
    SendResult, SnapshotStore,
};

#[derive(Parser)]
#[command(name = "snc")]
#[command(about = "Stream Notify Center - 直播客户端通知聚合引擎")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 从 stdin 读取 JSONL 事件流并运行引擎（EOF 时停机）
    Ingest {
        /// Dry-run 模式（接收器只记录不投递）
        #[arg(long)]
        dry_run: bool,
    },
    /// 查看持久化的通知历史
    History {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
        /// 最多显示 N 条
        #[arg(long, short, default_value = "20")]
        limit: usize,
    },
    /// 清空持久化的通知历史
    Clear,
}

/// 把每条规范化通知打印到终端的接收器
struct StdoutSink;

impl NotificationSink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    fn deliver(&self, notification: &Notification) -> Result<SendResult> {
        println!("{}", notification.brief());
        Ok(SendResult::Sent)
    }
}

fn snapshot_store() -> SnapshotStore {
    SnapshotStore::new(Arc::new(FileSlot::new(FileSlot::default_dir())))
}

async fn run_ingest(dry_run: bool) -> Result<()> {
    let slot = Arc::new(FileSlot::new(FileSlot::default_dir()));
    let mut router = DeliveryRouter::new().with_dry_run(dry_run);
    router.register_sink(Arc::new(StdoutSink));

    let (engine, handle) = NotificationEngine::new(EngineConfig::default(), slot);
    let engine = engine.with_router(router);
    let worker = tokio::spawn(engine.run());

    let ingestor = handle.ingestor();
    let source = ingestor.subscribe("stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        source.push_raw(&line);
    }

    // EOF：按停机顺序强制 flush 并落盘
    handle.shutdown().await;
    let _ = worker.await;
    Ok(())
}

fn run_history(json: bool, limit: usize) -> Result<()> {
    let entries = snapshot_store().load();
    let shown = &entries[..entries.len().min(limit)];

    if json {
        println!("{}", serde_json::to_string_pretty(shown)?);
        return Ok(());
    }

    if shown.is_empty() {
        println!("暂无通知历史");
        return Ok(());
    }

    for entry in shown {
        let marker = if entry.read { " " } else { "●" };
        println!(
            "{} {} [{}] {}",
            marker,
            entry.timestamp.format("%m-%d %H:%M"),
            entry.kind(),
            entry.brief()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 控制日志级别，默认 info
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stream_notify_center=info,snc=info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest { dry_run } => run_ingest(dry_run).await?,
        Commands::History { json, limit } => run_history(json, limit)?,
        Commands::Clear => {
            snapshot_store().clear();
            println!("✅ 已清空通知历史");
        }
    }
    Ok(())
}
