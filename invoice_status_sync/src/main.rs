//! `invoice-status-monitor`：在终端中实时关注一张发票或一家公司的核验状态。

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser};
use invoice_status_sync::config::{self, SyncConfig};
use invoice_status_sync::{
    ConnectionManager, ConnectionState, StaticToken, StatusStateNotifier, TerminalStatusTracker,
    Topic,
};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Parser, Debug)]
#[command(name = "invoice-status-monitor", version, about = "实时关注发票核验状态")]
struct Cli {
    /// 访问凭证 (Bearer token)。
    #[arg(long, env = "INVOICE_SYNC_TOKEN", hide_env_values = true)]
    token: String,

    #[command(flatten)]
    target: TargetArgs,

    /// 配置文件路径，默认为当前目录下的 status_sync_settings.json。
    #[arg(long)]
    config: Option<PathBuf>,
}

/// 关注对象：发票与公司二选一，且必须指定其一。
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct TargetArgs {
    /// 关注的发票 id。
    #[arg(long)]
    invoice: Option<i64>,

    /// 关注的公司 id (该公司名下所有发票)。
    #[arg(long)]
    company: Option<i64>,
}

impl TargetArgs {
    fn topic(&self) -> Option<Topic> {
        self.invoice
            .map(Topic::Invoice)
            .or(self.company.map(Topic::Company))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let target = cli
        .target
        .topic()
        .context("必须指定 --invoice 或 --company 之一")?;
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let settings: SyncConfig = config::init_config(&config_path);

    env_logger::Builder::new()
        .filter_level(settings.level_filter())
        .format_timestamp_millis()
        .init();
    info!("[主程序] 日志系统已初始化，级别: {}", settings.log_level);

    let manager = ConnectionManager::new(&settings);
    info!("[主程序] 推送端点: {}，关注主题: {}", manager.endpoint(), target);

    let tracker = Arc::new(Mutex::new(TerminalStatusTracker::new()));
    let notifier = {
        let tracker = tracker.clone();
        StatusStateNotifier::watch(
            manager.clone(),
            StaticToken(cli.token.clone()),
            Some(target),
            move |message| {
                println!(
                    "{} 发票 {} -> {}{}{}",
                    message
                        .timestamp_utc()
                        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                        .unwrap_or_else(|| message.timestamp.to_string()),
                    message.invoice_id,
                    message.status,
                    message
                        .tx_id
                        .as_deref()
                        .map(|tx| format!(" (txId: {})", tx))
                        .unwrap_or_default(),
                    message
                        .error_message
                        .as_deref()
                        .map(|e| format!(" (错误: {})", e))
                        .unwrap_or_default(),
                );
                let reached = match tracker.lock() {
                    Ok(mut tracker) => tracker.observe(&message),
                    Err(poisoned) => poisoned.into_inner().observe(&message),
                };
                if let Some(status) = reached {
                    info!("[主程序] 发票 {} 已到达终态 {}", message.invoice_id, status);
                }
            },
        )
        .await
    };

    if notifier.connection_state() != ConnectionState::Connected {
        warn!(
            "[主程序] 初始连接未建立 (状态: {})，可检查凭证与端点后重试。",
            notifier.connection_state()
        );
    }

    let mut updates = manager.state_updates();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("监听 Ctrl-C 信号失败")?;
                info!("[主程序] 收到 Ctrl-C，正在断开连接...");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *updates.borrow_and_update();
                if state == ConnectionState::Error && manager.reconnect_attempt() >= manager.max_reconnect_attempts() {
                    warn!("[主程序] 重连次数已用尽，连接停留在 error 状态。按 Ctrl-C 退出。");
                }
            }
        }
    }

    drop(notifier);
    manager.disconnect();
    info!("[主程序] 已退出。");
    Ok(())
}
