// invoice_status_sync/src/config.rs

//! 状态同步引擎的配置管理模块。
//!
//! 配置保存在 JSON 文件 (`status_sync_settings.json`) 中：
//! 文件不存在时写入默认配置并使用之；文件损坏时 `load_config` 返回错误，
//! `init_config` 则记录警告并回退到默认配置。部分字段可由环境变量覆盖。

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::address::resolve_endpoint;
use crate::error::SyncError;

/// 默认配置文件名。
pub const CONFIG_FILE_NAME: &str = "status_sync_settings.json";
/// 覆盖 `ws_url` 的环境变量。
pub const ENV_WS_URL: &str = "INVOICE_SYNC_WS_URL";
/// 覆盖 `secure_context` 的环境变量 (`true`/`false`/`1`/`0`)。
pub const ENV_SECURE_CONTEXT: &str = "INVOICE_SYNC_SECURE_CONTEXT";

/// 引擎配置。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// 推送端 WebSocket 地址；为空时使用默认基地址加 `/ws`。
    pub ws_url: Option<String>,
    /// 宿主是否处于安全源 (https)。为真时端点协议会被升级为 wss。
    pub secure_context: bool,
    /// 线性退避的基准间隔 (毫秒)：第 n 次重连等待 n × 基准。
    pub reconnect_base_delay_ms: u64,
    /// 连续重连的最大次数，超过后停止重试并停留在 error 状态。
    pub max_reconnect_attempts: u32,
    /// 等待 CONNECTED 应答的超时时间 (毫秒)。
    pub handshake_timeout_ms: u64,
    /// 本端发送心跳的间隔 (毫秒)，0 表示不发送。
    pub heartbeat_outgoing_ms: u64,
    /// 期望服务端发送心跳的间隔 (毫秒)，0 表示不检测。
    pub heartbeat_incoming_ms: u64,
    /// 日志级别：trace / debug / info / warn / error。
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            secure_context: false,
            reconnect_base_delay_ms: 5000,
            max_reconnect_attempts: 5,
            handshake_timeout_ms: 10_000,
            heartbeat_outgoing_ms: 10_000,
            heartbeat_incoming_ms: 10_000,
            log_level: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// 解析后的 WebSocket 端点。
    pub fn endpoint(&self) -> Url {
        resolve_endpoint(self.ws_url.as_deref(), self.secure_context)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// 日志级别字符串转换为 `log::LevelFilter`，无法识别时按 info 处理。
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }

    /// 用环境变量覆盖部分字段。
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            env::var(ENV_WS_URL).ok(),
            env::var(ENV_SECURE_CONTEXT).ok(),
        );
    }

    fn apply_overrides(&mut self, ws_url: Option<String>, secure_context: Option<String>) {
        if let Some(url) = ws_url.filter(|u| !u.trim().is_empty()) {
            info!("[配置模块] 使用环境变量 {} 覆盖 ws_url: {}", ENV_WS_URL, url);
            self.ws_url = Some(url);
        }
        if let Some(raw) = secure_context {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.secure_context = true,
                "0" | "false" | "no" => self.secure_context = false,
                other => warn!(
                    "[配置模块] 环境变量 {} 的值 '{}' 无法识别，已忽略。",
                    ENV_SECURE_CONTEXT, other
                ),
            }
        }
    }
}

/// 从指定路径加载配置；文件不存在时写入并返回默认配置。
pub fn load_config(path: &Path) -> Result<SyncConfig, SyncError> {
    if path.exists() {
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("读取配置文件 '{}' 失败: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            SyncError::Config(format!("解析配置文件 '{}' 的内容失败: {}", path.display(), e))
        })
    } else {
        info!(
            "[配置模块] 配置文件 '{}' 未找到，将使用默认配置参数创建新文件。",
            path.display()
        );
        let default_config = SyncConfig::default();
        save_config(path, &default_config)?;
        Ok(default_config)
    }
}

/// 把配置以格式化 JSON 写入文件，必要时创建父目录。
pub fn save_config(path: &Path, config: &SyncConfig) -> Result<(), SyncError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                SyncError::Config(format!("创建配置目录 '{}' 失败: {}", parent.display(), e))
            })?;
        }
    }
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| SyncError::Config(format!("序列化配置到 JSON 字符串失败: {}", e)))?;
    fs::write(path, content).map_err(|e| {
        SyncError::Config(format!("写入配置文件 '{}' 失败: {}", path.display(), e))
    })?;
    info!("[配置模块] 配置已保存至: '{}'", path.display());
    Ok(())
}

/// 默认配置文件路径：当前工作目录下的 `status_sync_settings.json`。
pub fn default_config_path() -> PathBuf {
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}

/// 加载配置并应用环境变量覆盖；任何失败都回退到默认配置。
pub fn init_config(path: &Path) -> SyncConfig {
    let mut config = match load_config(path) {
        Ok(config) => {
            info!("[配置模块] 应用配置已成功初始化 (从 {} 加载)。", path.display());
            config
        }
        Err(e) => {
            error!("[配置模块] 加载配置失败: {}。将使用默认配置。", e);
            SyncConfig::default()
        }
    };
    config.apply_env_overrides();
    config
}
