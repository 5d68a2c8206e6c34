// invoice_status_sync/src/error.rs

//! 同步引擎的错误类型。
//!
//! 只有建立连接失败会以 `Err` 形式返回给 `connect()` 的调用方；
//! 传输层断线驱动重连策略，解码失败只记录日志，均不会以错误形式外抛。

use status_models::Topic;
use stomp_ws_utils::WsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// 在未连接状态下订阅。
    #[error("未连接到状态推送服务")]
    NotConnected,

    /// 已有一次连接尝试正在进行，本次请求被拒绝而不是排队。
    #[error("连接正在建立中")]
    ConnectionInProgress,

    /// 握手被服务端拒绝 (例如凭证无效)，携带服务端给出的原因。
    #[error("握手被拒绝: {0}")]
    HandshakeRejected(String),

    /// 在限定时间内没有收到握手应答。
    #[error("握手超时 ({0} 毫秒)")]
    HandshakeTimeout(u64),

    /// 传输层失败：无法建立连接，或连接在握手期间关闭。
    #[error("传输层错误: {0}")]
    Transport(String),

    /// 握手完成前连接已被主动断开，新建立的传输被丢弃。
    #[error("连接过程被 disconnect() 中止")]
    Aborted,

    /// 以通道方式订阅时，该主题已存在活动订阅。
    #[error("主题 {0} 已存在活动订阅")]
    AlreadySubscribed(Topic),

    /// 无法获取访问凭证。
    #[error("缺少访问凭证")]
    MissingCredential,

    /// 凭证中含有控制字符，无法安全地写入 CONNECT 头部。
    #[error("访问凭证包含非法的控制字符")]
    InvalidCredential,

    /// 负载无法解析为状态事件。
    #[error("状态消息解码失败: {0}")]
    Decode(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error(transparent)]
    Ws(#[from] WsError),
}

impl SyncError {
    /// 是否为传输层失败 (可由重连策略重试)。握手拒绝不属于此类。
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::HandshakeTimeout(_) | SyncError::Ws(_)
        )
    }
}
