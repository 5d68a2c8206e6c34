// stomp_ws_utils/src/message.rs

//! STOMP 1.2 帧的结构定义与编解码。
//!
//! 每个 WebSocket 文本消息承载一个 STOMP 帧：
//! `COMMAND\n` + 若干 `name:value\n` + 空行 + 正文 + `\0`。
//! 只包含换行符的文本消息是心跳。除 `CONNECT` / `CONNECTED` 外，
//! 头部的名和值都按 STOMP 1.2 规则转义 (`\\`、`\n`、`\r`、`\c`)。

use std::fmt;

use crate::error::WsError;

/// 标准头部名称。
pub mod headers {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const AUTHORIZATION: &str = "Authorization";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const DESTINATION: &str = "destination";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const RECEIPT: &str = "receipt";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const VERSION: &str = "version";
}

/// 本库协商的 STOMP 协议版本。
pub const STOMP_VERSION: &str = "1.2";

/// STOMP 命令。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StompCommand {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl StompCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            StompCommand::Connect => "CONNECT",
            StompCommand::Stomp => "STOMP",
            StompCommand::Connected => "CONNECTED",
            StompCommand::Send => "SEND",
            StompCommand::Subscribe => "SUBSCRIBE",
            StompCommand::Unsubscribe => "UNSUBSCRIBE",
            StompCommand::Ack => "ACK",
            StompCommand::Nack => "NACK",
            StompCommand::Begin => "BEGIN",
            StompCommand::Commit => "COMMIT",
            StompCommand::Abort => "ABORT",
            StompCommand::Disconnect => "DISCONNECT",
            StompCommand::Message => "MESSAGE",
            StompCommand::Receipt => "RECEIPT",
            StompCommand::Error => "ERROR",
        }
    }

    pub fn parse(raw: &str) -> Option<StompCommand> {
        let command = match raw {
            "CONNECT" => StompCommand::Connect,
            "STOMP" => StompCommand::Stomp,
            "CONNECTED" => StompCommand::Connected,
            "SEND" => StompCommand::Send,
            "SUBSCRIBE" => StompCommand::Subscribe,
            "UNSUBSCRIBE" => StompCommand::Unsubscribe,
            "ACK" => StompCommand::Ack,
            "NACK" => StompCommand::Nack,
            "BEGIN" => StompCommand::Begin,
            "COMMIT" => StompCommand::Commit,
            "ABORT" => StompCommand::Abort,
            "DISCONNECT" => StompCommand::Disconnect,
            "MESSAGE" => StompCommand::Message,
            "RECEIPT" => StompCommand::Receipt,
            "ERROR" => StompCommand::Error,
            _ => return None,
        };
        Some(command)
    }

    /// CONNECT 与 CONNECTED 帧的头部不做转义 (兼容 STOMP 1.0 服务端)。
    fn escapes_headers(self) -> bool {
        !matches!(self, StompCommand::Connect | StompCommand::Connected)
    }
}

impl fmt::Display for StompCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个 STOMP 帧。
///
/// 头部按出现顺序保存；同名头部重复时，按 STOMP 1.2 规定只有第一次出现的值生效。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: StompCommand,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// 追加一个头部 (构建器风格)。
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// 设置正文 (构建器风格)。
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// 读取头部值，重复头部取第一次出现的值。
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// 构造客户端握手帧。`authorization` 为完整的头部值，例如 `Bearer xxx`。
    pub fn connect(host: &str, heart_beat: HeartBeat, authorization: Option<&str>) -> Self {
        let mut frame = StompFrame::new(StompCommand::Connect)
            .header(headers::ACCEPT_VERSION, STOMP_VERSION)
            .header(headers::HOST, host)
            .header(headers::HEART_BEAT, heart_beat.to_string());
        if let Some(value) = authorization {
            frame = frame.header(headers::AUTHORIZATION, value);
        }
        frame
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        StompFrame::new(StompCommand::Subscribe)
            .header(headers::ID, id)
            .header(headers::DESTINATION, destination)
    }

    pub fn unsubscribe(id: &str) -> Self {
        StompFrame::new(StompCommand::Unsubscribe).header(headers::ID, id)
    }

    pub fn disconnect() -> Self {
        StompFrame::new(StompCommand::Disconnect)
    }

    /// 把帧编码为一条 WebSocket 文本消息。
    ///
    /// 正文非空且未显式给出 `content-length` 时自动补上 (按 UTF-8 字节数)。
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get_header(headers::CONTENT_LENGTH).is_none() {
            out.push_str(headers::CONTENT_LENGTH);
            out.push(':');
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// 从一条 WebSocket 文本消息解码出帧。
    ///
    /// 帧前的换行 (心跳残留) 会被跳过；帧必须以 `\0` 结束，其后只允许换行。
    pub fn decode(text: &str) -> Result<StompFrame, WsError> {
        let text = text.trim_start_matches(['\r', '\n']);
        let (command_line, mut rest) = split_line(text)
            .ok_or_else(|| WsError::FrameDecode("缺少命令行".to_string()))?;
        let command = StompCommand::parse(command_line).ok_or_else(|| {
            WsError::FrameDecode(format!("未知的 STOMP 命令 '{}'", command_line))
        })?;
        let unescape = command.escapes_headers();

        let mut parsed_headers = Vec::new();
        loop {
            let (line, remaining) = split_line(rest)
                .ok_or_else(|| WsError::FrameDecode("头部区域未以空行结束".to_string()))?;
            rest = remaining;
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                WsError::FrameDecode(format!("头部行缺少冒号: '{}'", line))
            })?;
            if unescape {
                parsed_headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                parsed_headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = parsed_headers
            .iter()
            .find(|(k, _)| k == headers::CONTENT_LENGTH)
            .map(|(_, v)| {
                v.trim().parse::<usize>().map_err(|_| {
                    WsError::FrameDecode(format!("content-length 非法: '{}'", v))
                })
            })
            .transpose()?;

        let (body, trailer) = match content_length {
            Some(len) => {
                let body = rest.get(..len).ok_or_else(|| {
                    WsError::FrameDecode(format!("正文长度不足 content-length={}", len))
                })?;
                let trailer = &rest[len..];
                let trailer = trailer.strip_prefix('\0').ok_or_else(|| {
                    WsError::FrameDecode("正文之后缺少 NUL 结束符".to_string())
                })?;
                (body, trailer)
            }
            None => {
                let end = rest
                    .find('\0')
                    .ok_or_else(|| WsError::FrameDecode("帧缺少 NUL 结束符".to_string()))?;
                (&rest[..end], &rest[end + 1..])
            }
        };
        if !trailer.chars().all(|c| c == '\n' || c == '\r') {
            return Err(WsError::FrameDecode("NUL 结束符之后存在多余内容".to_string()));
        }

        Ok(StompFrame {
            command,
            headers: parsed_headers,
            body: body.to_string(),
        })
    }
}

impl fmt::Display for StompFrame {
    /// 日志用的简短描述，不包含正文。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        for key in [headers::ID, headers::SUBSCRIPTION, headers::DESTINATION] {
            if let Some(value) = self.get_header(key) {
                write!(f, " {}={}", key, value)?;
            }
        }
        Ok(())
    }
}

/// 线路上的一条 WebSocket 文本消息：一个帧或一次心跳。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Frame(StompFrame),
    Heartbeat,
}

impl WireEvent {
    pub fn from_text(text: &str) -> Result<WireEvent, WsError> {
        if text.chars().all(|c| c == '\n' || c == '\r') {
            return Ok(WireEvent::Heartbeat);
        }
        StompFrame::decode(text).map(WireEvent::Frame)
    }

    pub fn to_text(&self) -> String {
        match self {
            WireEvent::Frame(frame) => frame.encode(),
            WireEvent::Heartbeat => "\n".to_string(),
        }
    }
}

/// `heart-beat` 头部：`<能发送的最小间隔>,<希望收到的间隔>`，单位毫秒，0 表示不支持。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl HeartBeat {
    pub fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    /// 解析 `cx,cy`；格式错误时返回 `None`。
    pub fn parse(raw: &str) -> Option<HeartBeat> {
        let (out, inc) = raw.split_once(',')?;
        Some(HeartBeat {
            outgoing_ms: out.trim().parse().ok()?,
            incoming_ms: inc.trim().parse().ok()?,
        })
    }

    /// 按 STOMP 1.2 协商实际间隔，返回 (本端发送间隔, 期望对端发送间隔)。
    ///
    /// `self` 是本端在 CONNECT 中声明的值，`peer` 是对端在 CONNECTED 中声明的值。
    pub fn negotiate(self, peer: HeartBeat) -> (u64, u64) {
        let outgoing = if self.outgoing_ms == 0 || peer.incoming_ms == 0 {
            0
        } else {
            self.outgoing_ms.max(peer.incoming_ms)
        };
        let incoming = if self.incoming_ms == 0 || peer.outgoing_ms == 0 {
            0
        } else {
            self.incoming_ms.max(peer.outgoing_ms)
        };
        (outgoing, incoming)
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

/// 切出一行 (兼容 `\r\n`)，返回 (行内容, 剩余部分)。
fn split_line(input: &str) -> Option<(&str, &str)> {
    let idx = input.find('\n')?;
    let line = &input[..idx];
    Some((line.strip_suffix('\r').unwrap_or(line), &input[idx + 1..]))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, WsError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(WsError::FrameDecode(format!(
                    "头部包含非法转义序列 '\\{}'",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}
