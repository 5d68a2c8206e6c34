// invoice_status_sync/src/address.rs

//! 推送频道地址解析。
//!
//! 根据配置得出 WebSocket 端点，并保证在安全上下文中不会出现混合内容：
//! 宿主处于安全源时，任何不安全协议都会升级为对应的安全协议，反之绝不降级。

use log::warn;
use url::Url;

/// 未配置端点时使用的默认服务基地址。
pub const DEFAULT_API_BASE: &str = "http://localhost:8080";
/// 拼接在服务基地址之后的固定路径。
pub const WS_PATH_SUFFIX: &str = "/ws";

/// 解析出具体的 WebSocket 端点。纯函数，不会失败。
///
/// - `configured` 为完整的端点地址；缺省或无法解析时回退到 `DEFAULT_API_BASE + WS_PATH_SUFFIX`。
/// - `http` / `https` 分别映射为 `ws` / `wss`。
/// - `secure_context` 为真时 `ws` 升级为 `wss`；已经是 `wss` 的地址保持不变。
pub fn resolve_endpoint(configured: Option<&str>, secure_context: bool) -> Url {
    let candidate = configured
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .and_then(|raw| match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https" | "ws" | "wss") => Some(url),
            Ok(url) => {
                warn!("[地址解析] 不支持的协议 '{}'，回退到默认地址。", url.scheme());
                None
            }
            Err(e) => {
                warn!("[地址解析] 配置的端点 '{}' 无法解析 ({})，回退到默认地址。", raw, e);
                None
            }
        });

    let mut endpoint = candidate.unwrap_or_else(default_endpoint);

    let target_scheme = match (endpoint.scheme(), secure_context) {
        ("http", false) => "ws",
        ("http", true) | ("https", _) | ("ws", true) => "wss",
        _ => return endpoint,
    };
    // http/https/ws/wss 同属 special scheme，相互切换不会失败
    let _ = endpoint.set_scheme(target_scheme);
    endpoint
}

fn default_endpoint() -> Url {
    Url::parse(DEFAULT_API_BASE)
        .and_then(|base| base.join(WS_PATH_SUFFIX))
        .expect("内置的默认端点必须是合法 URL")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoint_when_unconfigured() {
        assert_eq!(resolve_endpoint(None, false).as_str(), "ws://localhost:8080/ws");
        assert_eq!(resolve_endpoint(Some("   "), false).as_str(), "ws://localhost:8080/ws");
        assert_eq!(resolve_endpoint(None, true).as_str(), "wss://localhost:8080/ws");
    }

    #[test]
    fn test_http_schemes_map_to_websocket_schemes() {
        assert_eq!(
            resolve_endpoint(Some("http://api.example.com/ws"), false).as_str(),
            "ws://api.example.com/ws"
        );
        assert_eq!(
            resolve_endpoint(Some("https://api.example.com/ws"), false).as_str(),
            "wss://api.example.com/ws"
        );
    }

    #[test]
    /// 安全上下文下升级协议，非安全上下文下不会把 wss 降级。
    fn test_secure_context_upgrades_never_downgrades() {
        assert_eq!(
            resolve_endpoint(Some("ws://api.example.com:9000/ws"), true).as_str(),
            "wss://api.example.com:9000/ws"
        );
        assert_eq!(
            resolve_endpoint(Some("wss://api.example.com/ws"), false).as_str(),
            "wss://api.example.com/ws"
        );
        assert_eq!(
            resolve_endpoint(Some("ws://api.example.com/ws"), false).as_str(),
            "ws://api.example.com/ws"
        );
    }

    #[test]
    fn test_invalid_or_unsupported_falls_back_to_default() {
        assert_eq!(resolve_endpoint(Some("not a url"), false).as_str(), "ws://localhost:8080/ws");
        assert_eq!(
            resolve_endpoint(Some("ftp://files.example.com/ws"), true).as_str(),
            "wss://localhost:8080/ws"
        );
    }
}
