// stomp_ws_utils/src/server/transport.rs

//! 服务端 WebSocket 监听、接受连接和握手逻辑。

use log::{error, info};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{WebSocketStream, accept_async};

use crate::error::WsError;

pub use crate::client::transport::{receive_event, send_event};

/// 经过 WebSocket 握手后的服务端 TCP 流。
pub type WsStream = WebSocketStream<TcpStream>;

/// 负责服务端的监听和连接接受。
pub struct ServerTransport;

impl ServerTransport {
    /// 绑定 `addr` 并开始接受连接，见 [`ServerTransport::serve`]。
    pub async fn start<F, Fut>(addr: SocketAddr, on_connect: F) -> Result<(), WsError>
    where
        F: Fn(WsStream, SocketAddr) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&addr).await?;
        Self::serve(listener, on_connect).await
    }

    /// 在已绑定的监听器上持续接受连接。
    ///
    /// 每个连接在独立的 Tokio 任务中完成 WebSocket 握手，成功后调用 `on_connect`。
    /// 单个连接握手失败只记录日志；只有监听器本身出错时才返回。
    pub async fn serve<F, Fut>(listener: TcpListener, on_connect: F) -> Result<(), WsError>
    where
        F: Fn(WsStream, SocketAddr) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        info!("WebSocket 服务器正在监听地址: {}", listener.local_addr()?);

        loop {
            match listener.accept().await {
                Ok((tcp_stream, peer_addr)) => {
                    info!("从 {} 接受了新的 TCP 连接", peer_addr);
                    let on_connect_callback = on_connect.clone();
                    tokio::spawn(async move {
                        match accept_async(tcp_stream).await {
                            Ok(ws_stream) => {
                                info!("与 {} 的 WebSocket 握手成功", peer_addr);
                                on_connect_callback(ws_stream, peer_addr).await;
                            }
                            Err(e) => {
                                error!("与 {} 的 WebSocket 握手失败: {}", peer_addr, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("接受 TCP 连接失败: {}。服务器将继续运行。", e);
                }
            }
        }
    }
}
