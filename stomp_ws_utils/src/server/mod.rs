// stomp_ws_utils/src/server/mod.rs

//! WebSocket 服务端模块。
//!
//! 同步引擎面对的推送端是外部系统；这里的服务端传输层用于在本地
//! 模拟一个推送端，供集成测试与演示使用。

pub mod transport;
