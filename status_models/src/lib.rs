//! `status_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了发票核验状态同步链路上共享的数据结构：
//! - **通用枚举 (`enums`)**: 发票提交给税务核验机构后的状态码 `StatusCode`。
//! - **WebSocket 消息负载 (`ws_payloads`)**: 推送端发布的状态事件 `StatusMessage`。
//! - **主题 (`topics`)**: 单张发票 / 单个公司的状态推送频道 `Topic`。
//!
//! 所有模型都派生 `Serialize`、`Deserialize`、`Debug`、`Clone`，
//! 字段拼写与推送端 JSON 保持一致 (camelCase / SCREAMING_SNAKE_CASE)。

pub mod enums;
pub mod topics;
pub mod ws_payloads;

pub use enums::StatusCode;
pub use topics::Topic;
pub use ws_payloads::StatusMessage;
