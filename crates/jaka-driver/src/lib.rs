//! 驱动层
//!
//! JAKA 控制器的 TCP 通信：
//! - [`ProtocolClient`]：命令/响应通道（默认端口 10001）
//! - [`FeedbackStream`]：状态反馈通道（默认端口 10000），后台线程读取，`ArcSwap` 无锁获取最新帧
//! - [`RobotTransport`]：控制层依赖的能力 trait
//! - 钩子系统：反馈帧回调
//!
//! 启用 `mock` feature 后提供 `MockRobot`，用于无硬件测试。

mod client;
mod config;
mod error;
pub mod feedback;
pub mod hooks;
mod join;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod transport;

pub use client::ProtocolClient;
pub use config::ConnectionConfig;
pub use error::DriverError;
pub use feedback::{FeedbackStats, FeedbackStream};
pub use hooks::{FeedbackCallback, HookManager};
pub use join::JoinTimeout;
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockFault, MockRobot};
pub use transport::RobotTransport;
