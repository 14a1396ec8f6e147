//! 连接配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 控制器连接配置
///
/// # Example
///
/// ```
/// use jaka_driver::ConnectionConfig;
///
/// // 默认：10.5.5.100，命令端口 10001，反馈端口 10000，超时 60s
/// let config = ConnectionConfig::default();
/// assert_eq!(config.command_port, 10001);
///
/// let local = ConnectionConfig {
///     host: "127.0.0.1".to_string(),
///     timeout_ms: 500,
///     ..Default::default()
/// };
/// assert_eq!(local.timeout().as_millis(), 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// 控制器地址
    pub host: String,
    /// 命令/响应端口
    pub command_port: u16,
    /// 状态反馈端口
    pub feedback_port: u16,
    /// Socket 超时（连接和读取），毫秒
    pub timeout_ms: u64,
    /// 断线重连间隔，毫秒
    pub reconnect_interval_ms: u64,
    /// 单次读取缓冲区大小
    pub recv_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "10.5.5.100".to_string(),
            command_port: 10001,
            feedback_port: 10000,
            timeout_ms: 60_000,
            reconnect_interval_ms: 1_000,
            recv_buffer_size: 1024,
        }
    }
}

impl ConnectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}
