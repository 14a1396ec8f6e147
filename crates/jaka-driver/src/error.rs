//! 驱动层错误类型定义

use jaka_protocol::ProtocolError;
use std::io;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// Socket 错误（连接失败、断开、复位）
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// 控制器返回非零 `errorCode`
    ///
    /// `payload` 为原始响应文本。
    #[error("Controller rejected command (errorCode {code}): {payload}")]
    Protocol { code: i32, payload: String },

    /// 响应或反馈帧格式错误
    #[error("Parse error: {0}")]
    Parse(#[from] ProtocolError),

    /// 等待响应超时
    #[error("Operation timeout")]
    Timeout,

    /// 尚未调用 `login()`
    #[error("Not connected")]
    NotConnected,

    /// 尚未收到任何反馈帧
    #[error("No feedback frame received yet")]
    NoFeedback,

    /// 无效输入
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl DriverError {
    /// 是否为超时错误
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout)
    }

    /// 控制器错误码（仅 `Protocol` 变体）
    pub fn code(&self) -> Option<i32> {
        match self {
            DriverError::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}
